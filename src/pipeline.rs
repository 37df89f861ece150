use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::ai::{ImageClassification, Summarizer, VisionClassifier};
use crate::assets::AssetWriter;
use crate::config::PipelineConfig;
use crate::parser::records::drop_small_images;
use crate::parser::{segment, BlockKind, RawExtractionRecord, Section};

/// External AI collaborators, constructed once and shared.
#[derive(Clone)]
pub struct AiServices {
    pub classifier: Arc<dyn VisionClassifier>,
    pub summarizer: Arc<dyn Summarizer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub records: usize,
    pub small_images_dropped: usize,
    pub sections: usize,
    pub images_classified: usize,
    pub images_dropped: usize,
    pub assets_written: usize,
    pub sections_summarized: usize,
}

pub struct ProcessedDocument {
    pub sections: Vec<Section>,
    pub stats: PipelineStats,
}

/// records → filter → segment → classify images → write assets → summarize.
pub async fn process_records(
    records: Vec<RawExtractionRecord>,
    config: &PipelineConfig,
    ai: Option<&AiServices>,
    assets: Option<&AssetWriter>,
) -> Result<ProcessedDocument> {
    let mut stats = PipelineStats { records: records.len(), ..Default::default() };

    let records = drop_small_images(records, config.min_image_bytes);
    stats.small_images_dropped = stats.records - records.len();

    let mut sections = segment(records, &config.segmenter)?;
    if let Some(max) = config.max_sections {
        sections.truncate(max);
    }
    stats.sections = sections.len();
    info!("Segmented {} records into {} sections", stats.records, stats.sections);

    if let Some(ai) = ai {
        let (classified, dropped) =
            classify_images(&mut sections, Arc::clone(&ai.classifier), config.classify_concurrency)
                .await?;
        stats.images_classified = classified;
        stats.images_dropped = dropped;
    }

    if let Some(writer) = assets {
        stats.assets_written = writer.write_sections(&mut sections)?;
        info!("Wrote {} assets to {}", stats.assets_written, writer.dir().display());
    }

    if let Some(ai) = ai {
        stats.sections_summarized = summarize_sections(&mut sections, ai.summarizer.as_ref()).await?;
    }

    Ok(ProcessedDocument { sections, stats })
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Classify every image block concurrently and merge results back by
/// (section index, block order). Unimportant images are dropped and block
/// orders renumbered. Returns (classified, dropped).
pub async fn classify_images(
    sections: &mut [Section],
    classifier: Arc<dyn VisionClassifier>,
    concurrency: usize,
) -> Result<(usize, usize)> {
    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (tx, mut rx) = mpsc::channel::<((usize, usize), ImageClassification)>(concurrency * 2);

    let mut pending = Vec::new();
    for (si, section) in sections.iter().enumerate() {
        for block in section.blocks.iter().filter(|b| b.kind == BlockKind::Image) {
            let key = (si, block.order);
            let image = block.payload.clone();
            let format = block.image_format().unwrap_or("png").to_string();
            let heading = section.heading.clone();
            let classifier = Arc::clone(&classifier);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            pending.push(key);

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let classification = match classifier.classify(&image, &format, &heading).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Image {}/{} in \"{}\" not classified: {}", key.0, key.1, heading, e);
                        ImageClassification::fallback("Classification error")
                    }
                };
                let _ = tx.send((key, classification)).await;
            });
        }
    }
    drop(tx);

    if pending.is_empty() {
        return Ok((0, 0));
    }
    let pb = progress_bar(pending.len())?;
    pb.set_message("classifying images");

    let mut results = HashMap::with_capacity(pending.len());
    while let Some((key, classification)) = rx.recv().await {
        results.insert(key, classification);
        pb.inc(1);
    }
    pb.finish_and_clear();

    // A task that panicked never sent its result.
    for key in pending {
        if !results.contains_key(&key) {
            warn!("Image {}/{} classification task died, keeping the image", key.0, key.1);
            results.insert(key, ImageClassification::fallback("Classification error"));
        }
    }

    let classified = results.len();
    let mut dropped = 0usize;
    for (si, section) in sections.iter_mut().enumerate() {
        let heading = section.heading.clone();
        section.blocks.retain_mut(|block| {
            if block.kind != BlockKind::Image {
                return true;
            }
            let Some(c) = results.remove(&(si, block.order)) else {
                return true;
            };
            block.merge_metadata(c.to_metadata(&heading));
            if !c.is_important {
                dropped += 1;
            }
            c.is_important
        });
        section.renumber();
    }

    info!("Classified {} images, dropped {} as decorative", classified, dropped);
    Ok((classified, dropped))
}

/// Attach headline and summary to each section. A failed call leaves the
/// summary empty and falls back to the section title as headline.
pub async fn summarize_sections(sections: &mut [Section], summarizer: &dyn Summarizer) -> Result<usize> {
    if sections.is_empty() {
        return Ok(0);
    }
    let pb = progress_bar(sections.len())?;
    pb.set_message("summarizing");

    let mut summarized = 0;
    for section in sections.iter_mut() {
        let title = section.title().to_string();
        match summarizer.summarize(&title, &section.body_text()).await {
            Ok(s) => {
                section.headline = Some(s.headline);
                section.summary = Some(s.summary);
                summarized += 1;
            }
            Err(e) => {
                warn!("Summary failed for \"{}\": {}", title, e);
                section.headline = Some(title);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(summarized)
}
