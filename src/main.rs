mod ai;
mod assets;
mod config;
mod db;
mod extract;
mod parser;
mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::assets::AssetWriter;
use crate::config::{PipelineConfig, Settings};
use crate::parser::{BlockKind, RawExtractionRecord, Section, SegmenterConfig};
use crate::pipeline::AiServices;

#[derive(Parser)]
#[command(name = "docsections", about = "Split PDF extraction records into titled sections of blocks")]
struct Cli {
    /// SQLite database (default: $DOCSECTIONS_DB or data/documents.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory for image and table files (default: $DOCSECTIONS_ASSETS or data/assets)
    #[arg(long, global = true)]
    assets: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SegmentArgs {
    /// Headings on pages up to this one are ignored until a section has opened
    #[arg(long, default_value = "3")]
    page_threshold: u32,
    /// Sections with fewer blocks are dropped
    #[arg(long, default_value = "5")]
    min_blocks: usize,
    /// Extra phrase marking a metadata line (repeatable)
    #[arg(long = "metadata-phrase")]
    metadata_phrases: Vec<String>,
}

impl SegmentArgs {
    fn config(&self) -> SegmenterConfig {
        SegmenterConfig {
            page_threshold: self.page_threshold,
            min_blocks_per_section: self.min_blocks,
            ..SegmenterConfig::default()
        }
        .with_extra_phrases(self.metadata_phrases.iter().cloned())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text-line records from a PDF
    Extract {
        pdf: PathBuf,
        /// Write records JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Segment records JSON files and print the sections
    Segment {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(long)]
        pretty: bool,
        #[command(flatten)]
        segmenter: SegmentArgs,
    },
    /// PDF or records JSON -> sections -> classification -> database
    Ingest {
        input: PathBuf,
        /// Document title (default: file stem)
        #[arg(short, long)]
        title: Option<String>,
        /// Skip image classification and summaries
        #[arg(long)]
        no_ai: bool,
        #[command(flatten)]
        segmenter: SegmentArgs,
    },
    /// List stored documents
    List,
    /// Show a document's sections, or one section in full
    Show {
        slug: String,
        /// Section by position
        #[arg(long, conflicts_with = "section")]
        order: Option<usize>,
        /// Section by slug
        #[arg(long)]
        section: Option<String>,
    },
    /// Database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(assets) = cli.assets {
        settings.assets_dir = assets;
    }

    let result = match cli.command {
        Commands::Extract { pdf, output } => {
            let records = extract::extract_pdf(&pdf)?;
            let json = serde_json::to_string_pretty(&records)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Wrote {} records to {}", records.len(), path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Commands::Segment { inputs, pretty, segmenter } => {
            let outputs = segment_files(&inputs, &segmenter.config())?;
            let json = if pretty {
                serde_json::to_string_pretty(&outputs)?
            } else {
                serde_json::to_string(&outputs)?
            };
            println!("{}", json);
            Ok(())
        }
        Commands::Ingest { input, title, no_ai, segmenter } => {
            ingest(&settings, &input, title, no_ai, segmenter.config()).await
        }
        Commands::List => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let docs = db::list_documents(&conn)?;
            if docs.is_empty() {
                println!("No documents. Run 'ingest' first.");
                return Ok(());
            }
            println!("{:<32} | {:<40} | {:>8} | {:<20}", "Slug", "Title", "Sections", "Created");
            println!("{}", "-".repeat(110));
            for d in &docs {
                println!(
                    "{:<32} | {:<40} | {:>8} | {:<20}",
                    truncate(&d.slug, 32),
                    truncate(&d.title, 40),
                    d.section_count,
                    truncate(&d.created_at, 19),
                );
            }
            println!("\n{} documents", docs.len());
            Ok(())
        }
        Commands::Show { slug, order, section } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let doc = db::fetch_document(&conn, &slug)?
                .with_context(|| format!("No document '{}'", slug))?;

            let single = match (order, section.as_deref()) {
                (Some(n), _) => Some(
                    db::fetch_section_by_order(&conn, &doc.slug, n)?
                        .with_context(|| format!("'{}' has no section {}", doc.slug, n))?,
                ),
                (None, Some(s)) => Some(
                    db::fetch_section_by_slug(&conn, &doc.slug, s)?
                        .with_context(|| format!("'{}' has no section '{}'", doc.slug, s))?,
                ),
                (None, None) => None,
            };

            match single {
                Some(row) => print_section(&row.section),
                None => {
                    println!("{} ({} sections)\n", doc.title, doc.section_count);
                    println!("{:>3} | {:<32} | {:>4} | {:>6} | {:<40}", "#", "Slug", "Page", "Blocks", "Title");
                    println!("{}", "-".repeat(98));
                    for row in db::fetch_sections(&conn, &doc.slug)? {
                        let s = &row.section;
                        println!(
                            "{:>3} | {:<32} | {:>4} | {:>6} | {:<40}",
                            s.order,
                            truncate(&row.slug, 32),
                            s.page,
                            s.blocks.len(),
                            truncate(s.title(), 40),
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Documents:  {}", s.documents);
            println!("Sections:   {}", s.sections);
            println!("Summarized: {}", s.summarized);
            println!("Text:       {}", s.text_blocks);
            println!("Images:     {}", s.image_blocks);
            println!("Tables:     {}", s.table_blocks);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

#[derive(serde::Serialize)]
struct SegmentOutput {
    source: String,
    sections: Vec<Section>,
}

fn segment_files(inputs: &[PathBuf], config: &SegmenterConfig) -> anyhow::Result<Vec<SegmentOutput>> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let outputs = inputs
        .par_iter()
        .map(|path| {
            let records = parser::records::load_records(path)?;
            let sections = parser::segment(records, config)
                .with_context(|| format!("Failed to segment {}", path.display()))?;
            pb.inc(1);
            Ok(SegmentOutput { source: path.display().to_string(), sections })
        })
        .collect::<anyhow::Result<Vec<_>>>();

    pb.finish_and_clear();
    outputs
}

fn load_input(input: &Path) -> anyhow::Result<Vec<RawExtractionRecord>> {
    let is_pdf = input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        extract::extract_pdf(input)
    } else {
        parser::records::load_records(input)
    }
}

async fn ingest(
    settings: &Settings,
    input: &Path,
    title: Option<String>,
    no_ai: bool,
    segmenter: SegmenterConfig,
) -> anyhow::Result<()> {
    let title = match title {
        Some(t) => t,
        None => input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("Cannot derive a title from the input path; pass --title")?,
    };
    let doc_slug = db::slugify(&title);
    anyhow::ensure!(!doc_slug.is_empty(), "Title {:?} has no usable characters", title);

    let records = load_input(input)?;

    let ai = match (&settings.ai, no_ai) {
        (_, true) => None,
        (None, false) => {
            warn!("AZURE_OPENAI_ENDPOINT/API_KEY/DEPLOYMENT not set, skipping classification and summaries");
            None
        }
        (Some(cfg), false) => {
            let client = Arc::new(ai::AzureOpenAiClient::new(cfg.clone())?);
            Some(AiServices { classifier: client.clone(), summarizer: client })
        }
    };

    let config = PipelineConfig { segmenter, ..PipelineConfig::default() };
    let assets = AssetWriter::new(settings.assets_dir.join(&doc_slug));
    let doc = pipeline::process_records(records, &config, ai.as_ref(), Some(&assets)).await?;

    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    let saved = db::save_document(&conn, &title, &doc.sections)?;
    info!("Saved '{}' to {}", saved.slug, settings.db_path.display());

    let s = &doc.stats;
    println!(
        "{}: {} records ({} small images skipped) -> {} sections",
        saved.slug, s.records, s.small_images_dropped, s.sections
    );
    println!(
        "Images classified: {} ({} dropped) | assets written: {} | summarized: {}",
        s.images_classified, s.images_dropped, s.assets_written, s.sections_summarized
    );
    Ok(())
}

fn print_section(section: &Section) {
    println!("{}", section.heading);
    println!("{}", "=".repeat(section.heading.chars().count().min(80)));
    if let Some(h) = &section.headline {
        println!("{}", h);
    }
    if let Some(summary) = &section.summary {
        for line in summary.lines() {
            println!("  {}", line);
        }
    }
    println!();
    for b in &section.blocks {
        match b.kind {
            BlockKind::Text => println!("[{}] p{} {}", b.order, b.page, truncate(&b.content, 100)),
            kind => {
                let label = b
                    .metadata
                    .get("imageType")
                    .and_then(|v| v.as_str())
                    .unwrap_or(kind.as_str());
                let file = if b.content.is_empty() { "-" } else { b.content.as_str() };
                println!("[{}] p{} {} {}", b.order, b.page, label, file);
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
