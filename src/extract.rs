//! PDF → extraction records.
//!
//! Text comes from `pdf-extract` one page at a time; every line becomes a `text-line`
//! record with its line index on the page as `y`. Embedded images are read from each
//! page's XObject resources with `lopdf` and follow the page's text, since the content
//! stream is not laid out. Only images stored as complete JPEG/JPEG 2000 files can be
//! written out unchanged; raw pixel images are skipped. Tables are not detected here;
//! a richer extractor can supply them through the JSON records format.

use std::path::Path;

use anyhow::{Context, Result};
use lopdf::Document;
use tracing::{debug, info};

use crate::parser::RawExtractionRecord;
use crate::parser::records::Payload;

pub fn extract_pdf(path: &Path) -> Result<Vec<RawExtractionRecord>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;
    let doc = Document::load_mem(&bytes)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let page_ids = doc.get_pages();
    let mut records = Vec::new();
    for (i, text) in pages.iter().enumerate() {
        let page_number = i as u32 + 1;
        let mut page = page_lines(page_number, text);
        if let Some(&id) = page_ids.get(&page_number) {
            let first_y = page.len();
            page.extend(page_images(&doc, page_number, id, first_y));
        }
        records.extend(page);
    }

    let images = records
        .iter()
        .filter(|r| matches!(r.payload, Payload::Image { .. }))
        .count();
    info!(
        "Extracted {} text lines and {} images from {} pages of {}",
        records.len() - images,
        images,
        pages.len(),
        path.display()
    );
    Ok(records)
}

/// One `text-line` record per line of a page's text.
pub fn page_lines(page_number: u32, text: &str) -> Vec<RawExtractionRecord> {
    text.lines()
        .enumerate()
        .map(|(i, line)| RawExtractionRecord::text_line(page_number, i as f64, line))
        .collect()
}

fn page_images(
    doc: &Document,
    page_number: u32,
    page_id: lopdf::ObjectId,
    first_y: usize,
) -> Vec<RawExtractionRecord> {
    // Pages without an XObject dictionary report an error here.
    let Ok(images) = doc.get_page_images(page_id) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for image in images {
        let filters = image.filters.unwrap_or_default();
        match image_format(&filters) {
            Some(format) => records.push(RawExtractionRecord::image(
                page_number,
                (first_y + records.len()) as f64,
                image.content.to_vec(),
                format,
            )),
            None => debug!(
                "Skipping {}x{} image on page {} (filters {:?})",
                image.width, image.height, page_number, filters
            ),
        }
    }
    records
}

/// File format of an image stream whose bytes are already a standalone file.
fn image_format(filters: &[String]) -> Option<&'static str> {
    match filters {
        [f] if f == "DCTDecode" => Some("jpeg"),
        [f] if f == "JPXDecode" => Some("jp2"),
        _ => None,
    }
}
