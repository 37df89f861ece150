use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Position of a record on its page. Only meaningful within one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDimensions {
    pub rows: u32,
    pub cols: u32,
}

/// One page-level extraction event, already in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtractionRecord {
    pub page_number: u32,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Payload {
    TextLine {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        #[serde(with = "base64_bytes")]
        image_bytes: Vec<u8>,
        image_format: String,
    },
    #[serde(rename_all = "camelCase")]
    Table {
        table_dimensions: TableDimensions,
        /// Rendered region of the table, when the extractor provides one.
        #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
        image_bytes: Vec<u8>,
    },
}

impl RawExtractionRecord {
    pub fn text_line(page_number: u32, y: f64, text: impl Into<String>) -> Self {
        Self {
            page_number,
            bounding_box: BoundingBox { y, ..Default::default() },
            payload: Payload::TextLine { text: text.into() },
        }
    }

    pub fn image(page_number: u32, y: f64, bytes: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            page_number,
            bounding_box: BoundingBox { y, ..Default::default() },
            payload: Payload::Image {
                image_bytes: bytes,
                image_format: format.into(),
            },
        }
    }

    #[cfg(test)]
    pub fn table(page_number: u32, y: f64, rows: u32, cols: u32) -> Self {
        Self {
            page_number,
            bounding_box: BoundingBox { y, ..Default::default() },
            payload: Payload::Table {
                table_dimensions: TableDimensions { rows, cols },
                image_bytes: Vec::new(),
            },
        }
    }
}

pub fn load_records(path: &Path) -> Result<Vec<RawExtractionRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file {}", path.display()))?;
    parse_records(&raw).with_context(|| format!("Invalid records in {}", path.display()))
}

pub fn parse_records(json: &str) -> Result<Vec<RawExtractionRecord>> {
    Ok(serde_json::from_str(json)?)
}

/// Drop image records below `min_bytes` (icons, bullets, decorations).
/// Tables and text are never touched.
pub fn drop_small_images(records: Vec<RawExtractionRecord>, min_bytes: usize) -> Vec<RawExtractionRecord> {
    records
        .into_iter()
        .filter(|r| match &r.payload {
            Payload::Image { image_bytes, .. } => image_bytes.len() >= min_bytes,
            _ => true,
        })
        .collect()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
