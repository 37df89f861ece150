use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::records::{BoundingBox, Payload, RawExtractionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Image,
    Table,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Image => "image",
            BlockKind::Table => "table",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(BlockKind::Text),
            "image" => Some(BlockKind::Image),
            "table" => Some(BlockKind::Table),
            _ => None,
        }
    }
}

/// One ordered unit of content within a section.
///
/// For text blocks `content` is the paragraph. For images and tables it stays
/// empty until the asset writer stores `payload` and puts the file reference here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub content: String,
    pub order: usize,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl Block {
    pub fn text(content: String, page: u32) -> Self {
        Self {
            kind: BlockKind::Text,
            content,
            order: 0,
            page,
            bbox: None,
            metadata: Map::new(),
            payload: Vec::new(),
        }
    }

    /// Build an image/table block from its record. Text records yield `None`.
    pub fn from_asset_record(record: RawExtractionRecord) -> Option<Self> {
        let (kind, metadata, payload) = match record.payload {
            Payload::TextLine { .. } => return None,
            Payload::Image { image_bytes, image_format } => (
                BlockKind::Image,
                json!({ "isTable": false, "format": image_format }),
                image_bytes,
            ),
            Payload::Table { table_dimensions, image_bytes } => (
                BlockKind::Table,
                json!({
                    "isTable": true,
                    "rows": table_dimensions.rows,
                    "cols": table_dimensions.cols,
                }),
                image_bytes,
            ),
        };
        let metadata = match metadata {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        Some(Self {
            kind,
            content: String::new(),
            order: 0,
            page: record.page_number,
            bbox: Some(record.bounding_box),
            metadata,
            payload,
        })
    }

    pub fn image_format(&self) -> Option<&str> {
        self.metadata.get("format").and_then(|v| v.as_str())
    }

    /// Shallow-merge `fields` into the block metadata, overwriting existing keys.
    pub fn merge_metadata(&mut self, fields: Map<String, Value>) {
        self.metadata.extend(fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_metadata() {
        let block = Block::from_asset_record(RawExtractionRecord::table(5, 40.0, 3, 4)).unwrap();
        assert_eq!(block.kind, BlockKind::Table);
        assert_eq!(block.page, 5);
        assert_eq!(block.metadata["isTable"], json!(true));
        assert_eq!(block.metadata["rows"], json!(3));
        assert_eq!(block.metadata["cols"], json!(4));
        assert!(block.content.is_empty());
    }

    #[test]
    fn image_metadata_and_payload() {
        let record = RawExtractionRecord::image(2, 0.0, vec![9, 9, 9], "jpeg");
        let block = Block::from_asset_record(record).unwrap();
        assert_eq!(block.kind, BlockKind::Image);
        assert_eq!(block.metadata["isTable"], json!(false));
        assert_eq!(block.image_format(), Some("jpeg"));
        assert_eq!(block.payload, vec![9, 9, 9]);
    }

    #[test]
    fn text_record_is_not_an_asset() {
        assert!(Block::from_asset_record(RawExtractionRecord::text_line(1, 0.0, "hi")).is_none());
    }

    #[test]
    fn merge_overwrites_keys() {
        let mut block = Block::from_asset_record(RawExtractionRecord::image(1, 0.0, vec![], "png")).unwrap();
        let mut extra = Map::new();
        extra.insert("isImportant".into(), json!(true));
        extra.insert("format".into(), json!("webp"));
        block.merge_metadata(extra);
        assert_eq!(block.metadata["isImportant"], json!(true));
        assert_eq!(block.image_format(), Some("webp"));
        assert_eq!(block.metadata["isTable"], json!(false));
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [BlockKind::Text, BlockKind::Image, BlockKind::Table] {
            assert_eq!(BlockKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BlockKind::parse("video"), None);
    }
}
