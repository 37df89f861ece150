pub mod blocks;
pub mod policy;
pub mod records;
pub mod rules;
pub mod sections;

pub use blocks::{Block, BlockKind};
pub use records::RawExtractionRecord;
pub use sections::{segment, Section};

pub const DEFAULT_METADATA_PHRASES: &[&str] = &[
    "Key Learning Outcomes",
    "Participant Handbook",
    "Table of Contents",
    "Unit Objectives",
    "At the end of this unit",
];

/// Tunable thresholds for heading detection and section filtering.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Leading pages on which no section may open.
    pub page_threshold: u32,
    /// Sections with fewer blocks are dropped.
    pub min_blocks_per_section: usize,
    /// Case-insensitive substrings marking boilerplate spans.
    pub metadata_phrases: Vec<String>,
    /// Minimum length of an all-capitals heading line.
    pub caps_min_len: usize,
    /// Minimum length of any heading line.
    pub min_heading_len: usize,
    /// Keywords that open a heading when followed by a number ("UNIT 3").
    pub heading_prefixes: Vec<String>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            page_threshold: 3,
            min_blocks_per_section: 5,
            metadata_phrases: DEFAULT_METADATA_PHRASES.iter().map(|s| s.to_string()).collect(),
            caps_min_len: 15,
            min_heading_len: 5,
            heading_prefixes: vec!["UNIT".to_string(), "CHAPTER".to_string()],
        }
    }
}

impl SegmenterConfig {
    pub fn with_extra_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for phrase in phrases {
            let phrase = phrase.into();
            if !phrase.trim().is_empty() && !self.metadata_phrases.contains(&phrase) {
                self.metadata_phrases.push(phrase);
            }
        }
        self
    }
}

/// Records violated the reading-order contract. The caller must re-extract or reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("malformed input: record {index} is on page {found} after page {previous}")]
    PageOrder { index: usize, previous: u32, found: u32 },
    #[error("malformed input: record {index} has page number 0 (pages are 1-based)")]
    ZeroPage { index: usize },
}
