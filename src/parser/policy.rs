//! Discard policies applied by the segmenter. Dropped content never shows up
//! in any section and is not reported as an error.

use super::SegmenterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// Content before the first section opened.
    FrontMatter,
    /// Content between a metadata marker line and the next level-1 heading.
    MetadataSpan,
    /// A finished section below the minimum block count.
    UndersizedSection,
}

/// Heading detection is off on the leading pages until the first section opens.
pub fn headings_suppressed(page: u32, any_section_opened: bool, config: &SegmenterConfig) -> bool {
    !any_section_opened && page <= config.page_threshold
}

/// Reason content arriving now would be dropped, if any.
pub fn content_discard(section_open: bool, in_metadata_span: bool) -> Option<Discard> {
    if in_metadata_span {
        Some(Discard::MetadataSpan)
    } else if !section_open {
        Some(Discard::FrontMatter)
    } else {
        None
    }
}

pub fn section_survives(block_count: usize, config: &SegmenterConfig) -> bool {
    block_count >= config.min_blocks_per_section
}

/// Tally of discards for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardCounts {
    pub front_matter: usize,
    pub metadata_span: usize,
    pub undersized_sections: usize,
}

impl DiscardCounts {
    pub fn record(&mut self, discard: Discard) {
        match discard {
            Discard::FrontMatter => self.front_matter += 1,
            Discard::MetadataSpan => self.metadata_span += 1,
            Discard::UndersizedSection => self.undersized_sections += 1,
        }
    }
}
