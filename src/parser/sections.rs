use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::blocks::{Block, BlockKind};
use super::policy::{self, Discard, DiscardCounts};
use super::records::{Payload, RawExtractionRecord};
use super::rules::{self, LineClass};
use super::{SegmentError, SegmenterConfig};

static NUMBER_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*\.?\s+").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub order: usize,
    /// Literal text of the level-1 heading line.
    pub heading: String,
    /// Page the heading was found on.
    pub page: u32,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Section {
    /// Heading without its numbering: "1. Introduction" → "Introduction".
    pub fn title(&self) -> &str {
        match NUMBER_PREFIX_RE.find(&self.heading) {
            Some(m) => self.heading[m.end()..].trim(),
            None => self.heading.trim(),
        }
    }

    /// Text blocks joined in order, paragraphs separated by a blank line.
    pub fn body_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Text)
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Reassign block orders densely from 0.
    pub fn renumber(&mut self) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.order = i;
        }
    }

    fn push(&mut self, mut block: Block) {
        block.order = self.blocks.len();
        self.blocks.push(block);
    }
}

/// Lines waiting to be coalesced into one text block.
#[derive(Default)]
struct Paragraph {
    lines: Vec<String>,
    page: u32,
}

/// Single-pass segmenter. Feed records in reading order with [`Segmenter::push`];
/// each kept section is returned as soon as it closes.
pub struct Segmenter<'a> {
    config: &'a SegmenterConfig,
    current: Option<Section>,
    paragraph: Paragraph,
    in_metadata_span: bool,
    any_section_opened: bool,
    next_order: usize,
    last_page: Option<u32>,
    seen: usize,
    discards: DiscardCounts,
}

impl<'a> Segmenter<'a> {
    pub fn new(config: &'a SegmenterConfig) -> Self {
        Self {
            config,
            current: None,
            paragraph: Paragraph::default(),
            in_metadata_span: false,
            any_section_opened: false,
            next_order: 0,
            last_page: None,
            seen: 0,
            discards: DiscardCounts::default(),
        }
    }

    pub fn push(&mut self, record: RawExtractionRecord) -> Result<Option<Section>, SegmentError> {
        let index = self.seen;
        let page = record.page_number;
        if page == 0 {
            return Err(SegmentError::ZeroPage { index });
        }
        if let Some(previous) = self.last_page {
            if page < previous {
                return Err(SegmentError::PageOrder { index, previous, found: page });
            }
        }
        self.last_page = Some(page);
        self.seen += 1;

        if let Payload::TextLine { text } = &record.payload {
            return Ok(self.push_line(page, text));
        }
        self.push_asset(record);
        Ok(None)
    }

    /// Close the last section. Returns it if it is kept.
    pub fn finish(mut self) -> (Option<Section>, DiscardCounts) {
        let last = self.finalize();
        (last, self.discards)
    }

    fn push_line(&mut self, page: u32, text: &str) -> Option<Section> {
        let line = text.trim();
        if !self.paragraph.lines.is_empty() && self.paragraph.page != page {
            self.flush_paragraph();
        }

        let headings = !policy::headings_suppressed(page, self.any_section_opened, self.config);
        let class = rules::classify(line, self.config, headings);
        if class != LineClass::Text && class != LineClass::Blank {
            trace!(page, rule = ?rules::matching_rule(line, self.config), ?class, "{}", line);
        }
        match class {
            LineClass::Blank => {
                self.flush_paragraph();
                None
            }
            LineClass::Metadata => {
                let closed = self.finalize();
                self.in_metadata_span = true;
                self.discards.record(Discard::MetadataSpan);
                closed
            }
            LineClass::Heading => {
                self.in_metadata_span = false;
                let closed = self.finalize();
                self.current = Some(Section {
                    order: 0,
                    heading: line.to_string(),
                    page,
                    blocks: Vec::new(),
                    headline: None,
                    summary: None,
                });
                self.any_section_opened = true;
                closed
            }
            LineClass::SubHeading => {
                if self.accepts_content() {
                    self.flush_paragraph();
                    if let Some(section) = self.current.as_mut() {
                        section.push(Block::text(line.to_string(), page));
                    }
                }
                None
            }
            LineClass::Text => {
                if self.accepts_content() {
                    self.paragraph.page = page;
                    self.paragraph.lines.push(line.to_string());
                }
                None
            }
        }
    }

    fn push_asset(&mut self, record: RawExtractionRecord) {
        if !self.accepts_content() {
            return;
        }
        self.flush_paragraph();
        if let (Some(section), Some(block)) = (self.current.as_mut(), Block::from_asset_record(record)) {
            section.push(block);
        }
    }

    /// Whether content may be appended right now. Counts the discard otherwise.
    fn accepts_content(&mut self) -> bool {
        match policy::content_discard(self.current.is_some(), self.in_metadata_span) {
            Some(discard) => {
                self.discards.record(discard);
                false
            }
            None => true,
        }
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.lines.is_empty() {
            return;
        }
        let page = self.paragraph.page;
        let text = std::mem::take(&mut self.paragraph.lines).join(" ");
        if let Some(section) = self.current.as_mut() {
            section.push(Block::text(text, page));
        }
    }

    fn finalize(&mut self) -> Option<Section> {
        self.flush_paragraph();
        let mut section = self.current.take()?;
        if !policy::section_survives(section.blocks.len(), self.config) {
            self.discards.record(Discard::UndersizedSection);
            return None;
        }
        section.order = self.next_order;
        self.next_order += 1;
        section.renumber();
        Some(section)
    }
}

/// Split reading-ordered extraction records into kept sections.
pub fn segment(
    records: Vec<RawExtractionRecord>,
    config: &SegmenterConfig,
) -> Result<Vec<Section>, SegmentError> {
    let total = records.len();
    let mut segmenter = Segmenter::new(config);
    let mut sections = Vec::new();
    for record in records {
        if let Some(section) = segmenter.push(record)? {
            sections.push(section);
        }
    }
    let (last, discards) = segmenter.finish();
    sections.extend(last);

    debug!(
        records = total,
        kept = sections.len(),
        front_matter = discards.front_matter,
        metadata_span = discards.metadata_span,
        undersized = discards.undersized_sections,
        "segmented document"
    );
    Ok(sections)
}
