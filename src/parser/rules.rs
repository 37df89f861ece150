use std::sync::LazyLock;

use regex::Regex;

use super::SegmenterConfig;

// "1. Introduction", "2 Scope", "1.1 Overview", "3.2.1. Wiring"
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+((?:\.\d+)*)\.?\s+[A-Z]").unwrap());

/// Classification of one trimmed text line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    Metadata,
    /// Level-2 heading, kept as content.
    SubHeading,
    /// Level-1 heading, opens a section.
    Heading,
    Text,
}

struct Rule {
    name: &'static str,
    heading: bool,
    apply: fn(&str, &SegmenterConfig) -> Option<LineClass>,
}

// Evaluated top to bottom, first match wins.
const RULES: &[Rule] = &[
    Rule { name: "metadata-phrase", heading: false, apply: metadata_rule },
    Rule { name: "sub-heading", heading: true, apply: sub_heading_rule },
    Rule { name: "heading", heading: true, apply: heading_rule },
];

/// Classify a line. With `headings` off only the metadata rule runs.
pub fn classify(line: &str, config: &SegmenterConfig, headings: bool) -> LineClass {
    let line = line.trim();
    if line.is_empty() {
        return LineClass::Blank;
    }
    RULES
        .iter()
        .filter(|r| headings || !r.heading)
        .find_map(|r| (r.apply)(line, config))
        .unwrap_or(LineClass::Text)
}

/// Name of the rule that fired, for diagnostics.
pub fn matching_rule(line: &str, config: &SegmenterConfig) -> Option<&'static str> {
    let line = line.trim();
    RULES.iter().find(|r| (r.apply)(line, config).is_some()).map(|r| r.name)
}

fn metadata_rule(line: &str, config: &SegmenterConfig) -> Option<LineClass> {
    is_metadata(line, &config.metadata_phrases).then_some(LineClass::Metadata)
}

fn sub_heading_rule(line: &str, config: &SegmenterConfig) -> Option<LineClass> {
    (heading_level(line, config) == Some(2)).then_some(LineClass::SubHeading)
}

fn heading_rule(line: &str, config: &SegmenterConfig) -> Option<LineClass> {
    (heading_level(line, config) == Some(1)).then_some(LineClass::Heading)
}

pub fn is_metadata(line: &str, phrases: &[String]) -> bool {
    let lower = line.to_lowercase();
    phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Heading level of a candidate line, `None` for plain text.
///
/// Numbered lines with a compound number ("1.1 Overview") are level 2, every
/// other heading shape is level 1.
pub fn heading_level(line: &str, config: &SegmenterConfig) -> Option<u8> {
    let line = line.trim();
    if line.chars().count() < config.min_heading_len {
        return None;
    }
    if let Some(caps) = NUMBERED_RE.captures(line) {
        return Some(if caps[1].is_empty() { 1 } else { 2 });
    }
    if is_caps_heading(line, config.caps_min_len) || has_heading_prefix(line, &config.heading_prefixes) {
        return Some(1);
    }
    None
}

fn is_caps_heading(line: &str, min_len: usize) -> bool {
    let total = line.chars().count();
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    total >= min_len
        && line.chars().any(|c| c.is_uppercase())
        && !line.chars().any(|c| c.is_lowercase())
        && letters * 2 > total
}

// "UNIT 3", "Chapter 12 Safety"
fn has_heading_prefix(line: &str, prefixes: &[String]) -> bool {
    let mut words = line.split_whitespace();
    let (Some(first), Some(second)) = (words.next(), words.next()) else {
        return false;
    };
    prefixes.iter().any(|p| first.eq_ignore_ascii_case(p))
        && second.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SegmenterConfig {
        SegmenterConfig::default()
    }

    #[test]
    fn numbered_level_one() {
        assert_eq!(heading_level("1. Introduction", &cfg()), Some(1));
        assert_eq!(heading_level("2 Methodology", &cfg()), Some(1));
    }

    #[test]
    fn numbered_compound_is_level_two() {
        assert_eq!(heading_level("1.1 Overview", &cfg()), Some(2));
        assert_eq!(heading_level("3.2.1. Wiring Basics", &cfg()), Some(2));
    }

    #[test]
    fn bare_number_rejected() {
        assert_eq!(heading_level("1.", &cfg()), None);
        assert_eq!(classify("1.", &cfg(), true), LineClass::Text);
        assert_eq!(heading_level("12.5", &cfg()), None);
        // number must be followed by a letter
        assert_eq!(heading_level("2019 - 2020", &cfg()), None);
    }

    #[test]
    fn short_lines_never_headings() {
        assert_eq!(heading_level("1 AB", &cfg()), None);
        assert_eq!(heading_level("1 ABC", &cfg()), Some(1));
    }

    #[test]
    fn all_caps_needs_length_and_letters() {
        assert_eq!(heading_level("SAFETY PROCEDURES", &cfg()), Some(1));
        assert_eq!(heading_level("SAFETY RULES", &cfg()), None);
        assert_eq!(heading_level("Safety Procedures Overview", &cfg()), None);
        assert_eq!(heading_level("1234-5678-90 AB-CD", &cfg()), None);
    }

    #[test]
    fn caps_threshold_is_configurable() {
        let config = SegmenterConfig { caps_min_len: 10, ..cfg() };
        assert_eq!(heading_level("SAFETY RULES", &config), Some(1));
    }

    #[test]
    fn unit_and_chapter_prefix() {
        assert_eq!(heading_level("UNIT 3", &cfg()), Some(1));
        assert_eq!(heading_level("Chapter 12: Wiring", &cfg()), Some(1));
        assert_eq!(heading_level("Unity matters", &cfg()), None);
        assert_eq!(heading_level("UNIT three", &cfg()), None);
        assert_eq!(heading_level("MODULE 2", &cfg()), None);
    }

    #[test]
    fn extra_prefixes() {
        let mut config = cfg();
        config.heading_prefixes.push("MODULE".into());
        assert_eq!(heading_level("MODULE 2", &config), Some(1));
    }

    #[test]
    fn metadata_case_insensitive_substring() {
        assert_eq!(classify("key learning outcomes", &cfg(), true), LineClass::Metadata);
        assert_eq!(
            classify("By the end... At The End Of This Unit, you will", &cfg(), true),
            LineClass::Metadata
        );
    }

    #[test]
    fn metadata_beats_heading() {
        assert_eq!(classify("1. Key Learning Outcomes", &cfg(), true), LineClass::Metadata);
        assert_eq!(matching_rule("TABLE OF CONTENTS AND INDEX", &cfg()), Some("metadata-phrase"));
    }

    #[test]
    fn metadata_runs_with_headings_suppressed() {
        assert_eq!(classify("Participant Handbook", &cfg(), false), LineClass::Metadata);
        assert_eq!(classify("1. Introduction", &cfg(), false), LineClass::Text);
    }

    #[test]
    fn blank_and_plain() {
        assert_eq!(classify("   ", &cfg(), true), LineClass::Blank);
        assert_eq!(classify("Electricity flows through wires.", &cfg(), true), LineClass::Text);
        assert_eq!(matching_rule("Electricity flows through wires.", &cfg()), None);
    }

    #[test]
    fn classification_trims_input() {
        assert_eq!(classify("   1.1 Overview  ", &cfg(), true), LineClass::SubHeading);
        assert_eq!(classify("\t1. Introduction", &cfg(), true), LineClass::Heading);
    }
}
