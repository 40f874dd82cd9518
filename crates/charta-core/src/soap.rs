//! Deterministic SOAP section parser.
//!
//! Extracts Subjective/Objective/Assessment/Plan sections from raw note
//! text using explicit line markers: a line whose trimmed start is `S:`,
//! `O:`, `A:` or `P:` (single letter, case-insensitive, colon immediately
//! after) opens the corresponding section. No fuzzy matching, synonyms, or
//! NLP — only exact marker-prefixed lines count.
//!
//! The parser is pure and total: it never fails, it only reports
//! `matched = false` when nothing was recognized. Whether a parse result
//! is worth persisting is the ingestion pipeline's decision, not the
//! parser's.

use serde::{Deserialize, Serialize};

/// Stable schema tag stored alongside derived SOAP rows.
pub const SOAP_SCHEMA: &str = "soap_v1";

/// Parser revision tag. Bump when extraction behavior changes so old
/// derived rows remain distinguishable from new ones.
pub const SOAP_PARSER_VERSION: &str = "v1";

/// Extracted SOAP sections.
///
/// In memory a section may be `Some("")` — the marker was seen but had no
/// text, which matters for `matched` and `present_count`. On the wire
/// (and in persisted `sections` rows) a key appears only when non-empty
/// text was extracted; empty placeholders never serialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapSections {
    #[serde(skip_serializing_if = "section_is_blank")]
    pub subjective: Option<String>,
    #[serde(skip_serializing_if = "section_is_blank")]
    pub objective: Option<String>,
    #[serde(skip_serializing_if = "section_is_blank")]
    pub assessment: Option<String>,
    #[serde(skip_serializing_if = "section_is_blank")]
    pub plan: Option<String>,
}

/// Serialization gate: absent and empty-trimmed sections are both omitted
/// from the serialized shape.
fn section_is_blank(section: &Option<String>) -> bool {
    section
        .as_deref()
        .map_or(true, |text| text.trim().is_empty())
}

impl SoapSections {
    /// True when at least one section carries non-empty trimmed text.
    /// This is the ingestion pipeline's "worth persisting" test.
    pub fn has_content(&self) -> bool {
        [
            &self.subjective,
            &self.objective,
            &self.assessment,
            &self.plan,
        ]
        .iter()
        .any(|s| s.as_deref().is_some_and(|text| !text.trim().is_empty()))
    }

    /// Number of sections present (empty or not).
    pub fn present_count(&self) -> usize {
        [
            &self.subjective,
            &self.objective,
            &self.assessment,
            &self.plan,
        ]
        .iter()
        .filter(|s| s.is_some())
        .count()
    }

    fn slot(&mut self, marker: Marker) -> &mut Option<String> {
        match marker {
            Marker::Subjective => &mut self.subjective,
            Marker::Objective => &mut self.objective,
            Marker::Assessment => &mut self.assessment,
            Marker::Plan => &mut self.plan,
        }
    }
}

/// Result of a SOAP parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapParse {
    pub sections: SoapSections,
    /// True iff at least one recognized marker was found, regardless of
    /// whether its extracted text is empty.
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Subjective,
    Objective,
    Assessment,
    Plan,
}

/// Detect a marker at the start of a line (after leading whitespace).
/// Returns the marker and the text remaining after the colon.
fn match_marker(line: &str) -> Option<(Marker, &str)> {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();
    let letter = chars.next()?;
    if chars.next()? != ':' {
        return None;
    }
    let marker = match letter.to_ascii_uppercase() {
        'S' => Marker::Subjective,
        'O' => Marker::Objective,
        'A' => Marker::Assessment,
        'P' => Marker::Plan,
        _ => return None,
    };
    Some((marker, &trimmed[letter.len_utf8() + 1..]))
}

/// Parse SOAP sections out of raw note text.
///
/// Everything from immediately after a marker up to (but not including)
/// the next marker line accumulates, trimmed, as that section's text.
/// Content before the first marker is discarded. A marker seen twice
/// replaces the previous content for that letter: the last occurrence
/// wins. Sections may appear in any order.
pub fn parse_soap(raw_text: &str) -> SoapParse {
    let mut sections = SoapSections::default();
    let mut matched = false;
    let mut current: Option<(Marker, String)> = None;

    for line in raw_text.lines() {
        if let Some((marker, rest)) = match_marker(line) {
            if let Some((open, buffer)) = current.take() {
                *sections.slot(open) = Some(buffer.trim().to_string());
            }
            matched = true;
            current = Some((marker, rest.to_string()));
        } else if let Some((_, buffer)) = current.as_mut() {
            buffer.push('\n');
            buffer.push_str(line);
        }
        // Lines before the first marker are preamble and are discarded.
    }

    if let Some((open, buffer)) = current {
        *sections.slot(open) = Some(buffer.trim().to_string());
    }

    SoapParse { sections, matched }
}
