//! Response segmentation.
//!
//! The classifier answers in repeated blocks separated by blank lines:
//!
//! ```text
//! text: "Lunch with Bob on Friday"
//! tag: calendar
//!
//! text: "Paid 20 for groceries"
//! tag: accounts
//! ```
//!
//! The `tag:` label is read only after the text, so content that mentions
//! "tag:" stays content.
//!
//! Paragraphs that carry neither a `text:` nor a `tag:` label (preambles,
//! sign-offs) are not blocks and are ignored. A labelled block that is
//! missing one half is skipped, but its index is still consumed so the
//! `order` of later segments keeps pointing at their source block.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Segment, Tag};

static BLOCK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[ \t]*\r?\n){2,}").expect("valid regex"));

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:text|tag):").expect("valid regex"));

static QUOTED_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btext:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});

static BARE_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)\btext:[ \t]*(\S.*)$").expect("valid regex"));

static TAG_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btag:[ \t]*([a-z][a-z0-9_\- ]*)").expect("valid regex")
});

/// Why a labelled block did not produce a segment
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SegmentationError {
    #[error("Block {index} has a tag but no text")]
    MissingText { index: usize },

    #[error("Block {index} has text but no usable tag")]
    MissingTag { index: usize },
}

impl SegmentationError {
    pub fn index(&self) -> usize {
        match self {
            SegmentationError::MissingText { index } | SegmentationError::MissingTag { index } => {
                *index
            }
        }
    }
}

/// Full segmentation report, including skipped blocks
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    pub skipped: Vec<SegmentationError>,

    /// True when no block matched and the whole response became one segment
    pub used_fallback: bool,
}

/// Split a raw response into ordered segments.
///
/// Falls back to a single segment covering the whole response, tagged with
/// `fallback_tag`, when no block matches.
pub fn segment(raw: &str, fallback_tag: &str) -> Vec<Segment> {
    segment_detailed(raw, fallback_tag).segments
}

/// Like [`segment`], but also reports the blocks that were skipped
pub fn segment_detailed(raw: &str, fallback_tag: &str) -> Segmentation {
    let mut report = Segmentation::default();

    let blocks = BLOCK_SEPARATOR
        .split(raw)
        .map(str::trim)
        .filter(|block| !block.is_empty() && LABEL.is_match(block));

    for (index, block) in blocks.enumerate() {
        match parse_block(block, index) {
            Ok(segment) => report.segments.push(segment),
            Err(err) => {
                warn!(index, error = %err, "Skipping malformed block");
                report.skipped.push(err);
            }
        }
    }

    if report.segments.is_empty() {
        debug!(
            skipped = report.skipped.len(),
            fallback_tag, "No tagged blocks found, using whole response"
        );
        report.segments.push(Segment::new(raw, Tag::parse(fallback_tag), 0));
        report.used_fallback = true;
    }

    report
}

fn parse_block(block: &str, index: usize) -> Result<Segment, SegmentationError> {
    let (text, text_end) = extract_text(block).ok_or(SegmentationError::MissingText { index })?;

    // The label must follow the text, so a "tag:" inside the content is never read as one
    let tag = TAG_VALUE
        .captures(&block[text_end..])
        .map(|caps| caps[1].trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(SegmentationError::MissingTag { index })?;

    Ok(Segment::new(text, Tag::parse(&tag), index))
}

/// Text of the block and the byte offset just past it
fn extract_text(block: &str) -> Option<(String, usize)> {
    if let Some(caps) = QUOTED_TEXT.captures(block) {
        let end = caps.get(0).map_or(block.len(), |m| m.end());
        return Some((unescape(caps[1].trim()), end));
    }

    let caps = BARE_TEXT.captures(block)?;
    let text = caps[1].trim().trim_matches('"').trim().to_string();
    let end = caps.get(0).map_or(block.len(), |m| m.end());
    (!text.is_empty()).then_some((text, end))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }

    out
}
