//! Structured record extraction from noisy model output.
//!
//! Strategies run in a fixed order and the first one that yields a JSON
//! object wins:
//!
//! 1. [`Strategy::Direct`] - the whole text is a JSON object
//! 2. [`Strategy::FencedBlock`] - a triple-backtick block (optionally tagged
//!    `json`) holds one; blocks are tried in order of appearance
//! 3. [`Strategy::BraceSpan`] - the first `{` up to its matching `}`
//!
//! Nothing is coerced or repaired. A text with no valid object in any of the
//! three places yields [`ExtractionError`] and no partial record.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::ExtractedRecord;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?i:json)?\s*(.*?)\s*```").expect("valid regex")
});

/// Extraction failed under every strategy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("No text to extract from")]
    EmptyInput,

    #[error("No valid JSON object found (tried: {})", format_attempts(.attempted))]
    NoStructuredData { attempted: Vec<Strategy> },
}

fn format_attempts(attempted: &[Strategy]) -> String {
    attempted
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One way of locating a JSON object in text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    FencedBlock,
    BraceSpan,
}

impl Strategy {
    /// All strategies in the order they are tried
    pub const ORDER: [Strategy; 3] = [Strategy::Direct, Strategy::FencedBlock, Strategy::BraceSpan];

    /// Try this strategy alone
    pub fn attempt(&self, text: &str) -> Option<ExtractedRecord> {
        match self {
            Strategy::Direct => parse_object(text),
            Strategy::FencedBlock => FENCED_BLOCK
                .captures_iter(text)
                .find_map(|caps| parse_object(&caps[1])),
            Strategy::BraceSpan => balanced_brace_span(text).and_then(parse_object),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Direct => "direct",
            Strategy::FencedBlock => "fenced_block",
            Strategy::BraceSpan => "brace_span",
        };
        f.write_str(name)
    }
}

/// Recover a structured record from `text`
pub fn extract(text: &str) -> Result<ExtractedRecord, ExtractionError> {
    extract_with_strategy(text).map(|(record, _)| record)
}

/// Like [`extract`], but also reports which strategy succeeded
pub fn extract_with_strategy(text: &str) -> Result<(ExtractedRecord, Strategy), ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyInput);
    }

    for strategy in Strategy::ORDER {
        if let Some(record) = strategy.attempt(text) {
            debug!(%strategy, fields = record.len(), "Extracted structured record");
            return Ok((record, strategy));
        }
    }

    Err(ExtractionError::NoStructuredData {
        attempted: Strategy::ORDER.to_vec(),
    })
}

fn parse_object(candidate: &str) -> Option<ExtractedRecord> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Slice from the first `{` to the `}` that closes it.
///
/// Braces inside JSON string literals don't count. Returns `None` when the
/// opening brace is never closed.
fn balanced_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ExtractedRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_direct_parse() {
        let (rec, strategy) = extract_with_strategy(r#"{"summary": "Lunch"}"#).unwrap();
        assert_eq!(rec, record(json!({"summary": "Lunch"})));
        assert_eq!(strategy, Strategy::Direct);
    }

    #[test]
    fn test_fenced_json_block() {
        let text = "```json\n{\"summary\":\"Lunch\"}\n```";
        let (rec, strategy) = extract_with_strategy(text).unwrap();
        assert_eq!(rec, record(json!({"summary": "Lunch"})));
        assert_eq!(strategy, Strategy::FencedBlock);
    }

    #[test]
    fn test_fenced_block_without_language_hint() {
        let text = "Here you go:\n```\n{\"a\": 1}\n```\nbye";
        assert_eq!(extract(text).unwrap(), record(json!({"a": 1})));
    }

    #[test]
    fn test_first_parseable_fence_wins() {
        let text = "```json\n{broken\n```\n\n```json\n{\"second\": true}\n```";
        assert_eq!(extract(text).unwrap(), record(json!({"second": true})));
    }

    #[test]
    fn test_brace_span_in_prose() {
        let text = r#"Sure! {"summary":"Lunch"} — anything else?"#;
        let (rec, strategy) = extract_with_strategy(text).unwrap();
        assert_eq!(rec, record(json!({"summary": "Lunch"})));
        assert_eq!(strategy, Strategy::BraceSpan);
    }

    #[test]
    fn test_brace_span_ignores_braces_in_strings() {
        let text = r#"note {"text": "a } inside", "n": {"x": 1}} trailing }"#;
        assert_eq!(
            extract(text).unwrap(),
            record(json!({"text": "a } inside", "n": {"x": 1}}))
        );
    }

    #[test]
    fn test_key_order_is_preserved() {
        let rec = extract(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let keys: Vec<&str> = rec.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_non_object_json_is_not_a_record() {
        let err = extract("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ExtractionError::NoStructuredData { .. }));
    }

    #[test]
    fn test_invalid_json_is_never_coerced() {
        let err = extract("{summary: 'Lunch', }").unwrap_err();
        assert_eq!(
            err,
            ExtractionError::NoStructuredData {
                attempted: Strategy::ORDER.to_vec()
            }
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract("   \n").unwrap_err(), ExtractionError::EmptyInput);
    }

    #[test]
    fn test_unclosed_brace() {
        assert_eq!(balanced_brace_span("x { \"a\": 1"), None);
    }

    #[test]
    fn test_each_strategy_in_isolation() {
        assert!(Strategy::Direct.attempt("prefix {\"a\":1}").is_none());
        assert!(Strategy::FencedBlock.attempt("{\"a\":1}").is_none());
        assert!(Strategy::BraceSpan.attempt("prefix {\"a\":1}").is_some());
    }
}
