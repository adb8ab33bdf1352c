//! Tags and segments recovered from a model response.
//!
//! A segment is one `(text, tag)` unit. Its `order` is the index of the
//! block it came from, so gaps left by skipped blocks stay visible.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability tag assigned to a segment by the upstream classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Diary,
    Calendar,
    ToDo,
    Accounts,
    Contacts,
    Entities,

    /// Anything the classifier emitted that is not a known capability
    Unclassified,
}

impl Tag {
    /// Every routable tag, in declaration order
    pub const KNOWN: [Tag; 6] = [
        Tag::Diary,
        Tag::Calendar,
        Tag::ToDo,
        Tag::Accounts,
        Tag::Contacts,
        Tag::Entities,
    ];

    /// Parse a raw tag value.
    ///
    /// Matching is case-insensitive, spaces and hyphens count as `_`, and the
    /// singular aliases the classifier sometimes emits are accepted. Unknown
    /// values map to [`Tag::Unclassified`].
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");

        match normalized.as_str() {
            "diary" => Tag::Diary,
            "calendar" => Tag::Calendar,
            "to_do" | "todo" => Tag::ToDo,
            "accounts" | "account" => Tag::Accounts,
            "contacts" | "contact" => Tag::Contacts,
            "entities" | "entity" => Tag::Entities,
            _ => Tag::Unclassified,
        }
    }

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Diary => "diary",
            Tag::Calendar => "calendar",
            Tag::ToDo => "to_do",
            Tag::Accounts => "accounts",
            Tag::Contacts => "contacts",
            Tag::Entities => "entities",
            Tag::Unclassified => "unclassified",
        }
    }

    /// Whether the segment text must be turned into a structured record
    /// before its handler can run
    pub fn requires_structured_data(&self) -> bool {
        matches!(self, Tag::Calendar | Tag::Contacts | Tag::Entities)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One tagged unit of a model response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment content (quotes and label stripped)
    pub text: String,

    /// Capability tag
    pub tag: Tag,

    /// 0-based index of the source block
    pub order: usize,
}

impl Segment {
    pub fn new(text: impl Into<String>, tag: Tag, order: usize) -> Self {
        Self {
            text: text.into(),
            tag,
            order,
        }
    }

    /// Short preview for logs
    pub fn preview(&self) -> String {
        const MAX: usize = 50;
        if self.text.chars().count() <= MAX {
            self.text.clone()
        } else {
            let head: String = self.text.chars().take(MAX).collect();
            format!("{}...", head)
        }
    }
}
