//! Structured records and persisted transcripts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record recovered from free text.
///
/// Keys keep the order they had in the source document. There is no schema
/// at this layer; capability handlers validate the fields they need.
pub type ExtractedRecord = serde_json::Map<String, serde_json::Value>;

/// A transcript row as stored by the gateway.
///
/// `id` is assigned by storage on insert and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub id: i64,
    pub content: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
    pub filename: Option<String>,
    pub audio_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata: Option<ExtractedRecord>,

    /// Set once every segment of the transcript has been routed
    #[serde(default)]
    pub is_processed: bool,

    /// Where a single-destination transcript ended up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<i64>,
}

/// Input for storing a transcript
#[derive(Debug, Clone, Default)]
pub struct NewTranscript {
    pub content: String,
    pub tag: String,
    pub filename: Option<String>,
    pub audio_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata: Option<ExtractedRecord>,
}

impl NewTranscript {
    pub fn new(content: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: ExtractedRecord) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
