//! Diary entries.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{stored, stored_id, text_field, CapabilityHandler, HandlerReport, SegmentContext};
use crate::domain::Tag;
use crate::store::{Gateway, NewDiaryEntry, Table};

pub struct DiaryHandler {
    gateway: Gateway,
}

impl DiaryHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl CapabilityHandler for DiaryHandler {
    fn tag(&self) -> Tag {
        Tag::Diary
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let mut entry = NewDiaryEntry {
            content: ctx.text().to_string(),
            source_transcription_id: Some(ctx.transcript_id),
            ..Default::default()
        };

        if let Some(record) = ctx.record {
            entry.mood = text_field(record, "mood");
            if let Some(Value::Array(tags)) = record.get("tags") {
                entry.tags = tags
                    .iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect();
            }
        }

        let id = stored_id(self.gateway.save_diary_entry(entry).await, "diary entry")?;
        info!(id, transcript_id = ctx.transcript_id, "Diary entry saved");
        Ok(stored(Table::Diary, id))
    }
}
