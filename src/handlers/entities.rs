//! Named entities (people, places, organisations) from a structured record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{stored, stored_id, text_field, CapabilityHandler, HandlerReport, SegmentContext};
use crate::domain::{ExtractedRecord, Tag};
use crate::store::{Gateway, NewEntity, Table};

const DEFAULT_RELEVANCE: f64 = 0.5;

pub struct EntitiesHandler {
    gateway: Gateway,
}

impl EntitiesHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// Relevance in `[0, 1]`; missing or unparseable values fall back to 0.5
pub fn relevance(record: &ExtractedRecord) -> f64 {
    let raw = match record.get("relevance_score") {
        None | Some(Value::Null) => return DEFAULT_RELEVANCE,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match raw {
        Some(score) if score.is_finite() => score.clamp(0.0, 1.0),
        _ => {
            warn!("Invalid relevance score, using {}", DEFAULT_RELEVANCE);
            DEFAULT_RELEVANCE
        }
    }
}

pub fn entity_from_record(record: &ExtractedRecord, transcript_id: i64) -> Result<NewEntity> {
    let name = text_field(record, "name").context("Entity record is missing 'name'")?;

    Ok(NewEntity {
        name,
        kind: text_field(record, "type"),
        context: text_field(record, "context"),
        relevance_score: relevance(record),
        source_transcription_id: Some(transcript_id),
    })
}

#[async_trait]
impl CapabilityHandler for EntitiesHandler {
    fn tag(&self) -> Tag {
        Tag::Entities
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let entity = entity_from_record(ctx.require_record()?, ctx.transcript_id)?;
        let name = entity.name.clone();

        let id = stored_id(self.gateway.save_entity(entity).await, "entity")?;
        info!(id, %name, "Entity saved");
        Ok(stored(Table::Entities, id))
    }
}
