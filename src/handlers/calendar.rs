//! Calendar events.
//!
//! The record uses the calendar API's own shape (`summary`, `start`, `end`,
//! `attendees`, ...). The event is stored locally first; when a
//! [`CalendarService`] is configured it is then inserted remotely and the
//! returned link is attached to the local row.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{stored_id, text_field, CapabilityHandler, HandlerReport, SegmentContext};
use crate::adapters::CalendarService;
use crate::domain::{Destination, ExtractedRecord, Tag};
use crate::store::{Gateway, NewCalendarEvent, StoreOutcome, Table};

pub struct CalendarHandler {
    gateway: Gateway,
    service: Option<Arc<dyn CalendarService>>,
}

impl CalendarHandler {
    pub fn new(gateway: Gateway, service: Option<Arc<dyn CalendarService>>) -> Self {
        Self { gateway, service }
    }
}

/// `(datetime, timezone)` from either `{"dateTime"|"date", "timeZone"}` or a
/// bare string
fn event_time(value: Option<&Value>) -> Option<(String, Option<String>)> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some((s.trim().to_string(), None)),
        Value::Object(map) => {
            let at = text_field(map, "dateTime").or_else(|| text_field(map, "date"))?;
            Some((at, text_field(map, "timeZone")))
        }
        _ => None,
    }
}

fn structured(record: &ExtractedRecord, key: &str) -> Option<Value> {
    match record.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

pub fn event_from_record(record: &ExtractedRecord, transcript_id: i64) -> Result<NewCalendarEvent> {
    let summary = text_field(record, "summary").context("Calendar record is missing 'summary'")?;
    let (start_datetime, start_timezone) =
        event_time(record.get("start")).context("Calendar record is missing a usable 'start'")?;
    let (end_datetime, end_timezone) = event_time(record.get("end")).unzip();

    Ok(NewCalendarEvent {
        summary,
        location: text_field(record, "location"),
        description: text_field(record, "description"),
        start_datetime,
        start_timezone,
        end_datetime,
        end_timezone: end_timezone.flatten(),
        attendees: structured(record, "attendees"),
        recurrence: structured(record, "recurrence"),
        reminders: structured(record, "reminders"),
        visibility: text_field(record, "visibility"),
        color_id: text_field(record, "colorId").or_else(|| text_field(record, "color_id")),
        transparency: text_field(record, "transparency"),
        status: text_field(record, "status"),
        source_transcription_id: Some(transcript_id),
    })
}

#[async_trait]
impl CapabilityHandler for CalendarHandler {
    fn tag(&self) -> Tag {
        Tag::Calendar
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let record = ctx.require_record()?;
        let event = event_from_record(record, ctx.transcript_id)?;
        let summary = event.summary.clone();

        let id = stored_id(self.gateway.save_calendar_event(event).await, "calendar event")?;
        info!(id, %summary, "Calendar event saved");

        let mut destination = Destination {
            table: Table::CalendarEvents.name().to_string(),
            id,
            link: None,
        };

        let Some(service) = &self.service else {
            return Ok(HandlerReport::Stored(destination));
        };

        let link = service
            .insert_event(record)
            .await
            .with_context(|| format!("Calendar event {} stored locally but remote insert failed", id))?;

        let mut fields = ExtractedRecord::new();
        fields.insert("external_link".into(), Value::from(link.clone()));
        if let StoreOutcome::Failed(err) =
            self.gateway.update_fields(Table::CalendarEvents, id, fields).await
        {
            warn!(id, error = %err, "Could not attach calendar link");
        }

        info!(id, %link, "Calendar event synced");
        destination.link = Some(link);
        Ok(HandlerReport::Stored(destination))
    }
}
