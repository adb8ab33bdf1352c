//! Capability handlers.
//!
//! One handler per tag, looked up through the [`HandlerRegistry`]. Tags with
//! no registered handler (including `unclassified`) resolve to
//! [`NoOpHandler`], whose outcome is `skipped`.
//!
//! Handlers report failure with `anyhow::Error`; the orchestrator catches it
//! at the segment boundary and records it on that segment only. A handler
//! that panics is caught at the same boundary and recorded as failed.

pub mod accounts;
pub mod calendar;
pub mod contacts;
pub mod diary;
pub mod entities;
pub mod todo;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub use accounts::AccountsHandler;
pub use calendar::CalendarHandler;
pub use contacts::ContactsHandler;
pub use diary::DiaryHandler;
pub use entities::EntitiesHandler;
pub use todo::ToDoHandler;

use crate::adapters::CalendarService;
use crate::domain::{Destination, ExtractedRecord, Segment, Tag};
use crate::store::{Gateway, StoreOutcome, Table};

/// Everything a handler gets to see about one segment
#[derive(Debug, Clone, Copy)]
pub struct SegmentContext<'a> {
    pub segment: &'a Segment,

    /// Id of the stored transcript the segment came from
    pub transcript_id: i64,

    /// Structured record, present for tags that require one
    pub record: Option<&'a ExtractedRecord>,
}

impl<'a> SegmentContext<'a> {
    pub fn new(segment: &'a Segment, transcript_id: i64) -> Self {
        Self {
            segment,
            transcript_id,
            record: None,
        }
    }

    pub fn with_record(mut self, record: &'a ExtractedRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn text(&self) -> &'a str {
        &self.segment.text
    }

    /// The record, or an error naming the handler that needed it
    pub fn require_record(&self) -> Result<&'a ExtractedRecord> {
        self.record
            .ok_or_else(|| anyhow!("No structured record for {} segment", self.segment.tag))
    }
}

/// What a handler did with its segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerReport {
    Stored(Destination),
    Skipped,
}

/// Tag-specific consumer of a segment
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Tag this handler is registered under
    fn tag(&self) -> Tag;

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport>;
}

/// Handler for tags nothing else claims
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

#[async_trait]
impl CapabilityHandler for NoOpHandler {
    fn tag(&self) -> Tag {
        Tag::Unclassified
    }

    async fn handle(&self, _ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        Ok(HandlerReport::Skipped)
    }
}

/// Tag → handler dispatch table
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Tag, Arc<dyn CapabilityHandler>>,
    fallback: NoOpHandler,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All six capability handlers backed by `gateway`
    pub fn with_defaults(gateway: Gateway, calendar: Option<Arc<dyn CalendarService>>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DiaryHandler::new(gateway.clone())));
        registry.register(Arc::new(ToDoHandler::new(gateway.clone())));
        registry.register(Arc::new(AccountsHandler::new(gateway.clone())));
        registry.register(Arc::new(ContactsHandler::new(gateway.clone())));
        registry.register(Arc::new(EntitiesHandler::new(gateway.clone())));
        registry.register(Arc::new(CalendarHandler::new(gateway, calendar)));
        registry
    }

    /// Register a handler under its own tag, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) -> &mut Self {
        self.handlers.insert(handler.tag(), handler);
        self
    }

    /// Handler for `tag`, or the no-op handler
    pub fn resolve(&self, tag: Tag) -> &dyn CapabilityHandler {
        match self.handlers.get(&tag) {
            Some(handler) => handler.as_ref(),
            None => &self.fallback,
        }
    }

    pub fn is_registered(&self, tag: Tag) -> bool {
        self.handlers.contains_key(&tag)
    }
}

/// Turn a create outcome into the new row id or a handler error
pub(crate) fn stored_id(outcome: StoreOutcome<i64>, what: &str) -> Result<i64> {
    match outcome {
        StoreOutcome::Found(id) => Ok(id),
        StoreOutcome::NotFound => Err(anyhow!("Storage returned no id for {}", what)),
        StoreOutcome::Failed(err) => Err(err).with_context(|| format!("Failed to save {}", what)),
    }
}

pub(crate) fn stored(table: Table, id: i64) -> HandlerReport {
    HandlerReport::Stored(Destination {
        table: table.name().to_string(),
        id,
        link: None,
    })
}

/// Non-empty trimmed string field of a record
pub(crate) fn text_field(record: &ExtractedRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl CapabilityHandler for Failing {
        fn tag(&self) -> Tag {
            Tag::Diary
        }

        async fn handle(&self, _ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_unregistered_tag_resolves_to_noop() {
        let registry = HandlerRegistry::new();
        let segment = Segment::new("whatever", Tag::Calendar, 0);
        let ctx = SegmentContext::new(&segment, 1);

        let handler = registry.resolve(Tag::Calendar);
        assert_eq!(handler.tag(), Tag::Unclassified);
        assert_eq!(handler.handle(&ctx).await.unwrap(), HandlerReport::Skipped);
    }

    #[tokio::test]
    async fn test_registered_handler_is_used() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Failing));
        assert!(registry.is_registered(Tag::Diary));

        let segment = Segment::new("x", Tag::Diary, 0);
        let ctx = SegmentContext::new(&segment, 1);
        let err = registry.resolve(Tag::Diary).handle(&ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_require_record() {
        let segment = Segment::new("x", Tag::Contacts, 0);
        let ctx = SegmentContext::new(&segment, 1);
        assert!(ctx.require_record().is_err());

        let record = ExtractedRecord::new();
        assert!(ctx.with_record(&record).require_record().is_ok());
    }

    #[test]
    fn test_stored_id_carries_storage_error() {
        let err = stored_id(
            StoreOutcome::Failed(crate::store::PersistenceError::EmptyUpdate),
            "diary entry",
        )
        .unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "Failed to save diary entry: Update requires at least one field"
        );
    }
}
