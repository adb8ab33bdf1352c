//! Pipeline Integration Tests
//!
//! End-to-end runs through the orchestrator: failure isolation, ordering,
//! overall status and the transcript-first rule.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tempfile::TempDir;
use voxroute::adapters::CalendarService;
use voxroute::domain::{ExtractedRecord, HandlerStatus, OverallStatus, Tag};
use voxroute::handlers::{CapabilityHandler, HandlerRegistry, HandlerReport, SegmentContext};
use voxroute::store::{Gateway, StoreSettings};
use voxroute::Orchestrator;

fn database(dir: &TempDir) -> String {
    dir.path().join("pipeline.db").display().to_string()
}

fn gateway(dir: &TempDir) -> Gateway {
    Gateway::connect(StoreSettings::new(database(dir))).unwrap()
}

fn orchestrator(dir: &TempDir) -> Orchestrator {
    let gateway = gateway(dir);
    let registry = HandlerRegistry::with_defaults(gateway.clone(), None);
    Orchestrator::new(gateway, registry)
}

/// Handler that always fails for its tag
struct Broken(Tag);

#[async_trait]
impl CapabilityHandler for Broken {
    fn tag(&self) -> Tag {
        self.0
    }

    async fn handle(&self, _ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        anyhow::bail!("downstream service unavailable")
    }
}

/// Handler that panics instead of returning an error
struct Panicking(Tag);

#[async_trait]
impl CapabilityHandler for Panicking {
    fn tag(&self) -> Tag {
        self.0
    }

    async fn handle(&self, _ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        panic!("index out of range in {} handler", self.0)
    }
}

struct FakeCalendar;

#[async_trait]
impl CalendarService for FakeCalendar {
    async fn insert_event(&self, _event: &ExtractedRecord) -> Result<String> {
        Ok("https://calendar.example/evt-1".to_string())
    }
}

const THREE_BLOCKS: &str = "text: \"Felt great after the run\"\ntag: diary\n\n\
                            text: \"Lunch with Bob\"\ntag: to_do\n\n\
                            text: \"Paid 20 for groceries\"\ntag: accounts";

#[tokio::test]
async fn test_failing_middle_segment_is_isolated() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway(&dir);
    let mut registry = HandlerRegistry::with_defaults(gateway.clone(), None);
    registry.register(Arc::new(Broken(Tag::ToDo)));
    let orch = Orchestrator::new(gateway, registry);

    let result = orch.run(THREE_BLOCKS, "diary", Path::new("memo.m4a")).await;

    assert_eq!(result.overall_status, OverallStatus::Partial);
    assert!(result.transcript_id.is_some());
    assert_eq!(result.segments.len(), 3);

    let statuses: Vec<HandlerStatus> = result.segments.iter().map(|o| o.handler_status).collect();
    assert_eq!(
        statuses,
        [HandlerStatus::Success, HandlerStatus::Failed, HandlerStatus::Success]
    );

    let failed = &result.segments[1];
    assert_eq!(failed.segment.text, "Lunch with Bob");
    assert!(failed.error.as_deref().unwrap().contains("downstream service unavailable"));

    assert_eq!(result.segments[0].destination.as_ref().unwrap().table, "diary");
    assert_eq!(result.segments[2].destination.as_ref().unwrap().table, "accounts");
    assert_eq!(result.failed_segments().count(), 1);
    assert!(!result.overall_status.is_retry_worthy());
}

#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway(&dir);
    let mut registry = HandlerRegistry::with_defaults(gateway.clone(), None);
    registry.register(Arc::new(Panicking(Tag::ToDo)));
    let orch = Orchestrator::new(gateway.clone(), registry);

    let result = orch.run(THREE_BLOCKS, "diary", Path::new("memo.m4a")).await;

    assert_eq!(result.overall_status, OverallStatus::Partial);
    let statuses: Vec<HandlerStatus> = result.segments.iter().map(|o| o.handler_status).collect();
    assert_eq!(
        statuses,
        [HandlerStatus::Success, HandlerStatus::Failed, HandlerStatus::Success]
    );

    let error = result.segments[1].error.as_deref().unwrap();
    assert!(error.contains("Handler panicked"), "{error}");
    assert!(error.contains("index out of range in to_do handler"), "{error}");

    let transcript = gateway
        .get_transcript(result.transcript_id.unwrap())
        .await
        .into_option()
        .unwrap();
    assert!(!transcript.is_processed);
}

#[tokio::test]
async fn test_outcome_order_matches_segment_order() {
    let dir = TempDir::new().unwrap();
    let result = orchestrator(&dir)
        .run(THREE_BLOCKS, "diary", Path::new("memo.m4a"))
        .await;

    assert_eq!(result.overall_status, OverallStatus::Success);
    let orders: Vec<usize> = result.segments.iter().map(|o| o.segment.order).collect();
    assert_eq!(orders, [0, 1, 2]);
    let tags: Vec<Tag> = result.segments.iter().map(|o| o.segment.tag).collect();
    assert_eq!(tags, [Tag::Diary, Tag::ToDo, Tag::Accounts]);
}

#[tokio::test]
async fn test_unsaved_transcript_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let gateway = Gateway::connect(
        StoreSettings::new(database(&dir)).with_busy_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let registry = HandlerRegistry::with_defaults(gateway.clone(), None);
    let orch = Orchestrator::new(gateway, registry);

    let lock = Connection::open(dir.path().join("pipeline.db")).unwrap();
    lock.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let result = orch.run(THREE_BLOCKS, "diary", Path::new("memo.m4a")).await;
    assert_eq!(result.overall_status, OverallStatus::Failed);
    assert_eq!(result.transcript_id, None);
    assert!(result.segments.is_empty());
    assert!(result.overall_status.is_retry_worthy());

    lock.execute_batch("ROLLBACK;").unwrap();
    drop(lock);

    let retried = orch.run(THREE_BLOCKS, "diary", Path::new("memo.m4a")).await;
    assert_eq!(retried.overall_status, OverallStatus::Success);
}

#[tokio::test]
async fn test_unhandled_tags_are_skipped_not_failed() {
    let dir = TempDir::new().unwrap();
    let orch = Orchestrator::new(gateway(&dir), HandlerRegistry::new());

    let raw = "text: \"something\"\ntag: diary\n\ntext: \"who knows\"\ntag: horoscope";
    let result = orch.run(raw, "diary", Path::new("memo.m4a")).await;

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert_eq!(result.count(HandlerStatus::Skipped), 2);
    assert_eq!(result.segments[1].segment.tag, Tag::Unclassified);
}

#[tokio::test]
async fn test_every_segment_failing_is_still_partial() {
    let dir = TempDir::new().unwrap();
    let raw = "text: \"Paid for nothing\"\ntag: accounts\n\ntext: \"meet at noon\"\ntag: calendar";
    let result = orchestrator(&dir).run(raw, "diary", Path::new("memo.m4a")).await;

    assert_eq!(result.overall_status, OverallStatus::Partial);
    assert_eq!(result.count(HandlerStatus::Failed), 2);
    assert!(result.segments[0].error.as_deref().unwrap().contains("No amount"));
    assert!(result.segments[1]
        .error
        .as_deref()
        .unwrap()
        .contains("No valid JSON object found"));
}

#[tokio::test]
async fn test_calendar_segment_end_to_end() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway(&dir);
    let registry = HandlerRegistry::with_defaults(gateway.clone(), Some(Arc::new(FakeCalendar)));
    let orch = Orchestrator::new(gateway.clone(), registry);

    let raw = "Sure, here is the event:\n```json\n{\"summary\": \"Lunch with Bob\", \
               \"start\": {\"dateTime\": \"2030-05-01T12:00:00\", \"timeZone\": \"Europe/Lisbon\"}, \
               \"attendees\": [{\"email\": \"bob@example.com\"}]}\n```";
    let result = orch.run(raw, "calendar", Path::new("memo.m4a")).await;

    assert_eq!(result.overall_status, OverallStatus::Success);
    let destination = result.segments[0].destination.clone().unwrap();
    assert_eq!(destination.link.as_deref(), Some("https://calendar.example/evt-1"));

    let event = gateway
        .get_calendar_event(destination.id)
        .await
        .into_option()
        .unwrap();
    assert_eq!(event.event.summary, "Lunch with Bob");
    assert_eq!(event.event.source_transcription_id, result.transcript_id);
    assert_eq!(event.external_link.as_deref(), Some("https://calendar.example/evt-1"));

    let transcript = gateway
        .get_transcript(result.transcript_id.unwrap())
        .await
        .into_option()
        .unwrap();
    assert!(transcript.is_processed);
    assert_eq!(transcript.destination_table.as_deref(), Some("calendar_events"));
    assert_eq!(transcript.destination_id, Some(destination.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_share_the_pool() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(orchestrator(&dir));

    let runs: Vec<_> = (0..8)
        .map(|i| {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                let raw = format!("text: \"entry {}\"\ntag: diary\n\ntext: \"task {}\"\ntag: to_do", i, i);
                orch.run(&raw, "diary", Path::new("memo.m4a")).await
            })
        })
        .collect();

    let mut transcript_ids = Vec::new();
    for run in runs {
        let result = run.await.unwrap();
        assert_eq!(result.overall_status, OverallStatus::Success);
        transcript_ids.push(result.transcript_id.unwrap());
    }
    transcript_ids.sort_unstable();
    transcript_ids.dedup();
    assert_eq!(transcript_ids.len(), 8);

    let pool = orch.gateway().pool();
    assert_eq!(pool.available(), pool.settings().max_connections);
}
