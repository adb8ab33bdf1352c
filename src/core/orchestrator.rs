//! Pipeline orchestrator.
//!
//! One run: store the transcript, segment the response, then route each
//! segment in order. A segment's failure is recorded on that segment and
//! never stops the ones after it.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Adapter, CalendarService, CommandAdapter, GoogleCalendarClient};
use crate::config::{ResolvedConfig, StructuringSettings};
use crate::domain::{
    Destination, ExtractedRecord, HandlerStatus, InvalidTransition, NewTranscript, PipelineResult, Segment,
    SegmentOutcome, SegmentState, Tag,
};
use crate::handlers::{HandlerRegistry, HandlerReport, SegmentContext};
use crate::store::Gateway;

use super::extractor::extract_with_strategy;
use super::segmenter::segment_detailed;

/// First 16 hex chars of the SHA-256 of `input`
pub fn content_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// External model that rewrites a segment into structured text before
/// extraction
#[derive(Clone)]
pub struct Structurer {
    adapter: Arc<dyn Adapter>,
    actions: HashMap<Tag, String>,
    timeout: Duration,
}

impl Structurer {
    pub fn new(adapter: Arc<dyn Adapter>, timeout: Duration) -> Self {
        Self {
            adapter,
            actions: HashMap::new(),
            timeout,
        }
    }

    pub fn with_action(mut self, tag: Tag, action: impl Into<String>) -> Self {
        self.actions.insert(tag, action.into());
        self
    }

    /// Command adapter with every configured tag action
    pub fn from_settings(settings: &StructuringSettings) -> Self {
        let adapter = CommandAdapter::new(&settings.program, settings.args.clone());
        let mut structurer = Self::new(Arc::new(adapter), settings.timeout());
        for tag in Tag::KNOWN {
            if let Some(action) = settings.action_for(tag) {
                structurer = structurer.with_action(tag, action);
            }
        }
        structurer
    }

    pub fn action_for(&self, tag: Tag) -> Option<&str> {
        self.actions.get(&tag).map(String::as_str)
    }
}

/// Where a segment ended up after routing
enum Routed {
    Stored(Destination),
    Skipped,
    Failed(String),
}

/// Routes model responses into storage and capability handlers
pub struct Orchestrator {
    gateway: Gateway,
    registry: HandlerRegistry,
    structurer: Option<Structurer>,
    model: String,
}

impl Orchestrator {
    pub fn new(gateway: Gateway, registry: HandlerRegistry) -> Self {
        Self {
            gateway,
            registry,
            structurer: None,
            model: "unknown".to_string(),
        }
    }

    pub fn with_structurer(mut self, structurer: Structurer) -> Self {
        self.structurer = Some(structurer);
        self
    }

    /// Model name recorded in transcript metadata
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Wire everything from resolved configuration.
    ///
    /// Fails when the database cannot be reached or migrated, or when
    /// calendar sync is enabled without a token.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let gateway = Gateway::connect(config.database.store_settings())
            .context("Failed to initialise storage")?;

        let calendar: Option<Arc<dyn CalendarService>> = if config.calendar.enabled {
            Some(Arc::new(GoogleCalendarClient::from_settings(&config.calendar)?))
        } else {
            None
        };

        let registry = HandlerRegistry::with_defaults(gateway.clone(), calendar);
        let mut orchestrator = Self::new(gateway, registry).with_model(&config.model);
        if let Some(settings) = &config.structuring {
            orchestrator = orchestrator.with_structurer(Structurer::from_settings(settings));
        }
        Ok(orchestrator)
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Run the pipeline over one raw response
    pub async fn run(&self, raw: &str, classification_tag: &str, source: &Path) -> PipelineResult {
        self.run_with_duration(raw, classification_tag, source, None)
            .await
    }

    /// [`run`](Self::run), recording the audio duration with the transcript
    #[instrument(skip(self, raw, source), fields(run_id))]
    pub async fn run_with_duration(
        &self,
        raw: &str,
        classification_tag: &str,
        source: &Path,
        duration_seconds: Option<f64>,
    ) -> PipelineResult {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!(source = %source.display(), "Starting pipeline run");

        let transcript = self.new_transcript(run_id, raw, classification_tag, source, duration_seconds);
        let Some(transcript_id) = self.gateway.save_transcript(transcript).await.into_option() else {
            error!("Transcript could not be stored, nothing routed");
            return PipelineResult::transcript_not_saved(run_id);
        };
        debug!(transcript_id, "Transcript stored");

        let segmentation = segment_detailed(raw, classification_tag);
        info!(
            segments = segmentation.segments.len(),
            skipped_blocks = segmentation.skipped.len(),
            fallback = segmentation.used_fallback,
            "Response segmented"
        );

        let mut outcomes = Vec::with_capacity(segmentation.segments.len());
        for segment in segmentation.segments {
            outcomes.push(self.process_segment(segment, transcript_id).await);
        }

        let result = PipelineResult::from_outcomes(run_id, transcript_id, outcomes);
        info!(
            status = ?result.overall_status,
            succeeded = result.count(HandlerStatus::Success),
            failed = result.count(HandlerStatus::Failed),
            skipped = result.count(HandlerStatus::Skipped),
            "Pipeline run finished"
        );

        if result.failed_segments().next().is_none() {
            self.mark_processed(&result, transcript_id).await;
        }

        result
    }

    fn new_transcript(
        &self,
        run_id: Uuid,
        raw: &str,
        tag: &str,
        source: &Path,
        duration_seconds: Option<f64>,
    ) -> NewTranscript {
        let mut metadata = ExtractedRecord::new();
        metadata.insert("model_used".into(), Value::from(self.model.clone()));
        metadata.insert("transcribed_at".into(), Value::from(Utc::now().to_rfc3339()));
        metadata.insert("run_id".into(), Value::from(run_id.to_string()));
        metadata.insert("content_hash".into(), Value::from(content_hash(raw)));

        NewTranscript {
            content: raw.to_string(),
            tag: tag.to_string(),
            filename: source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            audio_path: Some(source.display().to_string()),
            duration_seconds,
            metadata: Some(metadata),
        }
    }

    /// Route one segment; every error ends up in the returned outcome
    async fn process_segment(&self, segment: Segment, transcript_id: i64) -> SegmentOutcome {
        match self.route(&segment, transcript_id).await {
            Ok(Routed::Stored(destination)) => SegmentOutcome::success(segment, Some(destination)),
            Ok(Routed::Skipped) => SegmentOutcome::skipped(segment),
            Ok(Routed::Failed(message)) => SegmentOutcome::failed(segment, message),
            Err(err) => {
                error!(order = segment.order, tag = %segment.tag, error = %err, "Segment state machine violated");
                SegmentOutcome::failed(segment, err.to_string())
            }
        }
    }

    async fn route(&self, segment: &Segment, transcript_id: i64) -> Result<Routed, InvalidTransition> {
        let mut state = SegmentState::Pending;

        let record = if segment.tag.requires_structured_data() {
            match self.structure(segment).await {
                Ok(record) => {
                    state = state.advance(SegmentState::Extracted)?;
                    Some(record)
                }
                Err(err) => {
                    state.advance(SegmentState::Failed)?;
                    let message = format!("{:#}", err);
                    warn!(order = segment.order, tag = %segment.tag, error = %message, "Extraction failed");
                    return Ok(Routed::Failed(message));
                }
            }
        } else {
            state = state.advance(SegmentState::ExtractionSkipped)?;
            None
        };

        state = state.advance(SegmentState::Routed)?;
        let mut ctx = SegmentContext::new(segment, transcript_id);
        if let Some(record) = &record {
            ctx = ctx.with_record(record);
        }

        let handled = AssertUnwindSafe(self.registry.resolve(segment.tag).handle(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("Handler panicked: {}", panic_message(panic.as_ref()))));

        match handled {
            Ok(HandlerReport::Stored(destination)) => {
                state.advance(SegmentState::Succeeded)?;
                debug!(order = segment.order, table = %destination.table, id = destination.id, "Segment routed");
                Ok(Routed::Stored(destination))
            }
            Ok(HandlerReport::Skipped) => {
                state.advance(SegmentState::Succeeded)?;
                debug!(order = segment.order, tag = %segment.tag, "No handler, segment skipped");
                Ok(Routed::Skipped)
            }
            Err(err) => {
                state.advance(SegmentState::Failed)?;
                let message = format!("{:#}", err);
                warn!(order = segment.order, tag = %segment.tag, error = %message, "Handler failed");
                Ok(Routed::Failed(message))
            }
        }
    }

    /// Structured record for a segment, via the structurer when it has an
    /// action for the tag
    async fn structure(&self, segment: &Segment) -> Result<ExtractedRecord> {
        let input: Cow<'_, str> = match self
            .structurer
            .as_ref()
            .and_then(|s| s.action_for(segment.tag).map(|action| (s, action)))
        {
            Some((structurer, action)) => {
                let output = structurer
                    .adapter
                    .execute(action, &segment.text, structurer.timeout)
                    .await
                    .with_context(|| format!("Structuring via '{}' failed", structurer.adapter.name()))?;
                debug!(action, elapsed = ?output.elapsed, "Segment structured");
                Cow::Owned(output.content)
            }
            None => Cow::Borrowed(&segment.text),
        };

        let (record, strategy) = extract_with_strategy(&input)?;
        debug!(order = segment.order, %strategy, fields = record.len(), "Record extracted");
        Ok(record)
    }

    async fn mark_processed(&self, result: &PipelineResult, transcript_id: i64) {
        let mut destinations = result.segments.iter().filter_map(|o| o.destination.as_ref());
        let only = match (destinations.next(), destinations.next()) {
            (Some(first), None) => Some(first),
            _ => None,
        };

        if self
            .gateway
            .mark_transcript_processed(transcript_id, only)
            .await
            .is_failed()
        {
            warn!(transcript_id, "Could not mark transcript as processed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterOutput;
    use crate::domain::OverallStatus;
    use crate::store::StoreSettings;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Adapter that answers with a fixed string
    struct Canned(&'static str);

    #[async_trait]
    impl Adapter for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn execute(&self, _action: &str, _input: &str, _timeout: Duration) -> Result<AdapterOutput> {
            Ok(AdapterOutput::new(self.0.to_string()))
        }
    }

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        let gateway =
            Gateway::connect(StoreSettings::new(dir.path().join("o.db").display().to_string())).unwrap();
        let registry = HandlerRegistry::with_defaults(gateway.clone(), None);
        Orchestrator::new(gateway, registry).with_model("test-model")
    }

    #[test]
    fn test_content_hash() {
        // sha256("hello") = 2cf24dba5fb0a30e...
        assert_eq!(content_hash("hello"), "2cf24dba5fb0a30e");
    }

    #[tokio::test]
    async fn test_transcript_metadata() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let result = orch
            .run_with_duration("Went for a walk.", "diary", Path::new("/audio/memo-1.m4a"), Some(12.5))
            .await;
        assert_eq!(result.overall_status, OverallStatus::Success);

        let stored = orch
            .gateway()
            .get_transcript(result.transcript_id.unwrap())
            .await
            .into_option()
            .unwrap();
        assert_eq!(stored.filename.as_deref(), Some("memo-1.m4a"));
        assert_eq!(stored.audio_path.as_deref(), Some("/audio/memo-1.m4a"));
        assert_eq!(stored.duration_seconds, Some(12.5));
        assert_eq!(stored.tag, "diary");
        assert!(stored.is_processed);
        assert_eq!(stored.destination_table.as_deref(), Some("diary"));

        let metadata = stored.metadata.unwrap();
        assert_eq!(metadata["model_used"], "test-model");
        assert_eq!(metadata["run_id"], result.run_id.to_string());
        assert_eq!(metadata["content_hash"], content_hash("Went for a walk."));
        assert!(metadata.contains_key("transcribed_at"));
    }

    #[tokio::test]
    async fn test_structurer_output_is_extracted() {
        let dir = TempDir::new().unwrap();
        let structurer = Structurer::new(
            Arc::new(Canned(r#"Here you go: {"first_name": "Ana", "phone": "555"}"#)),
            Duration::from_secs(1),
        )
        .with_action(Tag::Contacts, "contact");
        let orch = orchestrator(&dir).with_structurer(structurer);

        let result = orch
            .run("save Ana's number, 555", "contacts", Path::new("memo.m4a"))
            .await;
        assert_eq!(result.overall_status, OverallStatus::Success);
        assert_eq!(result.segments[0].destination.as_ref().unwrap().table, "contacts");
    }

    #[tokio::test]
    async fn test_failed_run_is_not_marked_processed() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);

        let result = orch
            .run("no json in here", "calendar", Path::new("memo.m4a"))
            .await;
        assert_eq!(result.overall_status, OverallStatus::Partial);

        let stored = orch
            .gateway()
            .get_transcript(result.transcript_id.unwrap())
            .await
            .into_option()
            .unwrap();
        assert!(!stored.is_processed);
    }
}
