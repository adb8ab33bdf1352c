//! Per-segment outcomes and the aggregated pipeline result.
//!
//! Each segment walks a one-way state machine:
//!
//! ```text
//! Pending → Extracted | ExtractionSkipped → Routed → Succeeded | Failed
//!    └──────────────────────────────────────────────→ Failed (extraction)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::segment::Segment;

/// Lifecycle state of one segment within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Pending,
    Extracted,
    ExtractionSkipped,
    Routed,
    Succeeded,
    Failed,
}

/// Attempted to move a segment backwards or skip a stage
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid segment transition: {from:?} → {to:?}")]
pub struct InvalidTransition {
    pub from: SegmentState,
    pub to: SegmentState,
}

impl SegmentState {
    /// Move to `next` if the transition is legal
    pub fn advance(self, next: SegmentState) -> Result<SegmentState, InvalidTransition> {
        use SegmentState::*;

        let legal = matches!(
            (self, next),
            (Pending, Extracted)
                | (Pending, ExtractionSkipped)
                | (Pending, Failed)
                | (Extracted, Routed)
                | (ExtractionSkipped, Routed)
                | (Routed, Succeeded)
                | (Routed, Failed)
        );

        if legal {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentState::Succeeded | SegmentState::Failed)
    }
}

/// What happened when a segment reached its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    Success,
    Failed,

    /// No handler for the tag (no-op route)
    Skipped,
}

/// Where a handler stored the segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub table: String,
    pub id: i64,

    /// Link produced by an external service, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Result of processing one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentOutcome {
    pub segment: Segment,
    pub handler_status: HandlerStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
}

impl SegmentOutcome {
    pub fn success(segment: Segment, destination: Option<Destination>) -> Self {
        Self {
            segment,
            handler_status: HandlerStatus::Success,
            error: None,
            destination,
        }
    }

    pub fn failed(segment: Segment, error: impl Into<String>) -> Self {
        Self {
            segment,
            handler_status: HandlerStatus::Failed,
            error: Some(error.into()),
            destination: None,
        }
    }

    pub fn skipped(segment: Segment) -> Self {
        Self {
            segment,
            handler_status: HandlerStatus::Skipped,
            error: None,
            destination: None,
        }
    }
}

/// Aggregate status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every routed segment succeeded (skipped segments don't count)
    Success,

    /// Transcript stored, at least one segment failed
    Partial,

    /// Transcript could not be stored; nothing was routed
    Failed,
}

impl OverallStatus {
    /// Whether rerunning the whole pipeline is safe and useful.
    ///
    /// Only `Failed` qualifies: nothing was persisted. Rerunning a `Partial`
    /// run would store the transcript twice; reprocess
    /// [`PipelineResult::failed_segments`] instead.
    pub fn is_retry_worthy(&self) -> bool {
        matches!(self, OverallStatus::Failed)
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Correlates log lines and transcript metadata for this run
    pub run_id: Uuid,

    pub transcript_id: Option<i64>,
    pub segments: Vec<SegmentOutcome>,
    pub overall_status: OverallStatus,
}

impl PipelineResult {
    /// Result for a run whose transcript could not be stored
    pub fn transcript_not_saved(run_id: Uuid) -> Self {
        Self {
            run_id,
            transcript_id: None,
            segments: Vec::new(),
            overall_status: OverallStatus::Failed,
        }
    }

    /// Aggregate the outcomes of a run whose transcript was stored
    pub fn from_outcomes(run_id: Uuid, transcript_id: i64, segments: Vec<SegmentOutcome>) -> Self {
        let any_failed = segments
            .iter()
            .any(|o| o.handler_status == HandlerStatus::Failed);

        let overall_status = if any_failed {
            OverallStatus::Partial
        } else {
            OverallStatus::Success
        };

        Self {
            run_id,
            transcript_id: Some(transcript_id),
            segments,
            overall_status,
        }
    }

    pub fn failed_segments(&self) -> impl Iterator<Item = &SegmentOutcome> {
        self.segments
            .iter()
            .filter(|o| o.handler_status == HandlerStatus::Failed)
    }

    pub fn count(&self, status: HandlerStatus) -> usize {
        self.segments
            .iter()
            .filter(|o| o.handler_status == status)
            .count()
    }
}
