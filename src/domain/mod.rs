//! Domain types for the voxroute pipeline.
//!
//! This module contains the core data structures:
//! - Segment/Tag: tagged units recovered from a model response
//! - Records: extracted records and persisted transcripts
//! - Outcomes: per-segment results and the aggregated pipeline result

pub mod outcome;
pub mod record;
pub mod segment;

// Re-export commonly used types
pub use outcome::{
    Destination, HandlerStatus, InvalidTransition, OverallStatus, PipelineResult, SegmentOutcome,
    SegmentState,
};
pub use record::{ExtractedRecord, NewTranscript, PersistedRecord};
pub use segment::{Segment, Tag};
