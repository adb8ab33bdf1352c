//! voxroute - routes classified voice-diary responses into durable records
//!
//! A language model classifies a transcribed voice memo and answers with
//! one or more tagged blocks. voxroute stores the transcript, splits the
//! answer into segments, recovers a structured record where the tag needs
//! one, and hands each segment to the capability handler for its tag.
//!
//! # Architecture
//!
//! - A segment's failure is recorded on that segment and never aborts the
//!   rest of the run
//! - Storage access is pooled and transaction-scoped; failures degrade to
//!   typed outcomes instead of propagating
//! - No connection is held while a handler talks to an external service
//!
//! # Modules
//!
//! - `adapters`: External collaborators (structuring command, calendar API)
//! - `core`: Segmenter, Extractor, Orchestrator
//! - `domain`: Data structures (Segment, SegmentOutcome, PipelineResult)
//! - `handlers`: Capability handlers, one per tag
//! - `store`: Connection pool, migrations and repositories
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Route a model response
//! voxroute route --input response.txt --tag diary --source memo.m4a
//!
//! # Inspect what was stored
//! voxroute transcripts --limit 5
//! voxroute show 42
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod handlers;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, Structurer};
pub use domain::{
    Destination, ExtractedRecord, HandlerStatus, OverallStatus, PipelineResult, Segment,
    SegmentOutcome, Tag,
};
pub use store::{Gateway, StoreOutcome, StoreSettings};
