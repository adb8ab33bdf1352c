//! Core pipeline logic.
//!
//! This module contains:
//! - Segmenter: splits a model response into tagged segments
//! - Extractor: recovers one structured record from noisy text
//! - Orchestrator: routes segments to capability handlers

pub mod extractor;
pub mod orchestrator;
pub mod segmenter;

// Re-export commonly used types
pub use extractor::{extract, extract_with_strategy, ExtractionError, Strategy};
pub use orchestrator::{content_hash, Orchestrator, Structurer};
pub use segmenter::{segment, segment_detailed, Segmentation, SegmentationError};
