//! Interfaces to external collaborators.
//!
//! - [`Adapter`]: a structuring model reached as a subprocess
//! - [`CalendarService`]: the remote calendar

pub mod calendar;
pub mod command;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use calendar::{CalendarService, GoogleCalendarClient};
pub use command::CommandAdapter;

/// Output from an adapter execution
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    /// The content returned by the adapter
    pub content: String,

    /// Wall time of the call
    pub elapsed: Duration,
}

impl AdapterOutput {
    pub fn new(content: String) -> Self {
        Self {
            content,
            elapsed: Duration::ZERO,
        }
    }
}

/// Trait for structuring adapters
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Execute an action with input, bounded by `timeout`
    async fn execute(&self, action: &str, input: &str, timeout: Duration)
        -> Result<AdapterOutput>;
}
