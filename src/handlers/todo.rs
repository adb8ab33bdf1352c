//! To-do tasks.
//!
//! Due dates come from "by|due|on <day>" phrases; priority from a handful
//! of keywords.

use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use regex::Regex;
use tracing::info;

use super::{stored, stored_id, CapabilityHandler, HandlerReport, SegmentContext};
use crate::domain::Tag;
use crate::store::{Gateway, NewTask, Priority, Table};

static DUE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:by|due|on)\s+(today|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    )
    .expect("valid regex")
});

const HIGH_PRIORITY: [&str; 4] = ["urgent", "important", "critical", "high priority"];
const LOW_PRIORITY: [&str; 3] = ["low priority", "when you can", "not urgent"];

/// Due date relative to `today`.
///
/// A weekday always means its next occurrence, a week out when it names
/// today.
pub fn due_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let caps = DUE_PHRASE.captures(text)?;
    let term = caps[1].to_lowercase();

    match term.as_str() {
        "today" => Some(today),
        "tomorrow" => today.succ_opt(),
        day => {
            let target: Weekday = day.parse().ok()?;
            let ahead = (7 + target.num_days_from_monday() as i64
                - today.weekday().num_days_from_monday() as i64)
                % 7;
            let ahead = if ahead == 0 { 7 } else { ahead };
            today.checked_add_signed(Duration::days(ahead))
        }
    }
}

/// Priority from keywords; "not urgent" and friends win over "urgent"
pub fn priority(text: &str) -> Priority {
    let lower = text.to_lowercase();
    if LOW_PRIORITY.iter().any(|term| lower.contains(term)) {
        Priority::Low
    } else if HIGH_PRIORITY.iter().any(|term| lower.contains(term)) {
        Priority::High
    } else {
        Priority::Medium
    }
}

pub struct ToDoHandler {
    gateway: Gateway,
}

impl ToDoHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl CapabilityHandler for ToDoHandler {
    fn tag(&self) -> Tag {
        Tag::ToDo
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let text = ctx.text();
        let task = NewTask {
            task: text.to_string(),
            due_date: due_date(text, Local::now().date_naive()),
            priority: priority(text),
            source_transcription_id: Some(ctx.transcript_id),
        };
        let (due, prio) = (task.due_date, task.priority);

        let id = stored_id(self.gateway.save_task(task).await, "to-do task")?;
        info!(id, ?due, priority = prio.as_str(), "To-do task saved");
        Ok(stored(Table::ToDo, id))
    }
}
