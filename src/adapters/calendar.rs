//! Remote calendar client.
//!
//! Endpoint: POST {base}/calendars/{calendar_id}/events
//! Auth: Bearer token read from an environment variable. Obtaining the
//! token (OAuth consent, refresh) happens outside voxroute.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::CalendarSettings;
use crate::domain::ExtractedRecord;

/// External calendar that accepts event records
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Insert an event; returns a link to it
    async fn insert_event(&self, event: &ExtractedRecord) -> Result<String>;
}

/// Google Calendar REST client
pub struct GoogleCalendarClient {
    base_url: String,
    calendar_id: String,
    token: String,
    client: reqwest::Client,
}

/// The parts of the insert response we use
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedEvent {
    id: Option<String>,
    html_link: Option<String>,
}

impl GoogleCalendarClient {
    pub fn new(
        base_url: impl Into<String>,
        calendar_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            calendar_id: calendar_id.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from settings, reading the token from `settings.token_env`
    pub fn from_settings(settings: &CalendarSettings) -> Result<Self> {
        let token = std::env::var(&settings.token_env).with_context(|| {
            format!("{} environment variable required for calendar sync", settings.token_env)
        })?;
        Ok(Self::new(&settings.base_url, &settings.calendar_id, token))
    }

    pub fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }
}

#[async_trait]
impl CalendarService for GoogleCalendarClient {
    async fn insert_event(&self, event: &ExtractedRecord) -> Result<String> {
        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(&self.token)
            .json(event)
            .send()
            .await
            .context("Failed to reach calendar service")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Calendar service error ({}): {}", status, text.trim());
        }

        let inserted: InsertedEvent = response
            .json()
            .await
            .context("Calendar service returned an unexpected body")?;

        inserted
            .html_link
            .or_else(|| inserted.id.map(|id| format!("{}#{}", self.events_url(), id)))
            .context("Calendar service response has no event link")
    }
}
