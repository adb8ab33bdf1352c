//! Day summaries.
//!
//! A summary covers a span of diary days. `date_range_start` and
//! `date_range_end` identify that span; `summary_date` is when the summary
//! was written.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::transcripts::{parse_timestamp, timestamp};
use super::{Gateway, OpCategory, StoreOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDaySummary {
    pub content: String,
    pub filename: Option<String>,
    pub date_range_start: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub id: i64,
    pub content: String,
    pub summary_date: DateTime<Utc>,
    pub filename: Option<String>,
    pub date_range_start: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
}

const SELECT_SUMMARY: &str = "SELECT id, content, summary_date, filename, date_range_start, \
     date_range_end FROM day_summaries";

fn optional_timestamp(index: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|text| parse_timestamp(index, &text)).transpose()
}

fn map_summary(row: &Row<'_>) -> rusqlite::Result<DaySummary> {
    let summary_date: String = row.get(2)?;
    Ok(DaySummary {
        id: row.get(0)?,
        content: row.get(1)?,
        summary_date: parse_timestamp(2, &summary_date)?,
        filename: row.get(3)?,
        date_range_start: optional_timestamp(4, row.get(4)?)?,
        date_range_end: optional_timestamp(5, row.get(5)?)?,
    })
}

impl Gateway {
    /// Store a summary stamped with the current time; returns its id
    pub async fn save_day_summary(&self, summary: NewDaySummary) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_day_summary", move |tx| {
            tx.execute(
                "INSERT INTO day_summaries \
                 (content, summary_date, filename, date_range_start, date_range_end) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    summary.content,
                    timestamp(Utc::now()),
                    summary.filename,
                    summary.date_range_start.map(timestamp),
                    summary.date_range_end.map(timestamp),
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    /// Summaries written between `start` and `end` inclusive, newest first
    pub async fn day_summaries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> StoreOutcome<Vec<DaySummary>> {
        self.scoped(OpCategory::Read, "day_summaries_between", move |tx| {
            let sql = format!(
                "{SELECT_SUMMARY} WHERE summary_date BETWEEN ?1 AND ?2 \
                 ORDER BY summary_date DESC, id DESC LIMIT ?3"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![timestamp(start), timestamp(end), limit as i64], map_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    pub async fn latest_day_summaries(&self, limit: usize) -> StoreOutcome<Vec<DaySummary>> {
        self.scoped(OpCategory::Read, "latest_day_summaries", move |tx| {
            let sql = format!("{SELECT_SUMMARY} ORDER BY summary_date DESC, id DESC LIMIT ?1");
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([limit as i64], map_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    /// Found when some summary covers exactly `[start, end]`
    pub async fn day_summary_exists(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreOutcome<()> {
        self.scoped(OpCategory::Exists, "day_summary_exists", move |tx| {
            let found = tx
                .query_row(
                    "SELECT 1 FROM day_summaries \
                     WHERE date_range_start = ?1 AND date_range_end = ?2 LIMIT 1",
                    params![timestamp(start), timestamp(end)],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreSettings;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn gateway(dir: &TempDir) -> Gateway {
        Gateway::connect(StoreSettings::new(
            dir.path().join("s.db").display().to_string(),
        ))
        .unwrap()
    }

    fn week(day: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2030, 5, day, 0, 0, 0).unwrap();
        (start, start + Duration::days(7))
    }

    fn summary(content: &str, range: (DateTime<Utc>, DateTime<Utc>)) -> NewDaySummary {
        NewDaySummary {
            content: content.into(),
            filename: Some(format!("{content}.md")),
            date_range_start: Some(range.0),
            date_range_end: Some(range.1),
        }
    }

    #[tokio::test]
    async fn test_save_and_list_latest_first() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);

        let first = gateway
            .save_day_summary(summary("first", week(1)))
            .await
            .into_option()
            .unwrap();
        let second = gateway
            .save_day_summary(summary("second", week(8)))
            .await
            .into_option()
            .unwrap();

        let latest = gateway.latest_day_summaries(5).await.unwrap_or_default();
        let ids: Vec<i64> = latest.iter().map(|s| s.id).collect();
        assert_eq!(ids, [second, first]);
        assert_eq!(latest[1].date_range_start, Some(week(1).0));
        assert_eq!(latest[1].filename.as_deref(), Some("first.md"));

        assert_eq!(gateway.latest_day_summaries(1).await.unwrap_or_default().len(), 1);
    }

    #[tokio::test]
    async fn test_range_is_on_summary_date() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        let _ = gateway.save_day_summary(summary("now", week(1))).await;

        let now = Utc::now();
        let around = gateway
            .day_summaries_between(now - Duration::minutes(5), now + Duration::minutes(5), 10)
            .await
            .unwrap_or_default();
        assert_eq!(around.len(), 1);

        let last_year = gateway
            .day_summaries_between(now - Duration::days(400), now - Duration::days(300), 10)
            .await;
        assert!(last_year.is_found());
        assert!(last_year.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_exists_matches_exact_range() {
        let dir = TempDir::new().unwrap();
        let gateway = gateway(&dir);
        let (start, end) = week(1);

        assert!(!gateway.day_summary_exists(start, end).await.is_found());
        let _ = gateway.save_day_summary(summary("week", (start, end))).await;

        assert!(gateway.day_summary_exists(start, end).await.is_found());
        assert!(!gateway
            .day_summary_exists(start, end + Duration::days(1))
            .await
            .is_found());
        assert_eq!(gateway.failure_count(), 0);
    }
}
