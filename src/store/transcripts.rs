//! Transcript repository.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{Gateway, OpCategory, StoreOutcome};
use crate::domain::{Destination, ExtractedRecord, NewTranscript, PersistedRecord};

const SELECT_TRANSCRIPT: &str = "SELECT id, content, tag, created_at, filename, audio_path, \
     duration_seconds, metadata, is_processed, destination_table, destination_id \
     FROM transcriptions";

/// Timestamps are stored as fixed-width RFC 3339 UTC so text order is time order
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn map_transcript(row: &Row<'_>) -> rusqlite::Result<PersistedRecord> {
    let created_at: String = row.get(3)?;
    let metadata: Option<ExtractedRecord> = parse_json(7, row.get(7)?)?;

    Ok(PersistedRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        tag: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        created_at: parse_timestamp(3, &created_at)?,
        filename: row.get(4)?,
        audio_path: row.get(5)?,
        duration_seconds: row.get(6)?,
        metadata,
        is_processed: row.get(8)?,
        destination_table: row.get(9)?,
        destination_id: row.get(10)?,
    })
}

impl Gateway {
    /// Store a raw transcript; returns its id
    pub async fn save_transcript(&self, transcript: NewTranscript) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_transcript", move |tx| {
            let metadata = transcript
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            tx.execute(
                "INSERT INTO transcriptions \
                 (content, filename, audio_path, created_at, duration_seconds, metadata, tag) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    transcript.content,
                    transcript.filename,
                    transcript.audio_path,
                    timestamp(Utc::now()),
                    transcript.duration_seconds,
                    metadata,
                    transcript.tag,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_transcript(&self, id: i64) -> StoreOutcome<PersistedRecord> {
        self.scoped(OpCategory::Read, "get_transcript", move |tx| {
            let sql = format!("{SELECT_TRANSCRIPT} WHERE id = ?1");
            Ok(tx.query_row(&sql, [id], map_transcript).optional()?)
        })
        .await
    }

    /// Most recent transcripts, newest first
    pub async fn latest_transcripts(&self, limit: usize) -> StoreOutcome<Vec<PersistedRecord>> {
        self.scoped(OpCategory::Read, "latest_transcripts", move |tx| {
            let sql = format!("{SELECT_TRANSCRIPT} ORDER BY created_at DESC, id DESC LIMIT ?1");
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map([limit as i64], map_transcript)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    /// Transcripts created in `[start, end)`, oldest first
    pub async fn transcripts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreOutcome<Vec<PersistedRecord>> {
        self.scoped(OpCategory::Read, "transcripts_between", move |tx| {
            let sql = format!(
                "{SELECT_TRANSCRIPT} WHERE created_at >= ?1 AND created_at < ?2 ORDER BY created_at, id"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![timestamp(start), timestamp(end)], map_transcript)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    pub async fn transcript_exists(&self, id: i64) -> StoreOutcome<()> {
        self.scoped(OpCategory::Exists, "transcript_exists", move |tx| {
            let found = tx
                .query_row("SELECT 1 FROM transcriptions WHERE id = ?1", [id], |_| Ok(()))
                .optional()?;
            Ok(found)
        })
        .await
    }

    pub async fn delete_transcript(&self, id: i64) -> StoreOutcome<()> {
        self.scoped(OpCategory::Delete, "delete_transcript", move |tx| {
            let deleted = tx.execute("DELETE FROM transcriptions WHERE id = ?1", [id])?;
            Ok((deleted > 0).then_some(()))
        })
        .await
    }

    /// Flag a transcript as fully routed, recording its destination when
    /// there was exactly one
    pub async fn mark_transcript_processed(
        &self,
        id: i64,
        destination: Option<&Destination>,
    ) -> StoreOutcome<()> {
        let mut fields = ExtractedRecord::new();
        fields.insert("is_processed".into(), Value::Bool(true));
        if let Some(dest) = destination {
            fields.insert("destination_table".into(), Value::from(dest.table.clone()));
            fields.insert("destination_id".into(), Value::from(dest.id));
        }
        self.update_fields(super::Table::Transcriptions, id, fields).await
    }
}
