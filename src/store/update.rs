//! Column allow-lists and dynamic partial updates.
//!
//! Updates are assembled from the fields present in the request and nothing
//! else. Field names must match a known column of the target table; values
//! are always bound as parameters. Arrays and objects are stored as JSON
//! text and decoded again by [`read_row`].

use std::fmt;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Transaction};
use serde_json::{Number, Value};

use super::error::PersistenceError;
use super::records::start_utc_text;
use crate::domain::{ExtractedRecord, Tag};

/// Storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Bool,
    /// JSON document stored as text
    Json,
}

/// One updatable column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

use ColumnKind::{Bool, Integer, Json, Real, Text};

const TRANSCRIPTION_COLUMNS: &[Column] = &[
    col("content", Text),
    col("filename", Text),
    col("audio_path", Text),
    col("created_at", Text),
    col("duration_seconds", Real),
    col("metadata", Json),
    col("tag", Text),
    col("destination_table", Text),
    col("destination_id", Integer),
    col("is_processed", Bool),
];

const CALENDAR_COLUMNS: &[Column] = &[
    col("summary", Text),
    col("location", Text),
    col("description", Text),
    col("start_datetime", Text),
    col("start_timezone", Text),
    col("end_datetime", Text),
    col("end_timezone", Text),
    col("attendees", Json),
    col("recurrence", Json),
    col("reminders", Json),
    col("visibility", Text),
    col("color_id", Text),
    col("transparency", Text),
    col("status", Text),
    col("external_link", Text),
    col("source_transcription_id", Integer),
    col("created_at", Text),
];

const DIARY_COLUMNS: &[Column] = &[
    col("content", Text),
    col("entry_date", Text),
    col("mood", Text),
    col("tags", Json),
    col("source_transcription_id", Integer),
];

const TODO_COLUMNS: &[Column] = &[
    col("task", Text),
    col("due_date", Text),
    col("priority", Text),
    col("status", Text),
    col("source_transcription_id", Integer),
];

const CONTACT_COLUMNS: &[Column] = &[
    col("first_name", Text),
    col("last_name", Text),
    col("phone", Text),
    col("email", Text),
    col("note", Text),
    col("source_transcription_id", Integer),
];

const ENTITY_COLUMNS: &[Column] = &[
    col("name", Text),
    col("type", Text),
    col("context", Text),
    col("relevance_score", Real),
    col("source_transcription_id", Integer),
];

const ACCOUNT_COLUMNS: &[Column] = &[
    col("entry_type", Text),
    col("amount", Real),
    col("currency", Text),
    col("note", Text),
    col("date", Text),
    col("source_transcription_id", Integer),
];

/// Tables reachable through the generic row operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Transcriptions,
    CalendarEvents,
    Diary,
    ToDo,
    Contacts,
    Entities,
    Accounts,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Transcriptions,
        Table::CalendarEvents,
        Table::Diary,
        Table::ToDo,
        Table::Contacts,
        Table::Entities,
        Table::Accounts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Transcriptions => "transcriptions",
            Table::CalendarEvents => "calendar_events",
            Table::Diary => "diary",
            Table::ToDo => "to_do",
            Table::Contacts => "contacts",
            Table::Entities => "entities",
            Table::Accounts => "accounts",
        }
    }

    /// Allow-list of columns (everything except `id`)
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Table::Transcriptions => TRANSCRIPTION_COLUMNS,
            Table::CalendarEvents => CALENDAR_COLUMNS,
            Table::Diary => DIARY_COLUMNS,
            Table::ToDo => TODO_COLUMNS,
            Table::Contacts => CONTACT_COLUMNS,
            Table::Entities => ENTITY_COLUMNS,
            Table::Accounts => ACCOUNT_COLUMNS,
        }
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Capability table that stores segments with this tag
    pub fn for_tag(tag: Tag) -> Option<Table> {
        match tag {
            Tag::Diary => Some(Table::Diary),
            Tag::Calendar => Some(Table::CalendarEvents),
            Tag::ToDo => Some(Table::ToDo),
            Tag::Accounts => Some(Table::Accounts),
            Tag::Contacts => Some(Table::Contacts),
            Tag::Entities => Some(Table::Entities),
            Tag::Unclassified => None,
        }
    }

    pub fn parse(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Column {
    /// Convert a JSON value into the bound parameter for this column
    pub fn encode(&self, value: &Value) -> Result<SqlValue, PersistenceError> {
        let invalid = |reason: &str| PersistenceError::InvalidValue {
            field: self.name.to_string(),
            reason: reason.to_string(),
        };

        let encoded = match (self.kind, value) {
            (_, Value::Null) => SqlValue::Null,
            (ColumnKind::Json, other) => SqlValue::Text(serde_json::to_string(other)?),
            (_, Value::Array(_) | Value::Object(_)) => SqlValue::Text(serde_json::to_string(value)?),

            (ColumnKind::Text, Value::String(s)) => SqlValue::Text(s.clone()),
            (ColumnKind::Text, other) => SqlValue::Text(other.to_string()),

            (ColumnKind::Integer, Value::Number(n)) => {
                SqlValue::Integer(n.as_i64().ok_or_else(|| invalid("expected an integer"))?)
            }
            (ColumnKind::Integer, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (ColumnKind::Integer, Value::String(s)) => SqlValue::Integer(
                s.trim()
                    .parse()
                    .map_err(|_| invalid("expected an integer"))?,
            ),

            (ColumnKind::Real, Value::Number(n)) => {
                SqlValue::Real(n.as_f64().ok_or_else(|| invalid("expected a number"))?)
            }
            (ColumnKind::Real, Value::String(s)) => SqlValue::Real(
                s.trim()
                    .replace(',', ".")
                    .parse()
                    .map_err(|_| invalid("expected a number"))?,
            ),

            (ColumnKind::Bool, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (ColumnKind::Bool, Value::Number(n)) => {
                SqlValue::Integer(i64::from(n.as_f64().is_some_and(|f| f != 0.0)))
            }

            (_, _) => return Err(invalid("unsupported value type")),
        };

        Ok(encoded)
    }

    /// Convert a stored value back into JSON
    pub fn decode(&self, value: SqlValue) -> Value {
        match (self.kind, value) {
            (_, SqlValue::Null) => Value::Null,
            (ColumnKind::Json, SqlValue::Text(text)) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            (ColumnKind::Bool, SqlValue::Integer(n)) => Value::Bool(n != 0),
            (_, SqlValue::Integer(n)) => Value::from(n),
            (_, SqlValue::Real(f)) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            (_, SqlValue::Text(text)) => Value::String(text),
            (_, SqlValue::Blob(bytes)) => Value::String(hex::encode(bytes)),
        }
    }
}

/// Apply a partial update inside an open transaction.
///
/// Returns `Some(())` when a row was changed, `None` when `id` matched
/// nothing.
pub(crate) fn update_row(
    tx: &Transaction<'_>,
    table: Table,
    id: i64,
    fields: &ExtractedRecord,
) -> Result<Option<()>, PersistenceError> {
    if fields.is_empty() {
        return Err(PersistenceError::EmptyUpdate);
    }

    let mut assignments = Vec::with_capacity(fields.len());
    let mut params = Vec::with_capacity(fields.len() + 1);

    for (key, value) in fields {
        let column = table
            .column(key)
            .ok_or_else(|| PersistenceError::UnknownField {
                table: table.name(),
                field: key.clone(),
            })?;
        params.push(column.encode(value)?);
        assignments.push(format!("{} = ?{}", column.name, params.len()));
    }

    // Derived column, kept in step with the raw start
    if table == Table::CalendarEvents {
        if let Some(start) = fields.get("start_datetime") {
            let normalised = start.as_str().and_then(start_utc_text);
            params.push(normalised.map_or(SqlValue::Null, SqlValue::Text));
            assignments.push(format!("start_utc = ?{}", params.len()));
        }
    }
    params.push(SqlValue::Integer(id));

    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        table.name(),
        assignments.join(", "),
        params.len()
    );

    let changed = tx.execute(&sql, params_from_iter(params))?;
    Ok((changed > 0).then_some(()))
}

/// Read one row as a record keyed by column name, `id` first
pub(crate) fn read_row(
    tx: &Transaction<'_>,
    table: Table,
    id: i64,
) -> Result<Option<ExtractedRecord>, PersistenceError> {
    let columns = table.columns();
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
    let sql = format!(
        "SELECT id, {} FROM {} WHERE id = ?1",
        names.join(", "),
        table.name()
    );

    let row = tx
        .query_row(&sql, [id], |row| {
            let mut record = ExtractedRecord::new();
            record.insert("id".to_string(), Value::from(row.get::<_, i64>(0)?));
            for (index, column) in columns.iter().enumerate() {
                let raw: SqlValue = row.get(index + 1)?;
                record.insert(column.name.to_string(), column.decode(raw));
            }
            Ok(record)
        })
        .optional()?;

    Ok(row)
}
