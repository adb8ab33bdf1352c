//! Capability repositories: calendar, diary, to-do, contacts, entities and
//! accounts.
//!
//! Each row points back at the transcript it came from through
//! `source_transcription_id`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::transcripts::{parse_json, parse_timestamp, timestamp};
use super::{Gateway, OpCategory, StoreOutcome};

// ---------------------------------------------------------------------------
// Calendar
// ---------------------------------------------------------------------------

/// Calendar event as handed to storage.
///
/// `start_datetime`/`end_datetime` keep whatever ISO 8601 value the record
/// carried (a date-time or an all-day date). Range queries use the derived
/// `start_utc` column instead; see [`start_utc`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub summary: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub start_datetime: String,
    pub start_timezone: Option<String>,
    pub end_datetime: Option<String>,
    pub end_timezone: Option<String>,
    pub attendees: Option<Value>,
    pub recurrence: Option<Value>,
    pub reminders: Option<Value>,
    pub visibility: Option<String>,
    pub color_id: Option<String>,
    pub transparency: Option<String>,
    pub status: Option<String>,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: NewCalendarEvent,
    pub external_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

const SELECT_EVENT: &str = "SELECT id, summary, location, description, start_datetime, \
     start_timezone, end_datetime, end_timezone, attendees, recurrence, reminders, visibility, \
     color_id, transparency, status, source_transcription_id, external_link, created_at \
     FROM calendar_events";

fn map_event(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    let created_at: String = row.get(17)?;
    Ok(CalendarEvent {
        id: row.get(0)?,
        event: NewCalendarEvent {
            summary: row.get(1)?,
            location: row.get(2)?,
            description: row.get(3)?,
            start_datetime: row.get(4)?,
            start_timezone: row.get(5)?,
            end_datetime: row.get(6)?,
            end_timezone: row.get(7)?,
            attendees: parse_json(8, row.get(8)?)?,
            recurrence: parse_json(9, row.get(9)?)?,
            reminders: parse_json(10, row.get(10)?)?,
            visibility: row.get(11)?,
            color_id: row.get(12)?,
            transparency: row.get(13)?,
            status: row.get(14)?,
            source_transcription_id: row.get(15)?,
        },
        external_link: row.get(16)?,
        created_at: parse_timestamp(17, &created_at)?,
    })
}

/// Normalised UTC start used for ordering and range queries.
///
/// An explicit offset (`Z`, `+02:00`) is honoured. A value without one,
/// including an all-day date, is read as UTC; zone names in
/// `start_timezone` are kept for display only. `None` when the value is
/// not a recognisable date.
pub fn start_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

pub(crate) fn start_utc_text(raw: &str) -> Option<String> {
    start_utc(raw).map(timestamp)
}

fn json_text(value: &Option<Value>) -> Result<Option<String>, serde_json::Error> {
    value.as_ref().map(serde_json::to_string).transpose()
}

// ---------------------------------------------------------------------------
// Diary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDiaryEntry {
    pub content: String,
    /// Defaults to now
    pub entry_date: Option<DateTime<Utc>>,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: i64,
    pub content: String,
    pub entry_date: DateTime<Utc>,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub source_transcription_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// To-do
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub source_transcription_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Contacts and entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewContact {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub note: Option<String>,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(flatten)]
    pub contact: NewContact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub context: Option<String>,
    pub relevance_score: f64,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    #[serde(flatten)]
    pub entity: NewEntity,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "income",
            EntryType::Expense => "expense",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "income" => Some(EntryType::Income),
            "expense" => Some(EntryType::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccountEntry {
    pub entry_type: EntryType,
    pub amount: f64,
    pub currency: String,
    pub note: Option<String>,
    /// Defaults to now
    pub date: Option<DateTime<Utc>>,
    pub source_transcription_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: i64,
    pub entry_type: EntryType,
    pub amount: f64,
    pub currency: String,
    pub note: Option<String>,
    pub date: DateTime<Utc>,
    pub source_transcription_id: Option<i64>,
}

fn conversion_error(index: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {raw}").into(),
    )
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let due: Option<String> = row.get(2)?;
    let priority: String = row.get(3)?;
    let status: String = row.get(4)?;

    Ok(Task {
        id: row.get(0)?,
        task: row.get(1)?,
        due_date: due
            .map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|_| conversion_error(2, "date", &d))
            })
            .transpose()?,
        priority: Priority::parse(&priority).ok_or_else(|| conversion_error(3, "priority", &priority))?,
        status: TaskStatus::parse(&status).ok_or_else(|| conversion_error(4, "status", &status))?,
        source_transcription_id: row.get(5)?,
    })
}

fn map_account(row: &Row<'_>) -> rusqlite::Result<AccountEntry> {
    let entry_type: String = row.get(1)?;
    let date: String = row.get(5)?;

    Ok(AccountEntry {
        id: row.get(0)?,
        entry_type: EntryType::parse(&entry_type)
            .ok_or_else(|| conversion_error(1, "entry type", &entry_type))?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        note: row.get(4)?,
        date: parse_timestamp(5, &date)?,
        source_transcription_id: row.get(6)?,
    })
}

impl Gateway {
    // -- calendar ----------------------------------------------------------

    pub async fn save_calendar_event(&self, event: NewCalendarEvent) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_calendar_event", move |tx| {
            tx.execute(
                "INSERT INTO calendar_events (summary, location, description, start_datetime, \
                 start_timezone, end_datetime, end_timezone, attendees, recurrence, reminders, \
                 visibility, color_id, transparency, status, source_transcription_id, created_at, \
                 start_utc) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    event.summary,
                    event.location,
                    event.description,
                    event.start_datetime,
                    event.start_timezone,
                    event.end_datetime,
                    event.end_timezone,
                    json_text(&event.attendees)?,
                    json_text(&event.recurrence)?,
                    json_text(&event.reminders)?,
                    event.visibility,
                    event.color_id,
                    event.transparency,
                    event.status,
                    event.source_transcription_id,
                    timestamp(Utc::now()),
                    start_utc_text(&event.start_datetime),
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_calendar_event(&self, id: i64) -> StoreOutcome<CalendarEvent> {
        self.scoped(OpCategory::Read, "get_calendar_event", move |tx| {
            let sql = format!("{SELECT_EVENT} WHERE id = ?1");
            Ok(tx.query_row(&sql, [id], map_event).optional()?)
        })
        .await
    }

    /// Events whose UTC start falls in `[start, end)`, earliest first
    pub async fn calendar_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreOutcome<Vec<CalendarEvent>> {
        self.scoped(OpCategory::Read, "calendar_events_between", move |tx| {
            let sql = format!(
                "{SELECT_EVENT} WHERE start_utc >= ?1 AND start_utc < ?2 ORDER BY start_utc, id"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![timestamp(start), timestamp(end)], map_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    /// Next `limit` events whose UTC start is at or after `from`
    pub async fn upcoming_calendar_events(
        &self,
        from: DateTime<Utc>,
        limit: usize,
    ) -> StoreOutcome<Vec<CalendarEvent>> {
        self.scoped(OpCategory::Read, "upcoming_calendar_events", move |tx| {
            let sql = format!(
                "{SELECT_EVENT} WHERE start_utc >= ?1 ORDER BY start_utc, id LIMIT ?2"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![timestamp(from), limit as i64], map_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    pub async fn delete_calendar_event(&self, id: i64) -> StoreOutcome<()> {
        self.scoped(OpCategory::Delete, "delete_calendar_event", move |tx| {
            let deleted = tx.execute("DELETE FROM calendar_events WHERE id = ?1", [id])?;
            Ok((deleted > 0).then_some(()))
        })
        .await
    }

    // -- diary -------------------------------------------------------------

    pub async fn save_diary_entry(&self, entry: NewDiaryEntry) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_diary_entry", move |tx| {
            let tags = if entry.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&entry.tags)?)
            };
            tx.execute(
                "INSERT INTO diary (content, entry_date, mood, tags, source_transcription_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.content,
                    timestamp(entry.entry_date.unwrap_or_else(Utc::now)),
                    entry.mood,
                    tags,
                    entry.source_transcription_id,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_diary_entry(&self, id: i64) -> StoreOutcome<DiaryEntry> {
        self.scoped(OpCategory::Read, "get_diary_entry", move |tx| {
            let entry = tx
                .query_row(
                    "SELECT id, content, entry_date, mood, tags, source_transcription_id \
                     FROM diary WHERE id = ?1",
                    [id],
                    |row| {
                        let entry_date: String = row.get(2)?;
                        let tags: Option<Vec<String>> = parse_json(4, row.get(4)?)?;
                        Ok(DiaryEntry {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            entry_date: parse_timestamp(2, &entry_date)?,
                            mood: row.get(3)?,
                            tags: tags.unwrap_or_default(),
                            source_transcription_id: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    // -- to-do -------------------------------------------------------------

    pub async fn save_task(&self, task: NewTask) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_task", move |tx| {
            tx.execute(
                "INSERT INTO to_do (task, due_date, priority, source_transcription_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    task.task,
                    task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    task.priority.as_str(),
                    task.source_transcription_id,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_task(&self, id: i64) -> StoreOutcome<Task> {
        self.scoped(OpCategory::Read, "get_task", move |tx| {
            Ok(tx
                .query_row(
                    "SELECT id, task, due_date, priority, status, source_transcription_id \
                     FROM to_do WHERE id = ?1",
                    [id],
                    map_task,
                )
                .optional()?)
        })
        .await
    }

    pub async fn update_task_status(&self, id: i64, status: TaskStatus) -> StoreOutcome<()> {
        self.scoped(OpCategory::Update, "update_task_status", move |tx| {
            let changed = tx.execute(
                "UPDATE to_do SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            Ok((changed > 0).then_some(()))
        })
        .await
    }

    // -- contacts and entities ---------------------------------------------

    pub async fn save_contact(&self, contact: NewContact) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_contact", move |tx| {
            tx.execute(
                "INSERT INTO contacts (first_name, last_name, phone, email, note, source_transcription_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contact.first_name,
                    contact.last_name,
                    contact.phone,
                    contact.email,
                    contact.note,
                    contact.source_transcription_id,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_contact(&self, id: i64) -> StoreOutcome<Contact> {
        self.scoped(OpCategory::Read, "get_contact", move |tx| {
            Ok(tx
                .query_row(
                    "SELECT id, first_name, last_name, phone, email, note, source_transcription_id \
                     FROM contacts WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(Contact {
                            id: row.get(0)?,
                            contact: NewContact {
                                first_name: row.get(1)?,
                                last_name: row.get(2)?,
                                phone: row.get(3)?,
                                email: row.get(4)?,
                                note: row.get(5)?,
                                source_transcription_id: row.get(6)?,
                            },
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    pub async fn save_entity(&self, entity: NewEntity) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_entity", move |tx| {
            tx.execute(
                "INSERT INTO entities (name, type, context, relevance_score, source_transcription_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entity.name,
                    entity.kind,
                    entity.context,
                    entity.relevance_score,
                    entity.source_transcription_id,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    pub async fn get_entity(&self, id: i64) -> StoreOutcome<Entity> {
        self.scoped(OpCategory::Read, "get_entity", move |tx| {
            Ok(tx
                .query_row(
                    "SELECT id, name, type, context, relevance_score, source_transcription_id \
                     FROM entities WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(Entity {
                            id: row.get(0)?,
                            entity: NewEntity {
                                name: row.get(1)?,
                                kind: row.get(2)?,
                                context: row.get(3)?,
                                relevance_score: row.get::<_, Option<f64>>(4)?.unwrap_or(0.5),
                                source_transcription_id: row.get(5)?,
                            },
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    // -- accounts ----------------------------------------------------------

    pub async fn save_account_entry(&self, entry: NewAccountEntry) -> StoreOutcome<i64> {
        self.scoped(OpCategory::Create, "save_account_entry", move |tx| {
            tx.execute(
                "INSERT INTO accounts (entry_type, amount, currency, note, date, source_transcription_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.entry_type.as_str(),
                    entry.amount,
                    entry.currency,
                    entry.note,
                    timestamp(entry.date.unwrap_or_else(Utc::now)),
                    entry.source_transcription_id,
                ],
            )?;
            Ok(Some(tx.last_insert_rowid()))
        })
        .await
    }

    /// Entries dated in `[start, end)`, oldest first
    pub async fn account_entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreOutcome<Vec<AccountEntry>> {
        self.scoped(OpCategory::Read, "account_entries_between", move |tx| {
            let mut stmt = tx.prepare(
                "SELECT id, entry_type, amount, currency, note, date, source_transcription_id \
                 FROM accounts WHERE date >= ?1 AND date < ?2 ORDER BY date, id",
            )?;
            let rows = stmt
                .query_map(params![timestamp(start), timestamp(end)], map_account)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await
    }

    /// Sum of all entries of one type, per currency
    pub async fn account_totals(&self, entry_type: EntryType) -> StoreOutcome<BTreeMap<String, f64>> {
        self.scoped(OpCategory::Read, "account_totals", move |tx| {
            let mut stmt = tx.prepare(
                "SELECT currency, SUM(amount) FROM accounts WHERE entry_type = ?1 \
                 GROUP BY currency ORDER BY currency",
            )?;
            let totals = stmt
                .query_map([entry_type.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
            Ok(Some(totals))
        })
        .await
    }
}
