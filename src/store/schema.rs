//! Schema migrations for the voxroute database.
//!
//! Migrations are applied in ascending version order when the gateway
//! starts. Each one runs in its own transaction together with the
//! `schema_migrations` bookkeeping row, so a failed migration leaves the
//! previous version intact.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use super::error::ConfigurationError;

/// One versioned schema change
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "transcriptions and calendar events",
            sql: r#"
CREATE TABLE IF NOT EXISTS transcriptions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    content           TEXT NOT NULL,
    filename          TEXT,
    audio_path        TEXT,
    created_at        TEXT NOT NULL,
    duration_seconds  REAL,
    metadata          TEXT,
    tag               TEXT,
    destination_table TEXT,
    destination_id    INTEGER,
    is_processed      INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_transcriptions_created_at ON transcriptions(created_at);

CREATE TABLE IF NOT EXISTS calendar_events (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    summary                 TEXT NOT NULL,
    location                TEXT,
    description             TEXT,
    start_datetime          TEXT NOT NULL,
    start_timezone          TEXT,
    end_datetime            TEXT,
    end_timezone            TEXT,
    attendees               TEXT,
    recurrence              TEXT,
    reminders               TEXT,
    visibility              TEXT,
    color_id                TEXT,
    transparency            TEXT,
    status                  TEXT,
    external_link           TEXT,
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL,
    created_at              TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calendar_events_start ON calendar_events(start_datetime);
"#,
        },
        Migration {
            version: 2,
            description: "diary, to-do, contacts, entities and accounts",
            sql: r#"
CREATE TABLE IF NOT EXISTS diary (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    content                 TEXT NOT NULL,
    entry_date              TEXT NOT NULL,
    mood                    TEXT,
    tags                    TEXT,
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_diary_entry_date ON diary(entry_date);

CREATE TABLE IF NOT EXISTS to_do (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    task                    TEXT NOT NULL,
    due_date                TEXT,
    priority                TEXT NOT NULL DEFAULT 'medium',
    status                  TEXT NOT NULL DEFAULT 'pending',
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_to_do_due_date ON to_do(due_date);

CREATE TABLE IF NOT EXISTS contacts (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name              TEXT,
    last_name               TEXT,
    phone                   TEXT,
    email                   TEXT,
    note                    TEXT,
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    name                    TEXT NOT NULL,
    type                    TEXT,
    context                 TEXT,
    relevance_score         REAL,
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS accounts (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_type              TEXT NOT NULL CHECK (entry_type IN ('income', 'expense')),
    amount                  REAL NOT NULL,
    currency                TEXT NOT NULL DEFAULT 'EUR',
    note                    TEXT,
    date                    TEXT NOT NULL,
    source_transcription_id INTEGER REFERENCES transcriptions(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_date ON accounts(date);
"#,
        },
        Migration {
            version: 3,
            description: "normalised UTC start for calendar events",
            sql: r#"
ALTER TABLE calendar_events ADD COLUMN start_utc TEXT;

UPDATE calendar_events
SET start_utc = strftime('%Y-%m-%dT%H:%M:%S', start_datetime) || '.000000Z'
WHERE start_utc IS NULL;

CREATE INDEX IF NOT EXISTS idx_calendar_events_start_utc ON calendar_events(start_utc);
"#,
        },
        Migration {
            version: 4,
            description: "day summaries",
            sql: r#"
CREATE TABLE IF NOT EXISTS day_summaries (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    content          TEXT NOT NULL,
    summary_date     TEXT NOT NULL,
    filename         TEXT,
    date_range_start TEXT,
    date_range_end   TEXT
);

CREATE INDEX IF NOT EXISTS idx_day_summaries_date ON day_summaries(summary_date);
CREATE INDEX IF NOT EXISTS idx_day_summaries_range ON day_summaries(date_range_start, date_range_end);
"#,
        },
    ]
}

/// Highest applied version, 0 for a fresh database
pub(crate) fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Apply every pending migration; returns how many ran
pub(crate) fn migrate(conn: &mut Connection) -> Result<usize, ConfigurationError> {
    let current = current_version(conn).map_err(|source| ConfigurationError::Migration {
        version: 0,
        description: "schema_migrations bookkeeping",
        source,
    })?;

    let mut applied = 0;
    for migration in all_migrations() {
        if migration.version <= current {
            continue;
        }

        let fail = |source: rusqlite::Error| ConfigurationError::Migration {
            version: migration.version,
            description: migration.description,
            source,
        };

        let tx = conn.transaction().map_err(fail)?;
        tx.execute_batch(migration.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap();
        names
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = migrate(&mut conn).unwrap();
        assert_eq!(applied, all_migrations().len());

        let tables = table_names(&conn);
        for expected in [
            "accounts",
            "calendar_events",
            "contacts",
            "day_summaries",
            "diary",
            "entities",
            "schema_migrations",
            "to_do",
            "transcriptions",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), 0);
        let latest = all_migrations().last().map(|m| m.version).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest);
    }

    #[test]
    fn test_upgrade_backfills_utc_start() {
        let mut conn = Connection::open_in_memory().unwrap();
        current_version(&conn).unwrap();
        for migration in all_migrations().iter().filter(|m| m.version <= 2) {
            conn.execute_batch(migration.sql).unwrap();
            conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [migration.version])
                .unwrap();
        }
        conn.execute(
            "INSERT INTO calendar_events (summary, start_datetime, created_at) \
             VALUES ('Lunch', '2030-05-01T09:00:00+02:00', '2030-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        assert_eq!(migrate(&mut conn).unwrap(), all_migrations().len() - 2);
        let start_utc: String = conn
            .query_row("SELECT start_utc FROM calendar_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(start_utc, "2030-05-01T07:00:00.000000Z");
    }

    #[test]
    fn test_versions_are_ascending() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }
}
