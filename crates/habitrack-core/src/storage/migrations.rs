//! Database schema migrations for habitrack.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version; 0 for a fresh database.
fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: active habit records.
///
/// Timestamps are RFC 3339 text, `end_date` is `YYYY-MM-DD`, `interval_id`
/// is 1 (daily), 2 (weekly) or 3 (monthly).
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS active_habits (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       INTEGER NOT NULL,
            habit_id      INTEGER NOT NULL,
            interval_id   INTEGER NOT NULL,
            starting_date TEXT NOT NULL,
            last_check    TEXT,
            update_expiry TEXT NOT NULL,
            streak        INTEGER NOT NULL DEFAULT 0,
            status        TEXT NOT NULL DEFAULT 'in_progress',
            goal_streak   INTEGER,
            end_date      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_active_habits_user ON active_habits(user_id, habit_id);
        CREATE INDEX IF NOT EXISTS idx_active_habits_status ON active_habits(status);
        CREATE INDEX IF NOT EXISTS idx_active_habits_interval_streak
            ON active_habits(interval_id, streak);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: habit catalog and the one-in-progress-per-pair rule.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS catalog (
            user_id  INTEGER NOT NULL,
            habit_id INTEGER NOT NULL,
            PRIMARY KEY (user_id, habit_id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_active_habits_one_in_progress
            ON active_habits(user_id, habit_id) WHERE status = 'in_progress';",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
