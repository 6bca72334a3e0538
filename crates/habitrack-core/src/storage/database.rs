//! SQLite-backed habit storage.
//!
//! Provides persistent storage for:
//! - Active habit records (one row per activation lineage)
//! - The habit catalog the engine validates ids against

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{data_dir, migrations};
use crate::error::{DatabaseError, StoreError};
use crate::habit::{
    ActiveHabitRecord, Directory, Expected, HabitStatus, HabitStore, IntervalKind, NewActiveHabit,
};

/// Default database file name inside the data directory.
pub const DATABASE_FILE: &str = "habitrack.db";

const COLUMNS: &str = "id, user_id, habit_id, interval_id, starting_date, last_check, \
                       update_expiry, streak, status, goal_streak, end_date";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite database for active habits and the habit catalog.
///
/// The connection sits behind a mutex that is held for a single statement,
/// so one `HabitDb` can be shared between callers and the expiry sweeper.
pub struct HabitDb {
    conn: Mutex<Connection>,
}

impl HabitDb {
    /// Open the database at `<data_dir>/habitrack.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let path = data_dir()?.join(DATABASE_FILE);
        Self::open_at(&path)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    /// Make `habit_id` known for `user_id`. Registering twice is a no-op.
    pub fn register_habit(&self, user_id: i64, habit_id: i64) -> Result<(), DatabaseError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO catalog (user_id, habit_id) VALUES (?1, ?2)",
            params![user_id, habit_id],
        )?;
        Ok(())
    }

    /// Habit ids registered for a user.
    pub fn catalog(&self, user_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT habit_id FROM catalog WHERE user_id = ?1 ORDER BY habit_id")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn query_records(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM active_habits {filter}"))?;
        let records = stmt
            .query_map(args, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl HabitStore for HabitDb {
    fn load(&self, id: i64) -> Result<Option<ActiveHabitRecord>, StoreError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM active_habits WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_by_user(
        &self,
        user_id: i64,
        exclude: Option<HabitStatus>,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        match exclude {
            Some(status) => self.query_records(
                "WHERE user_id = ?1 AND status != ?2 ORDER BY id",
                params![user_id, status.as_str()],
            ),
            None => self.query_records("WHERE user_id = ?1 ORDER BY id", params![user_id]),
        }
    }

    fn list_by_status(&self, status: HabitStatus) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        self.query_records("WHERE status = ?1 ORDER BY id", params![status.as_str()])
    }

    fn list_by_interval(
        &self,
        interval: IntervalKind,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        self.query_records(
            "WHERE interval_id = ?1 ORDER BY streak DESC, id ASC",
            params![interval.id()],
        )
    }

    fn insert(&self, record: &NewActiveHabit) -> Result<i64, StoreError> {
        insert_row(&*self.conn()?, record)
    }

    fn save(&self, record: &ActiveHabitRecord, expected: Expected) -> Result<(), StoreError> {
        update_row(&*self.conn()?, record, expected)
    }

    fn replace(
        &self,
        retired: &ActiveHabitRecord,
        expected: Expected,
        new: &NewActiveHabit,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        update_row(&tx, retired, expected)?;
        let id = insert_row(&tx, new)?;
        tx.commit()?;
        Ok(id)
    }
}

fn insert_row(conn: &Connection, record: &NewActiveHabit) -> Result<i64, StoreError> {
    let inserted = conn.execute(
        "INSERT INTO active_habits
            (user_id, habit_id, interval_id, starting_date, last_check, update_expiry,
             streak, status, goal_streak, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'in_progress', ?7, ?8)",
        params![
            record.user_id,
            record.habit_id,
            record.interval.id(),
            record.starting_date.to_rfc3339(),
            record.last_check.map(|t| t.to_rfc3339()),
            record.update_expiry.to_rfc3339(),
            record.goal_streak,
            record.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
        ],
    );
    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            let id = conn
                .query_row(
                    "SELECT id FROM active_habits
                     WHERE user_id = ?1 AND habit_id = ?2 AND status = 'in_progress'",
                    params![record.user_id, record.habit_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .unwrap_or_default();
            Err(StoreError::Conflict { id })
        }
        Err(e) => Err(e.into()),
    }
}

/// Conditional update keyed on the `(status, streak)` that was read.
fn update_row(
    conn: &Connection,
    record: &ActiveHabitRecord,
    expected: Expected,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE active_habits
         SET last_check = ?1, update_expiry = ?2, streak = ?3, status = ?4
         WHERE id = ?5 AND status = ?6 AND streak = ?7",
        params![
            record.last_check.map(|t| t.to_rfc3339()),
            record.update_expiry.to_rfc3339(),
            record.streak,
            record.status.as_str(),
            record.id,
            expected.status.as_str(),
            expected.streak,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::Conflict { id: record.id });
    }
    Ok(())
}

impl Directory for HabitDb {
    fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM catalog WHERE user_id = ?1)",
            params![user_id],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    fn habit_exists(&self, user_id: i64, habit_id: i64) -> Result<bool, StoreError> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM catalog WHERE user_id = ?1 AND habit_id = ?2)",
            params![user_id, habit_id],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ActiveHabitRecord> {
    let interval_id: i64 = row.get(3)?;
    let status: String = row.get(8)?;
    Ok(ActiveHabitRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        habit_id: row.get(2)?,
        interval: IntervalKind::from_id(interval_id)
            .ok_or_else(|| conversion_error(3, format!("unknown interval id {interval_id}")))?,
        starting_date: parse_timestamp(4, &row.get::<_, String>(4)?)?,
        last_check: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_timestamp(5, &s))
            .transpose()?,
        update_expiry: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        streak: row.get(7)?,
        status: status.parse().map_err(|e: String| conversion_error(8, e))?,
        goal_streak: row.get(9)?,
        end_date: row
            .get::<_, Option<String>>(10)?
            .map(|s| {
                NaiveDate::parse_from_str(&s, DATE_FORMAT)
                    .map_err(|e| conversion_error(10, format!("bad end_date '{s}': {e}")))
            })
            .transpose()?,
    })
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{value}': {e}")))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
