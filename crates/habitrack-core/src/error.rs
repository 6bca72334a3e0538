//! Core error types for habitrack-core.
//!
//! Lifecycle outcomes that a caller is expected to present to the user live in
//! [`LifecycleError`]; storage and configuration failures have their own enums
//! and everything folds into [`CoreError`] at the crate boundary.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::habit::HabitStatus;

/// Core error type for habitrack-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Habit lifecycle errors
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(#[from] std::io::Error),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A thread panicked while holding the connection
    #[error("Database connection poisoned")]
    Poisoned,
}

/// Errors raised by a [`crate::habit::HabitStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The conditional write found a different status/streak than expected,
    /// or a uniqueness rule rejected the insert.
    #[error("Conflicting write on active habit {id}")]
    Conflict { id: i64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Expected, recoverable outcomes of lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Active habit {0} not found")]
    RecordNotFound(i64),

    #[error("Habit {habit_id} is already active for user {user_id}")]
    AlreadyActive { user_id: i64, habit_id: i64 },

    #[error("Active habit {id} is {status}, not in progress")]
    NotInProgress { id: i64, status: HabitStatus },

    #[error("Already checked this period, next check-off available in {}s", .wait.num_seconds())]
    AlreadyCheckedThisPeriod { wait: chrono::Duration },

    #[error("End date {0} must be after today")]
    InvalidEndDate(NaiveDate),

    #[error("Goal streak must be positive")]
    InvalidGoal,

    #[error("Unknown user {0}")]
    UnknownUser(i64),

    #[error("Unknown habit {habit_id} for user {user_id}")]
    UnknownHabit { user_id: i64, habit_id: i64 },

    /// Lost an optimistic-concurrency race twice in a row.
    #[error("Conflicting write on active habit {0}")]
    ConflictingWrite(i64),

    #[error("Storage error: {0}")]
    Store(StoreError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                DatabaseError::Locked
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.into())
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { id } => LifecycleError::ConflictingWrite(id),
            other => LifecycleError::Store(other),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_conflicting_write() {
        let err: LifecycleError = StoreError::Conflict { id: 7 }.into();
        assert!(matches!(err, LifecycleError::ConflictingWrite(7)));
    }

    #[test]
    fn wait_is_rendered_in_seconds() {
        let err = LifecycleError::AlreadyCheckedThisPeriod {
            wait: chrono::Duration::minutes(2),
        };
        assert!(err.to_string().contains("120s"));
    }
}
