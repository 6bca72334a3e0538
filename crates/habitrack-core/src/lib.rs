//! # Habitrack Core Library
//!
//! This library provides the lifecycle rules for tracked habits: activation,
//! periodic check-offs, streaks, deadlines and reactivation. All operations
//! are available through the standalone `habitrack` CLI, which is a thin
//! layer over this crate.
//!
//! ## Architecture
//!
//! - **Lifecycle Engine**: A wall-clock-based state machine per record. Every
//!   operation takes an explicit `now` variant so behavior is reproducible
//! - **Storage**: SQLite-backed records with conditional writes, plus
//!   TOML-based configuration
//! - **Sweeper**: Background task that fails records whose deadline passed
//!
//! ## Key Components
//!
//! - [`LifecycleEngine`]: Activation, check-off, failure, cancel, reactivate
//! - [`HabitDb`]: Record and catalog persistence
//! - [`ExpirySweeper`]: Periodic deadline enforcement
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod habit;
pub mod storage;
pub mod sweeper;

pub use error::{ConfigError, CoreError, DatabaseError, LifecycleError, StoreError};
pub use events::Event;
pub use habit::{
    ActiveHabitRecord, CheckOff, Directory, Expected, HabitStatus, HabitStore, IntervalKind,
    LifecycleEngine, MemoryStore, NewActiveHabit, Reactivation,
};
pub use storage::{Config, HabitDb};
pub use sweeper::{ExpirySweeper, SweepReport, SweepScope};
