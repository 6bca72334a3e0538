//! Persistence and directory seams of the lifecycle engine.
//!
//! The engine never talks to a database directly. It reads and writes
//! [`ActiveHabitRecord`]s through [`HabitStore`] and validates ids through
//! [`Directory`]. [`crate::storage::HabitDb`] implements both on SQLite and
//! [`MemoryStore`] keeps everything in process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::interval::IntervalKind;
use super::record::{ActiveHabitRecord, Expected, HabitStatus, NewActiveHabit};
use crate::error::{DatabaseError, StoreError};

/// Durable storage of active habit records.
pub trait HabitStore: Send + Sync {
    fn load(&self, id: i64) -> Result<Option<ActiveHabitRecord>, StoreError>;

    /// Records of one user, optionally leaving out one status.
    fn list_by_user(
        &self,
        user_id: i64,
        exclude: Option<HabitStatus>,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError>;

    fn list_by_status(&self, status: HabitStatus) -> Result<Vec<ActiveHabitRecord>, StoreError>;

    /// Records of one interval in any status, highest streak first, then
    /// oldest first.
    fn list_by_interval(
        &self,
        interval: IntervalKind,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError>;

    /// Insert a new in-progress record and return its id.
    ///
    /// Fails with [`StoreError::Conflict`] if the pair already has an
    /// in-progress record.
    fn insert(&self, record: &NewActiveHabit) -> Result<i64, StoreError>;

    /// Write the mutable fields of `record` only if the stored row still
    /// matches `expected`; otherwise [`StoreError::Conflict`].
    fn save(&self, record: &ActiveHabitRecord, expected: Expected) -> Result<(), StoreError>;

    /// Save `retired` as [`save`](Self::save) does and insert `new` as one
    /// unit; either both are written or neither is. Returns the new id.
    fn replace(
        &self,
        retired: &ActiveHabitRecord,
        expected: Expected,
        new: &NewActiveHabit,
    ) -> Result<i64, StoreError>;
}

/// Identity and catalog lookups.
pub trait Directory: Send + Sync {
    fn user_exists(&self, user_id: i64) -> Result<bool, StoreError>;
    fn habit_exists(&self, user_id: i64, habit_id: i64) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    records: BTreeMap<i64, ActiveHabitRecord>,
    catalog: BTreeSet<(i64, i64)>,
}

impl MemoryState {
    fn in_progress_for(&self, user_id: i64, habit_id: i64) -> Option<i64> {
        self.records
            .values()
            .find(|r| r.user_id == user_id && r.habit_id == habit_id && r.is_in_progress())
            .map(|r| r.id)
    }

    fn add(&mut self, record: &NewActiveHabit) -> Result<i64, StoreError> {
        if let Some(id) = self.in_progress_for(record.user_id, record.habit_id) {
            return Err(StoreError::Conflict { id });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.records.insert(id, record.clone().into_record(id));
        Ok(id)
    }

    fn update(&mut self, record: &ActiveHabitRecord, expected: Expected) -> Result<(), StoreError> {
        match self.records.get_mut(&record.id) {
            Some(stored) if stored.expected() == expected => {
                stored.last_check = record.last_check;
                stored.update_expiry = record.update_expiry;
                stored.streak = record.streak;
                stored.status = record.status;
                Ok(())
            }
            _ => Err(StoreError::Conflict { id: record.id }),
        }
    }
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `habit_id` known for `user_id` (which also makes the user known).
    pub fn register_habit(&self, user_id: i64, habit_id: i64) -> Result<(), StoreError> {
        self.state()?.catalog.insert((user_id, habit_id));
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database(DatabaseError::Poisoned))
    }

    fn collect(
        &self,
        keep: impl Fn(&ActiveHabitRecord) -> bool,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        Ok(self
            .state()?
            .records
            .values()
            .filter(|&r| keep(r))
            .cloned()
            .collect())
    }
}

impl HabitStore for MemoryStore {
    fn load(&self, id: i64) -> Result<Option<ActiveHabitRecord>, StoreError> {
        Ok(self.state()?.records.get(&id).cloned())
    }

    fn list_by_user(
        &self,
        user_id: i64,
        exclude: Option<HabitStatus>,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        self.collect(|r| r.user_id == user_id && Some(r.status) != exclude)
    }

    fn list_by_status(&self, status: HabitStatus) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        self.collect(|r| r.status == status)
    }

    fn list_by_interval(
        &self,
        interval: IntervalKind,
    ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
        let mut records = self.collect(|r| r.interval == interval)?;
        records.sort_by(|a, b| b.streak.cmp(&a.streak).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn insert(&self, record: &NewActiveHabit) -> Result<i64, StoreError> {
        self.state()?.add(record)
    }

    fn save(&self, record: &ActiveHabitRecord, expected: Expected) -> Result<(), StoreError> {
        self.state()?.update(record, expected)
    }

    fn replace(
        &self,
        retired: &ActiveHabitRecord,
        expected: Expected,
        new: &NewActiveHabit,
    ) -> Result<i64, StoreError> {
        let mut state = self.state()?;
        let previous = state.records.get(&retired.id).cloned();
        state.update(retired, expected)?;
        match state.add(new) {
            Ok(id) => Ok(id),
            Err(e) => {
                if let Some(previous) = previous {
                    state.records.insert(previous.id, previous);
                }
                Err(e)
            }
        }
    }
}

impl Directory for MemoryStore {
    fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(self.state()?.catalog.iter().any(|&(user, _)| user == user_id))
    }

    fn habit_exists(&self, user_id: i64, habit_id: i64) -> Result<bool, StoreError> {
        Ok(self.state()?.catalog.contains(&(user_id, habit_id)))
    }
}
