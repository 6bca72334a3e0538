use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::habit::{ActiveHabitRecord, CheckOff, HabitStatus, IntervalKind, Reactivation};

/// Every habit state change produces an Event.
/// The CLI prints them; the sweeper reports the failures it caused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    HabitActivated {
        record_id: i64,
        user_id: i64,
        habit_id: i64,
        interval: IntervalKind,
        update_expiry: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    HabitCheckedOff {
        record_id: i64,
        streak: u32,
        update_expiry: DateTime<Utc>,
        next_check_in_secs: i64,
        goal_reached: bool,
        at: DateTime<Utc>,
    },
    /// Deadline passed without a check-off.
    HabitFailed {
        record_id: i64,
        user_id: i64,
        streak: u32,
        update_expiry: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    HabitCancelled {
        record_id: i64,
        streak: u32,
        at: DateTime<Utc>,
    },
    HabitReactivated {
        record_id: i64,
        archived_record_id: Option<i64>,
        update_expiry: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// Display snapshot of one record.
    HabitSnapshot {
        record: ActiveHabitRecord,
        remaining_secs: i64,
        next_check_in_secs: i64,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn activated(record: &ActiveHabitRecord, at: DateTime<Utc>) -> Self {
        Event::HabitActivated {
            record_id: record.id,
            user_id: record.user_id,
            habit_id: record.habit_id,
            interval: record.interval,
            update_expiry: record.update_expiry,
            at,
        }
    }

    pub fn checked_off(outcome: &CheckOff, at: DateTime<Utc>) -> Self {
        Event::HabitCheckedOff {
            record_id: outcome.record.id,
            streak: outcome.record.streak,
            update_expiry: outcome.record.update_expiry,
            next_check_in_secs: outcome.next_check_in.num_seconds(),
            goal_reached: outcome.goal_reached,
            at,
        }
    }

    pub fn failed(record: &ActiveHabitRecord, at: DateTime<Utc>) -> Self {
        Event::HabitFailed {
            record_id: record.id,
            user_id: record.user_id,
            streak: record.streak,
            update_expiry: record.update_expiry,
            at,
        }
    }

    /// `HabitCancelled` for a deleted record, `None` otherwise.
    pub fn cancelled(record: &ActiveHabitRecord, at: DateTime<Utc>) -> Option<Self> {
        (record.status == HabitStatus::Deleted).then(|| Event::HabitCancelled {
            record_id: record.id,
            streak: record.streak,
            at,
        })
    }

    pub fn reactivated(outcome: &Reactivation, at: DateTime<Utc>) -> Self {
        Event::HabitReactivated {
            record_id: outcome.record.id,
            archived_record_id: outcome.archived.as_ref().map(|r| r.id),
            update_expiry: outcome.record.update_expiry,
            at,
        }
    }

    pub fn snapshot(record: &ActiveHabitRecord, at: DateTime<Utc>) -> Self {
        Event::HabitSnapshot {
            remaining_secs: record.remaining(at).num_seconds(),
            next_check_in_secs: record.next_check_in(at).num_seconds(),
            record: record.clone(),
            at,
        }
    }
}
