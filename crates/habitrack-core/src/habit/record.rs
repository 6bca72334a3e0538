//! Active habit records and the pure rules evaluated against them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::interval::IntervalKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitStatus {
    InProgress,
    Failed,
    Deleted,
}

impl HabitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HabitStatus::InProgress => "in_progress",
            HabitStatus::Failed => "failed",
            HabitStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for HabitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HabitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(HabitStatus::InProgress),
            "failed" => Ok(HabitStatus::Failed),
            "deleted" => Ok(HabitStatus::Deleted),
            other => Err(format!("unknown habit status '{other}'")),
        }
    }
}

/// One tracked commitment instance with its own streak and deadline.
///
/// `user_id`, `habit_id`, `interval` and `starting_date` never change after
/// insert. A lost streak is archived by creating a new record, never by
/// resetting `streak` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveHabitRecord {
    pub id: i64,
    pub user_id: i64,
    pub habit_id: i64,
    pub interval: IntervalKind,
    pub starting_date: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    /// Deadline for the next check-off.
    pub update_expiry: DateTime<Utc>,
    pub streak: u32,
    pub status: HabitStatus,
    pub goal_streak: Option<u32>,
    /// Last day the habit is monitored.
    pub end_date: Option<NaiveDate>,
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActiveHabit {
    pub user_id: i64,
    pub habit_id: i64,
    pub interval: IntervalKind,
    pub starting_date: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub update_expiry: DateTime<Utc>,
    pub goal_streak: Option<u32>,
    pub end_date: Option<NaiveDate>,
}

impl NewActiveHabit {
    /// Fresh in-progress record starting at `now` with the first deadline one
    /// period away.
    pub fn starting_at(
        user_id: i64,
        habit_id: i64,
        interval: IntervalKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            habit_id,
            interval,
            starting_date: now,
            last_check: Some(now),
            update_expiry: interval.deadline_from(now),
            goal_streak: None,
            end_date: None,
        }
    }

    pub fn with_goal(mut self, goal_streak: Option<u32>) -> Self {
        self.goal_streak = goal_streak;
        self
    }

    pub fn with_end_date(mut self, end_date: Option<NaiveDate>) -> Self {
        self.end_date = end_date;
        self
    }

    pub fn into_record(self, id: i64) -> ActiveHabitRecord {
        ActiveHabitRecord {
            id,
            user_id: self.user_id,
            habit_id: self.habit_id,
            interval: self.interval,
            starting_date: self.starting_date,
            last_check: self.last_check,
            update_expiry: self.update_expiry,
            streak: 0,
            status: HabitStatus::InProgress,
            goal_streak: self.goal_streak,
            end_date: self.end_date,
        }
    }
}

/// The state a conditional write expects to find in storage.
///
/// Every accepted check-off bumps `streak`, so `(status, streak)` identifies
/// the version of the row the caller read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: HabitStatus,
    pub streak: u32,
}

impl ActiveHabitRecord {
    pub fn expected(&self) -> Expected {
        Expected {
            status: self.status,
            streak: self.streak,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == HabitStatus::InProgress
    }

    /// Whether the deadline has passed for an in-progress record.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_in_progress() && now >= self.update_expiry
    }

    /// Records are monitored through the end of their `end_date`.
    pub fn is_monitored(&self, today: NaiveDate) -> bool {
        self.end_date.map_or(true, |end| today <= end)
    }

    /// The single failure rule. An expired record fails whatever its end date.
    pub fn should_fail(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now)
    }

    /// In progress and on time, but past its last monitored day.
    pub fn should_retire(&self, now: DateTime<Utc>) -> bool {
        self.is_in_progress() && !self.is_expired(now) && !self.is_monitored(now.date_naive())
    }

    /// Start of the window in which the next check-off is accepted.
    pub fn next_check_at(&self) -> DateTime<Utc> {
        self.update_expiry - self.interval.period()
    }

    pub fn accepts_check_off(&self, now: DateTime<Utc>) -> bool {
        self.streak == 0 || now >= self.next_check_at()
    }

    /// Time until the next accepted check-off, floored at zero.
    pub fn next_check_in(&self, now: DateTime<Utc>) -> Duration {
        (self.next_check_at() - now).max(Duration::zero())
    }

    /// Signed time left before the deadline; negative means overdue.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.update_expiry - now
    }

    pub fn goal_reached(&self) -> bool {
        self.goal_streak.is_some_and(|goal| self.streak >= goal)
    }

    /// Extend the streak by one period. Callers check
    /// [`accepts_check_off`](Self::accepts_check_off) first.
    pub(crate) fn apply_check_off(&mut self, now: DateTime<Utc>) {
        self.streak += 1;
        self.last_check = Some(now);
        self.update_expiry = self.update_expiry + self.interval.period();
    }
}
