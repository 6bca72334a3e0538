//! Active habit lifecycle engine.
//!
//! Owns the state machine of an [`ActiveHabitRecord`]:
//!
//! ```text
//! activate -> InProgress --check_off--> InProgress (streak + 1)
//!                 |  \
//!   fail_expired  |   \ cancel
//!                 v    v
//!             Failed -> Deleted
//!                 \      /
//!                reactivate -> new InProgress record (streak 0)
//! ```
//!
//! Every write is conditional on the `(status, streak)` that was read, so a
//! check-off and the expiry sweeper racing on the same record produce exactly
//! one winner. A lost race is re-evaluated once against fresh state.
//!
//! Each time-dependent operation has an `*_at` form taking `now` explicitly;
//! the plain form uses the wall clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::interval::IntervalKind;
use super::record::{ActiveHabitRecord, HabitStatus, NewActiveHabit};
use super::store::{Directory, HabitStore};
use crate::error::{LifecycleError, StoreError};

/// Outcome of an accepted check-off.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOff {
    pub record: ActiveHabitRecord,
    /// Time until the following check-off is accepted.
    pub next_check_in: Duration,
    pub goal_reached: bool,
}

/// Outcome of a reactivation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reactivation {
    /// The failed record, now archived as deleted. `None` when the target was
    /// already deleted.
    pub archived: Option<ActiveHabitRecord>,
    pub record: ActiveHabitRecord,
}

pub struct LifecycleEngine {
    store: Arc<dyn HabitStore>,
    directory: Arc<dyn Directory>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn HabitStore>, directory: Arc<dyn Directory>) -> Self {
        Self { store, directory }
    }

    /// Use one backend as both record store and directory.
    pub fn with_backend<B>(backend: Arc<B>) -> Self
    where
        B: HabitStore + Directory + 'static,
    {
        Self {
            store: backend.clone(),
            directory: backend,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn activate(
        &self,
        user_id: i64,
        habit_id: i64,
        interval: IntervalKind,
        goal_streak: Option<u32>,
        end_date: Option<NaiveDate>,
    ) -> Result<ActiveHabitRecord, LifecycleError> {
        self.activate_at(user_id, habit_id, interval, goal_streak, end_date, Utc::now())
    }

    /// Start tracking a habit.
    ///
    /// Any non-deleted record for the pair blocks activation; a failed record
    /// has to go through [`reactivate`](Self::reactivate) instead.
    pub fn activate_at(
        &self,
        user_id: i64,
        habit_id: i64,
        interval: IntervalKind,
        goal_streak: Option<u32>,
        end_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<ActiveHabitRecord, LifecycleError> {
        if goal_streak == Some(0) {
            return Err(LifecycleError::InvalidGoal);
        }
        if let Some(end) = end_date {
            if end <= now.date_naive() {
                return Err(LifecycleError::InvalidEndDate(end));
            }
        }
        self.ensure_known(user_id, habit_id)?;

        let open = self
            .store
            .list_by_user(user_id, Some(HabitStatus::Deleted))?;
        if open.iter().any(|r| r.habit_id == habit_id) {
            return Err(LifecycleError::AlreadyActive { user_id, habit_id });
        }

        let record = self.insert(
            NewActiveHabit::starting_at(user_id, habit_id, interval, now)
                .with_goal(goal_streak)
                .with_end_date(end_date),
        )?;
        info!(
            record_id = record.id,
            user_id,
            habit_id,
            %interval,
            update_expiry = %record.update_expiry,
            "habit activated"
        );
        Ok(record)
    }

    pub fn check_off(&self, id: i64) -> Result<CheckOff, LifecycleError> {
        self.check_off_at(id, Utc::now())
    }

    /// Count one period for the habit.
    ///
    /// The first check-off after activation is always accepted. After that a
    /// check-off is accepted once the current window, which opens one period
    /// before `update_expiry`, has started. A check-off arriving after the
    /// deadline fails the record instead.
    pub fn check_off_at(&self, id: i64, now: DateTime<Utc>) -> Result<CheckOff, LifecycleError> {
        self.retry_on_conflict(id, |mut record| {
            if !record.is_in_progress() {
                return Err(LifecycleError::NotInProgress {
                    id,
                    status: record.status,
                });
            }
            if record.is_expired(now) {
                self.commit_failure(record)?;
                return Err(LifecycleError::NotInProgress {
                    id,
                    status: HabitStatus::Failed,
                });
            }
            if !record.accepts_check_off(now) {
                let wait = record.next_check_in(now);
                debug!(record_id = id, wait_secs = wait.num_seconds(), "check-off rejected");
                return Err(LifecycleError::AlreadyCheckedThisPeriod { wait });
            }

            let expected = record.expected();
            record.apply_check_off(now);
            self.store.save(&record, expected)?;
            info!(
                record_id = id,
                streak = record.streak,
                update_expiry = %record.update_expiry,
                "habit checked off"
            );
            Ok(CheckOff {
                next_check_in: record.next_check_in(now),
                goal_reached: record.goal_reached(),
                record,
            })
        })
    }

    pub fn fail_expired(&self, id: i64) -> Result<bool, LifecycleError> {
        self.fail_expired_at(id, Utc::now())
    }

    /// Mark an in-progress record whose deadline has passed as failed.
    ///
    /// Idempotent; returns whether this call made the transition. The streak
    /// is left untouched for history.
    pub fn fail_expired_at(&self, id: i64, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        self.retry_on_conflict(id, |record| {
            if !record.should_fail(now) {
                return Ok(false);
            }
            self.commit_failure(record)?;
            Ok(true)
        })
    }

    pub fn retire_ended(&self, id: i64) -> Result<Option<ActiveHabitRecord>, LifecycleError> {
        self.retire_ended_at(id, Utc::now())
    }

    /// Close an on-time record whose end date has passed, the way a cancel
    /// would. Returns the deleted record if this call made the transition.
    ///
    /// An expired record is never retired; it fails instead.
    pub fn retire_ended_at(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ActiveHabitRecord>, LifecycleError> {
        self.retry_on_conflict(id, |mut record| {
            if !record.should_retire(now) {
                return Ok(None);
            }
            let expected = record.expected();
            record.status = HabitStatus::Deleted;
            self.store.save(&record, expected)?;
            info!(
                record_id = id,
                streak = record.streak,
                end_date = ?record.end_date,
                "habit retired after its end date"
            );
            Ok(Some(record))
        })
    }

    /// Abandon a habit. Deleting an already-deleted record is a no-op.
    pub fn cancel(&self, id: i64) -> Result<ActiveHabitRecord, LifecycleError> {
        self.retry_on_conflict(id, |mut record| {
            if record.status == HabitStatus::Deleted {
                return Ok(record);
            }
            let expected = record.expected();
            record.status = HabitStatus::Deleted;
            self.store.save(&record, expected)?;
            info!(record_id = id, streak = record.streak, "habit cancelled");
            Ok(record)
        })
    }

    pub fn reactivate(&self, id: i64) -> Result<Reactivation, LifecycleError> {
        self.reactivate_at(id, Utc::now())
    }

    /// Start a fresh record for the habit behind a failed or deleted record.
    ///
    /// A failed target is archived as deleted in the same store write that
    /// inserts the new record; a deleted target is left as it is. The new
    /// record keeps the interval and goal, and keeps the end date only while
    /// it is still in the future.
    pub fn reactivate_at(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Reactivation, LifecycleError> {
        self.retry_on_conflict(id, |mut target| {
            if target.should_fail(now) {
                self.commit_failure(target.clone())?;
                target.status = HabitStatus::Failed;
            }

            let (user_id, habit_id) = (target.user_id, target.habit_id);
            if target.is_in_progress() || self.has_in_progress(user_id, habit_id)? {
                return Err(LifecycleError::AlreadyActive { user_id, habit_id });
            }
            self.ensure_known(user_id, habit_id)?;

            let today = now.date_naive();
            let new = NewActiveHabit::starting_at(user_id, habit_id, target.interval, now)
                .with_goal(target.goal_streak)
                .with_end_date(target.end_date.filter(|end| *end > today));

            let (archived, record) = if target.status == HabitStatus::Failed {
                let expected = target.expected();
                let mut archived = target.clone();
                archived.status = HabitStatus::Deleted;
                let new_id = self.store.replace(&archived, expected, &new)?;
                (Some(archived), new.into_record(new_id))
            } else {
                (None, self.insert(new)?)
            };
            info!(
                record_id = record.id,
                previous_id = id,
                previous_streak = target.streak,
                "habit reactivated"
            );
            Ok(Reactivation { archived, record })
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn record(&self, id: i64) -> Result<ActiveHabitRecord, LifecycleError> {
        self.load(id)
    }

    pub fn remaining_time(&self, id: i64) -> Result<Duration, LifecycleError> {
        self.remaining_time_at(id, Utc::now())
    }

    /// Countdown to the deadline; negative when overdue.
    pub fn remaining_time_at(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Duration, LifecycleError> {
        Ok(self.load(id)?.remaining(now))
    }

    pub fn next_check_in(&self, id: i64) -> Result<Duration, LifecycleError> {
        self.next_check_in_at(id, Utc::now())
    }

    pub fn next_check_in_at(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<Duration, LifecycleError> {
        Ok(self.load(id)?.next_check_in(now))
    }

    pub fn list_for_user(
        &self,
        user_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<ActiveHabitRecord>, LifecycleError> {
        self.list_for_user_at(user_id, include_deleted, Utc::now())
    }

    /// A user's records, with expired ones failed on the way out so a read
    /// never shows a stale in-progress deadline.
    pub fn list_for_user_at(
        &self,
        user_id: i64,
        include_deleted: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActiveHabitRecord>, LifecycleError> {
        let exclude = (!include_deleted).then_some(HabitStatus::Deleted);
        let mut records = self.store.list_by_user(user_id, exclude)?;
        for record in records.iter_mut() {
            if record.should_fail(now) {
                self.fail_expired_at(record.id, now)?;
                *record = self.load(record.id)?;
            }
        }
        Ok(records)
    }

    /// Records of one interval, highest streak first. Archived streaks count.
    pub fn leaderboard(
        &self,
        interval: IntervalKind,
    ) -> Result<Vec<ActiveHabitRecord>, LifecycleError> {
        Ok(self.store.list_by_interval(interval)?)
    }

    /// In-progress records, globally or for one user.
    pub fn in_progress(
        &self,
        user_id: Option<i64>,
    ) -> Result<Vec<ActiveHabitRecord>, LifecycleError> {
        let records = match user_id {
            None => self.store.list_by_status(HabitStatus::InProgress)?,
            Some(user_id) => self
                .store
                .list_by_user(user_id, None)?
                .into_iter()
                .filter(ActiveHabitRecord::is_in_progress)
                .collect(),
        };
        Ok(records)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn load(&self, id: i64) -> Result<ActiveHabitRecord, LifecycleError> {
        self.store
            .load(id)?
            .ok_or(LifecycleError::RecordNotFound(id))
    }

    fn insert(&self, new: NewActiveHabit) -> Result<ActiveHabitRecord, LifecycleError> {
        match self.store.insert(&new) {
            Ok(id) => Ok(new.into_record(id)),
            Err(StoreError::Conflict { .. }) => Err(LifecycleError::AlreadyActive {
                user_id: new.user_id,
                habit_id: new.habit_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_known(&self, user_id: i64, habit_id: i64) -> Result<(), LifecycleError> {
        if !self.directory.user_exists(user_id)? {
            return Err(LifecycleError::UnknownUser(user_id));
        }
        if !self.directory.habit_exists(user_id, habit_id)? {
            return Err(LifecycleError::UnknownHabit { user_id, habit_id });
        }
        Ok(())
    }

    fn has_in_progress(&self, user_id: i64, habit_id: i64) -> Result<bool, LifecycleError> {
        Ok(self
            .store
            .list_by_user(user_id, Some(HabitStatus::Deleted))?
            .iter()
            .any(|r| r.habit_id == habit_id && r.is_in_progress()))
    }

    fn commit_failure(&self, mut record: ActiveHabitRecord) -> Result<(), LifecycleError> {
        let expected = record.expected();
        record.status = HabitStatus::Failed;
        self.store.save(&record, expected)?;
        info!(
            record_id = record.id,
            streak = record.streak,
            update_expiry = %record.update_expiry,
            "habit failed"
        );
        Ok(())
    }

    /// Run `op` against the stored record, re-reading and re-running it once
    /// if its conditional write lost a race.
    fn retry_on_conflict<T>(
        &self,
        id: i64,
        mut op: impl FnMut(ActiveHabitRecord) -> Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        match op(self.load(id)?) {
            Err(LifecycleError::ConflictingWrite(_)) => {
                warn!(record_id = id, "conflicting write, re-evaluating against fresh state");
                op(self.load(id)?)
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatabaseError, StoreError};
    use crate::habit::record::Expected;
    use crate::habit::store::MemoryStore;
    use crate::habit::FaultyStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    fn hours(h: i64) -> Duration {
        Duration::hours(h)
    }

    fn engine() -> (Arc<MemoryStore>, LifecycleEngine) {
        let store = Arc::new(MemoryStore::new());
        store.register_habit(1, 10).unwrap();
        store.register_habit(1, 11).unwrap();
        (store.clone(), LifecycleEngine::with_backend(store))
    }

    fn activate_daily(engine: &LifecycleEngine) -> ActiveHabitRecord {
        engine
            .activate_at(1, 10, IntervalKind::Daily, None, None, t0())
            .unwrap()
    }

    #[test]
    fn activate_creates_in_progress_record() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        assert_eq!(record.status, HabitStatus::InProgress);
        assert_eq!(record.streak, 0);
        assert_eq!(record.starting_date, t0());
        assert_eq!(record.last_check, Some(t0()));
        assert_eq!(record.update_expiry, t0() + hours(24));
        assert_eq!(engine.record(record.id).unwrap(), record);
    }

    #[test]
    fn activate_rejects_open_record_for_same_habit() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        let err = engine
            .activate_at(1, 10, IntervalKind::Weekly, None, None, t0())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyActive { user_id: 1, habit_id: 10 }));

        // A failed record still blocks a plain activation.
        engine.fail_expired_at(record.id, t0() + hours(25)).unwrap();
        let err = engine
            .activate_at(1, 10, IntervalKind::Daily, None, None, t0() + hours(26))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyActive { .. }));

        // Once cancelled the habit can be activated again.
        engine.cancel(record.id).unwrap();
        assert!(engine
            .activate_at(1, 10, IntervalKind::Daily, None, None, t0() + hours(26))
            .is_ok());
    }

    #[test]
    fn activate_validates_end_date_and_goal() {
        let (_, engine) = engine();
        let today = t0().date_naive();
        let err = engine
            .activate_at(1, 10, IntervalKind::Daily, None, Some(today), t0())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidEndDate(d) if d == today));

        let err = engine
            .activate_at(1, 10, IntervalKind::Daily, Some(0), None, t0())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidGoal));

        let tomorrow = today.succ_opt().unwrap();
        let record = engine
            .activate_at(1, 10, IntervalKind::Daily, Some(30), Some(tomorrow), t0())
            .unwrap();
        assert_eq!(record.goal_streak, Some(30));
        assert_eq!(record.end_date, Some(tomorrow));
    }

    #[test]
    fn activate_rejects_unknown_ids() {
        let (_, engine) = engine();
        let err = engine
            .activate_at(2, 10, IntervalKind::Daily, None, None, t0())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownUser(2)));
        let err = engine
            .activate_at(1, 99, IntervalKind::Daily, None, None, t0())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownHabit { habit_id: 99, .. }));
    }

    #[test]
    fn second_check_off_in_same_period_is_rejected() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);

        let first = engine.check_off_at(record.id, t0() + hours(1)).unwrap();
        assert_eq!(first.record.streak, 1);
        assert_eq!(first.record.update_expiry, t0() + hours(48));
        assert_eq!(first.next_check_in, hours(23));

        let err = engine.check_off_at(record.id, t0() + hours(2)).unwrap_err();
        match err {
            LifecycleError::AlreadyCheckedThisPeriod { wait } => assert_eq!(wait, hours(22)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(engine.record(record.id).unwrap().streak, 1);

        let second = engine.check_off_at(record.id, t0() + hours(30)).unwrap();
        assert_eq!(second.record.streak, 2);
        assert_eq!(second.record.update_expiry, t0() + hours(72));
        assert_eq!(second.record.last_check, Some(t0() + hours(30)));
    }

    #[test]
    fn check_off_after_deadline_fails_the_record() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        let err = engine.check_off_at(record.id, t0() + hours(24)).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotInProgress { status: HabitStatus::Failed, .. }
        ));
        let stored = engine.record(record.id).unwrap();
        assert_eq!(stored.status, HabitStatus::Failed);
        assert_eq!(stored.streak, 0);
    }

    #[test]
    fn check_off_requires_in_progress_and_known_record() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        engine.cancel(record.id).unwrap();
        assert!(matches!(
            engine.check_off_at(record.id, t0()).unwrap_err(),
            LifecycleError::NotInProgress { status: HabitStatus::Deleted, .. }
        ));
        assert!(matches!(
            engine.check_off_at(404, t0()).unwrap_err(),
            LifecycleError::RecordNotFound(404)
        ));
    }

    #[test]
    fn check_off_reports_goal() {
        let (_, engine) = engine();
        let record = engine
            .activate_at(1, 10, IntervalKind::Weekly, Some(2), None, t0())
            .unwrap();
        assert!(!engine.check_off_at(record.id, t0()).unwrap().goal_reached);
        let done = engine.check_off_at(record.id, t0() + Duration::days(7)).unwrap();
        assert!(done.goal_reached);
    }

    #[test]
    fn end_date_does_not_keep_an_expired_record_alive() {
        let (_, engine) = engine();
        let end = t0().date_naive().succ_opt().unwrap();
        let record = engine
            .activate_at(1, 10, IntervalKind::Daily, None, Some(end), t0())
            .unwrap();

        let much_later = t0() + Duration::days(365);
        assert!(engine.fail_expired_at(record.id, much_later).unwrap());
        assert_eq!(engine.record(record.id).unwrap().status, HabitStatus::Failed);

        // The pair is free to start over.
        let outcome = engine.reactivate_at(record.id, much_later).unwrap();
        assert_eq!(outcome.record.status, HabitStatus::InProgress);
        assert_eq!(outcome.record.end_date, None);
    }

    #[test]
    fn check_off_on_time_after_end_date_still_counts() {
        let (_, engine) = engine();
        let end = t0().date_naive().succ_opt().unwrap();
        let record = engine
            .activate_at(1, 10, IntervalKind::Weekly, None, Some(end), t0())
            .unwrap();
        let outcome = engine.check_off_at(record.id, t0() + Duration::days(3)).unwrap();
        assert_eq!(outcome.record.streak, 1);
    }

    #[test]
    fn retire_closes_on_time_records_past_end_date() {
        let (_, engine) = engine();
        let end = t0().date_naive().succ_opt().unwrap();
        let record = engine
            .activate_at(1, 10, IntervalKind::Weekly, None, Some(end), t0())
            .unwrap();

        assert!(engine.retire_ended_at(record.id, t0() + hours(1)).unwrap().is_none());
        let retired = engine
            .retire_ended_at(record.id, t0() + Duration::days(3))
            .unwrap()
            .unwrap();
        assert_eq!(retired.status, HabitStatus::Deleted);
        assert_eq!(engine.record(record.id).unwrap(), retired);
        assert!(engine
            .retire_ended_at(record.id, t0() + Duration::days(4))
            .unwrap()
            .is_none());

        // An expired record fails rather than retiring.
        let other = engine
            .activate_at(1, 11, IntervalKind::Daily, None, Some(end), t0())
            .unwrap();
        let late = t0() + Duration::days(3);
        assert!(engine.retire_ended_at(other.id, late).unwrap().is_none());
        assert!(engine.fail_expired_at(other.id, late).unwrap());
    }

    #[test]
    fn fail_expired_is_idempotent_and_waits_for_deadline() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        assert!(!engine.fail_expired_at(record.id, t0() + hours(23)).unwrap());
        assert!(engine.fail_expired_at(record.id, t0() + hours(24)).unwrap());
        assert!(!engine.fail_expired_at(record.id, t0() + hours(25)).unwrap());
        assert_eq!(engine.record(record.id).unwrap().status, HabitStatus::Failed);
    }

    #[test]
    fn cancel_preserves_streak_and_is_noop_when_deleted() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        engine.check_off_at(record.id, t0()).unwrap();
        let cancelled = engine.cancel(record.id).unwrap();
        assert_eq!(cancelled.status, HabitStatus::Deleted);
        assert_eq!(cancelled.streak, 1);
        assert_eq!(engine.cancel(record.id).unwrap(), cancelled);
    }

    #[test]
    fn reactivate_failed_archives_and_starts_fresh() {
        let (_, engine) = engine();
        let record = engine
            .activate_at(1, 10, IntervalKind::Weekly, Some(5), None, t0())
            .unwrap();
        engine.check_off_at(record.id, t0()).unwrap();
        let late = t0() + Duration::days(15);
        assert!(engine.fail_expired_at(record.id, late).unwrap());

        let outcome = engine.reactivate_at(record.id, late).unwrap();
        let archived = outcome.archived.unwrap();
        assert_eq!(archived.status, HabitStatus::Deleted);
        assert_eq!(archived.streak, 1);
        assert_eq!(engine.record(record.id).unwrap().status, HabitStatus::Deleted);

        let fresh = outcome.record;
        assert_ne!(fresh.id, record.id);
        assert_eq!(fresh.streak, 0);
        assert_eq!(fresh.status, HabitStatus::InProgress);
        assert_eq!(fresh.interval, IntervalKind::Weekly);
        assert_eq!(fresh.goal_streak, Some(5));
        assert_eq!(fresh.starting_date, late);
        assert_eq!(fresh.update_expiry, late + Duration::days(7));
    }

    #[test]
    fn reactivate_deleted_leaves_old_record_alone() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        let cancelled = engine.cancel(record.id).unwrap();
        let outcome = engine.reactivate_at(record.id, t0() + hours(3)).unwrap();
        assert!(outcome.archived.is_none());
        assert_eq!(engine.record(record.id).unwrap(), cancelled);
        assert_eq!(outcome.record.status, HabitStatus::InProgress);
    }

    #[test]
    fn reactivate_refuses_while_habit_is_active() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        assert!(matches!(
            engine.reactivate_at(record.id, t0()).unwrap_err(),
            LifecycleError::AlreadyActive { .. }
        ));

        engine.cancel(record.id).unwrap();
        engine.reactivate_at(record.id, t0()).unwrap();
        // The old deleted record cannot spawn a second in-progress one.
        assert!(matches!(
            engine.reactivate_at(record.id, t0()).unwrap_err(),
            LifecycleError::AlreadyActive { .. }
        ));
    }

    #[test]
    fn reactivate_fails_an_expired_target_first() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        let outcome = engine.reactivate_at(record.id, t0() + hours(30)).unwrap();
        assert_eq!(outcome.archived.unwrap().status, HabitStatus::Deleted);
        assert_eq!(outcome.record.update_expiry, t0() + hours(54));
    }

    #[test]
    fn reactivate_drops_end_date_in_the_past() {
        let (_, engine) = engine();
        let end = t0().date_naive().succ_opt().unwrap();
        let record = engine
            .activate_at(1, 10, IntervalKind::Daily, None, Some(end), t0())
            .unwrap();
        engine.cancel(record.id).unwrap();
        let later = t0() + Duration::days(5);
        let outcome = engine.reactivate_at(record.id, later).unwrap();
        assert_eq!(outcome.record.end_date, None);
    }

    #[test]
    fn reactivate_keeps_failed_record_when_insert_fails() {
        let inner = MemoryStore::new();
        inner.register_habit(1, 10).unwrap();
        let id = inner
            .insert(&NewActiveHabit::starting_at(1, 10, IntervalKind::Daily, t0()))
            .unwrap();
        let store = Arc::new(FaultyStore {
            inner,
            locked_inserts: true,
            ..FaultyStore::default()
        });
        let engine = LifecycleEngine::with_backend(store.clone());
        assert!(engine.fail_expired_at(id, t0() + hours(25)).unwrap());

        let err = engine.reactivate_at(id, t0() + hours(26)).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Store(StoreError::Database(DatabaseError::Locked))
        ));
        let stored = store.load(id).unwrap().unwrap();
        assert_eq!(stored.status, HabitStatus::Failed);
        assert_eq!(stored.streak, 0);
        assert!(engine.in_progress(Some(1)).unwrap().is_empty());
    }

    #[test]
    fn second_conflict_is_surfaced_after_one_retry() {
        let inner = MemoryStore::new();
        inner.register_habit(1, 10).unwrap();
        let id = inner
            .insert(&NewActiveHabit::starting_at(1, 10, IntervalKind::Daily, t0()))
            .unwrap();
        let store = Arc::new(FaultyStore {
            inner,
            conflicting: Some(id),
            ..FaultyStore::default()
        });
        let engine = LifecycleEngine::with_backend(store.clone());

        let err = engine.check_off_at(id, t0() + hours(1)).unwrap_err();
        assert!(matches!(err, LifecycleError::ConflictingWrite(conflict) if conflict == id));
        assert_eq!(store.save_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.load(id).unwrap().unwrap().streak, 0);
    }

    #[test]
    fn countdowns_are_derived_from_deadline() {
        let (_, engine) = engine();
        let record = activate_daily(&engine);
        assert_eq!(engine.remaining_time_at(record.id, t0() + hours(4)).unwrap(), hours(20));
        assert_eq!(engine.remaining_time_at(record.id, t0() + hours(26)).unwrap(), hours(-2));
        assert_eq!(engine.next_check_in_at(record.id, t0()).unwrap(), Duration::zero());
    }

    #[test]
    fn listing_fails_expired_records_lazily() {
        let (_, engine) = engine();
        let daily = activate_daily(&engine);
        let weekly = engine
            .activate_at(1, 11, IntervalKind::Weekly, None, None, t0())
            .unwrap();
        let listed = engine.list_for_user_at(1, false, t0() + hours(30)).unwrap();
        let status_of = |id| listed.iter().find(|r| r.id == id).unwrap().status;
        assert_eq!(status_of(daily.id), HabitStatus::Failed);
        assert_eq!(status_of(weekly.id), HabitStatus::InProgress);

        engine.cancel(daily.id).unwrap();
        assert_eq!(engine.list_for_user_at(1, false, t0()).unwrap().len(), 1);
        assert_eq!(engine.list_for_user_at(1, true, t0()).unwrap().len(), 2);
    }

    #[test]
    fn leaderboard_orders_by_streak() {
        let (store, engine) = engine();
        store.register_habit(2, 20).unwrap();
        let low = activate_daily(&engine);
        let high = engine
            .activate_at(2, 20, IntervalKind::Daily, None, None, t0())
            .unwrap();
        engine.check_off_at(high.id, t0()).unwrap();
        let board = engine.leaderboard(IntervalKind::Daily).unwrap();
        let ids: Vec<i64> = board.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![high.id, low.id]);

        // A cancelled streak keeps its place.
        engine.cancel(high.id).unwrap();
        let board = engine.leaderboard(IntervalKind::Daily).unwrap();
        assert_eq!(board[0].id, high.id);
        assert_eq!(board[0].status, HabitStatus::Deleted);
    }

    /// Store whose first conditional write loses to a simulated sweep.
    struct SweptOnce {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    impl HabitStore for SweptOnce {
        fn load(&self, id: i64) -> Result<Option<ActiveHabitRecord>, StoreError> {
            self.inner.load(id)
        }
        fn list_by_user(
            &self,
            user_id: i64,
            exclude: Option<HabitStatus>,
        ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
            self.inner.list_by_user(user_id, exclude)
        }
        fn list_by_status(
            &self,
            status: HabitStatus,
        ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
            self.inner.list_by_status(status)
        }
        fn list_by_interval(
            &self,
            interval: IntervalKind,
        ) -> Result<Vec<ActiveHabitRecord>, StoreError> {
            self.inner.list_by_interval(interval)
        }
        fn insert(&self, record: &NewActiveHabit) -> Result<i64, StoreError> {
            self.inner.insert(record)
        }
        fn save(&self, record: &ActiveHabitRecord, expected: Expected) -> Result<(), StoreError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut swept = self.inner.load(record.id)?.unwrap();
                let before = swept.expected();
                swept.status = HabitStatus::Failed;
                self.inner.save(&swept, before)?;
            }
            self.inner.save(record, expected)
        }
        fn replace(
            &self,
            retired: &ActiveHabitRecord,
            expected: Expected,
            new: &NewActiveHabit,
        ) -> Result<i64, StoreError> {
            self.inner.replace(retired, expected, new)
        }
    }

    impl Directory for SweptOnce {
        fn user_exists(&self, user_id: i64) -> Result<bool, StoreError> {
            self.inner.user_exists(user_id)
        }
        fn habit_exists(&self, user_id: i64, habit_id: i64) -> Result<bool, StoreError> {
            self.inner.habit_exists(user_id, habit_id)
        }
    }

    #[test]
    fn check_off_losing_to_sweep_reports_not_in_progress() {
        let inner = MemoryStore::new();
        inner.register_habit(1, 10).unwrap();
        let id = inner
            .insert(&NewActiveHabit::starting_at(1, 10, IntervalKind::Daily, t0()))
            .unwrap();
        let store = Arc::new(SweptOnce {
            inner,
            raced: AtomicBool::new(false),
        });
        let engine = LifecycleEngine::with_backend(store.clone());

        let err = engine.check_off_at(id, t0() + hours(1)).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotInProgress { status: HabitStatus::Failed, .. }
        ));
        let stored = store.load(id).unwrap().unwrap();
        assert_eq!(stored.status, HabitStatus::Failed);
        assert_eq!(stored.streak, 0);
    }
}
