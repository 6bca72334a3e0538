//! Expiry sweeper.
//!
//! Periodically re-evaluates every in-progress record and fails the ones whose
//! deadline has passed, so deadlines are enforced whether or not any client
//! is looking at them. It goes through the same
//! [`LifecycleEngine::fail_expired_at`] rule as every other caller. On-time
//! records past their end date are closed through
//! [`LifecycleEngine::retire_ended_at`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use habitrack_core::{ExpirySweeper, HabitDb, LifecycleEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(LifecycleEngine::with_backend(Arc::new(HabitDb::open()?)));
//!
//! // One pass
//! let report = ExpirySweeper::new(engine.clone()).sweep_once()?;
//! println!("failed {} habits", report.failed);
//!
//! // Or keep sweeping in the background
//! let handle = ExpirySweeper::new(engine).spawn(Duration::from_secs(60));
//! # handle.abort();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::events::Event;
use crate::habit::LifecycleEngine;

/// Which records a sweep looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepScope {
    #[default]
    All,
    User(i64),
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// In-progress records looked at.
    pub examined: usize,
    pub failed: usize,
    /// On time, but closed because their end date passed.
    pub retired: usize,
    /// Records whose transition could not be written.
    pub errors: usize,
    pub events: Vec<Event>,
}

pub struct ExpirySweeper {
    engine: Arc<LifecycleEngine>,
    scope: SweepScope,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<LifecycleEngine>) -> Self {
        Self {
            engine,
            scope: SweepScope::All,
        }
    }

    pub fn scoped(mut self, scope: SweepScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn sweep_once(&self) -> Result<SweepReport, LifecycleError> {
        self.sweep_once_at(Utc::now())
    }

    /// Run one pass at `now`.
    ///
    /// Only listing the records can fail the whole sweep; a failed write on a
    /// single record is logged and counted, and the sweep moves on.
    pub fn sweep_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let user_id = match self.scope {
            SweepScope::All => None,
            SweepScope::User(user_id) => Some(user_id),
        };
        let records = self.engine.in_progress(user_id)?;

        let mut report = SweepReport {
            examined: records.len(),
            ..SweepReport::default()
        };
        for record in &records {
            let outcome = if record.should_fail(now) {
                self.engine
                    .fail_expired_at(record.id, now)
                    .map(|failed| failed.then(|| Event::failed(record, now)))
            } else if record.should_retire(now) {
                self.engine
                    .retire_ended_at(record.id, now)
                    .map(|retired| retired.and_then(|r| Event::cancelled(&r, now)))
            } else {
                continue;
            };

            match outcome {
                Ok(Some(event)) => {
                    if matches!(event, Event::HabitFailed { .. }) {
                        report.failed += 1;
                    } else {
                        report.retired += 1;
                    }
                    report.events.push(event);
                }
                Ok(None) => {
                    debug!(record_id = record.id, "record changed before sweep, left as is");
                }
                Err(e) => {
                    warn!(record_id = record.id, error = %e, "failed to close habit");
                    report.errors += 1;
                }
            }
        }

        if report.failed > 0 || report.retired > 0 || report.errors > 0 {
            info!(
                examined = report.examined,
                failed = report.failed,
                retired = report.retired,
                errors = report.errors,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `tick` on a background task until the handle is aborted
    /// or the runtime shuts down.
    ///
    /// Storage calls are blocking, so each pass runs on the blocking pool.
    /// Ticks missed while a pass is running are skipped.
    pub fn spawn(self, tick: Duration) -> JoinHandle<()> {
        let sweeper = Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let pass = Arc::clone(&sweeper);
                match tokio::task::spawn_blocking(move || pass.sweep_once()).await {
                    Ok(Ok(report)) => {
                        debug!(
                            examined = report.examined,
                            failed = report.failed,
                            "sweep tick"
                        );
                    }
                    Ok(Err(e)) => error!(error = %e, "expiry sweep failed"),
                    Err(e) => error!(error = %e, "expiry sweep task panicked"),
                }
            }
        })
    }
}
