use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use habitrack_core::{Event, IntervalKind};

use super::{open_engine, print_json};

#[derive(Subcommand)]
pub enum HabitAction {
    /// Start tracking a habit
    Activate {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        habit: i64,
        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        interval: IntervalKind,
        /// Streak to aim for
        #[arg(long)]
        goal: Option<u32>,
        /// Last monitored day (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
    /// Check off the current period
    Check {
        /// Record ID
        id: i64,
    },
    /// Stop tracking a habit
    Cancel {
        /// Record ID
        id: i64,
    },
    /// Start over after a failure
    Reactivate {
        /// Record ID of the failed or cancelled habit
        id: i64,
    },
    /// List a user's habits
    List {
        #[arg(long)]
        user: i64,
        /// Include cancelled habits
        #[arg(long)]
        all: bool,
    },
    /// Show one habit with its countdowns
    Show {
        /// Record ID
        id: i64,
    },
    /// Highest streaks for an interval
    Leaderboard {
        #[arg(long, default_value = "daily")]
        interval: IntervalKind,
    },
}

pub fn run(action: HabitAction) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine()?;

    match action {
        HabitAction::Activate {
            user,
            habit,
            interval,
            goal,
            end_date,
        } => {
            let now = Utc::now();
            let record = engine.activate_at(user, habit, interval, goal, end_date, now)?;
            print_json(&Event::activated(&record, now))?;
        }
        HabitAction::Check { id } => {
            let now = Utc::now();
            let outcome = engine.check_off_at(id, now)?;
            print_json(&Event::checked_off(&outcome, now))?;
        }
        HabitAction::Cancel { id } => {
            let record = engine.cancel(id)?;
            if let Some(event) = Event::cancelled(&record, Utc::now()) {
                print_json(&event)?;
            }
        }
        HabitAction::Reactivate { id } => {
            let now = Utc::now();
            let outcome = engine.reactivate_at(id, now)?;
            print_json(&Event::reactivated(&outcome, now))?;
        }
        HabitAction::List { user, all } => {
            let now = Utc::now();
            let snapshots: Vec<Event> = engine
                .list_for_user_at(user, all, now)?
                .iter()
                .map(|record| Event::snapshot(record, now))
                .collect();
            print_json(&snapshots)?;
        }
        HabitAction::Show { id } => {
            let now = Utc::now();
            engine.fail_expired_at(id, now)?;
            print_json(&Event::snapshot(&engine.record(id)?, now))?;
        }
        HabitAction::Leaderboard { interval } => {
            print_json(&engine.leaderboard(interval)?)?;
        }
    }
    Ok(())
}
