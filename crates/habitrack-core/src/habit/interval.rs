//! Monitoring intervals and their deadline arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often a habit must be checked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Daily,
    Weekly,
    Monthly,
}

impl IntervalKind {
    pub const ALL: [IntervalKind; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Length of one monitoring period.
    ///
    /// Monthly is a fixed 30 days, not a calendar month.
    pub fn period(self) -> Duration {
        match self {
            IntervalKind::Daily => Duration::hours(24),
            IntervalKind::Weekly => Duration::hours(168),
            IntervalKind::Monthly => Duration::hours(720),
        }
    }

    /// Deadline one period after `reference`.
    pub fn deadline_from(self, reference: DateTime<Utc>) -> DateTime<Utc> {
        reference + self.period()
    }

    /// Stable numeric id used as the storage column value.
    pub fn id(self) -> i64 {
        match self {
            IntervalKind::Daily => 1,
            IntervalKind::Weekly => 2,
            IntervalKind::Monthly => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntervalKind::Daily => "daily",
            IntervalKind::Weekly => "weekly",
            IntervalKind::Monthly => "monthly",
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(IntervalKind::Daily),
            "weekly" | "week" => Ok(IntervalKind::Weekly),
            "monthly" | "month" => Ok(IntervalKind::Monthly),
            other => Err(format!("unknown interval '{other}' (expected daily, weekly or monthly)")),
        }
    }
}
