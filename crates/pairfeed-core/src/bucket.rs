use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Width of a month bucket (30 days) in milliseconds.
pub const MONTH_MS: i64 = 2_592_000_000;
/// Width of a week bucket in milliseconds.
pub const WEEK_MS: i64 = 604_800_000;

/// The fixed-width window the upstream candle API is paginated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Span {
    Month,
    Week,
}

impl Span {
    pub fn millis(self) -> i64 {
        match self {
            Span::Month => MONTH_MS,
            Span::Week => WEEK_MS,
        }
    }

    /// Value of the upstream `span` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Span::Month => "month",
            Span::Week => "week",
        }
    }

    /// Start of the bucket containing `ts_ms`.
    pub fn floor(self, ts_ms: i64) -> i64 {
        self.index(ts_ms) * self.millis()
    }

    /// Bucket number of `ts_ms` counted from the epoch.
    pub fn index(self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.millis())
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Month buckets to fetch when extending a series backward in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackfillPlan {
    /// Bucket start timestamps, newest first.
    pub buckets: Vec<i64>,
    /// The walk hit the bucket holding the oldest known bar; nothing older exists.
    pub reached_oldest: bool,
}

/// Plan the month buckets needed to extend a series whose earliest bar is at
/// `earliest_ms` back to `from_ms`.
///
/// The bucket holding `earliest_ms` is already in the series and is skipped.
/// The walk includes the bucket that contains `oldest_known_ms` and stops
/// there. A bucket lying wholly before the boundary is never planned. An
/// `oldest_known_ms` of zero means the boundary is unknown. At most
/// `max_buckets` buckets are planned.
pub fn plan_backfill(
    earliest_ms: i64,
    from_ms: i64,
    oldest_known_ms: i64,
    max_buckets: usize,
) -> BackfillPlan {
    let mut plan = BackfillPlan::default();
    if earliest_ms <= from_ms {
        return plan;
    }

    let last = Span::Month.index(earliest_ms);
    let first = Span::Month.index(from_ms);

    // Upstream `ts` is the bucket start, so the walk begins one bucket below
    // the one holding the earliest bar.
    let mut index = last - 1;
    while index >= first && plan.buckets.len() < max_buckets {
        let ts = index * MONTH_MS;
        if oldest_known_ms > 0 && ts + MONTH_MS <= oldest_known_ms {
            plan.reached_oldest = true;
            break;
        }
        plan.buckets.push(ts);
        if ts < oldest_known_ms {
            plan.reached_oldest = true;
            break;
        }
        index -= 1;
    }
    plan
}

/// Look-back windows offered by live price charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveTimeframe {
    Hour,
    FourHours,
    Day,
    Week,
    Month,
    SixMonths,
}

impl LiveTimeframe {
    pub fn millis(self) -> i64 {
        match self {
            LiveTimeframe::Hour => 3_600_000,
            LiveTimeframe::FourHours => 14_400_000,
            LiveTimeframe::Day => 86_400_000,
            LiveTimeframe::Week => WEEK_MS,
            LiveTimeframe::Month => MONTH_MS,
            LiveTimeframe::SixMonths => 15_552_000_000,
        }
    }
}

impl FromStr for LiveTimeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1h" => Ok(LiveTimeframe::Hour),
            "4h" => Ok(LiveTimeframe::FourHours),
            "1d" => Ok(LiveTimeframe::Day),
            "1w" => Ok(LiveTimeframe::Week),
            "1m" => Ok(LiveTimeframe::Month),
            "6m" => Ok(LiveTimeframe::SixMonths),
            other => Err(format!(
                "unknown timeframe '{other}'. Expected: 1h, 4h, 1d, 1w, 1m, 6m"
            )),
        }
    }
}
