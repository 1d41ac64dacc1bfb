use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timestamps before 2000-01-01 are taken to be relative, not unix seconds.
const UNIX_SECONDS_FLOOR: f64 = 946_684_800.0;

/// Whole-run counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub num_samples: u64,
    pub num_ops: u64,
    pub earliest: Option<f64>,
    pub latest: Option<f64>,
    pub earliest_utc: Option<DateTime<Utc>>,
    pub latest_utc: Option<DateTime<Utc>>,
    /// Absent with fewer than two samples or a zero time span.
    pub samples_per_sec: Option<f64>,
    pub perc_active: f64,
    /// Present only when a filter is configured.
    pub perc_filtered: Option<f64>,
    pub num_filter_errors: u64,
}

/// One aspect's values, most frequent first.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AspectBreakdown {
    pub aspect: String,
    /// Distinct values seen, before any limit.
    pub total_values: usize,
    pub truncated: bool,
    pub values: Vec<ValueShare>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValueShare {
    pub value: String,
    /// Number of samples at which the value was present.
    pub count: u64,
    pub pct_of_all: f64,
    pub pct_of_active: f64,
    pub pct_of_filtered: Option<f64>,
}

/// Summary plus breakdowns, the unit served over HTTP and printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSnapshot {
    pub summary: Summary,
    pub aspects: Vec<AspectBreakdown>,
}

pub(super) fn to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < UNIX_SECONDS_FLOOR {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1e6) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utc() {
        assert!(to_utc(12.5).is_none());
        assert!(to_utc(f64::NAN).is_none());
        let t = to_utc(1_700_000_000.25).unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(t.timestamp_subsec_millis(), 250);
    }
}
