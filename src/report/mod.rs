//! Aggregation of samples into presence statistics.
//!
//! For every (aspect, value) pair the report keeps the set of sample
//! timestamps at which some op produced that value and passed the filter.
//! All percentages are ratios of those presence sets to the sample sets.

mod breakdown;
pub mod text;

pub use breakdown::{AspectBreakdown, ReportSnapshot, Summary, ValueShare};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

use thiserror::Error;

use crate::aspects::expr::{Bindings, ExprError, Expression};
use crate::aspects::{AspectEngine, Aspects};
use crate::recording::{CodecError, RecordingReader};
use crate::sample::{value_key, Op, Timestamp};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("filter `{expression}` failed on an op at t={timestamp}: {source}")]
    Filter {
        expression: String,
        timestamp: f64,
        #[source]
        source: ExprError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// What to do when the filter expression fails on an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterErrorPolicy {
    /// Stop the whole run with [`ReportError::Filter`].
    #[default]
    Abort,
    /// Count the failure and leave the op out of filtered statistics.
    SkipOp,
}

/// Boolean predicate over an op's aspects. The raw op is not visible.
#[derive(Debug, Clone)]
pub struct Filter {
    expression: Expression,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            expression: Expression::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        self.expression.source()
    }

    pub fn matches(&self, aspects: &Aspects) -> Result<bool, ExprError> {
        self.expression.matches(&Bindings::aspects(aspects))
    }
}

type PresenceSet = HashSet<Timestamp>;

/// Aggregation state for one analysis run.
pub struct Report {
    engine: AspectEngine,
    filter: Option<Filter>,
    policy: FilterErrorPolicy,

    num_ops: u64,
    num_filter_errors: u64,
    all_samples: PresenceSet,
    active_samples: PresenceSet,
    filtered_samples: PresenceSet,
    earliest: Option<f64>,
    latest: Option<f64>,

    // aspect name → value key → presence set
    presence: BTreeMap<String, HashMap<String, PresenceSet>>,
}

impl Report {
    pub fn new(engine: AspectEngine, filter: Option<Filter>) -> Self {
        Self {
            engine,
            filter,
            policy: FilterErrorPolicy::default(),
            num_ops: 0,
            num_filter_errors: 0,
            all_samples: PresenceSet::new(),
            active_samples: PresenceSet::new(),
            filtered_samples: PresenceSet::new(),
            earliest: None,
            latest: None,
            presence: BTreeMap::new(),
        }
    }

    pub fn with_filter_policy(mut self, policy: FilterErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn engine(&self) -> &AspectEngine {
        &self.engine
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Folds one sample into the report. Samples are expected in
    /// non-decreasing timestamp order.
    pub fn add_sample(&mut self, timestamp: f64, ops: &[Op]) -> Result<(), ReportError> {
        let t = Timestamp(timestamp);
        self.all_samples.insert(t);
        self.earliest = Some(self.earliest.map_or(timestamp, |e| e.min(timestamp)));
        self.latest = Some(self.latest.map_or(timestamp, |l| l.max(timestamp)));

        if ops.is_empty() {
            return Ok(());
        }
        self.num_ops += ops.len() as u64;
        self.active_samples.insert(t);

        for op in ops {
            let aspects = self.engine.extract(op);
            if !self.passes_filter(&aspects, timestamp)? {
                continue;
            }

            self.filtered_samples.insert(t);
            for (name, value) in &aspects {
                self.presence
                    .entry(name.clone())
                    .or_default()
                    .entry(value_key(value))
                    .or_default()
                    .insert(t);
            }
        }
        Ok(())
    }

    fn passes_filter(&mut self, aspects: &Aspects, timestamp: f64) -> Result<bool, ReportError> {
        let Some(filter) = &self.filter else {
            return Ok(true);
        };
        match filter.matches(aspects) {
            Ok(pass) => Ok(pass),
            Err(source) => match self.policy {
                FilterErrorPolicy::Abort => Err(ReportError::Filter {
                    expression: filter.source().to_string(),
                    timestamp,
                    source,
                }),
                FilterErrorPolicy::SkipOp => {
                    tracing::debug!(timestamp, error = %source, "filter failed, skipping op");
                    self.num_filter_errors += 1;
                    Ok(false)
                }
            },
        }
    }

    pub fn num_samples(&self) -> usize {
        self.all_samples.len()
    }

    pub fn summary(&self) -> Summary {
        let num_samples = self.all_samples.len() as u64;
        let samples_per_sec = match (self.earliest, self.latest) {
            (Some(earliest), Some(latest)) if num_samples >= 2 && latest > earliest => {
                Some(num_samples as f64 / (latest - earliest))
            }
            _ => None,
        };

        Summary {
            num_samples,
            num_ops: self.num_ops,
            earliest: self.earliest,
            latest: self.latest,
            earliest_utc: self.earliest.and_then(breakdown::to_utc),
            latest_utc: self.latest.and_then(breakdown::to_utc),
            samples_per_sec,
            perc_active: percent(self.active_samples.len(), self.all_samples.len()),
            perc_filtered: self
                .filter
                .as_ref()
                .map(|_| percent(self.filtered_samples.len(), self.all_samples.len())),
            num_filter_errors: self.num_filter_errors,
        }
    }

    /// Per-aspect value rankings, aspects in name order.
    ///
    /// `focus` restricts the output to one aspect. `limit` keeps the top
    /// values of each aspect; `None` or `Some(0)` keeps them all.
    pub fn top_by_aspect(&self, focus: Option<&str>, limit: Option<usize>) -> Vec<AspectBreakdown> {
        let limit = limit.filter(|&n| n > 0);
        let all = self.all_samples.len();
        let active = self.active_samples.len();
        let filtered = self.filter.as_ref().map(|_| self.filtered_samples.len());

        self.presence
            .iter()
            .filter(|(name, _)| focus.map_or(true, |f| f == name.as_str()))
            .map(|(name, values)| {
                let mut ranked: Vec<(&String, usize)> =
                    values.iter().map(|(v, set)| (v, set.len())).collect();
                ranked.sort_by(|(va, ca), (vb, cb)| cb.cmp(ca).then_with(|| va.cmp(vb)));

                let total_values = ranked.len();
                let shown = limit.map_or(total_values, |n| n.min(total_values));
                let values = ranked
                    .into_iter()
                    .take(shown)
                    .map(|(value, count)| ValueShare {
                        value: value.clone(),
                        count: count as u64,
                        pct_of_all: percent(count, all),
                        pct_of_active: percent(count, active),
                        pct_of_filtered: filtered.map(|f| percent(count, f)),
                    })
                    .collect();

                AspectBreakdown {
                    aspect: name.clone(),
                    total_values,
                    truncated: shown < total_values,
                    values,
                }
            })
            .collect()
    }

    pub fn snapshot(&self, focus: Option<&str>, limit: Option<usize>) -> ReportSnapshot {
        ReportSnapshot {
            summary: self.summary(),
            aspects: self.top_by_aspect(focus, limit),
        }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Feeds every sample of a recording into `report`, in stream order.
///
/// Returns the number of samples consumed. A corrupt document or a filter
/// failure (under [`FilterErrorPolicy::Abort`]) ends the run with an error.
pub fn analyze<R: Read>(reader: RecordingReader<R>, report: &mut Report) -> Result<u64, ReportError> {
    let mut count = 0;
    for sample in reader {
        let sample = sample?;
        report.add_sample(sample.timestamp, &sample.ops)?;
        count += 1;
    }
    tracing::debug!(samples = count, "recording analyzed");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn op(ns: &str) -> Op {
        doc! { "op": "query", "ns": ns, "client": "10.1.1.1:999" }
    }

    #[test]
    fn test_summary_counts() {
        let mut report = Report::new(AspectEngine::new(), None);
        for t in 0..10 {
            let ops = if t % 3 == 0 { vec![op("a.b")] } else { vec![] };
            report.add_sample(t as f64, &ops).unwrap();
        }

        let s = report.summary();
        assert_eq!(s.num_samples, 10);
        assert_eq!(s.num_ops, 4);
        assert_eq!(s.perc_active, 40.0);
        assert_eq!(s.samples_per_sec, Some(10.0 / 9.0));
        assert_eq!(s.perc_filtered, None);
        assert_eq!(s.earliest, Some(0.0));
        assert_eq!(s.latest, Some(9.0));
        assert!(s.earliest_utc.is_none());
    }

    #[test]
    fn test_rate_needs_two_distinct_timestamps() {
        let mut report = Report::new(AspectEngine::new(), None);
        assert_eq!(report.summary().samples_per_sec, None);
        assert_eq!(report.summary().perc_active, 0.0);

        report.add_sample(5.0, &[]).unwrap();
        assert_eq!(report.summary().samples_per_sec, None);
        report.add_sample(5.0, &[]).unwrap();
        assert_eq!(report.summary().samples_per_sec, None);
    }

    #[test]
    fn test_presence_counts_samples_not_ops() {
        let mut report = Report::new(AspectEngine::new(), None);
        report.add_sample(1.0, &[op("a.x"), op("a.x"), op("a.y")]).unwrap();
        report.add_sample(2.0, &[op("a.x")]).unwrap();
        report.add_sample(3.0, &[]).unwrap();

        let top = report.top_by_aspect(Some("collection"), None);
        assert_eq!(top.len(), 1);
        let values = &top[0].values;
        assert_eq!(values[0].value, "x");
        assert_eq!(values[0].count, 2);
        assert!((values[0].pct_of_all - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(values[0].pct_of_active, 100.0);
        assert_eq!(values[1].value, "y");
        assert_eq!(values[1].pct_of_active, 50.0);
    }

    #[test]
    fn test_ties_break_on_value_and_limit_truncates() {
        let mut report = Report::new(AspectEngine::new(), None);
        report.add_sample(1.0, &[op("d.zeta"), op("d.alpha"), op("d.mid")]).unwrap();
        report.add_sample(2.0, &[op("d.mid")]).unwrap();

        let top = report.top_by_aspect(Some("collection"), Some(2));
        let names: Vec<&str> = top[0].values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(names, ["mid", "alpha"]);
        assert!(top[0].truncated);
        assert_eq!(top[0].total_values, 3);

        let all = report.top_by_aspect(Some("collection"), Some(0));
        assert!(!all[0].truncated);
        assert_eq!(all[0].values.len(), 3);
    }

    #[test]
    fn test_aspects_are_alphabetical() {
        let mut report = Report::new(AspectEngine::new(), None);
        report.add_sample(1.0, &[op("d.c")]).unwrap();
        let names: Vec<String> = report
            .top_by_aspect(None, None)
            .into_iter()
            .map(|b| b.aspect)
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(report.top_by_aspect(Some("nope"), None).is_empty());
    }

    #[test]
    fn test_filter_restricts_presence() {
        let filter = Filter::parse("db == 'shop'").unwrap();
        let mut report = Report::new(AspectEngine::new(), Some(filter));
        report.add_sample(1.0, &[op("shop.a"), op("logs.b")]).unwrap();
        report.add_sample(2.0, &[op("logs.b")]).unwrap();
        report.add_sample(3.0, &[]).unwrap();
        report.add_sample(4.0, &[op("shop.a")]).unwrap();

        let s = report.summary();
        assert_eq!(s.perc_active, 75.0);
        assert_eq!(s.perc_filtered, Some(50.0));

        let top = report.top_by_aspect(Some("db"), None);
        assert_eq!(top[0].values.len(), 1);
        assert_eq!(top[0].values[0].value, "shop");
        assert_eq!(top[0].values[0].pct_of_filtered, Some(100.0));
        assert!((top[0].values[0].pct_of_active - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_failure_aborts_by_default() {
        let filter = Filter::parse("len(db) > 2").unwrap();
        let mut report = Report::new(AspectEngine::new(), Some(filter));
        report.add_sample(1.0, &[op("shop.a")]).unwrap();

        let err = report
            .add_sample(2.0, &[doc! { "op": "none" }])
            .unwrap_err();
        assert!(matches!(err, ReportError::Filter { timestamp, .. } if timestamp == 2.0));
    }

    #[test]
    fn test_filter_failure_can_skip_op() {
        let filter = Filter::parse("len(db) > 2").unwrap();
        let mut report = Report::new(AspectEngine::new(), Some(filter))
            .with_filter_policy(FilterErrorPolicy::SkipOp);
        report
            .add_sample(1.0, &[op("shop.a"), doc! { "op": "none" }])
            .unwrap();

        let s = report.summary();
        assert_eq!(s.num_filter_errors, 1);
        assert_eq!(s.num_ops, 2);
        assert_eq!(report.top_by_aspect(Some("op"), None)[0].values.len(), 1);
    }

    #[test]
    fn test_numeric_and_string_values_share_a_bucket() {
        let mut engine = AspectEngine::new();
        engine.add_expression("n", "doc.n").unwrap();
        let mut report = Report::new(engine, None);
        report.add_sample(1.0, &[doc! { "n": 42 }]).unwrap();
        report.add_sample(2.0, &[doc! { "n": "42" }]).unwrap();

        let top = report.top_by_aspect(Some("n"), None);
        assert_eq!(top[0].total_values, 1);
        assert_eq!(top[0].values[0].count, 2);
    }
}
