use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::SampleSink;
use crate::report::{Report, ReportError, ReportSnapshot};
use crate::sample::Sample;

/// A report that is fed while it is being read.
///
/// The dumper thread calls `add_sample()`, HTTP handlers call `snapshot()`.
/// Both hold the lock only for the duration of one call.
pub struct LiveReport {
    inner: Mutex<Report>,
}

impl LiveReport {
    pub fn new(report: Report) -> Self {
        Self {
            inner: Mutex::new(report),
        }
    }

    pub fn add_sample(&self, sample: &Sample) -> Result<(), ReportError> {
        self.inner.lock().add_sample(sample.timestamp, &sample.ops)
    }

    pub fn snapshot(&self, focus: Option<&str>, limit: Option<usize>) -> ReportSnapshot {
        self.inner.lock().snapshot(focus, limit)
    }

    /// Whether `name` is an aspect this report can produce.
    pub fn knows_aspect(&self, name: &str) -> bool {
        self.inner.lock().engine().names().iter().any(|n| n == name)
    }

    pub fn num_samples(&self) -> usize {
        self.inner.lock().num_samples()
    }
}

/// Lets the dumper aggregate in place of writing a recording.
impl SampleSink for Arc<LiveReport> {
    fn accept(&mut self, sample: Sample) -> anyhow::Result<()> {
        self.add_sample(&sample)?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
