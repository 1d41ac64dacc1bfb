use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use super::queue::BoundedQueue;
use super::worker::{LifecycleError, StopSignal, Worker};
use crate::recording::RecordingWriter;
use crate::sample::Sample;

/// Default bound on each queue wait, and so on how long `stop` can take.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Where the dumper delivers samples.
pub trait SampleSink: Send {
    fn accept(&mut self, sample: Sample) -> Result<()>;

    /// Makes everything accepted so far durable.
    fn flush(&mut self) -> Result<()>;
}

impl<W: Write + Send> SampleSink for RecordingWriter<W> {
    fn accept(&mut self, sample: Sample) -> Result<()> {
        self.write_sample(&sample)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        RecordingWriter::flush(self)?;
        Ok(())
    }
}

/// Drains the shared queue into a sink on its own thread.
///
/// Each sample is handed to the sink as soon as it is dequeued; nothing is
/// buffered here. On stop, whatever is still queued is delivered, then the
/// sink is flushed before `stop` returns.
pub struct Dumper<S: SampleSink + 'static> {
    queue: Arc<BoundedQueue<Sample>>,
    sink: Arc<Mutex<S>>,
    poll_timeout: Duration,
    written: Arc<AtomicU64>,
    worker: Worker,
}

impl<S: SampleSink + 'static> Dumper<S> {
    pub fn new(queue: Arc<BoundedQueue<Sample>>, sink: S) -> Self {
        Self::with_poll_timeout(queue, sink, DEFAULT_POLL_TIMEOUT)
    }

    pub fn with_poll_timeout(
        queue: Arc<BoundedQueue<Sample>>,
        sink: S,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            sink: Arc::new(Mutex::new(sink)),
            poll_timeout,
            written: Arc::new(AtomicU64::new(0)),
            worker: Worker::new("dumper"),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_started() {
            return Err(LifecycleError::AlreadyRunning(self.worker.name()).into());
        }

        self.written.store(0, Ordering::Relaxed);
        let queue = self.queue.clone();
        let sink = self.sink.clone();
        let written = self.written.clone();
        let poll_timeout = self.poll_timeout;
        self.worker
            .spawn(move |stop| drain(&queue, &sink, &written, poll_timeout, stop))
    }

    /// Signals the loop, waits for the final drain and flush.
    pub fn stop(&mut self) -> Result<()> {
        let outcome = self.worker.stop();
        tracing::info!(written = self.num_written(), "dumper stopped");
        outcome
    }

    /// True once the loop has returned, including when the sink failed.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Samples delivered to the sink since the last `start`.
    pub fn num_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Shared handle on the sink, e.g. to inspect it after stopping.
    pub fn sink(&self) -> Arc<Mutex<S>> {
        self.sink.clone()
    }
}

fn drain<S: SampleSink>(
    queue: &BoundedQueue<Sample>,
    sink: &Mutex<S>,
    written: &AtomicU64,
    poll_timeout: Duration,
    stop: StopSignal,
) -> Result<()> {
    while !stop.is_set() {
        if let Some(sample) = queue.pop_timeout(poll_timeout) {
            sink.lock().accept(sample).context("writing sample")?;
            written.fetch_add(1, Ordering::Relaxed);
        }
    }

    let mut sink = sink.lock();
    while let Some(sample) = queue.try_pop() {
        sink.accept(sample).context("writing sample")?;
        written.fetch_add(1, Ordering::Relaxed);
    }
    sink.flush().context("flushing output")
}
