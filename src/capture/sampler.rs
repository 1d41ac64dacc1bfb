use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;

use super::queue::BoundedQueue;
use super::stats::SamplerStats;
use super::worker::{LifecycleError, StopSignal, Worker};
use crate::db::{AdminClient, ClientNamespaceMatcher, OwnOpMatcher};
use crate::sample::{strip_empty_fields, Sample};

/// Default time between two `currentOp` polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

pub struct SamplerConfig {
    /// Target tick period. Slow ticks are not made up for.
    pub interval: Duration,
    /// Stop by itself after this many samples.
    pub max_samples: Option<u64>,
    /// Recognises the sampler's own `currentOp` command in the listing.
    pub own_ops: Arc<dyn OwnOpMatcher>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_samples: None,
            own_ops: Arc::new(ClientNamespaceMatcher::default()),
        }
    }
}

/// Polls the server for in-progress ops at a fixed cadence and pushes one
/// `Sample` per tick into the shared queue.
///
/// Pushes never block. When the queue is full the sample is dropped and
/// counted, so a slow consumer costs completeness, never cadence.
pub struct Sampler {
    admin: Arc<dyn AdminClient>,
    queue: Arc<BoundedQueue<Sample>>,
    config: SamplerConfig,
    stats: Arc<SamplerStats>,
    worker: Worker,
}

impl Sampler {
    pub fn new(
        admin: Arc<dyn AdminClient>,
        queue: Arc<BoundedQueue<Sample>>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            admin,
            queue,
            config,
            stats: Arc::new(SamplerStats::new()),
            worker: Worker::new("sampler"),
        }
    }

    /// Identifies our own connection, then starts the tick loop.
    ///
    /// A failing `whoami` is returned here, before any sample is taken.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_started() {
            return Err(LifecycleError::AlreadyRunning(self.worker.name()).into());
        }

        let me = self
            .admin
            .whoami()
            .context("identifying the sampler's own connection")?;
        self.stats.reset();

        let ticker = Ticker {
            admin: self.admin.clone(),
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            own_ops: self.config.own_ops.clone(),
            interval: self.config.interval,
            max_samples: self.config.max_samples,
            me,
        };

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_samples = ?self.config.max_samples,
            queue_size = self.queue.capacity(),
            "sampler starting",
        );
        self.worker.spawn(move |stop| ticker.run(stop))
    }

    /// Stops the loop at the next tick boundary and joins it. Returns the
    /// error that ended the loop early, if any.
    pub fn stop(&mut self) -> Result<()> {
        let outcome = self.worker.stop();
        self.log_stopped();
        outcome
    }

    /// Joins a loop that ends by itself (sample cap or error).
    pub fn wait(&mut self) -> Result<()> {
        let outcome = self.worker.wait();
        self.log_stopped();
        outcome
    }

    /// True once the loop has returned, either after `stop` or by itself.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn stats(&self) -> Arc<SamplerStats> {
        self.stats.clone()
    }

    pub fn num_samples(&self) -> u64 {
        self.stats.num_samples()
    }

    pub fn num_ops(&self) -> u64 {
        self.stats.num_ops()
    }

    pub fn num_dropped(&self) -> u64 {
        self.stats.num_dropped()
    }

    fn log_stopped(&self) {
        tracing::info!(
            samples = self.num_samples(),
            ops = self.num_ops(),
            dropped = self.num_dropped(),
            "sampler stopped",
        );
    }
}

// ─── Tick loop ───────────────────────────────────────────────────

/// Everything the sampler thread owns.
struct Ticker {
    admin: Arc<dyn AdminClient>,
    queue: Arc<BoundedQueue<Sample>>,
    stats: Arc<SamplerStats>,
    own_ops: Arc<dyn OwnOpMatcher>,
    interval: Duration,
    max_samples: Option<u64>,
    me: String,
}

impl Ticker {
    fn run(self, stop: StopSignal) -> Result<()> {
        let mut taken: u64 = 0;

        while !stop.is_set() {
            if self.max_samples.is_some_and(|max| taken >= max) {
                break;
            }
            let tick_start = Instant::now();

            let sample = self.take_sample().context("sampling in-progress ops")?;
            taken += 1;
            self.stats.record_sample(sample.ops.len());

            if self.queue.try_push(sample).is_err() {
                self.stats.record_drop();
                tracing::debug!(dropped = self.stats.num_dropped(), "queue full, sample dropped");
            }

            // Under-sampling is fine; back-to-back catch-up ticks are not.
            if let Some(remainder) = self.interval.checked_sub(tick_start.elapsed()) {
                if !remainder.is_zero() {
                    thread::sleep(remainder);
                }
            }
        }
        Ok(())
    }

    fn take_sample(&self) -> Result<Sample> {
        let polled = Instant::now();
        let listing = self.admin.current_ops()?;
        // Taken after the reply: closest to when the server's snapshot held.
        let timestamp = unix_seconds();
        self.stats.record_poll(polled.elapsed().as_micros() as u64);

        let ops = listing
            .into_iter()
            .filter(|op| !self.own_ops.is_own_op(op, &self.me))
            .map(strip_empty_fields)
            .collect();

        Ok(Sample::new(timestamp, ops))
    }
}

fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use mongodb::bson::doc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use crate::sample::Op;

    /// Serves scripted listings, then empty ones.
    struct ScriptedAdmin {
        listings: Mutex<VecDeque<Vec<Op>>>,
        me: String,
        fail_after: Option<usize>,
        calls: Mutex<usize>,
    }

    impl ScriptedAdmin {
        fn new(listings: Vec<Vec<Op>>) -> Self {
            Self {
                listings: Mutex::new(listings.into()),
                me: "127.0.0.1:5000".into(),
                fail_after: None,
                calls: Mutex::new(0),
            }
        }
    }

    impl AdminClient for ScriptedAdmin {
        fn whoami(&self) -> Result<String> {
            Ok(self.me.clone())
        }

        fn current_ops(&self) -> Result<Vec<Op>> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if self.fail_after.is_some_and(|n| *calls > n) {
                return Err(anyhow!("connection reset"));
            }
            Ok(self.listings.lock().pop_front().unwrap_or_default())
        }
    }

    struct BrokenWhoami;

    impl AdminClient for BrokenWhoami {
        fn whoami(&self) -> Result<String> {
            Err(anyhow!("auth failed"))
        }

        fn current_ops(&self) -> Result<Vec<Op>> {
            unreachable!("sampling must not start without an identity")
        }
    }

    /// A server whose `currentOp` takes a fixed time to answer.
    struct SlowAdmin(Duration);

    impl AdminClient for SlowAdmin {
        fn whoami(&self) -> Result<String> {
            Ok("127.0.0.1:5000".into())
        }

        fn current_ops(&self) -> Result<Vec<Op>> {
            thread::sleep(self.0);
            Ok(vec![])
        }
    }

    fn config(max_samples: u64) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::ZERO,
            max_samples: Some(max_samples),
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_initial_stats() {
        let sampler = Sampler::new(
            Arc::new(ScriptedAdmin::new(vec![])),
            Arc::new(BoundedQueue::new(1)),
            SamplerConfig::default(),
        );
        assert_eq!(sampler.num_samples(), 0);
        assert_eq!(sampler.num_ops(), 0);
        assert_eq!(sampler.num_dropped(), 0);
    }

    #[test]
    fn test_excludes_own_op_and_strips_empty_fields() {
        let admin = ScriptedAdmin::new(vec![vec![
            doc! { "client": "127.0.0.1:5000", "ns": "admin.$cmd", "op": "command" },
            doc! { "client": "10.1.1.1:9", "ns": "app.users", "op": "query", "msg": "" },
        ]]);
        let queue = Arc::new(BoundedQueue::new(4));
        let mut sampler = Sampler::new(Arc::new(admin), queue.clone(), config(1));

        sampler.start().unwrap();
        sampler.wait().unwrap();

        let sample = queue.try_pop().unwrap();
        assert_eq!(
            sample.ops,
            vec![doc! { "client": "10.1.1.1:9", "ns": "app.users", "op": "query" }]
        );
        assert_eq!(sampler.num_ops(), 1);
    }

    #[test]
    fn test_drops_when_queue_full() {
        let queue = Arc::new(BoundedQueue::new(2));
        let mut sampler = Sampler::new(
            Arc::new(ScriptedAdmin::new(vec![])),
            queue.clone(),
            config(5),
        );

        sampler.start().unwrap();
        sampler.wait().unwrap();

        assert_eq!(sampler.num_samples(), 5);
        assert_eq!(sampler.num_dropped(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_whoami_failure_is_fatal_before_sampling() {
        let mut sampler = Sampler::new(
            Arc::new(BrokenWhoami),
            Arc::new(BoundedQueue::new(1)),
            SamplerConfig::default(),
        );
        let err = sampler.start().unwrap_err();
        assert!(format!("{err:#}").contains("auth failed"));
        assert!(sampler.stop().is_err());
    }

    #[test]
    fn test_in_loop_failure_propagates() {
        let mut admin = ScriptedAdmin::new(vec![vec![doc! { "op": "query" }]]);
        admin.fail_after = Some(2);
        let queue = Arc::new(BoundedQueue::new(10));
        let mut sampler = Sampler::new(Arc::new(admin), queue.clone(), config(10));

        sampler.start().unwrap();
        let err = sampler.wait().unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));
        assert_eq!(sampler.num_samples(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fast_server_is_polled_once_per_interval() {
        let queue = Arc::new(BoundedQueue::new(16));
        let mut sampler = Sampler::new(
            Arc::new(SlowAdmin(Duration::ZERO)),
            queue.clone(),
            SamplerConfig {
                interval: Duration::from_millis(30),
                max_samples: Some(5),
                ..SamplerConfig::default()
            },
        );

        let started = Instant::now();
        sampler.start().unwrap();
        sampler.wait().unwrap();
        let elapsed = started.elapsed();

        // Five ticks are four full intervals apart, then one last sleep.
        assert!(elapsed >= Duration::from_millis(120), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");

        let stamps: Vec<f64> = std::iter::from_fn(|| queue.try_pop()).map(|s| s.timestamp).collect();
        assert_eq!(stamps.len(), 5);
        assert!(stamps.windows(2).all(|w| w[1] - w[0] >= 0.025), "{stamps:?}");
    }

    #[test]
    fn test_slow_server_is_not_caught_up() {
        let call = Duration::from_millis(40);
        let queue = Arc::new(BoundedQueue::new(1000));
        let mut sampler = Sampler::new(
            Arc::new(SlowAdmin(call)),
            queue.clone(),
            SamplerConfig {
                interval: Duration::from_millis(20),
                ..SamplerConfig::default()
            },
        );

        let started = Instant::now();
        sampler.start().unwrap();
        thread::sleep(Duration::from_millis(400));
        sampler.stop().unwrap();
        let elapsed = started.elapsed();

        let taken = sampler.num_samples();
        let most = (elapsed.as_millis() / call.as_millis()) as u64;
        assert!(taken >= 1);
        assert!(taken <= most, "{taken} samples in {elapsed:?}");

        // Each timestamp follows a full reply, so they are at least a call apart.
        let stamps: Vec<f64> = std::iter::from_fn(|| queue.try_pop()).map(|s| s.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[1] - w[0] >= 0.039), "{stamps:?}");
    }

    #[test]
    fn test_stop_then_restart() {
        let mut sampler = Sampler::new(
            Arc::new(ScriptedAdmin::new(vec![])),
            Arc::new(BoundedQueue::new(1000)),
            SamplerConfig {
                interval: Duration::from_millis(1),
                ..SamplerConfig::default()
            },
        );

        sampler.start().unwrap();
        assert!(sampler.start().is_err());
        sampler.stop().unwrap();
        assert!(sampler.stop().is_err());

        sampler.start().unwrap();
        sampler.stop().unwrap();
        assert!(sampler.is_finished());
    }
}
