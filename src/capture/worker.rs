use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

/// Misuse of a worker's start/stop protocol. Always a caller bug.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),
}

/// Flag a worker loop checks at each of its suspension points.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A named OS thread with stop-and-join semantics.
///
/// `stop()` raises the flag and blocks until the loop has exited, then hands
/// back whatever the loop returned. Stopping a worker that was never started,
/// or stopping twice, is a `LifecycleError`.
pub struct Worker {
    name: &'static str,
    stop: StopSignal,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Worker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stop: StopSignal::default(),
            handle: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawns `body` on a fresh thread. The body receives the stop signal
    /// and should return once it is set. A failing body is logged from its
    /// own thread, before anyone calls `stop`.
    pub fn spawn<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(StopSignal) -> Result<()> + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(LifecycleError::AlreadyRunning(self.name).into());
        }

        self.stop.clear();
        let stop = self.stop.clone();
        let name = self.name;
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let outcome = body(stop);
                if let Err(e) = &outcome {
                    let error = format!("{e:#}");
                    tracing::error!(worker = name, %error, "worker loop failed");
                }
                outcome
            })
            .with_context(|| format!("spawning {} thread", self.name))?;

        self.handle = Some(handle);
        tracing::debug!(worker = self.name, "worker started");
        Ok(())
    }

    /// True between a successful `spawn` and the matching `stop`/`wait`,
    /// even if the loop has already returned on its own.
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// True once the loop has returned (or if it never ran).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signals the loop to exit and joins it.
    pub fn stop(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or(LifecycleError::NotRunning(self.name))?;
        self.stop.set();
        self.join(handle)
    }

    /// Joins the loop without signalling, for loops that end by themselves.
    pub fn wait(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or(LifecycleError::NotRunning(self.name))?;
        self.join(handle)
    }

    fn join(&self, handle: JoinHandle<Result<()>>) -> Result<()> {
        let outcome = handle
            .join()
            .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        tracing::debug!(worker = self.name, ok = outcome.is_ok(), "worker stopped");
        outcome.with_context(|| format!("{} failed", self.name))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.set();
            let _ = handle.join();
        }
    }
}
