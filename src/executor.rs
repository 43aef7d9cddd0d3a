//! Background driver for deferred passes.
//!
//! By default deferred passes wait for the caller to run [`Runtime::flush`].
//! Applications without a natural checkpoint can instead spawn a
//! [`FlushLoop`]: a thread that sleeps on a channel, wakes when the scheduler
//! defers a pass, debounces, and flushes.
//!
//! Computations then execute on the loop thread, which is why computations
//! and results are required to be `Send`.
//!
//! ## Usage
//!
//! ```ignore
//! let runtime = Runtime::new();
//! FlushLoop::new().spawn(&runtime);
//!
//! // Or with custom configuration
//! FlushLoop::new()
//!     .debounce(Duration::from_millis(2))
//!     .max_debounce(Duration::from_millis(10))
//!     .spawn_fn(|f| {
//!         std::thread::Builder::new()
//!             .name("offstage-flush".into())
//!             .spawn(f)
//!             .expect("failed to spawn flush loop")
//!     })
//!     .spawn(&runtime);
//! ```

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::runtime::{Runtime, WeakRuntime};

/// Default debounce delay after a deferral notification.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1);

/// Upper bound on debouncing under a steady stream of notifications.
pub const DEFAULT_MAX_DEBOUNCE: Duration = Duration::from_millis(8);

type SpawnFn = Box<dyn FnOnce(Box<dyn FnOnce() + Send>) -> JoinHandle<()> + Send>;

/// Builder for the background flush thread.
pub struct FlushLoop {
    debounce: Duration,
    max_debounce: Duration,
    spawn_fn: Option<SpawnFn>,
}

impl Default for FlushLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushLoop {
    /// Defaults:
    /// - `debounce`: 1ms
    /// - `max_debounce`: 8ms
    /// - `spawn_fn`: `std::thread::spawn`
    pub fn new() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_debounce: DEFAULT_MAX_DEBOUNCE,
            spawn_fn: None,
        }
    }

    /// Quiet period to wait for before flushing; each new notification
    /// restarts it, up to `max_debounce`.
    pub fn debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Longest time a notification may wait for its flush.
    pub fn max_debounce(mut self, duration: Duration) -> Self {
        self.max_debounce = duration;
        self
    }

    /// Custom thread spawning, e.g. to name the thread.
    pub fn spawn_fn<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Box<dyn FnOnce() + Send>) -> JoinHandle<()> + Send + 'static,
    {
        self.spawn_fn = Some(Box::new(f));
        self
    }

    /// Start flushing `runtime`'s deferred passes in the background.
    ///
    /// The loop exits once the runtime is dropped. Spawning a second loop for
    /// the same runtime replaces the first one's notifications.
    pub fn spawn(self, runtime: &Runtime) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel::<()>();
        if runtime.is_flush_scheduled() {
            // Deferred before the loop existed; nobody was told
            let _ = tx.send(());
        }
        runtime.scheduler().set_notifier(tx);

        let weak = runtime.downgrade();
        let debounce = self.debounce;
        let max_debounce = self.max_debounce;
        let loop_fn: Box<dyn FnOnce() + Send> = Box::new(move || {
            flush_loop(rx, weak, debounce, max_debounce);
        });

        match self.spawn_fn {
            Some(spawn_fn) => spawn_fn(loop_fn),
            None => thread::spawn(loop_fn),
        }
    }
}

fn flush_loop(rx: Receiver<()>, runtime: WeakRuntime, debounce: Duration, max_debounce: Duration) {
    loop {
        if rx.recv().is_err() {
            break;
        }

        let debounce_start = Instant::now();
        loop {
            let elapsed = debounce_start.elapsed();
            if elapsed >= max_debounce {
                break;
            }
            match rx.recv_timeout(debounce.min(max_debounce - elapsed)) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        loop {
            match rx.try_recv() {
                Ok(()) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        let Some(runtime) = runtime.upgrade() else {
            break;
        };
        // An open transaction flushes when it closes
        if !runtime.scheduler().is_held() && runtime.flush() {
            debug!("flush loop ran deferred pass");
        }
    }
    debug!("flush loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn loop_stops_when_runtime_is_dropped() {
        let runtime = Runtime::new();
        let handle = FlushLoop::new().spawn(&runtime);

        drop(runtime);
        assert!(handle.join().is_ok());
    }

    #[test]
    fn custom_spawn_fn_is_used() {
        let spawned = Arc::new(AtomicBool::new(false));
        let runtime = Runtime::new();

        let spawned_clone = spawned.clone();
        let handle = FlushLoop::new()
            .debounce(Duration::from_millis(2))
            .max_debounce(Duration::from_millis(4))
            .spawn_fn(move |f| {
                spawned_clone.store(true, Ordering::Relaxed);
                thread::Builder::new()
                    .name("offstage-flush".into())
                    .spawn(f)
                    .expect("failed to spawn flush loop")
            })
            .spawn(&runtime);

        assert!(spawned.load(Ordering::Relaxed));
        drop(runtime);
        assert!(handle.join().is_ok());
    }
}
