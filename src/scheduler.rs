//! Update scheduler.
//!
//! Every registry mutation goes through [`Scheduler::update`], which decides
//! how the new snapshot reaches the host:
//!
//! 1. `force_sync` set: run a pass now.
//! 2. The runtime is busy (a pass is executing, or a [`Transaction`] holds it):
//!    queue one deferred pass. Further mutations before it fires coalesce into
//!    that same pass, which reads whatever snapshot is current when it runs.
//! 3. Otherwise: run a pass now.
//!
//! Deferred passes fire on [`Runtime::flush`], at the end of the outermost
//! transaction, or from a [`FlushLoop`] thread.
//!
//! [`Transaction`]: crate::Transaction
//! [`Runtime::flush`]: crate::Runtime::flush
//! [`FlushLoop`]: crate::FlushLoop

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::host::Host;
use crate::registry::{Batch, Mutation, Registry, UnitId};

pub(crate) struct Scheduler {
    registry: Registry,
    host: Box<dyn Host>,
    /// Host passes currently on the stack (nested passes count separately).
    depth: AtomicUsize,
    /// Open transactions.
    held: AtomicUsize,
    deferred: AtomicBool,
    passes: AtomicU64,
    notifier: Mutex<Option<Sender<()>>>,
}

impl Scheduler {
    pub(crate) fn new(host: Box<dyn Host>) -> Self {
        Self {
            registry: Registry::default(),
            host,
            depth: AtomicUsize::new(0),
            held: AtomicUsize::new(0),
            deferred: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            notifier: Mutex::new(None),
        }
    }

    /// Apply `mutation` and get the resulting snapshot to the host.
    pub(crate) fn update(&self, mutation: Mutation, force_sync: bool) {
        let batch = self.registry.apply(mutation);
        if force_sync || !self.is_running() {
            self.run_pass(batch);
        } else {
            self.defer();
        }
    }

    /// Drop a unit's descriptor without running anything.
    pub(crate) fn discard(&self, key: &str, unit: UnitId) {
        self.registry.discard(key, unit);
    }

    /// Whether mutations would currently be deferred.
    pub(crate) fn is_running(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0 || self.is_held()
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire) > 0
    }

    pub(crate) fn is_flush_scheduled(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    pub(crate) fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> Batch {
        self.registry.snapshot()
    }

    /// Run the queued deferred pass, if any, against the current snapshot.
    pub(crate) fn flush(&self) -> bool {
        if !self.deferred.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.run_pass(self.registry.snapshot());
        true
    }

    fn defer(&self) {
        if self.deferred.swap(true, Ordering::AcqRel) {
            trace!("deferred pass already queued, coalescing");
            cov_mark::hit!(deferred_pass_coalesced);
            return;
        }
        debug!("host busy, deferring pass");
        if let Some(sender) = self.notifier.lock().as_ref() {
            // A closed receiver means the flush loop has stopped
            let _ = sender.send(());
        }
    }

    fn run_pass(&self, batch: Batch) {
        let _guard = PassGuard::enter(&self.depth);
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pass, entries = batch.len(), "running host pass");
        self.host.run_batch(&batch);
    }

    /// Returns `true` when this is the outermost transaction.
    pub(crate) fn hold(&self) -> bool {
        self.held.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Returns `true` when the outermost transaction just closed.
    pub(crate) fn release(&self) -> bool {
        self.held.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn set_notifier(&self, sender: Sender<()>) {
        *self.notifier.lock() = Some(sender);
    }
}

/// Marks a pass as in progress; unmarks on drop, including while unwinding.
struct PassGuard<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> PassGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self { depth }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BatchEntry, Task};
    use std::sync::Arc;

    /// Host that records batch sizes and whether the scheduler looked busy.
    #[derive(Default)]
    struct Recording {
        sizes: Mutex<Vec<usize>>,
    }

    impl Host for Recording {
        fn run_batch(&self, batch: &Batch) {
            self.sizes.lock().push(batch.len());
        }
    }

    struct Noop;

    impl Task for Noop {
        fn execute(&self) {}
    }

    fn upsert(key: &str, unit: u64) -> Mutation {
        Mutation::Upsert(BatchEntry::new(key.into(), UnitId::new(unit), Arc::new(Noop)))
    }

    fn scheduler() -> (Scheduler, Arc<Recording>) {
        let host = Arc::new(Recording::default());
        (Scheduler::new(Box::new(host.clone())), host)
    }

    #[test]
    fn idle_scheduler_runs_synchronously() {
        let (scheduler, host) = scheduler();

        scheduler.update(upsert("a", 0), false);
        scheduler.update(upsert("b", 1), false);

        assert_eq!(*host.sizes.lock(), [1, 2]);
        assert!(!scheduler.is_flush_scheduled());
    }

    #[test]
    fn busy_scheduler_coalesces_into_one_deferred_pass() {
        cov_mark::check!(deferred_pass_coalesced);
        let (scheduler, host) = scheduler();

        assert!(scheduler.hold());
        scheduler.update(upsert("a", 0), false);
        scheduler.update(upsert("b", 1), false);
        scheduler.update(
            Mutation::Remove {
                key: "a".into(),
                unit: UnitId::new(0),
            },
            false,
        );
        assert!(scheduler.release());

        // Nothing ran while held
        assert!(host.sizes.lock().is_empty());
        assert!(scheduler.is_flush_scheduled());

        assert!(scheduler.flush());
        assert!(!scheduler.flush());

        // One pass over the final snapshot only
        assert_eq!(*host.sizes.lock(), [1]);
        assert_eq!(scheduler.pass_count(), 1);
    }

    #[test]
    fn force_sync_ignores_busy_state() {
        let (scheduler, host) = scheduler();

        scheduler.hold();
        scheduler.update(upsert("a", 0), true);
        scheduler.release();

        assert_eq!(*host.sizes.lock(), [1]);
        assert!(!scheduler.is_flush_scheduled());
    }

    #[test]
    fn nested_holds_release_at_the_outermost() {
        let (scheduler, _host) = scheduler();

        assert!(scheduler.hold());
        assert!(!scheduler.hold());
        assert!(!scheduler.release());
        assert!(scheduler.is_running());
        assert!(scheduler.release());
        assert!(!scheduler.is_running());
    }
}
