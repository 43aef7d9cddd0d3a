use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ListenerId};
use crate::config::{IsEqual, UnitConfig};
use crate::error::{Error, Result};
use crate::registry::{BatchEntry, Mutation, Task, UnitId};
use crate::runtime::Runtime;

/// Lifecycle state of a [`Unit`]. Uses `u8` for `AtomicU8` storage.
///
/// ```text
/// Running --suspend--> Suspended --resume--> Running
///    \                     |
///     +----unmount---------+----> Unmounted (terminal)
/// ```
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Invocations are registered with the host and results are recorded.
    Running = 0,
    /// Out of the batch; invocations return the last known value.
    Suspended = 1,
    /// Permanently inert.
    Unmounted = 2,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Running,
            1 => Status::Suspended,
            _ => Status::Unmounted,
        }
    }
}

type Computation<A, T> = Arc<Mutex<Box<dyn FnMut(&A) -> T + Send>>>;

fn computation<A, T, F>(f: F) -> Computation<A, T>
where
    F: FnMut(&A) -> T + Send + 'static,
{
    Arc::new(Mutex::new(Box::new(f)))
}

/// Handle to one stateful computation kept alive outside its host.
///
/// A unit binds a computation `FnMut(&A) -> T`. Each [`invoke`](Unit::invoke)
/// registers the computation with the given arguments in its runtime's batch;
/// the host runs the batch and every result flows back into the unit, which
/// records it and notifies subscribers unless the configured equality says
/// nothing changed.
///
/// The very first invocation (and the first one after the value was reset to
/// nothing) always runs synchronously, so `invoke` hands back a real result.
/// Later invocations run synchronously when the host is idle; while a pass is
/// already executing they are deferred, `invoke` returns the previous value,
/// and the fresh one arrives through [`subscribe`](Unit::subscribe).
///
/// Cloning the handle is cheap; all clones share state. Dropping the last
/// handle of a unit that was never unmounted removes its pending descriptor
/// without running a pass.
///
/// ```ignore
/// let runtime = Runtime::new();
/// let mut total = 0;
/// let counter = runtime.unit(
///     move |step: &u32| {
///         total += step;
///         total
///     },
///     UnitConfig::new(),
/// );
///
/// assert_eq!(counter.invoke(2)?, 2);
/// assert_eq!(counter.invoke(3)?, 5);
///
/// counter.suspend();
/// assert_eq!(counter.invoke(10)?, 5); // not run while suspended
/// ```
pub struct Unit<A, T> {
    inner: Arc<UnitInner<A, T>>,
}

impl<A, T> Clone for Unit<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct UnitInner<A, T> {
    id: UnitId,
    key: Arc<str>,
    runtime: Runtime,
    status: AtomicU8,
    /// `None` is "no value", distinct from any `T`.
    value: Mutex<Option<T>>,
    default_value: Option<T>,
    is_equal: IsEqual<T>,
    computation: Mutex<Computation<A, T>>,
    channel: Channel<T>,
}

impl<A, T> UnitInner<A, T> {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn removal(&self) -> Mutation {
        Mutation::Remove {
            key: self.key.clone(),
            unit: self.id,
        }
    }

    fn transition(&self, from: Status, to: Status) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<A, T: Clone> UnitInner<A, T> {
    /// Record a result produced by the host.
    fn set_value(&self, new_value: T) {
        if self.status() != Status::Running {
            trace!(unit = &*self.key, "result dropped, unit not running");
            cov_mark::hit!(result_dropped_not_running);
            return;
        }
        let changed = {
            let mut value = self.value.lock();
            let changed = match value.as_ref() {
                None => true,
                Some(current) => !(self.is_equal)(current, &new_value),
            };
            if changed {
                *value = Some(new_value.clone());
            }
            changed
        };
        if changed {
            self.channel.emit_update(&new_value);
        }
    }
}

impl<A, T> Drop for UnitInner<A, T> {
    fn drop(&mut self) {
        if self.status() != Status::Unmounted {
            self.runtime.scheduler().discard(&self.key, self.id);
        }
    }
}

/// Descriptor placed in the batch by `invoke`: the computation bound at call
/// time plus the argument snapshot. Holds the unit weakly.
struct Invocation<A, T> {
    unit: Weak<UnitInner<A, T>>,
    computation: Computation<A, T>,
    args: A,
}

impl<A, T> Task for Invocation<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn execute(&self) {
        let result = {
            // Held by a pass further up the stack: the outer frame delivers
            let Some(mut computation) = self.computation.try_lock() else {
                trace!("computation already executing, skipped by nested pass");
                cov_mark::hit!(busy_computation_skipped);
                return;
            };
            (*computation)(&self.args)
        };
        if let Some(unit) = self.unit.upgrade() {
            unit.set_value(result);
        }
    }
}

impl<A, T> Unit<A, T>
where
    A: Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a running unit bound to `computation`.
    ///
    /// Nothing runs until the first [`invoke`](Unit::invoke).
    pub fn new<F>(runtime: &Runtime, computation: F, config: UnitConfig<T>) -> Self
    where
        F: FnMut(&A) -> T + Send + 'static,
    {
        let UnitConfig {
            key,
            default_value,
            is_equal,
        } = config;
        let id = runtime.next_unit_id();
        let key: Arc<str> = match key {
            Some(key) => key.into(),
            None => runtime.generated_key(id).into(),
        };
        debug!(unit = &*key, "unit created");
        Self {
            inner: Arc::new(UnitInner {
                id,
                key,
                runtime: runtime.clone(),
                status: AtomicU8::new(Status::Running as u8),
                value: Mutex::new(None),
                default_value,
                is_equal: is_equal.unwrap_or_else(|| Arc::new(|a: &T, b: &T| a == b)),
                computation: Mutex::new(self::computation(computation)),
                channel: Channel::new(),
            }),
        }
    }

    /// Run the bound computation with `args` through the host and return the
    /// unit's value.
    ///
    /// - Running: registers `(computation, args)` in the batch, replacing this
    ///   unit's previous descriptor. Runs synchronously if the unit has no
    ///   value yet, otherwise lets the scheduler choose; a deferred run
    ///   returns the value from before this call.
    /// - Suspended or unmounted: runs nothing and returns the last known value
    ///   (or the default), failing with [`Error::Unresolved`] when there is none.
    pub fn invoke(&self, args: A) -> Result<T> {
        if self.status() != Status::Running {
            return self.value();
        }
        let force_sync = self.inner.value.lock().is_none();
        let invocation = Invocation {
            unit: Arc::downgrade(&self.inner),
            computation: self.inner.computation.lock().clone(),
            args,
        };
        let entry = BatchEntry::new(self.inner.key.clone(), self.inner.id, Arc::new(invocation));
        self.inner
            .runtime
            .scheduler()
            .update(Mutation::Upsert(entry), force_sync);
        self.value()
    }

    /// Replace the bound computation. Status, value and any descriptor already
    /// in the batch are untouched; the new computation is used from the next
    /// [`invoke`](Unit::invoke).
    pub fn rebind<F>(&self, computation: F) -> &Self
    where
        F: FnMut(&A) -> T + Send + 'static,
    {
        let previous = std::mem::replace(
            &mut *self.inner.computation.lock(),
            self::computation(computation),
        );
        // May own unit handles; released outside the slot lock
        drop(previous);
        self
    }

    /// Take over the computation bound to `other`.
    pub(crate) fn adopt_computation(&self, other: &Unit<A, T>) {
        let computation = other.inner.computation.lock().clone();
        let previous = std::mem::replace(&mut *self.inner.computation.lock(), computation);
        drop(previous);
    }
}

impl<A, T> Unit<A, T>
where
    T: Clone,
{
    /// Current value, falling back to the default value.
    pub fn value(&self) -> Result<T> {
        self.try_value().ok_or_else(|| Error::Unresolved {
            key: self.inner.key.to_string(),
        })
    }

    /// Like [`value`](Unit::value) but `None` instead of an error.
    pub fn try_value(&self) -> Option<T> {
        self.inner
            .value
            .lock()
            .clone()
            .or_else(|| self.inner.default_value.clone())
    }

    /// Whether a value has been recorded (or restored by a reset), ignoring
    /// the default-value fallback of reads.
    pub fn has_value(&self) -> bool {
        self.inner.value.lock().is_some()
    }

    /// Restore the configured default value, or "no value" without one.
    /// Allowed in every state.
    pub fn reset_value(&self) {
        *self.inner.value.lock() = self.inner.default_value.clone();
    }
}

impl<A, T> Unit<A, T> {
    /// Identity key, unique within the runtime's directory.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Runtime-assigned id.
    pub fn id(&self) -> UnitId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// Runtime this unit schedules through.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Whether both handles refer to the same unit.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Listen for recorded values.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.channel.subscribe(listener)
    }

    /// Detach a listener registered with [`subscribe`](Unit::subscribe) or
    /// [`on_unmount`](Unit::on_unmount).
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.channel.unsubscribe(id)
    }

    /// Listen for the one-time unmount event.
    pub fn on_unmount<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.channel.on_unmount(listener)
    }

    /// Number of attached update listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.channel.listener_count()
    }

    /// Suspend and remove this unit from the batch with a synchronous pass.
    pub fn suspend(&self) -> bool {
        self.suspend_with(true)
    }

    /// Suspend, letting the scheduler defer the removal pass when
    /// `force_sync` is `false`.
    ///
    /// Only legal while running; otherwise logs a warning, changes nothing and
    /// returns `false`.
    pub fn suspend_with(&self, force_sync: bool) -> bool {
        if !self.inner.transition(Status::Running, Status::Suspended) {
            warn!(
                unit = &*self.inner.key,
                status = ?self.status(),
                "`suspend()` and `remount()` can only be called while running"
            );
            return false;
        }
        debug!(unit = &*self.inner.key, force_sync, "unit suspended");
        self.inner
            .runtime
            .scheduler()
            .update(self.inner.removal(), force_sync);
        true
    }

    /// Return a suspended unit to running. Does not invoke.
    ///
    /// Only legal while suspended; otherwise logs a warning, changes nothing
    /// and returns `false`.
    pub fn resume(&self) -> bool {
        if !self.inner.transition(Status::Suspended, Status::Running) {
            warn!(
                unit = &*self.inner.key,
                status = ?self.status(),
                "`resume()` can only be called after `suspend()`"
            );
            return false;
        }
        debug!(unit = &*self.inner.key, "unit resumed");
        true
    }

    /// Synchronously drop this unit's descriptor from the host, then resume,
    /// so the next invocation is admitted fresh.
    pub fn remount(&self) -> bool {
        self.suspend_with(true) && self.resume()
    }

    /// Make the unit permanently inert.
    ///
    /// Legal from any state. The unmount event fires the first time only and
    /// every listener is detached right after it. With `reset`, the value is
    /// restored to the default (or cleared) so later reads fail without one.
    /// Repeat calls only apply `reset`; they schedule nothing.
    pub fn unmount(&self, reset: bool)
    where
        T: Clone,
    {
        let previous = self
            .inner
            .status
            .swap(Status::Unmounted as u8, Ordering::AcqRel);
        if reset {
            self.reset_value();
        }
        if Status::from_u8(previous) == Status::Unmounted {
            trace!(unit = &*self.inner.key, "already unmounted");
            return;
        }
        self.inner.channel.emit_unmount();
        debug!(unit = &*self.inner.key, "unit unmounted");
        self.inner
            .runtime
            .scheduler()
            .update(self.inner.removal(), false);
    }
}

impl<A, T: std::fmt::Debug> std::fmt::Debug for Unit<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn first_invoke_returns_a_fresh_value() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u32| n * 2, UnitConfig::new());

        assert!(!unit.has_value());
        assert_eq!(unit.invoke(21), Ok(42));
        assert_eq!(unit.value(), Ok(42));
    }

    #[test]
    fn generated_keys_are_unique_and_prefixed() {
        let runtime = Runtime::builder().key_prefix("calc-").build();
        let a = runtime.unit(|_: &()| 0u8, UnitConfig::new());
        let b = runtime.unit(|_: &()| 0u8, UnitConfig::new());

        assert!(a.key().starts_with("calc-"));
        assert_ne!(a.key(), b.key());
        assert!(b.id() > a.id());
    }

    #[test]
    fn equal_results_do_not_notify() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u32| n % 2, UnitConfig::new());
        let updates = Arc::new(AtomicUsize::new(0));

        let updates_clone = updates.clone();
        unit.subscribe(move |_| {
            updates_clone.fetch_add(1, Ordering::Relaxed);
        });

        unit.invoke(1).unwrap();
        unit.invoke(3).unwrap();
        unit.invoke(5).unwrap();
        assert_eq!(updates.load(Ordering::Relaxed), 1);

        unit.invoke(2).unwrap();
        assert_eq!(updates.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn custom_equality_gates_notifications() {
        let runtime = Runtime::new();
        // Equal when the first character matches
        let unit = runtime.unit(
            |s: &String| s.clone(),
            UnitConfig::new().is_equal(|a: &String, b: &String| a.chars().next() == b.chars().next()),
        );

        unit.invoke("apple".into()).unwrap();
        assert_eq!(unit.invoke("avocado".into()), Ok("apple".to_string()));
        assert_eq!(unit.invoke("banana".into()), Ok("banana".to_string()));
    }

    #[test]
    fn rebind_applies_from_the_next_invoke() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &i32| n + 1, UnitConfig::new());

        assert_eq!(unit.invoke(1), Ok(2));
        assert_eq!(unit.rebind(|n: &i32| n * 10).invoke(1), Ok(10));
        assert_eq!(unit.status(), Status::Running);
    }

    #[test]
    fn invalid_transitions_are_no_ops() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|_: &()| 1u8, UnitConfig::new());

        assert!(!unit.resume());
        assert_eq!(unit.status(), Status::Running);

        assert!(unit.suspend());
        assert!(!unit.suspend());
        assert_eq!(unit.status(), Status::Suspended);

        unit.unmount(false);
        assert!(!unit.resume());
        assert!(!unit.suspend());
        assert_eq!(unit.status(), Status::Unmounted);
    }

    #[test]
    fn results_are_ignored_once_not_running() {
        cov_mark::check!(result_dropped_not_running);
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u8| *n, UnitConfig::new());
        unit.invoke(1).unwrap();

        unit.unmount(false);
        unit.inner.set_value(9);
        assert_eq!(unit.value(), Ok(1));
    }

    #[test]
    fn dropping_the_last_handle_discards_the_descriptor() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u8| *n, UnitConfig::new().key("transient"));
        unit.invoke(1).unwrap();
        assert!(runtime.pending_keys().contains(&"transient".to_string()));

        let passes = runtime.pass_count();
        drop(unit);
        assert!(runtime.pending_keys().is_empty());
        assert_eq!(runtime.pass_count(), passes);
    }

    #[test]
    fn repeated_unmount_schedules_nothing() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u8| *n, UnitConfig::new());
        unit.invoke(1).unwrap();

        unit.unmount(false);
        let passes = runtime.pass_count();
        unit.unmount(false);
        unit.unmount(true);

        assert_eq!(runtime.pass_count(), passes);
        // The reset still applies
        assert!(!unit.has_value());
    }

    #[test]
    fn suspend_leaves_another_units_descriptor_alone() {
        let runtime = Runtime::new();
        let first = runtime.unit(|n: &u8| *n, UnitConfig::new().key("shared"));
        let second = runtime.unit(|n: &u8| n + 1, UnitConfig::new().key("shared"));
        first.invoke(1).unwrap();
        second.invoke(1).unwrap();

        // The descriptor under "shared" now belongs to `second`
        assert!(first.suspend());
        assert_eq!(runtime.pending_keys(), ["shared"]);
        assert_eq!(second.invoke(4), Ok(5));
    }

    #[test]
    fn default_equality_compares_values_not_allocations() {
        let runtime = Runtime::new();
        let unit = runtime.unit(|n: &u32| Arc::new(*n), UnitConfig::new());
        let updates = Arc::new(AtomicUsize::new(0));

        let updates_clone = updates.clone();
        unit.subscribe(move |_| {
            updates_clone.fetch_add(1, Ordering::Relaxed);
        });

        // Fresh allocation each time, equal contents
        unit.invoke(1).unwrap();
        unit.invoke(1).unwrap();
        assert_eq!(updates.load(Ordering::Relaxed), 1);
    }
}
