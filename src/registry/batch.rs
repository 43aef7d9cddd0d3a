// Batch registry - descriptors awaiting execution against the host
//
// A snapshot is an `Arc` around an insertion-ordered map. Mutations clone the
// map, edit the clone, and publish it; holders of an older snapshot keep
// seeing exactly what they were handed. Upserting a key removes the old entry
// and appends the new one, so a replaced descriptor moves to the end.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::UnitId;
use crate::hash::KeyMap;

/// Work item stored in a batch entry: run the bound computation against the
/// captured arguments and deliver the result to its unit.
pub trait Task: Send + Sync {
    /// Execute once. Panics from the computation propagate to the caller.
    fn execute(&self);
}

/// One descriptor in a [`Batch`].
#[derive(Clone)]
pub struct BatchEntry {
    key: Arc<str>,
    unit: UnitId,
    task: Arc<dyn Task>,
}

impl BatchEntry {
    pub(crate) fn new(key: Arc<str>, unit: UnitId, task: Arc<dyn Task>) -> Self {
        Self { key, unit, task }
    }

    /// Registration key of the owning unit.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Id of the owning unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Run the computation and hand its result to the unit.
    pub fn execute(&self) {
        self.task.execute();
    }
}

impl std::fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEntry")
            .field("key", &self.key)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

/// Immutable snapshot of the registry, handed to [`Host::run_batch`](crate::Host::run_batch).
///
/// Cloning is an `Arc` bump.
#[derive(Clone, Default)]
pub struct Batch {
    entries: Arc<KeyMap<Arc<str>, BatchEntry>>,
}

impl Batch {
    /// Number of descriptors in this snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this snapshot has no descriptors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.values()
    }

    /// Registration keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|key| &**key)
    }

    /// Look up the descriptor registered under `key`.
    pub fn get(&self, key: &str) -> Option<&BatchEntry> {
        self.entries.get(key)
    }

    /// Whether a descriptor is registered under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn with_entries<F>(&self, edit: F) -> Batch
    where
        F: FnOnce(&mut KeyMap<Arc<str>, BatchEntry>),
    {
        let mut next = (*self.entries).clone();
        edit(&mut next);
        Batch {
            entries: Arc::new(next),
        }
    }

    fn upsert(&self, entry: BatchEntry) -> Batch {
        self.with_entries(|entries| {
            entries.shift_remove(&*entry.key);
            entries.insert(entry.key.clone(), entry);
        })
    }

    /// `None` when `key` is absent or held by a different unit.
    fn remove_owned(&self, key: &str, unit: UnitId) -> Option<Batch> {
        let owned = self.get(key).is_some_and(|entry| entry.unit == unit);
        owned.then(|| {
            self.with_entries(|entries| {
                entries.shift_remove(key);
            })
        })
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

/// A registry edit. Every variant publishes a fresh snapshot.
pub enum Mutation {
    /// Replace-or-insert the descriptor for `entry.key()`.
    Upsert(BatchEntry),
    /// Drop the descriptor registered under `key` if `unit` still owns it.
    Remove {
        /// Registration key.
        key: Arc<str>,
        /// Unit the descriptor must belong to.
        unit: UnitId,
    },
}

/// Holder of the current snapshot.
#[derive(Default)]
pub struct Registry {
    current: Mutex<Batch>,
}

impl Registry {
    /// Current snapshot.
    pub fn snapshot(&self) -> Batch {
        self.current.lock().clone()
    }

    /// Apply a mutation and return the snapshot it produced.
    ///
    /// The replaced snapshot is dropped after the lock is released: it may
    /// own the last handle to a unit whose `Drop` comes back here.
    pub fn apply(&self, mutation: Mutation) -> Batch {
        let mut current = self.current.lock();
        let next = match mutation {
            Mutation::Upsert(entry) => {
                trace!(key = entry.key(), "registry upsert");
                current.upsert(entry)
            }
            Mutation::Remove { key, unit } => match current.remove_owned(&key, unit) {
                Some(next) => {
                    trace!(key = &*key, "registry remove");
                    next
                }
                None => {
                    trace!(key = &*key, "registry remove skipped, key not owned");
                    cov_mark::hit!(remove_skipped_not_owned);
                    return current.clone();
                }
            },
        };
        let previous = std::mem::replace(&mut *current, next.clone());
        drop(current);
        drop(previous);
        next
    }

    /// Remove `key` only if it still belongs to `unit`, without scheduling a
    /// pass. Returns whether anything was removed.
    pub fn discard(&self, key: &str, unit: UnitId) -> bool {
        let mut current = self.current.lock();
        let Some(next) = current.remove_owned(key, unit) else {
            return false;
        };
        trace!(key, "registry discard");
        let previous = std::mem::replace(&mut *current, next);
        drop(current);
        drop(previous);
        true
    }
}
