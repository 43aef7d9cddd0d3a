//! Scheduler context.
//!
//! A [`Runtime`] owns everything units share: the batch registry and its
//! scheduler, the host, and the keyed directory. Nothing is global unless you
//! ask for [`Runtime::global`]; tests and embedders can build as many isolated
//! runtimes as they like.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use tracing::debug;

use crate::config::{KeyedConfig, UnitConfig};
use crate::error::Result;
use crate::host::{DirectHost, Host};
use crate::registry::{Directory, DirectoryEntry, UnitId};
use crate::scheduler::Scheduler;
use crate::unit::Unit;

/// Prefix of generated unit keys.
pub const DEFAULT_KEY_PREFIX: &str = "offstage-";

static GLOBAL: LazyLock<Runtime> = LazyLock::new(Runtime::new);

/// Shared scheduling context for a group of units. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    scheduler: Scheduler,
    directory: Directory,
    key_prefix: String,
    next_unit: AtomicU64,
}

/// Weak handle to a [`Runtime`], used by background drivers so they do not
/// keep it alive.
#[derive(Clone)]
pub struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    /// The runtime, if it still exists.
    pub fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

/// Builder for [`Runtime`].
///
/// ```ignore
/// let runtime = Runtime::builder()
///     .key_prefix("model-")
///     .host(MyHost::default())
///     .build();
/// ```
pub struct RuntimeBuilder {
    key_prefix: String,
    host: Box<dyn Host>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            host: Box::new(DirectHost),
        }
    }
}

impl RuntimeBuilder {
    /// Prefix for keys generated for units created without one.
    ///
    /// Default: `"offstage-"`
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Host that executes batches.
    ///
    /// Default: [`DirectHost`]
    pub fn host(mut self, host: impl Host) -> Self {
        self.host = Box::new(host);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                scheduler: Scheduler::new(self.host),
                directory: Directory::default(),
                key_prefix: self.key_prefix,
                next_unit: AtomicU64::new(0),
            }),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with the default host and key prefix.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Process-wide runtime, created on first use and never torn down.
    pub fn global() -> &'static Runtime {
        &GLOBAL
    }

    /// Create a unit on this runtime. Shorthand for [`Unit::new`].
    pub fn unit<A, T, F>(&self, computation: F, config: UnitConfig<T>) -> Unit<A, T>
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&A) -> T + Send + 'static,
    {
        Unit::new(self, computation, config)
    }

    /// Shared unit for `config`'s key.
    ///
    /// The first call for a key creates the unit (keyed by that same string),
    /// subscribes the optional `on_update` listener, and arranges for the
    /// entry to disappear when the unit unmounts. Later calls return the same
    /// unit after rebinding it to `computation`; their other options are
    /// ignored.
    ///
    /// Fails with [`Error::TypeMismatch`](crate::Error::TypeMismatch) if the
    /// key is held by a unit with different argument or result types.
    pub fn keyed<A, T, F>(&self, config: impl Into<KeyedConfig<T>>, computation: F) -> Result<Unit<A, T>>
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
        F: FnMut(&A) -> T + Send + 'static,
    {
        let KeyedConfig {
            key,
            on_update,
            unit: unit_config,
        } = config.into();
        let directory = &self.inner.directory;

        if let Some(existing) = directory.get(&key) {
            let unit = existing.downcast::<A, T>(&key)?;
            unit.rebind(computation);
            return Ok(unit);
        }

        let candidate = Unit::new(self, computation, unit_config.key(key.clone()));
        let stored = directory.get_or_insert(&key, DirectoryEntry::new(candidate.clone()));
        if stored.unit() != candidate.id() {
            // Another caller registered the key first; keep theirs
            let unit = stored.downcast::<A, T>(&key)?;
            unit.adopt_computation(&candidate);
            return Ok(unit);
        }

        if let Some(on_update) = on_update {
            candidate.subscribe(move |value| on_update(value));
        }
        let runtime = self.downgrade();
        let unit_id = candidate.id();
        candidate.on_unmount(move || {
            if let Some(runtime) = runtime.upgrade() {
                runtime.inner.directory.remove_unit(&key, unit_id);
            }
        });
        debug!(unit = candidate.key(), "keyed unit registered");
        Ok(candidate)
    }

    /// Run the queued deferred pass now. Returns `false` if none was queued.
    ///
    /// This is the caller's microtask checkpoint: call it after the code that
    /// triggered deferrals has finished, or let a [`FlushLoop`](crate::FlushLoop)
    /// do it.
    pub fn flush(&self) -> bool {
        self.inner.scheduler.flush()
    }

    /// Whether a deferred pass is waiting for [`flush`](Runtime::flush).
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.is_flush_scheduled()
    }

    /// Whether a host pass or a transaction is in progress, i.e. whether
    /// non-forced mutations would be deferred right now.
    pub fn is_running(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    /// Host passes executed so far.
    pub fn pass_count(&self) -> u64 {
        self.inner.scheduler.pass_count()
    }

    /// Number of descriptors in the current batch.
    pub fn pending_len(&self) -> usize {
        self.inner.scheduler.snapshot().len()
    }

    /// Keys of the current batch, in order.
    pub fn pending_keys(&self) -> Vec<String> {
        self.inner
            .scheduler
            .snapshot()
            .keys()
            .map(str::to_owned)
            .collect()
    }

    /// Number of units held by the keyed directory.
    pub fn directory_len(&self) -> usize {
        self.inner.directory.len()
    }

    /// Whether the keyed directory holds a unit for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.directory.contains_key(key)
    }

    /// Whether both handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Weak handle that does not keep the runtime alive.
    pub fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn next_unit_id(&self) -> UnitId {
        UnitId::new(self.inner.next_unit.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn generated_key(&self, id: UnitId) -> String {
        format!("{}{}", self.inner.key_prefix, id.get())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("key_prefix", &self.inner.key_prefix)
            .field("pending", &self.pending_len())
            .field("directory", &self.directory_len())
            .field("passes", &self.pass_count())
            .finish()
    }
}
