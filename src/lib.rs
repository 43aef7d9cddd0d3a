#![deny(missing_docs)]

//! Keep stateful computations alive outside their native host.
//!
//! A computation here is any `FnMut(&A) -> T` that carries its own internal
//! state and lifecycle. This crate keeps such computations registered with a
//! host that executes them in batches, hands results back synchronously when
//! it can, and notifies subscribers when results change.
//!
//! # Quick Start
//!
//! ```ignore
//! use offstage::{Runtime, UnitConfig};
//!
//! let runtime = Runtime::new();
//!
//! let mut seen = 0;
//! let pages = runtime.unit(
//!     move |page: &u32| {
//!         seen += 1;
//!         format!("page {page} (render #{seen})")
//!     },
//!     UnitConfig::new(),
//! );
//!
//! pages.subscribe(|label| println!("{label}"));
//!
//! // First call is always synchronous: a real value comes back
//! let label = pages.invoke(1)?;
//! ```
//!
//! # Core Types
//!
//! - [`Runtime`] - Scheduling context: batch registry, scheduler, host, keyed directory.
//! - [`Unit`] - One registered computation with a running/suspended/unmounted lifecycle.
//! - [`Host`] - Executes a [`Batch`] of descriptors. [`DirectHost`] runs them in order.
//! - [`Transaction`] - Coalesce mutations into one deferred pass.
//! - [`FlushLoop`] - Optional background thread that runs deferred passes.
//!
//! # Scheduling
//!
//! Every invocation, suspension and unmount rewrites the runtime's batch and
//! asks the scheduler to deliver it:
//!
//! ```ignore
//! unit.invoke(args)?;        // sync if unit has no value or host is idle
//! unit.suspend();            // removal pass, sync
//! unit.suspend_with(false);  // removal pass, deferred if host is busy
//! runtime.flush();           // run the deferred pass now
//! ```
//!
//! While a pass is executing (or inside [`Transaction::run`]) non-forced
//! mutations are deferred; any number of them collapse into one later pass
//! over the newest batch.
//!
//! # Keyed units
//!
//! ```ignore
//! // Same key, same unit: the second call rebinds the computation
//! let a = runtime.keyed("list", compute_list)?;
//! let b = runtime.keyed("list", compute_list_v2)?;
//! assert!(a.ptr_eq(&b));
//!
//! a.unmount(false);          // removes "list" from the directory
//! ```

mod channel;
mod config;
mod error;
mod executor;
mod hash;
mod host;
pub(crate) mod registry;
mod runtime;
mod scheduler;
mod transaction;
mod unit;

// Core types
pub use runtime::{DEFAULT_KEY_PREFIX, Runtime, RuntimeBuilder, WeakRuntime};
pub use unit::{Status, Unit};

// Configuration and errors
pub use config::{IsEqual, KeyedConfig, UnitConfig};
pub use error::{Error, Result};

// Notification
pub use channel::{Channel, ListenerId};

// Host boundary
pub use host::{DirectHost, Host};
pub use registry::{Batch, BatchEntry, UnitId};

// Batching and deferred execution
pub use executor::{DEFAULT_DEBOUNCE, DEFAULT_MAX_DEBOUNCE, FlushLoop};
pub use transaction::Transaction;
