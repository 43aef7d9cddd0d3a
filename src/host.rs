//! Host execution contract.
//!
//! A host is whatever actually runs a batch of computations. The runtime owns
//! every scheduling decision (sync versus deferred, coalescing, re-entrancy
//! tracking) and only asks the host to execute one snapshot at a time.

use std::sync::Arc;

use crate::registry::Batch;

/// Executes batches handed over by the runtime's scheduler.
///
/// Implementations run every entry of the batch, typically in order, by
/// calling [`BatchEntry::execute`](crate::BatchEntry::execute). The runtime
/// marks itself busy for the duration of `run_batch`; mutations issued from
/// inside a computation see that flag.
///
/// Failures are not intercepted: a panicking computation unwinds out of
/// `run_batch` and on to whoever triggered the pass.
pub trait Host: Send + Sync + 'static {
    /// Run every entry of `batch`.
    fn run_batch(&self, batch: &Batch);
}

/// Runs entries one after another on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectHost;

impl Host for DirectHost {
    fn run_batch(&self, batch: &Batch) {
        for entry in batch.iter() {
            entry.execute();
        }
    }
}

impl<H: Host + ?Sized> Host for Arc<H> {
    fn run_batch(&self, batch: &Batch) {
        (**self).run_batch(batch);
    }
}

impl<H: Host + ?Sized> Host for Box<H> {
    fn run_batch(&self, batch: &Batch) {
        (**self).run_batch(batch);
    }
}
