use crate::runtime::Runtime;

/// Group mutations into a single deferred host pass.
///
/// While a transaction is open the runtime reports itself busy, exactly as if
/// the host were mid-pass: every mutation that is not forced synchronous is
/// deferred and coalesced. When the outermost transaction on the runtime
/// closes, the queued pass runs once against the final snapshot.
///
/// First invocations stay synchronous: a unit with no value still forces its
/// own pass so `invoke` can return a result.
///
/// # Example
/// ```ignore
/// // Without a transaction: three host passes
/// a.invoke(1)?;
/// b.invoke(2)?;
/// c.invoke(3)?;
///
/// // With a transaction: one pass when the closure returns
/// Transaction::run(&runtime, || {
///     a.invoke(1)?;
///     b.invoke(2)?;
///     c.invoke(3)
/// })?;
/// ```
pub struct Transaction {
    _private: (),
}

impl Transaction {
    /// Run `f` with the runtime held busy, then flush if this was the
    /// outermost transaction.
    pub fn run<F, R>(runtime: &Runtime, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        runtime.scheduler().hold();
        // Restores the hold count on both normal return and unwinding
        let _guard = TransactionGuard { runtime };
        f()
    }
}

struct TransactionGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        let outermost = self.runtime.scheduler().release();
        // Running computations while unwinding risks a double panic
        if outermost && !std::thread::panicking() {
            self.runtime.flush();
        }
    }
}
