// Registry storage shared by every unit of a runtime
//
// Two containers live here:
// - Batch registry: the ordered set of descriptors the next host pass will
//   execute. Every mutation swaps in a new immutable snapshot, so a pass can
//   iterate its batch while later mutations build the next one.
// - Directory: the keyed singleton map behind `Runtime::keyed`.
//
// Both live for as long as their runtime. Entries come and go; the containers
// themselves are never torn down.

pub mod batch;
pub mod directory;

pub use batch::{Batch, BatchEntry, Mutation, Registry, Task};
pub use directory::{Directory, DirectoryEntry};

/// Identity of a unit within its runtime.
///
/// Allocated from a per-runtime counter; never reused. Keys may be chosen by
/// callers, ids may not, which makes the id the reliable way to tell whether a
/// registry or directory entry still belongs to a given unit.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}
