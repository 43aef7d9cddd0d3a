// Directory - keyed singleton map behind `Runtime::keyed`
//
// Maps an external key to one type-erased `Unit<A, T>` handle. The entry
// remembers the unit's id so removal on unmount can check that the entry still
// belongs to the unit being unmounted.
//
// Uses papaya's lock-free HashMap: lookups on the keyed entry point are far
// more frequent than inserts and removals.

use std::any::Any;
use std::sync::Arc;

use papaya::HashMap as PapayaHashMap;

use super::UnitId;
use crate::error::{Error, Result};
use crate::unit::Unit;

/// Type-erased unit handle stored in the directory.
#[derive(Clone)]
pub struct DirectoryEntry {
    unit: UnitId,
    handle: Arc<dyn Any + Send + Sync>,
}

impl DirectoryEntry {
    pub(crate) fn new<A, T>(unit: Unit<A, T>) -> Self
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Self {
            unit: unit.id(),
            handle: Arc::new(unit),
        }
    }

    /// Id of the stored unit.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Recover the typed handle, failing if `A`/`T` differ from what was stored.
    pub(crate) fn downcast<A, T>(&self, key: &str) -> Result<Unit<A, T>>
    where
        A: Send + Sync + 'static,
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.handle
            .downcast_ref::<Unit<A, T>>()
            .cloned()
            .ok_or_else(|| Error::TypeMismatch {
                key: key.to_owned(),
            })
    }
}

/// Key to unit map with at most one live unit per key.
#[derive(Default)]
pub struct Directory {
    units: PapayaHashMap<String, DirectoryEntry>,
}

impl Directory {
    /// Entry registered under `key`.
    pub fn get(&self, key: &str) -> Option<DirectoryEntry> {
        self.units.pin().get(key).cloned()
    }

    /// Store `entry` under `key` unless one is already present; returns
    /// whichever entry ends up stored.
    pub fn get_or_insert(&self, key: &str, entry: DirectoryEntry) -> DirectoryEntry {
        self.units
            .pin()
            .get_or_insert_with(key.to_owned(), || entry)
            .clone()
    }

    /// Remove `key` if it still maps to `unit`. Returns whether it was removed.
    pub fn remove_unit(&self, key: &str, unit: UnitId) -> bool {
        let units = self.units.pin();
        match units.get(key) {
            Some(entry) if entry.unit == unit => units.remove(key).is_some(),
            _ => false,
        }
    }

    /// Whether `key` is registered.
    pub fn contains_key(&self, key: &str) -> bool {
        self.units.pin().contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.units.pin().len()
    }
}
