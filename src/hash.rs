//! Fixed-seed hashing for the registry's ordered maps.
//!
//! Registry keys are caller-chosen strings that never cross a trust boundary,
//! so HashDoS resistance buys nothing here and a zero-sized builder keeps every
//! snapshot clone free of per-map hasher state.

use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::IndexMap;

const SEED: u64 = 0x6f66_6673_7461_6765;

/// Zero-sized `BuildHasher` over foldhash with a constant seed.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct KeyHashBuilder;

impl BuildHasher for KeyHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(SEED).build_hasher()
    }
}

/// Insertion-ordered map keyed through [`KeyHashBuilder`].
pub(crate) type KeyMap<K, V> = IndexMap<K, V, KeyHashBuilder>;
