//! Per-unit notification channel.
//!
//! A channel carries two kinds of events:
//! - `update(value)`, emitted zero or more times while the unit is running
//! - `unmount()`, emitted at most once; emitting it closes the channel and
//!   detaches every listener of both kinds
//!
//! Listeners are called in registration order, outside the channel lock, so a
//! listener may subscribe, unsubscribe, or touch its unit without deadlocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::hash::KeyMap;

/// Handle returned when registering a listener; pass it back to
/// [`Channel::unsubscribe`] to detach that listener.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ListenerId(u64);

type UpdateListener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type UnmountListener = Box<dyn FnOnce() + Send>;

/// Subscriber list for one unit.
pub struct Channel<T> {
    next_id: AtomicU64,
    state: Mutex<ChannelState<T>>,
}

struct ChannelState<T> {
    updates: KeyMap<ListenerId, UpdateListener<T>>,
    unmounts: KeyMap<ListenerId, UnmountListener>,
    closed: bool,
}

impl<T> Channel<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            state: Mutex::new(ChannelState {
                updates: KeyMap::default(),
                unmounts: KeyMap::default(),
                closed: false,
            }),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an update listener.
    ///
    /// On a closed channel the listener is dropped immediately and will never
    /// run; the returned id is still unique.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let mut state = self.state.lock();
        if !state.closed {
            state.updates.insert(id, Arc::new(listener));
        }
        id
    }

    /// Register a listener for the one-time unmount event.
    pub fn on_unmount<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id();
        let mut state = self.state.lock();
        if !state.closed {
            state.unmounts.insert(id, Box::new(listener));
        }
        id
    }

    /// Detach a listener of either kind. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let update = state.updates.shift_remove(&id);
        let unmount = match update {
            Some(_) => None,
            None => state.unmounts.shift_remove(&id),
        };
        // Listeners may own unit handles; drop them unlocked
        drop(state);
        update.is_some() || unmount.is_some()
    }

    /// Number of attached update listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().updates.len()
    }

    /// Whether the unmount event has been emitted.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn emit_update(&self, value: &T) {
        let listeners: Vec<UpdateListener<T>> = {
            let state = self.state.lock();
            state.updates.values().cloned().collect()
        };
        for listener in listeners {
            listener(value);
        }
    }

    /// Emit the unmount event and detach everything. Returns `false` if the
    /// event had already been emitted.
    pub(crate) fn emit_unmount(&self) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.updates.clear();
            std::mem::take(&mut state.unmounts)
        };
        for (_, listener) in listeners {
            listener();
        }
        true
    }
}
