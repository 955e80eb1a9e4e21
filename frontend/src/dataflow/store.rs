//! Observable key-value store for widget state
//!
//! Every write carries an [`Origin`] so reactions to remote writes can tell
//! them apart from writes they caused themselves. Subscribers run
//! synchronously, in registration order, before `set` returns.
//!
//! Notifications are dispatched by one thread at a time, so every subscriber
//! sees writes in the order they were applied. A write made from inside a
//! handler is applied at once but notified after the current handlers finish.

use crate::connection::{Transport, TransportError};
use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::StateMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Produced on this side, e.g. by user interaction. Flushed by `save`.
    Local,
    /// Delivered by the transport.
    Remote,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type StoreHandler = Arc<dyn Fn(&Value, Origin) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state key '{0}' was never initialized")]
    KeyNotFound(String),
    #[error("state key '{key}' holds an unexpected value: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to flush state: {0}")]
    Transport(#[from] TransportError),
}

/// Value plus the origin of the write that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub value: Value,
    pub origin: Origin,
}

#[derive(Default)]
struct StoreInner {
    defaults: StateMap,
    entries: IndexMap<String, StoreEntry>,
    subscribers: HashMap<String, Vec<(SubscriptionId, StoreHandler)>>,
    // Keys written locally since the last successful flush.
    dirty: IndexSet<String>,
    transport: Option<Arc<dyn Transport>>,
    next_subscription: u64,
}

struct Notification {
    key: String,
    value: Value,
    origin: Origin,
}

#[derive(Default)]
struct DispatchState {
    owner: Option<ThreadId>,
    pending: VecDeque<Notification>,
}

/// Lets one thread at a time run handlers; others wait on `idle`.
#[derive(Default)]
struct DispatchGate {
    state: Mutex<DispatchState>,
    idle: Condvar,
}

impl DispatchGate {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by the dispatching thread. Releases the gate even if a handler panics.
struct Dispatching<'a> {
    gate: &'a DispatchGate,
}

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock();
            state.owner = None;
            state.pending.clear();
        }
        self.gate.idle.notify_all();
    }
}

/// Shared handle to the widget state. Clones refer to the same store.
#[derive(Clone, Default)]
pub struct ObservableStore {
    inner: Arc<Mutex<StoreInner>>,
    gate: Arc<DispatchGate>,
}

impl ObservableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose reads fall back to `defaults` until a key is first set.
    pub fn with_defaults(defaults: StateMap) -> Self {
        let store = Self::default();
        store.lock().defaults = defaults;
        store
    }

    /// Route `save` through `transport`. Replaces any previous transport.
    pub fn connect_transport(&self, transport: Arc<dyn Transport>) {
        self.lock().transport = Some(transport);
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Result<Value, StoreError> {
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .or_else(|| inner.defaults.get(key).cloned())
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let value = self.get(key)?;
        serde_json::from_value(value).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Latest explicit write to `key`; `None` while only the default exists.
    pub fn entry(&self, key: &str) -> Option<StoreEntry> {
        self.lock().entries.get(key).cloned()
    }

    pub fn origin(&self, key: &str) -> Option<Origin> {
        self.lock().entries.get(key).map(|entry| entry.origin)
    }

    /// Replace the value of `key` and notify its subscribers.
    ///
    /// The store lock is released before handlers run, so a handler may read
    /// the store or write other keys. Writing its own key without checking
    /// the origin loops forever.
    pub fn set(&self, key: &str, value: Value, origin: Origin) {
        let current = thread::current().id();
        let mut state = self.gate.lock();
        if state.owner == Some(current) {
            // Called from one of our own handlers.
            let notification = self.apply(key, value, origin);
            state.pending.push_back(notification);
            return;
        }
        while state.owner.is_some() {
            state = self
                .gate
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(current);
        drop(state);

        let _dispatching = Dispatching { gate: &self.gate };
        let mut notification = self.apply(key, value, origin);
        loop {
            self.notify(&notification);
            match self.gate.lock().pending.pop_front() {
                Some(next) => notification = next,
                None => break,
            }
        }
    }

    fn apply(&self, key: &str, value: Value, origin: Origin) -> Notification {
        let mut inner = self.lock();
        inner.entries.insert(
            key.to_string(),
            StoreEntry {
                value: value.clone(),
                origin,
            },
        );
        match origin {
            Origin::Local => {
                inner.dirty.insert(key.to_string());
            }
            // Remote state supersedes anything still waiting to go out.
            Origin::Remote => {
                inner.dirty.shift_remove(key);
            }
        }
        Notification {
            key: key.to_string(),
            value,
            origin,
        }
    }

    fn notify(&self, notification: &Notification) {
        let handlers: Vec<StoreHandler> = self
            .lock()
            .subscribers
            .get(&notification.key)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(&notification.value, notification.origin);
        }
    }

    pub fn subscribe(
        &self,
        key: &str,
        handler: impl Fn(&Value, Origin) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false when `id` was not subscribed to `key`.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.subscribers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.subscribers.remove(key);
        }
        removed
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.lock().dirty.is_empty()
    }

    /// Flush local-origin keys changed since the last flush.
    ///
    /// Returns how many keys were sent. Without a transport, or with nothing
    /// changed, this does nothing. A failed send keeps the keys pending.
    pub fn save(&self) -> Result<usize, StoreError> {
        let (transport, state) = {
            let inner = self.lock();
            let Some(transport) = inner.transport.clone() else {
                return Ok(0);
            };
            if inner.dirty.is_empty() {
                return Ok(0);
            }
            let state: StateMap = inner
                .dirty
                .iter()
                .filter_map(|key| {
                    inner
                        .entries
                        .get(key)
                        .map(|entry| (key.clone(), entry.value.clone()))
                })
                .collect();
            (transport, state)
        };

        let sent = state.clone();
        transport.send_state(state)?;

        let mut inner = self.lock();
        for (key, value) in &sent {
            // A key rewritten while the transport ran stays pending.
            let unchanged = inner
                .entries
                .get(key)
                .is_some_and(|entry| &entry.value == value);
            if unchanged {
                inner.dirty.shift_remove(key);
            }
        }
        log::debug!(
            "flushed {} state key(s): {:?}",
            sent.len(),
            sent.keys().collect::<Vec<_>>()
        );
        Ok(sent.len())
    }
}
