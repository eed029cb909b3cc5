//! Instance registry.
//!
//! Native boundary functions only carry a small integer identifying the
//! execution context they fired in. The [`Registry`] turns that integer back
//! into the host callbacks of the owning instance.
//!
//! All operations take one lock. The lock is held only for the map access
//! itself and never across a call into the engine or into a host callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use jsworker_common::WorkerError;

use crate::HostCallbacks;

/// Identifier of a live engine instance.
///
/// Identifiers are assigned in strictly increasing order and never reused
/// for the lifetime of the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    /// The raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct RegistryState {
    last_id: u32,
    instances: HashMap<InstanceId, Arc<HostCallbacks>>,
}

/// Mapping from instance id to the host side of that instance.
///
/// Most callers share the process-wide [`Registry::global`]; tests and
/// embedders that want isolated numbering can create their own.
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry. The first id issued is 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                last_id: 0,
                instances: HashMap::new(),
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    /// Store `callbacks` under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::IdsExhausted`] once `u32::MAX` ids have been issued.
    pub fn register(&self, callbacks: HostCallbacks) -> Result<InstanceId, WorkerError> {
        let mut state = self.state.lock();
        let next = state
            .last_id
            .checked_add(1)
            .ok_or(WorkerError::IdsExhausted)?;
        state.last_id = next;

        let id = InstanceId(next);
        state.instances.insert(id, Arc::new(callbacks));
        debug!(instance_id = %id, live = state.instances.len(), "Instance registered");
        Ok(id)
    }

    /// Find the callbacks of a live instance.
    pub fn lookup(&self, id: InstanceId) -> Option<Arc<HostCallbacks>> {
        self.state.lock().instances.get(&id).cloned()
    }

    /// Forget an instance. Returns its callbacks if it was live.
    pub fn remove(&self, id: InstanceId) -> Option<Arc<HostCallbacks>> {
        let mut state = self.state.lock();
        let removed = state.instances.remove(&id);
        if removed.is_some() {
            debug!(instance_id = %id, live = state.instances.len(), "Instance removed");
        }
        removed
    }

    /// Returns `true` if `id` belongs to a live instance.
    pub fn contains(&self, id: InstanceId) -> bool {
        self.state.lock().instances.contains_key(&id)
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.state.lock().instances.len()
    }

    /// Returns `true` if no instance is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn with_last_id(last_id: u32) -> Self {
        let registry = Self::new();
        registry.state.lock().last_id = last_id;
        registry
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registry")
            .field("last_id", &state.last_id)
            .field("live", &state.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_register_lookup_remove() {
        let registry = Registry::new();
        let id = registry.register(HostCallbacks::new()).unwrap();

        assert!(registry.contains(id));
        assert!(registry.lookup(id).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).is_some());
        assert!(registry.lookup(id).is_none());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_strictly_increase_and_are_not_reused() {
        let registry = Registry::new();
        let first = registry.register(HostCallbacks::new()).unwrap();
        registry.remove(first);
        let second = registry.register(HostCallbacks::new()).unwrap();
        let third = registry.register(HostCallbacks::new()).unwrap();

        assert_eq!(first.get(), 1);
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn test_lookup_returns_registered_callbacks() {
        let registry = Registry::new();
        let id = registry
            .register(HostCallbacks::new().with_send_sync(|msg| msg.to_uppercase()))
            .unwrap();

        let callbacks = registry.lookup(id).unwrap();
        let reply = callbacks.handle_send_sync.as_ref().unwrap()("ping");
        assert_eq!(reply, "PING");
        assert!(callbacks.handle_send.is_none());
    }

    #[test]
    fn test_exhaustion() {
        let registry = Registry::with_last_id(u32::MAX - 1);
        let last = registry.register(HostCallbacks::new()).unwrap();
        assert_eq!(last.get(), u32::MAX);

        let err = registry.register(HostCallbacks::new()).unwrap_err();
        assert_eq!(err, WorkerError::IdsExhausted);
        // The failed attempt must not disturb live entries.
        assert!(registry.contains(last));
    }

    #[test]
    fn test_concurrent_registration_yields_unique_ids() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.register(HostCallbacks::new()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<InstanceId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 400);
        assert_eq!(registry.len(), 400);
    }

    #[test]
    fn test_global_is_shared() {
        let a = Registry::global();
        let b = Registry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
