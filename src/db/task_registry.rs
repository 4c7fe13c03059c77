//! Per-task connection registry.
//!
//! The registry remembers, for each task, the connection its open transaction
//! runs on. It is created once per [`Database`](crate::Database), shared by the
//! router and the transaction coordinator, and never torn down.
//!
//! # Binding policy
//!
//! At most one handle is bound per task. The first binder wins; a later
//! [`bind`](TaskRegistry::bind) for an occupied slot releases the handle it was
//! given instead of overwriting, so a lost race never leaks a connection.
//!
//! # Detached mode
//!
//! Identities without a concurrent scheduler (see
//! [`TaskIdentity::is_concurrent`]) all map to one global slot.

use crate::db::connection::ConnectionHandle;
use crate::db::task::TaskIdentity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SlotKey {
    Global,
    Task(TaskIdentity),
}

impl SlotKey {
    fn for_identity(identity: TaskIdentity) -> Self {
        if identity.is_concurrent() {
            SlotKey::Task(identity)
        } else {
            SlotKey::Global
        }
    }
}

/// Task identity to transactional connection map.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    /// Uses std::sync::Mutex: never held across an await point.
    bindings: Mutex<HashMap<SlotKey, Arc<ConnectionHandle>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Arc<ConnectionHandle>>> {
        // A panic elsewhere cannot leave the map half-updated; keep serving.
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `handle` to `identity` unless a binding already exists.
    ///
    /// Returns `true` if `handle` was installed. Otherwise the existing binding
    /// is kept and `handle` is released before returning `false`.
    pub async fn bind(&self, identity: TaskIdentity, handle: Arc<ConnectionHandle>) -> bool {
        let key = SlotKey::for_identity(identity);
        let installed = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(existing) if existing.is_live() => false,
                _ => {
                    slots.insert(key, handle.clone());
                    true
                }
            }
        }; // Lock released here

        if installed {
            debug!(task = %identity, handle_id = %handle.id(), "Bound connection to task");
            return true;
        }

        warn!(
            task = %identity,
            handle_id = %handle.id(),
            "Task already has a bound connection; releasing the new one"
        );
        handle.release(None).await;
        false
    }

    /// The live handle bound to `identity`, if any.
    pub fn lookup(&self, identity: TaskIdentity) -> Option<Arc<ConnectionHandle>> {
        self.slots()
            .get(&SlotKey::for_identity(identity))
            .filter(|handle| handle.is_live())
            .cloned()
    }

    /// Clear the slot for `identity`. Unbinding an empty slot is a no-op.
    pub fn unbind(&self, identity: TaskIdentity) -> Option<Arc<ConnectionHandle>> {
        let removed = self.slots().remove(&SlotKey::for_identity(identity));
        if let Some(handle) = &removed {
            debug!(task = %identity, handle_id = %handle.id(), "Unbound connection from task");
        }
        removed
    }

    /// Clear the slot only if it still holds `handle`.
    pub fn unbind_handle(&self, identity: TaskIdentity, handle: &Arc<ConnectionHandle>) -> bool {
        let mut slots = self.slots();
        let key = SlotKey::for_identity(identity);
        match slots.get(&key) {
            Some(bound) if Arc::ptr_eq(bound, handle) => {
                slots.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Number of occupied slots.
    pub fn bound_count(&self) -> usize {
        self.slots().len()
    }
}
