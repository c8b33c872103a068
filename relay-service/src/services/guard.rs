//! Per-identity in-flight tracking.
//!
//! At most one gated request per identity runs at a time. A second request
//! for the same identity arriving while the first is between its balance
//! check and its usage write is turned away instead of racing it.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use service_core::identity::Identity;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InFlightRegistry {
    active: Arc<DashMap<Identity, ()>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity`; `None` when a request for it is already running.
    pub fn try_acquire(&self, identity: Identity) -> Option<InFlightGuard> {
        match self.active.entry(identity) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightGuard {
                    active: self.active.clone(),
                    identity,
                })
            }
        }
    }

    pub fn is_active(&self, identity: &Identity) -> bool {
        self.active.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Releases the identity when dropped.
pub struct InFlightGuard {
    active: Arc<DashMap<Identity, ()>>,
    identity: Identity,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active.remove(&self.identity);
    }
}
