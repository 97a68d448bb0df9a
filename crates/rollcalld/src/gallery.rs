//! In-memory gallery with swap-on-write snapshots.
//!
//! Scoring works against an `Arc<GallerySnapshot>` taken once per frame, so a
//! concurrent enrollment never changes the gallery mid-scan.

use rollcall_core::{FacePatch, Identity};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An immutable view of the enrolled identities.
#[derive(Debug, Default, Clone)]
pub struct GallerySnapshot {
    pub identities: Vec<Identity>,
    /// Reference face patches for the template tier, by identity id.
    pub patches: HashMap<String, FacePatch>,
}

impl GallerySnapshot {
    pub fn new(identities: Vec<Identity>, patches: HashMap<String, FacePatch>) -> Self {
        Self { identities, patches }
    }

    pub fn get(&self, identity_id: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == identity_id)
    }

    /// Copy with `identity` added, or replacing the one with the same id.
    pub fn with_identity(&self, identity: Identity, patch: Option<FacePatch>) -> Self {
        let mut next = self.clone();
        match patch {
            Some(patch) => next.patches.insert(identity.id.clone(), patch),
            None => next.patches.remove(&identity.id),
        };
        match next.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => next.identities.push(identity),
        }
        next
    }
}

#[derive(Debug, Default)]
pub struct GalleryStore {
    current: RwLock<Arc<GallerySnapshot>>,
}

impl GalleryStore {
    pub fn new(snapshot: GallerySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<GallerySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, snapshot: GallerySnapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }
}
