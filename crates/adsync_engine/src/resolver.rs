//! Entity reference resolution.

use crate::error::EngineResult;
use adsync_model::EntityRef;
use adsync_store::LocalStore;
use std::sync::Arc;

/// Resolves [`EntityRef`] values to remote platform ids.
///
/// A remote reference resolves to itself. A local reference resolves
/// through the store, and only yields an id once the referenced entity
/// has reached a remote-backed state; a synced-looking id on an entity
/// still marked unsynced or failed is never returned.
#[derive(Clone)]
pub struct IdResolver {
    store: Arc<dyn LocalStore>,
}

impl IdResolver {
    /// Creates a resolver over the given store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Resolves a reference to a remote id, or `None` if the referenced
    /// entity does not exist or is not yet remote-backed.
    pub fn resolve(&self, reference: &EntityRef) -> EngineResult<Option<u64>> {
        match reference {
            EntityRef::Remote(id) => Ok(Some(*id)),
            EntityRef::Local(key) => {
                let Some(entity) = self.store.find_by_key(key)? else {
                    return Ok(None);
                };
                if entity.sync_state.is_remote() {
                    Ok(entity.remote_id)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Returns true if the reference currently resolves to a remote id.
    pub fn is_resolvable(&self, reference: &EntityRef) -> EngineResult<bool> {
        Ok(self.resolve(reference)?.is_some())
    }
}
