//! Central registry mapping model ids to owning handles.
//!
//! Inter-model references (source models, alignment references) are ids
//! looked up here, never raw pointers, so a dangling reference degrades to
//! a failed lookup instead of undefined behaviour.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Model, ModelId};

/// Owning registry of live models.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelId, Arc<dyn Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model and return its id.
    pub fn register(&self, model: Arc<dyn Model>) -> ModelId {
        let id = model.id();
        self.models.write().insert(id, model);
        id
    }

    /// Look up a live model. Returns None for ids that were never
    /// registered or have already been released.
    pub fn get(&self, id: ModelId) -> Option<Arc<dyn Model>> {
        self.models.read().get(&id).cloned()
    }

    /// Release a model, firing `AboutToBeDeleted` to its observers before
    /// the owning handle is dropped. Returns false if the id was not
    /// registered.
    pub fn release(&self, id: ModelId) -> bool {
        let removed = self.models.write().remove(&id);
        match removed {
            Some(model) => {
                model.notify_about_to_be_deleted();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Ids of every live model, unordered.
    pub fn ids(&self) -> Vec<ModelId> {
        self.models.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sparse::SparseOneDimensionalModel;
    use crate::model::ModelEvent;
    use parking_lot::Mutex;

    #[test]
    fn test_lookup_after_release_fails() {
        let registry = ModelRegistry::new();
        let model = Arc::new(SparseOneDimensionalModel::new(44_100, 1));
        let id = registry.register(model);

        assert!(registry.get(id).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.release(id));
        assert!(registry.get(id).is_none());
        assert!(!registry.release(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_notifies_observers() {
        let registry = ModelRegistry::new();
        let model = Arc::new(SparseOneDimensionalModel::new(44_100, 1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        model.subscribe(Arc::new(move |_, event| sink.lock().push(event.clone())));

        let id = registry.register(model);
        registry.release(id);

        assert_eq!(seen.lock().clone(), vec![ModelEvent::AboutToBeDeleted]);
    }
}
