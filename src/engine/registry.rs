//! Model registry.
//!
//! Models are kept in registration order behind `Arc` so callers can hold
//! on to a model while the registry is shared across request handlers.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::errors::{EngineError, EngineResult};
use super::models::{Model, ModelDefinition};

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<Model>>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register every definition, stopping at the first failure.
    pub fn from_definitions(definitions: Vec<ModelDefinition>) -> EngineResult<Self> {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(Model::from_definition(def)?)?;
        }
        info!("Loaded {} cost models", registry.len());
        Ok(registry)
    }

    pub fn register(&mut self, model: Model) -> EngineResult<Arc<Model>> {
        if self.index.contains_key(model.id()) {
            return Err(EngineError::DuplicateModel {
                id: model.id().to_string(),
            });
        }
        let model = Arc::new(model);
        self.index.insert(model.id().to_string(), self.models.len());
        self.models.push(Arc::clone(&model));
        Ok(model)
    }

    pub fn get(&self, id: &str) -> EngineResult<Arc<Model>> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.models[i]))
            .ok_or_else(|| EngineError::NotFound {
                kind: "Model",
                id: id.to_string(),
            })
    }

    /// Models in registration order. Each call starts a fresh pass.
    pub fn list(&self) -> std::slice::Iter<'_, Arc<Model>> {
        self.models.iter()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::fixtures::{hourly, hourly_definition, project, project_definition};

    #[test]
    fn test_register_and_get() {
        let mut registry = ModelRegistry::new();
        registry.register(hourly()).unwrap();
        let model = registry.get("hourly").unwrap();
        assert_eq!(model.name(), "Hourly engagement");
        assert!(registry.contains("hourly"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ModelRegistry::new();
        registry.register(hourly()).unwrap();
        assert_eq!(
            registry.register(hourly()).unwrap_err(),
            EngineError::DuplicateModel {
                id: "hourly".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let registry = ModelRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("nope"),
            Err(EngineError::NotFound { kind: "Model", .. })
        ));
    }

    #[test]
    fn test_list_preserves_order_and_restarts() {
        let mut registry = ModelRegistry::new();
        registry.register(project()).unwrap();
        registry.register(hourly()).unwrap();

        let first: Vec<&str> = registry.list().map(|m| m.id()).collect();
        let second: Vec<&str> = registry.list().map(|m| m.id()).collect();
        assert_eq!(first, vec!["project", "hourly"]);
        assert_eq!(first, second);

        // A partially consumed pass does not affect the next one
        let mut pass = registry.list();
        pass.next();
        assert_eq!(registry.list().count(), 2);
    }

    #[test]
    fn test_from_definitions() {
        let registry =
            ModelRegistry::from_definitions(vec![hourly_definition(), project_definition()]).unwrap();
        assert_eq!(registry.len(), 2);

        let err = ModelRegistry::from_definitions(vec![hourly_definition(), hourly_definition()])
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateModel { .. }));
    }
}
