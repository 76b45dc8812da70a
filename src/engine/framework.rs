//! Framework modifiers: category → delivery → service.
//!
//! Each level of the tree carries a multiplier map keyed by coefficient
//! name. Applying a selection scales a model's base coefficients by the
//! product of the multipliers found along the selected path.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::errors::{EngineError, EngineResult};
use super::models::Model;

/// Category/delivery/service tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameworkSelection {
    pub category: String,
    pub delivery: String,
    pub service: String,
}

impl FrameworkSelection {
    pub fn new(
        category: impl Into<String>,
        delivery: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            delivery: delivery.into(),
            service: service.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
    #[serde(default)]
    pub services: Vec<ServiceTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryTier>,
}

/// The full modifier tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkCatalog {
    pub categories: Vec<Category>,
}

/// Resolved path through the catalog
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSelection<'a> {
    pub category: &'a Category,
    pub delivery: &'a DeliveryTier,
    pub service: &'a ServiceTier,
}

impl ResolvedSelection<'_> {
    /// Combined factor for one coefficient; 1.0 when no level mentions it.
    pub fn factor(&self, coefficient: &str) -> f64 {
        [
            &self.category.multipliers,
            &self.delivery.multipliers,
            &self.service.multipliers,
        ]
        .iter()
        .filter_map(|m| m.get(coefficient))
        .product()
    }
}

fn check_multipliers(path: &str, multipliers: &BTreeMap<String, f64>) -> EngineResult<()> {
    for (name, factor) in multipliers {
        if !factor.is_finite() || *factor <= 0.0 {
            return Err(EngineError::InvalidCatalog {
                message: format!("{path}: multiplier '{name}' must be finite and positive"),
            });
        }
    }
    Ok(())
}

fn check_unique<'a>(path: &str, ids: impl Iterator<Item = &'a str>) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(EngineError::InvalidCatalog {
                message: format!("{path}: empty id"),
            });
        }
        if !seen.insert(id) {
            return Err(EngineError::InvalidCatalog {
                message: format!("{path}: duplicate id '{id}'"),
            });
        }
    }
    Ok(())
}

impl FrameworkCatalog {
    /// Build a catalog, rejecting duplicate ids and non-positive factors.
    pub fn new(categories: Vec<Category>) -> EngineResult<Self> {
        let catalog = Self { categories };
        catalog.validate_tree()?;
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        let catalog: FrameworkCatalog =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidCatalog {
                message: e.to_string(),
            })?;
        catalog.validate_tree()?;
        Ok(catalog)
    }

    fn validate_tree(&self) -> EngineResult<()> {
        check_unique("categories", self.categories.iter().map(|c| c.id.as_str()))?;
        for category in &self.categories {
            check_multipliers(&category.id, &category.multipliers)?;
            check_unique(
                &category.id,
                category.deliveries.iter().map(|d| d.id.as_str()),
            )?;
            for delivery in &category.deliveries {
                let path = format!("{}/{}", category.id, delivery.id);
                check_multipliers(&path, &delivery.multipliers)?;
                check_unique(&path, delivery.services.iter().map(|s| s.id.as_str()))?;
                for service in &delivery.services {
                    check_multipliers(&format!("{path}/{}", service.id), &service.multipliers)?;
                }
            }
        }
        Ok(())
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    /// Resolve a selection, enforcing that each level is valid under its parent.
    pub fn resolve(&self, selection: &FrameworkSelection) -> EngineResult<ResolvedSelection<'_>> {
        let reject = |reason: String| EngineError::InvalidSelection {
            category: selection.category.clone(),
            delivery: selection.delivery.clone(),
            service: selection.service.clone(),
            reason,
        };

        let category = self
            .category(&selection.category)
            .ok_or_else(|| reject(format!("unknown category '{}'", selection.category)))?;
        let delivery = category
            .deliveries
            .iter()
            .find(|d| d.id == selection.delivery)
            .ok_or_else(|| {
                reject(format!(
                    "delivery '{}' is not offered under category '{}'",
                    selection.delivery, category.id
                ))
            })?;
        let service = delivery
            .services
            .iter()
            .find(|s| s.id == selection.service)
            .ok_or_else(|| {
                reject(format!(
                    "service '{}' is not available for delivery '{}'",
                    selection.service, delivery.id
                ))
            })?;

        Ok(ResolvedSelection {
            category,
            delivery,
            service,
        })
    }

    pub fn validate(&self, selection: &FrameworkSelection) -> EngineResult<()> {
        self.resolve(selection).map(|_| ())
    }

    /// Scale `model`'s coefficients for `selection`.
    ///
    /// Scaling always starts from the model's base coefficients, so applying
    /// the same selection to an already-modified model yields the same model.
    pub fn apply_modifiers(&self, model: &Model, selection: &FrameworkSelection) -> EngineResult<Model> {
        let resolved = self.resolve(selection)?;

        let coefficients: BTreeMap<String, f64> = model
            .base_coefficients()
            .iter()
            .map(|(name, base)| (name.clone(), base * resolved.factor(name)))
            .collect();

        debug!(
            model = model.id(),
            category = %selection.category,
            delivery = %selection.delivery,
            service = %selection.service,
            "Applied framework modifiers"
        );

        Ok(model.with_coefficients(coefficients, selection.clone()))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::catalog;
    use super::*;
    use crate::engine::models::fixtures::project;

    #[test]
    fn test_apply_modifiers_scales_coefficients() {
        let model = project();
        let selection = FrameworkSelection::new("A", "X", "Y");
        let modified = catalog().apply_modifiers(&model, &selection).unwrap();

        // overhead 1.2 * 1.5 * 2.0, taxRate 0.1 * 0.5
        assert!((modified.coefficients()["overhead"] - 3.6).abs() < 1e-12);
        assert!((modified.coefficients()["taxRate"] - 0.05).abs() < 1e-12);
        assert_eq!(modified.base_coefficients(), model.base_coefficients());
        assert_eq!(modified.selection(), Some(&selection));
    }

    #[test]
    fn test_apply_modifiers_is_idempotent() {
        let catalog = catalog();
        let selection = FrameworkSelection::new("A", "X", "Y");
        let once = catalog.apply_modifiers(&project(), &selection).unwrap();
        let twice = catalog.apply_modifiers(&once, &selection).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_apply_modifiers_ignores_unknown_coefficients() {
        let model = project();
        let selection = FrameworkSelection::new("A", "W", "Z");
        let modified = catalog().apply_modifiers(&model, &selection).unwrap();
        assert!((modified.coefficients()["overhead"] - 1.8).abs() < 1e-12);
        assert_eq!(modified.coefficients()["taxRate"], 0.1);
        assert!(!modified.coefficients().contains_key("unused"));
    }

    #[test]
    fn test_service_invalid_under_delivery() {
        let selection = FrameworkSelection::new("A", "X", "Z");
        match catalog().apply_modifiers(&project(), &selection) {
            Err(EngineError::InvalidSelection { service, reason, .. }) => {
                assert_eq!(service, "Z");
                assert!(reason.contains("'X'"));
            }
            other => panic!("expected invalid selection, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_category_and_delivery() {
        let catalog = catalog();
        assert!(matches!(
            catalog.validate(&FrameworkSelection::new("B", "X", "Y")),
            Err(EngineError::InvalidSelection { .. })
        ));
        assert!(matches!(
            catalog.validate(&FrameworkSelection::new("A", "Q", "Y")),
            Err(EngineError::InvalidSelection { .. })
        ));
        assert!(catalog.validate(&FrameworkSelection::new("A", "W", "Z")).is_ok());
    }

    #[test]
    fn test_catalog_rejects_duplicates_and_bad_factors() {
        let mut categories = catalog().categories;
        categories.push(categories[0].clone());
        assert!(matches!(
            FrameworkCatalog::new(categories),
            Err(EngineError::InvalidCatalog { .. })
        ));

        let mut categories = catalog().categories;
        categories[0].multipliers.insert("overhead".to_string(), 0.0);
        assert!(FrameworkCatalog::new(categories).is_err());
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"{
            "categories": [{
                "id": "web", "name": "Web",
                "deliveries": [{
                    "id": "agency", "name": "Agency",
                    "multipliers": {"overhead": 1.3},
                    "services": [{"id": "full", "name": "Full service"}]
                }]
            }]
        }"#;
        let catalog = FrameworkCatalog::from_json(json).unwrap();
        let resolved = catalog
            .resolve(&FrameworkSelection::new("web", "agency", "full"))
            .unwrap();
        assert_eq!(resolved.factor("overhead"), 1.3);
        assert_eq!(resolved.factor("other"), 1.0);

        assert!(matches!(
            FrameworkCatalog::from_json("{not json"),
            Err(EngineError::InvalidCatalog { .. })
        ));
    }
}
