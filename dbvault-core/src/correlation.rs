//! Reconciliation of the API and introspection inventories.
//!
//! Items are keyed by entity type and exact, case-sensitive name. There is
//! no fuzzy matching. The result is a pure function of the two inputs:
//! every list is sorted, so input order never changes the output, and
//! swapping the inputs swaps the one-sided lists.

use crate::models::{EntityType, InventoryItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of a correlated entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityName {
    /// Kind of entity
    pub entity_type: EntityType,
    /// Technical name, unique within its type
    pub name: String,
}

impl EntityName {
    /// Creates an entity key.
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EntityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.name)
    }
}

/// An attribute both sources report with different values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeMismatch {
    /// Entity both sources reported
    pub entity: EntityName,
    /// Attribute whose values differ
    pub attribute: String,
    /// Value reported by the API
    pub api_value: String,
    /// Value found by introspection
    pub introspection_value: String,
}

/// Matched and one-sided counts for a single entity type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    /// Entities present in both inventories
    pub matched: usize,
    /// Entities only the API reported
    pub api_only: usize,
    /// Entities only introspection found
    pub introspection_only: usize,
    /// Matched over total for this type, 0.0 when empty
    pub score: f64,
}

/// Outcome of a correlation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Entities present in both inventories
    pub matched: Vec<EntityName>,
    /// Entities only the API reported
    pub api_only: Vec<EntityName>,
    /// Entities only introspection reported
    pub introspection_only: Vec<EntityName>,
    /// `matched / max(1, matched + api_only + introspection_only)`
    pub score: f64,
    /// Attribute disagreements between matched entities
    #[serde(default)]
    pub mismatches: Vec<AttributeMismatch>,
}

impl Default for CorrelationResult {
    fn default() -> Self {
        Self {
            matched: Vec::new(),
            api_only: Vec::new(),
            introspection_only: Vec::new(),
            score: 0.0,
            mismatches: Vec::new(),
        }
    }
}

impl CorrelationResult {
    /// Number of distinct entities across both inventories.
    pub fn total_unique(&self) -> usize {
        self.matched
            .len()
            .saturating_add(self.api_only.len())
            .saturating_add(self.introspection_only.len())
    }

    /// Per-entity-type counts and scores, for types that occur at all.
    pub fn breakdown(&self) -> BTreeMap<EntityType, TypeBreakdown> {
        let mut counts: BTreeMap<EntityType, (usize, usize, usize)> = BTreeMap::new();
        for entity in &self.matched {
            let entry = counts.entry(entity.entity_type).or_default();
            entry.0 = entry.0.saturating_add(1);
        }
        for entity in &self.api_only {
            let entry = counts.entry(entity.entity_type).or_default();
            entry.1 = entry.1.saturating_add(1);
        }
        for entity in &self.introspection_only {
            let entry = counts.entry(entity.entity_type).or_default();
            entry.2 = entry.2.saturating_add(1);
        }

        counts
            .into_iter()
            .map(|(entity_type, (matched, api_only, introspection_only))| {
                let total = matched
                    .saturating_add(api_only)
                    .saturating_add(introspection_only);
                (
                    entity_type,
                    TypeBreakdown {
                        matched,
                        api_only,
                        introspection_only,
                        score: score(matched, total),
                    },
                )
            })
            .collect()
    }

    /// The same result with the two sides exchanged.
    pub fn swapped(&self) -> Self {
        let mut mismatches: Vec<AttributeMismatch> = self
            .mismatches
            .iter()
            .map(|m| AttributeMismatch {
                entity: m.entity.clone(),
                attribute: m.attribute.clone(),
                api_value: m.introspection_value.clone(),
                introspection_value: m.api_value.clone(),
            })
            .collect();
        mismatches.sort();

        Self {
            matched: self.matched.clone(),
            api_only: self.introspection_only.clone(),
            introspection_only: self.api_only.clone(),
            score: self.score,
            mismatches,
        }
    }
}

/// Stateless correlation of two inventories.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationEngine;

impl CorrelationEngine {
    /// Creates an engine.
    pub fn new() -> Self {
        Self
    }

    /// Correlates the API inventory with the introspection inventory.
    ///
    /// Duplicate names inside one inventory are merged; where duplicates
    /// disagree on an attribute, the greatest value wins so that the merge
    /// does not depend on input order.
    ///
    /// # Example
    /// ```rust
    /// use dbvault_core::correlation::CorrelationEngine;
    /// use dbvault_core::models::{EntityType, InventoryItem, SourceKind};
    ///
    /// let api = vec![InventoryItem::new(SourceKind::Api, EntityType::Module, "a")];
    /// let db = vec![InventoryItem::new(SourceKind::Introspection, EntityType::Module, "b")];
    ///
    /// let result = CorrelationEngine::new().correlate(&api, &db);
    /// assert_eq!(result.score, 0.0);
    /// assert_eq!(result.api_only[0].name, "a");
    /// assert_eq!(result.introspection_only[0].name, "b");
    /// ```
    pub fn correlate(
        &self,
        api_items: &[InventoryItem],
        introspection_items: &[InventoryItem],
    ) -> CorrelationResult {
        let api = index(api_items);
        let introspection = index(introspection_items);

        let mut matched = Vec::new();
        let mut api_only = Vec::new();
        let mut mismatches = Vec::new();

        for (entity, api_attributes) in &api {
            match introspection.get(entity) {
                Some(db_attributes) => {
                    matched.push(entity.clone());
                    for (attribute, api_value) in api_attributes {
                        if let Some(db_value) = db_attributes.get(attribute)
                            && db_value != api_value
                        {
                            mismatches.push(AttributeMismatch {
                                entity: entity.clone(),
                                attribute: attribute.clone(),
                                api_value: api_value.clone(),
                                introspection_value: db_value.clone(),
                            });
                        }
                    }
                }
                None => api_only.push(entity.clone()),
            }
        }

        let introspection_only: Vec<EntityName> = introspection
            .keys()
            .filter(|entity| !api.contains_key(*entity))
            .cloned()
            .collect();

        let total = matched
            .len()
            .saturating_add(api_only.len())
            .saturating_add(introspection_only.len());

        CorrelationResult {
            score: score(matched.len(), total),
            matched,
            api_only,
            introspection_only,
            mismatches,
        }
    }
}

/// Builds the name-keyed index, merging duplicates.
fn index(items: &[InventoryItem]) -> BTreeMap<EntityName, BTreeMap<String, String>> {
    let mut index: BTreeMap<EntityName, BTreeMap<String, String>> = BTreeMap::new();
    for item in items {
        let attributes = index
            .entry(EntityName::new(item.entity_type, item.name.clone()))
            .or_default();
        for (key, value) in &item.attributes {
            match attributes.get_mut(key) {
                Some(existing) if *existing >= *value => {}
                Some(existing) => existing.clone_from(value),
                None => {
                    attributes.insert(key.clone(), value.clone());
                }
            }
        }
    }
    index
}

#[allow(clippy::cast_precision_loss)]
fn score(matched: usize, total: usize) -> f64 {
    matched as f64 / total.max(1) as f64
}
