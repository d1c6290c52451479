//! Knowledge store for one agent run: entities, relations, attributes.
//!
//! A [`Context`] is the accumulated structured perception result for a single
//! run. It is built atomically from one perception output, validated for
//! referential integrity on construction, and replaced wholesale when
//! perception is retried — partial merges are not supported, so stale entity
//! ids can never leak into later relations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ContextResult};

/// A detected object instance: category, location, and confidence.
///
/// Identity (`id`) is stable for the life of a run; an entity is immutable
/// once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u64,
    pub category: String,
    /// Bounding box as `[x0, y0, x1, y1]` in image pixels.
    pub bbox: [f32; 4],
    pub bbox_confidence: f32,
}

/// A directed edge between two entities discovered during perception or
/// reasoning. Both endpoints must reference entities in the same context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub subject_entity_id: u64,
    pub object_entity_id: u64,
    pub relation_name: String,
}

/// A named property of an entity with a calibrated probability in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub entity_id: u64,
    pub attribute_name: String,
    pub prob: f32,
}

/// Wire shape for a context snapshot: flat arrays, entities sorted by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextWire {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    attributes: Vec<Attribute>,
}

/// The accumulated structured perception result for one run.
///
/// Owns the sets of entities (keyed by id), relations, and attributes
/// observed so far. Exactly one context exists per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ContextWire", into = "ContextWire")]
pub struct Context {
    entities: BTreeMap<u64, Entity>,
    relations: Vec<Relation>,
    attributes: Vec<Attribute>,
}

impl Context {
    /// Build a context from one perception result, validating referential
    /// integrity: unique entity ids, relation endpoints and attribute owners
    /// present, probabilities in `[0, 1]`.
    pub fn new(
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        attributes: Vec<Attribute>,
    ) -> ContextResult<Self> {
        let mut map = BTreeMap::new();
        for entity in entities {
            if map.insert(entity.id, entity.clone()).is_some() {
                return Err(ContextError::DuplicateEntity {
                    entity_id: entity.id,
                });
            }
        }

        for relation in &relations {
            for endpoint in [relation.subject_entity_id, relation.object_entity_id] {
                if !map.contains_key(&endpoint) {
                    return Err(ContextError::DanglingRelation {
                        relation_name: relation.relation_name.clone(),
                        entity_id: endpoint,
                    });
                }
            }
        }

        for attribute in &attributes {
            if !map.contains_key(&attribute.entity_id) {
                return Err(ContextError::DanglingAttribute {
                    attribute_name: attribute.attribute_name.clone(),
                    entity_id: attribute.entity_id,
                });
            }
            if !(0.0..=1.0).contains(&attribute.prob) {
                return Err(ContextError::InvalidProbability {
                    attribute_name: attribute.attribute_name.clone(),
                    prob: attribute.prob,
                });
            }
        }

        Ok(Self {
            entities: map,
            relations,
            attributes,
        })
    }

    /// Look up an entity by id.
    pub fn entity(&self, id: u64) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// All entities, in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Number of entities observed.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The single entity, if exactly one was observed.
    pub fn sole_entity(&self) -> Option<&Entity> {
        if self.entities.len() == 1 {
            self.entities.values().next()
        } else {
            None
        }
    }

    /// Count entities per category, e.g. `[("dog", 2), ("cat", 1)]`.
    ///
    /// Categories appear in first-seen (id) order, for stable narration.
    pub fn category_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for entity in self.entities.values() {
            match counts.iter_mut().find(|(c, _)| c == &entity.category) {
                Some((_, n)) => *n += 1,
                None => counts.push((entity.category.clone(), 1)),
            }
        }
        counts
    }

    /// An immutable copy for external reporting (terminal state, narration).
    pub fn snapshot(&self) -> Context {
        self.clone()
    }
}

impl TryFrom<ContextWire> for Context {
    type Error = ContextError;

    fn try_from(wire: ContextWire) -> ContextResult<Self> {
        Context::new(wire.entities, wire.relations, wire.attributes)
    }
}

impl From<Context> for ContextWire {
    fn from(ctx: Context) -> Self {
        ContextWire {
            entities: ctx.entities.into_values().collect(),
            relations: ctx.relations,
            attributes: ctx.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64, category: &str) -> Entity {
        Entity {
            id,
            category: category.into(),
            bbox: [0.0, 0.0, 10.0, 10.0],
            bbox_confidence: 0.9,
        }
    }

    #[test]
    fn builds_from_consistent_observations() {
        let ctx = Context::new(
            vec![entity(1, "dog"), entity(2, "cat")],
            vec![Relation {
                subject_entity_id: 1,
                object_entity_id: 2,
                relation_name: "left-of".into(),
            }],
            vec![Attribute {
                entity_id: 1,
                attribute_name: "brown".into(),
                prob: 0.8,
            }],
        )
        .unwrap();

        assert_eq!(ctx.entity_count(), 2);
        assert_eq!(ctx.relations().len(), 1);
        assert_eq!(ctx.entity(1).unwrap().category, "dog");
    }

    #[test]
    fn rejects_dangling_relation() {
        let result = Context::new(
            vec![entity(1, "dog")],
            vec![Relation {
                subject_entity_id: 1,
                object_entity_id: 99,
                relation_name: "on".into(),
            }],
            vec![],
        );
        assert!(matches!(
            result.unwrap_err(),
            ContextError::DanglingRelation { entity_id: 99, .. }
        ));
    }

    #[test]
    fn rejects_dangling_attribute() {
        let result = Context::new(
            vec![entity(1, "dog")],
            vec![],
            vec![Attribute {
                entity_id: 5,
                attribute_name: "red".into(),
                prob: 0.5,
            }],
        );
        assert!(matches!(
            result.unwrap_err(),
            ContextError::DanglingAttribute { entity_id: 5, .. }
        ));
    }

    #[test]
    fn rejects_duplicate_entity_ids() {
        let result = Context::new(vec![entity(1, "dog"), entity(1, "cat")], vec![], vec![]);
        assert!(matches!(
            result.unwrap_err(),
            ContextError::DuplicateEntity { entity_id: 1 }
        ));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let result = Context::new(
            vec![entity(1, "dog")],
            vec![],
            vec![Attribute {
                entity_id: 1,
                attribute_name: "red".into(),
                prob: 1.5,
            }],
        );
        assert!(matches!(
            result.unwrap_err(),
            ContextError::InvalidProbability { .. }
        ));
    }

    #[test]
    fn sole_entity_only_for_singletons() {
        let one = Context::new(vec![entity(7, "dog")], vec![], vec![]).unwrap();
        assert_eq!(one.sole_entity().unwrap().id, 7);

        let two = Context::new(vec![entity(1, "dog"), entity(2, "cat")], vec![], vec![]).unwrap();
        assert!(two.sole_entity().is_none());

        let none = Context::default();
        assert!(none.sole_entity().is_none());
    }

    #[test]
    fn category_counts_in_first_seen_order() {
        let ctx = Context::new(
            vec![entity(1, "dog"), entity(2, "cat"), entity(3, "dog")],
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(
            ctx.category_counts(),
            vec![("dog".to_string(), 2), ("cat".to_string(), 1)]
        );
    }

    #[test]
    fn serializes_to_flat_arrays() {
        let ctx = Context::new(vec![entity(2, "cat"), entity(1, "dog")], vec![], vec![]).unwrap();
        let json = serde_json::to_value(&ctx).unwrap();
        let entities = json["entities"].as_array().unwrap();
        assert_eq!(entities.len(), 2);
        // Sorted by id regardless of insertion order.
        assert_eq!(entities[0]["id"], 1);
        assert_eq!(entities[1]["id"], 2);
    }

    #[test]
    fn deserialization_validates_integrity() {
        let json = r#"{
            "entities": [{"id": 1, "category": "dog", "bbox": [0,0,1,1], "bbox_confidence": 0.9}],
            "relations": [{"subject_entity_id": 1, "object_entity_id": 3, "relation_name": "on"}],
            "attributes": []
        }"#;
        let result: Result<Context, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
