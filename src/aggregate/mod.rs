use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::aggregate::accumulators::canonical;
use crate::domain::{BundleFqid, EntityReference};
use crate::transform::{Contribution, ContributionCoordinates};

pub mod accumulators;
pub mod aggregators;

pub use aggregators::{EntityAggregator, aggregator};

pub const DEFAULT_MAX_SET_SIZE: usize = 100;

/// The canonical document for one outer entity, folded from the latest
/// contribution of every bundle that mentions it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub entity: EntityReference,
    pub contents: Map<String, Value>,
    pub bundles: Vec<BundleFqid>,
    pub num_contributions: usize,
}

/// Contributions are keyed by their coordinates, so adding the same
/// contribution again has no effect.
#[derive(Debug, Clone)]
pub struct AggregateCollector {
    contributions: BTreeMap<ContributionCoordinates, Contribution>,
    max_set_size: usize,
}

impl Default for AggregateCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SET_SIZE)
    }
}

impl AggregateCollector {
    pub fn new(max_set_size: usize) -> Self {
        Self {
            contributions: BTreeMap::new(),
            max_set_size,
        }
    }

    pub fn add(&mut self, contribution: Contribution) {
        self.contributions
            .insert(contribution.coordinates(), contribution);
    }

    pub fn extend(&mut self, contributions: impl IntoIterator<Item = Contribution>) {
        contributions
            .into_iter()
            .for_each(|contribution| self.add(contribution));
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// The contributions that count toward each entity: the latest version
    /// of every bundle, unless that version retracted the entity.
    fn effective(&self) -> BTreeMap<EntityReference, Vec<&Contribution>> {
        let mut latest: BTreeMap<(EntityReference, Uuid), &ContributionCoordinates> =
            BTreeMap::new();
        for coordinates in self.contributions.keys() {
            let key = (coordinates.entity, coordinates.bundle.uuid);
            let newer = latest.get(&key).is_none_or(|current| {
                (&coordinates.bundle.version, coordinates.deleted)
                    > (&current.bundle.version, current.deleted)
            });
            if newer {
                latest.insert(key, coordinates);
            }
        }
        let mut effective: BTreeMap<EntityReference, Vec<&Contribution>> = BTreeMap::new();
        for coordinates in latest.into_values() {
            if coordinates.deleted {
                tracing::debug!(entity = %coordinates.entity, bundle = %coordinates.bundle, "deleted");
                continue;
            }
            if let Some(contribution) = self.contributions.get(coordinates) {
                effective
                    .entry(coordinates.entity)
                    .or_default()
                    .push(contribution);
            }
        }
        effective
    }

    /// Entities whose every contribution was retracted have no aggregate.
    pub fn aggregates(&self) -> Vec<Aggregate> {
        self.effective()
            .into_iter()
            .map(|(entity, contributions)| self.aggregate(entity, &contributions))
            .collect()
    }

    fn aggregate(&self, entity: EntityReference, contributions: &[&Contribution]) -> Aggregate {
        let mut inner: BTreeMap<&str, Vec<(&str, &Value)>> = BTreeMap::new();
        for contribution in contributions {
            for (inner_type, entities) in &contribution.contents {
                let slot = inner.entry(inner_type.as_str()).or_default();
                match entities {
                    Value::Array(entities) => slot.extend(
                        entities
                            .iter()
                            .map(|entity| (contribution.bundle.version.as_str(), entity)),
                    ),
                    entity => slot.push((contribution.bundle.version.as_str(), entity)),
                }
            }
        }
        let contents = inner
            .into_iter()
            .map(|(inner_type, entities)| {
                let entities = reconcile_inner_entities(inner_type, entities);
                let aggregated = match aggregator(entity.entity_type, inner_type) {
                    Some(aggregator) => aggregator.aggregate(&entities, self.max_set_size),
                    None => entities.into_iter().cloned().collect(),
                };
                (inner_type.to_string(), Value::Array(aggregated))
            })
            .collect();
        tracing::info!(%entity, contributions = contributions.len(), "aggregated");
        Aggregate {
            entity,
            contents,
            bundles: contributions
                .iter()
                .map(|contribution| contribution.bundle.clone())
                .collect(),
            num_contributions: contributions.len(),
        }
    }
}

fn document_id(entity: &Value) -> String {
    match entity.get("document_id") {
        Some(Value::String(id)) => id.clone(),
        Some(id) => canonical(id),
        None => canonical(entity),
    }
}

fn keys(entity: &Value) -> BTreeSet<&str> {
    entity
        .as_object()
        .map(|object| object.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Properties present in one of the two entities but not the other.
pub fn shape_mismatch(a: &Value, b: &Value) -> BTreeSet<String> {
    keys(a)
        .symmetric_difference(&keys(b))
        .map(|key| key.to_string())
        .collect()
}

/// Picks one copy of every inner entity, given as `(bundle version,
/// entity)` pairs. The copy from the later bundle version wins, and among
/// copies from the same version the greatest in canonical form, so the
/// outcome does not depend on input order. Results are in document ID
/// order.
pub fn reconcile_inner_entities<'a>(
    inner_type: &str,
    entities: impl IntoIterator<Item = (&'a str, &'a Value)>,
) -> Vec<&'a Value> {
    let mut reconciled: BTreeMap<String, (&'a str, &'a Value)> = BTreeMap::new();
    for (version, entity) in entities {
        let id = document_id(entity);
        let Some((current_version, current)) = reconciled.get(&id).copied() else {
            reconciled.insert(id, (version, entity));
            continue;
        };
        let mismatch = shape_mismatch(current, entity);
        if !mismatch.is_empty() {
            tracing::warn!(
                inner_type,
                document_id = %id,
                versions = ?[current_version, version],
                ?mismatch,
                "inner entity shape differs between contributions"
            );
        }
        let wins = (version, canonical(entity)) > (current_version, canonical(current));
        if wins {
            reconciled.insert(id, (version, entity));
        }
    }
    reconciled
        .into_values()
        .map(|(_, entity)| entity)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn later_version_wins() {
        let old = json!({"document_id": "a", "workflow": "v1"});
        let new = json!({"document_id": "a", "workflow": "v2", "extra": true});
        let got = reconcile_inner_entities(
            "protocols",
            [
                ("2021-01-01T000000.000000Z", &new),
                ("2020-01-01T000000.000000Z", &old),
            ],
        );
        assert_eq!(got, vec![&new]);
        assert_eq!(shape_mismatch(&old, &new), BTreeSet::from(["extra".to_string()]));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shape_drift_is_logged() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let old = json!({"document_id": "a", "workflow": "v1"});
        let new = json!({"document_id": "a", "workflow": "v2", "extra": true});
        let same = json!({"document_id": "a", "workflow": "v3"});
        tracing::subscriber::with_default(subscriber, || {
            reconcile_inner_entities(
                "protocols",
                [
                    ("2020-01-01T000000.000000Z", &old),
                    ("2021-01-01T000000.000000Z", &new),
                ],
            );
        });
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("inner entity shape differs"), "{logs}");
        assert!(logs.contains("protocols"), "{logs}");
        assert!(logs.contains("extra"), "{logs}");

        let quiet = Captured::default();
        let writer = quiet.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            reconcile_inner_entities(
                "protocols",
                [
                    ("2020-01-01T000000.000000Z", &old),
                    ("2021-01-01T000000.000000Z", &same),
                ],
            );
        });
        assert!(quiet.0.lock().unwrap().is_empty());
    }

    #[test]
    fn tie_is_order_independent() {
        let a = json!({"document_id": "a", "x": 1});
        let b = json!({"document_id": "a", "x": 2});
        let version = "2020-01-01T000000.000000Z";
        let forward = reconcile_inner_entities("donors", [(version, &a), (version, &b)]);
        let backward = reconcile_inner_entities("donors", [(version, &b), (version, &a)]);
        assert_eq!(forward, backward);
    }
}
