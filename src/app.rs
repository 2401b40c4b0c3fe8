use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::aggregate::{Aggregate, AggregateCollector};
use crate::config::ResolvedConfig;
use crate::domain::{BundleFqid, BundlePartition, EntityReference, EntityType};
use crate::error::{AzulError, AzulResult};
use crate::fields::{Direction, FieldTypes, translate};
use crate::metadata::bundle::Bundle;
use crate::metadata::source::BundleSource;
use crate::transform::shape::field_types;
use crate::transform::{Contribution, ContributionCoordinates, transformers};

#[derive(Debug, Clone, Serialize)]
pub struct TransformResult {
    pub bundle: BundleFqid,
    pub deleted: bool,
    pub counts: BTreeMap<EntityType, usize>,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult {
    pub aggregates: Vec<Aggregate>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Where contributions and aggregates are kept between the transform and
/// aggregate steps. Contributions are stored in index form.
pub trait DocumentStore {
    fn put_contribution(&self, contribution: Contribution) -> AzulResult<()>;

    fn contributions(&self, entity: &EntityReference) -> AzulResult<Vec<Contribution>>;

    fn entities(&self) -> AzulResult<Vec<EntityReference>>;

    fn put_aggregate(&self, aggregate: Aggregate) -> AzulResult<()>;

    fn aggregate(&self, entity: &EntityReference) -> AzulResult<Option<Aggregate>>;

    fn delete_aggregate(&self, entity: &EntityReference) -> AzulResult<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    contributions: Mutex<BTreeMap<ContributionCoordinates, Contribution>>,
    aggregates: Mutex<BTreeMap<EntityReference, Aggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn put_contribution(&self, contribution: Contribution) -> AzulResult<()> {
        self.contributions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(contribution.coordinates(), contribution);
        Ok(())
    }

    fn contributions(&self, entity: &EntityReference) -> AzulResult<Vec<Contribution>> {
        Ok(self
            .contributions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|contribution| contribution.entity == *entity)
            .cloned()
            .collect())
    }

    fn entities(&self) -> AzulResult<Vec<EntityReference>> {
        let mut entities = self
            .contributions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|coordinates| coordinates.entity)
            .collect::<Vec<_>>();
        entities.dedup();
        Ok(entities)
    }

    fn put_aggregate(&self, aggregate: Aggregate) -> AzulResult<()> {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate.entity, aggregate);
        Ok(())
    }

    fn aggregate(&self, entity: &EntityReference) -> AzulResult<Option<Aggregate>> {
        Ok(self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity)
            .cloned())
    }

    fn delete_aggregate(&self, entity: &EntityReference) -> AzulResult<()> {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity);
        Ok(())
    }
}

pub struct App<S: DocumentStore> {
    store: S,
    config: ResolvedConfig,
}

impl<S: DocumentStore> App<S> {
    pub fn new(store: S, config: ResolvedConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Transforms a bundle and stores its contributions, one partition at a
    /// time.
    pub fn transform(
        &self,
        source: &BundleSource,
        sink: &dyn ProgressSink,
    ) -> AzulResult<TransformResult> {
        self.index(source, false, sink)
    }

    /// Retracts every contribution a bundle made. The bundle is transformed
    /// again to find the entities it contributed to.
    pub fn delete(
        &self,
        source: &BundleSource,
        sink: &dyn ProgressSink,
    ) -> AzulResult<TransformResult> {
        self.index(source, true, sink)
    }

    fn index(
        &self,
        source: &BundleSource,
        delete: bool,
        sink: &dyn ProgressSink,
    ) -> AzulResult<TransformResult> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Load; bundle {}", source.fqid),
            elapsed: None,
        });
        let bundle = Bundle::from_source(source)?;

        let mut counts = BTreeMap::new();
        let mut contributions = Vec::new();
        for request in &self.config.entity_types {
            let entity_type = request.entity_type;
            let transformer = transformers(&bundle, &[entity_type])?
                .pop()
                .ok_or_else(|| AzulError::InvalidEntityType(entity_type.to_string()))?;
            let types = field_types(entity_type);
            for partition in BundlePartition::root().divide(request.partition_bits)? {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Transform; {entity_type} partition {partition} estimate={}",
                        transformer.estimate(&partition)
                    ),
                    elapsed: Some(started.elapsed()),
                });
                for contribution in transformer.transform(&partition) {
                    let contribution = contribution?;
                    let contribution = if delete {
                        Contribution::deletion(contribution.entity, contribution.bundle)
                    } else {
                        to_index(contribution, &types)?
                    };
                    *counts.entry(entity_type).or_insert(0) += 1;
                    self.store.put_contribution(contribution.clone())?;
                    contributions.push(contribution);
                }
            }
        }
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} contributions", contributions.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(TransformResult {
            bundle: bundle.fqid().clone(),
            deleted: delete,
            counts,
            contributions,
        })
    }

    /// Folds stored contributions into aggregates, for the given entities or
    /// for every entity in the store.
    pub fn aggregate(
        &self,
        entities: Option<&[EntityReference]>,
        sink: &dyn ProgressSink,
    ) -> AzulResult<AggregateResult> {
        let started = Instant::now();
        let entities = match entities {
            Some(entities) => entities.to_vec(),
            None => self.store.entities()?,
        };
        let mut aggregates = Vec::new();
        for entity in entities {
            let types = field_types(entity.entity_type);
            let mut collector = AggregateCollector::new(self.config.max_set_size);
            for contribution in self.store.contributions(&entity)? {
                collector.add(from_index(contribution, &types)?);
            }
            sink.event(ProgressEvent {
                message: format!("phase=Aggregate; {entity} from {} contributions", collector.len()),
                elapsed: Some(started.elapsed()),
            });
            let folded = collector.aggregates();
            if folded.is_empty() {
                self.store.delete_aggregate(&entity)?;
            }
            for aggregate in folded {
                self.store.put_aggregate(aggregate.clone())?;
                aggregates.push(aggregate);
            }
        }
        Ok(AggregateResult { aggregates })
    }
}

fn translate_contents(
    mut contribution: Contribution,
    types: &FieldTypes,
    direction: Direction,
) -> AzulResult<Contribution> {
    let contents = Value::Object(std::mem::take(&mut contribution.contents));
    contribution.contents = match translate(&contents, types, direction)? {
        Value::Object(contents) => contents,
        other => {
            return Err(AzulError::Requirement(format!(
                "translated contents of {} are not an object: {other}",
                contribution.entity
            )));
        }
    };
    Ok(contribution)
}

pub fn to_index(
    contribution: Contribution,
    types: &FieldTypes,
) -> AzulResult<Contribution> {
    translate_contents(contribution, types, Direction::ToIndex)
}

pub fn from_index(
    contribution: Contribution,
    types: &FieldTypes,
) -> AzulResult<Contribution> {
    translate_contents(contribution, types, Direction::FromIndex)
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use uuid::Uuid;

    use super::*;

    fn contribution(version: &str, deleted: bool) -> Contribution {
        let entity = EntityReference {
            entity_type: EntityType::Projects,
            entity_id: Uuid::nil(),
        };
        let bundle = BundleFqid::new(Uuid::from_u128(u128::MAX), version);
        if deleted {
            return Contribution::deletion(entity, bundle);
        }
        let mut contents = Map::new();
        contents.insert("projects".into(), json!([{"document_id": "p", "project_title": "T"}]));
        Contribution {
            entity,
            bundle,
            deleted: false,
            contents,
            replica: None,
        }
    }

    #[test]
    fn memory_store_deduplicates_entities() {
        let store = MemoryStore::new();
        store
            .put_contribution(contribution("2020-01-01T000000.000000Z", false))
            .unwrap();
        store
            .put_contribution(contribution("2021-01-01T000000.000000Z", false))
            .unwrap();
        assert_eq!(store.entities().unwrap().len(), 1);
        let entity = store.entities().unwrap()[0];
        assert_eq!(store.contributions(&entity).unwrap().len(), 2);
    }

    #[test]
    fn deleted_bundle_leaves_no_aggregate() {
        let app = App::new(MemoryStore::new(), ResolvedConfig::default());
        let version = "2020-01-01T000000.000000Z";
        app.store()
            .put_contribution(contribution(version, false))
            .unwrap();
        app.store()
            .put_contribution(contribution(version, true))
            .unwrap();
        let result = app.aggregate(None, &NullSink).unwrap();
        assert!(result.aggregates.is_empty());
    }
}
