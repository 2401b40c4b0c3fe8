use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::{BundleFqid, BundlePartition, EntityReference, EntityType};
use crate::error::{AzulError, AzulResult};
use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{Entity, EntityId, FileKind};
use crate::submitter::Submitter;
use crate::visitor::{TransformerVisitor, file_groups};

pub mod biomaterial;
pub mod file;
pub mod shape;
pub mod singleton;
pub mod strata;

pub use biomaterial::{CellSuspensionTransformer, SampleTransformer};
pub use file::FileTransformer;
pub use singleton::{BundleAsEntity, BundleTransformer, ProjectTransformer};

/// A verbatim copy of a metadata document, kept next to the index for
/// direct lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    pub replica_type: String,
    pub entity_id: EntityId,
    pub contents: Value,
    pub hub_ids: Vec<EntityId>,
}

impl Replica {
    pub fn of(replica_type: &str, entity: &Entity) -> Replica {
        Replica {
            replica_type: replica_type.to_string(),
            entity_id: entity.document_id,
            contents: entity.json.clone(),
            hub_ids: vec![entity.document_id],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContributionCoordinates {
    pub entity: EntityReference,
    pub bundle: BundleFqid,
    pub deleted: bool,
}

/// One outer entity as seen from one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub entity: EntityReference,
    pub bundle: BundleFqid,
    #[serde(default)]
    pub deleted: bool,
    pub contents: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<Replica>,
}

impl Contribution {
    pub fn new(
        entity_type: EntityType,
        entity_id: EntityId,
        bundle: &Bundle,
        contents: Map<String, Value>,
        replica: Option<Replica>,
    ) -> Contribution {
        tracing::debug!(%entity_type, %entity_id, bundle = %bundle.fqid(), "contribution");
        Contribution {
            entity: EntityReference {
                entity_type,
                entity_id,
            },
            bundle: bundle.fqid().clone(),
            deleted: false,
            contents,
            replica,
        }
    }

    /// A tombstone retracting this bundle's view of an entity.
    pub fn deletion(entity: EntityReference, bundle: BundleFqid) -> Contribution {
        Contribution {
            entity,
            bundle,
            deleted: true,
            contents: Map::new(),
            replica: None,
        }
    }

    pub fn coordinates(&self) -> ContributionCoordinates {
        ContributionCoordinates {
            entity: self.entity,
            bundle: self.bundle.clone(),
            deleted: self.deleted,
        }
    }
}

pub type Contributions<'a> = Box<dyn Iterator<Item = AzulResult<Contribution>> + 'a>;

pub trait Transformer {
    fn entity_type(&self) -> EntityType;

    /// Every outer entity this transformer contributes, in document ID order.
    fn entities(&self) -> Vec<EntityId>;

    fn contribution(&self, entity_id: EntityId) -> AzulResult<Contribution>;

    fn entities_in(&self, partition: &BundlePartition) -> Vec<EntityId> {
        self.entities()
            .into_iter()
            .filter(|id| partition.contains(id))
            .collect()
    }

    fn estimate(&self, partition: &BundlePartition) -> usize {
        self.entities_in(partition).len()
    }

    /// Contributions are produced one at a time as the iterator advances.
    fn transform<'s>(&'s self, partition: &BundlePartition) -> Contributions<'s> {
        Box::new(
            self.entities_in(partition)
                .into_iter()
                .map(move |id| self.contribution(id)),
        )
    }
}

pub fn transformers<'a>(
    bundle: &'a Bundle,
    entity_types: &[EntityType],
) -> AzulResult<Vec<Box<dyn Transformer + 'a>>> {
    entity_types
        .iter()
        .map(|entity_type| -> AzulResult<Box<dyn Transformer + 'a>> {
            Ok(match entity_type {
                EntityType::Files => Box::new(FileTransformer::new(bundle)),
                EntityType::Samples => Box::new(SampleTransformer::new(bundle)),
                EntityType::CellSuspensions => Box::new(CellSuspensionTransformer::new(bundle)),
                EntityType::Projects => Box::new(ProjectTransformer::new(bundle)?),
                EntityType::Bundles => Box::new(BundleTransformer::new(bundle)?),
            })
        })
        .collect()
}

/// `None` for files that are not matrices. Analysis matrices are
/// intermediate if they feed another analysis, or if the DCP/2 analysis
/// pipeline produced them without tagging them as such.
pub fn is_intermediate_matrix(bundle: &Bundle, entity: &Entity) -> Option<bool> {
    let file = entity.as_file()?;
    if !file.is_matrix() {
        return None;
    }
    match file.kind {
        FileKind::Supplementary { .. } => Some(false),
        FileKind::Analysis { .. } => {
            let feeds_analysis = entity.children.iter().any(|id| {
                bundle
                    .entity(id)
                    .is_some_and(Entity::is_analysis_process)
            });
            let untagged_dcp2 = entity.submitter_id.is_none()
                && Submitter::for_file(bundle, entity) == Some(Submitter::Dcp2);
            Some(feeds_analysis || untagged_dcp2)
        }
        _ => unreachable!("{} is not a matrix file kind", entity.address()),
    }
}

fn shape_each(
    bundle: &Bundle,
    ids: &BTreeSet<EntityId>,
    shape: impl Fn(&Entity) -> AzulResult<Value>,
) -> AzulResult<Value> {
    ids.iter()
        .filter_map(|id| bundle.entity(id))
        .map(shape)
        .collect::<AzulResult<Vec<_>>>()
        .map(Value::Array)
}

/// Suspensions with no other suspension downstream of them.
fn is_leaf_cell_suspension(bundle: &Bundle, entity: &Entity) -> bool {
    let visitor = bundle.accept(entity.document_id, TransformerVisitor::new());
    visitor
        .cell_suspensions
        .iter()
        .all(|id| *id == entity.document_id)
}

/// The inner entity lists every contribution carries, except for `files`
/// and `dates`, which depend on the outer entity.
pub(crate) fn inner_entities(
    bundle: &Bundle,
    visitor: &TransformerVisitor,
    samples: &BTreeSet<EntityId>,
) -> AzulResult<Map<String, Value>> {
    let mut contents = Map::new();
    contents.insert("samples".into(), shape_each(bundle, samples, shape::sample)?);
    contents.insert(
        "sequencing_inputs".into(),
        shape_each(bundle, &visitor.sequencing_inputs, shape::sequencing_input)?,
    );
    contents.insert(
        "specimens".into(),
        shape_each(bundle, &visitor.specimens, shape::specimen)?,
    );
    contents.insert(
        "cell_suspensions".into(),
        shape_each(bundle, &visitor.cell_suspensions, |entity| {
            shape::cell_suspension(bundle, entity, is_leaf_cell_suspension(bundle, entity))
        })?,
    );
    contents.insert(
        "cell_lines".into(),
        shape_each(bundle, &visitor.cell_lines, shape::cell_line)?,
    );
    contents.insert("donors".into(), shape_each(bundle, &visitor.donors, shape::donor)?);
    contents.insert(
        "organoids".into(),
        shape_each(bundle, &visitor.organoids, shape::organoid)?,
    );
    contents.insert(
        "imaged_specimens".into(),
        shape_each(bundle, &visitor.imaged_specimens, shape::imaged_specimen)?,
    );
    contents.insert(
        "protocols".into(),
        shape_each(bundle, &visitor.protocols, shape::protocol)?,
    );
    contents.insert(
        "sequencing_processes".into(),
        shape_each(bundle, &visitor.sequencing_processes, |entity| {
            Ok(shape::sequencing_process(entity))
        })?,
    );
    contents.insert(
        "projects".into(),
        json!([shape::project(bundle.project()?)?]),
    );
    Ok(contents)
}

/// Shapes the given files, each with the other members of its zarr store.
pub(crate) fn shape_files(bundle: &Bundle, ids: &BTreeSet<EntityId>) -> AzulResult<Value> {
    file_groups(bundle.files())
        .into_iter()
        .filter(|group| ids.contains(&group.file.document_id))
        .map(|group| shape::file(bundle, group.file, &group.related_files))
        .collect::<AzulResult<Vec<_>>>()
        .map(Value::Array)
}

/// Dates of the given entities together with those of the project.
pub(crate) fn aggregate_dates<'a>(
    bundle: &'a Bundle,
    ids: impl IntoIterator<Item = &'a EntityId>,
) -> AzulResult<shape::AggregateDates> {
    let project = bundle.project()?;
    let entities = ids
        .into_iter()
        .filter_map(|id| bundle.entity(id))
        .chain(std::iter::once(project));
    Ok(shape::AggregateDates::over(entities.map(|entity| {
        (
            entity.submission_date.as_str(),
            entity.update_date.as_deref(),
        )
    })))
}

pub(crate) fn require_entity(bundle: &Bundle, id: EntityId) -> AzulResult<&Entity> {
    bundle.entity(&id).ok_or_else(|| {
        AzulError::Requirement(format!("entity {id} is not part of bundle {}", bundle.fqid()))
    })
}
