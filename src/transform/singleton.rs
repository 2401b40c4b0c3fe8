use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::domain::{BundleFqid, EntityType, format_date, parse_version};
use crate::error::AzulResult;
use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{Entity, EntityId};
use crate::submitter::{Submitter, SubmitterCategory};
use crate::transform::{
    Contribution, Replica, Transformer, aggregate_dates, inner_entities, is_intermediate_matrix,
    shape, shape_files,
};
use crate::visitor::{TransformerVisitor, find_ancestor_samples};

/// A bundle viewed as an outer entity. It has no metadata document, so its
/// identity is the bundle UUID and its submission date is the version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleAsEntity {
    pub uuid: Uuid,
    pub version: String,
    pub submission_date: String,
}

impl BundleAsEntity {
    pub fn from_fqid(fqid: &BundleFqid) -> AzulResult<Self> {
        Ok(Self {
            uuid: fqid.uuid,
            version: fqid.version.clone(),
            submission_date: format_date(&parse_version(&fqid.version)?),
        })
    }
}

struct SingletonContents {
    contents: Map<String, Value>,
    visited: BTreeSet<EntityId>,
}

/// Project and bundle documents summarize the entire bundle. The closure is
/// materialized up front.
fn singleton_contents(bundle: &Bundle) -> AzulResult<SingletonContents> {
    let mut visitor = TransformerVisitor::new();
    let seeds = bundle
        .specimens()
        .chain(bundle.files())
        .map(|entity| entity.document_id)
        .collect::<Vec<_>>();
    for id in seeds {
        visitor = bundle.accept(id, visitor);
        visitor = bundle.ancestors(id, visitor);
    }
    let mut samples = BTreeSet::new();
    for file in bundle.files() {
        find_ancestor_samples(bundle, file.document_id, &mut samples);
    }

    let mut contents = inner_entities(bundle, &visitor, &samples)?;
    contents.insert("files".into(), shape_files(bundle, &visitor.files)?);

    let mut matrices = Vec::new();
    let mut contributed_analyses = Vec::new();
    for file in visitor.files.iter().filter_map(|id| bundle.entity(id)) {
        if is_intermediate_matrix(bundle, file) != Some(false) {
            continue;
        }
        let matrix = shape::matrix(bundle, file)?;
        match Submitter::for_file(bundle, file).map(|submitter| submitter.category()) {
            Some(SubmitterCategory::Internal) => matrices.push(matrix),
            Some(SubmitterCategory::External) | None => contributed_analyses.push(matrix),
        }
    }
    contents.insert("matrices".into(), Value::Array(matrices));
    contents.insert(
        "contributed_analyses".into(),
        Value::Array(contributed_analyses),
    );

    let mut visited = visitor.visited();
    visited.extend(samples);
    Ok(SingletonContents { contents, visited })
}

pub struct ProjectTransformer<'a> {
    bundle: &'a Bundle,
    project: &'a Entity,
}

impl<'a> ProjectTransformer<'a> {
    pub fn new(bundle: &'a Bundle) -> AzulResult<Self> {
        Ok(Self {
            bundle,
            project: bundle.project()?,
        })
    }
}

impl Transformer for ProjectTransformer<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::Projects
    }

    fn entities(&self) -> Vec<EntityId> {
        vec![self.project.document_id]
    }

    fn contribution(&self, _entity_id: EntityId) -> AzulResult<Contribution> {
        let SingletonContents {
            mut contents,
            visited,
        } = singleton_contents(self.bundle)?;
        let dates = aggregate_dates(self.bundle, &visited)?;
        contents.insert("dates".into(), json!([shape::date(self.project, &dates)]));
        Ok(Contribution::new(
            EntityType::Projects,
            self.project.document_id,
            self.bundle,
            contents,
            Some(Replica::of("project", self.project)),
        ))
    }
}

pub struct BundleTransformer<'a> {
    bundle: &'a Bundle,
    entity: BundleAsEntity,
}

impl<'a> BundleTransformer<'a> {
    pub fn new(bundle: &'a Bundle) -> AzulResult<Self> {
        Ok(Self {
            bundle,
            entity: BundleAsEntity::from_fqid(bundle.fqid())?,
        })
    }
}

impl Transformer for BundleTransformer<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::Bundles
    }

    fn entities(&self) -> Vec<EntityId> {
        vec![self.entity.uuid]
    }

    fn contribution(&self, _entity_id: EntityId) -> AzulResult<Contribution> {
        let SingletonContents {
            mut contents,
            visited,
        } = singleton_contents(self.bundle)?;
        let dates = aggregate_dates(self.bundle, &visited)?;
        contents.insert("dates".into(), json!([shape::bundle(&self.entity, &dates)]));
        Ok(Contribution::new(
            EntityType::Bundles,
            self.entity.uuid,
            self.bundle,
            contents,
            None,
        ))
    }
}
