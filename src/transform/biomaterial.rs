use std::collections::BTreeSet;

use serde_json::json;

use crate::domain::EntityType;
use crate::error::AzulResult;
use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{Entity, EntityId};
use crate::transform::{
    Contribution, Transformer, aggregate_dates, inner_entities, require_entity, shape,
    shape_files,
};
use crate::visitor::{TransformerVisitor, find_ancestor_samples};

/// Everything produced from a biomaterial and everything that produced it.
fn closure(bundle: &Bundle, id: EntityId) -> TransformerVisitor {
    let visitor = bundle.accept(id, TransformerVisitor::new());
    bundle.ancestors(id, visitor)
}

fn biomaterial_contribution(
    bundle: &Bundle,
    entity_type: EntityType,
    entity: &Entity,
    samples: &BTreeSet<EntityId>,
) -> AzulResult<Contribution> {
    let visitor = closure(bundle, entity.document_id);
    let mut contents = inner_entities(bundle, &visitor, samples)?;
    contents.insert("files".into(), shape_files(bundle, &visitor.files)?);
    let dates = aggregate_dates(bundle, visitor.visited().iter().chain(samples.iter()))?;
    contents.insert("dates".into(), json!([shape::date(entity, &dates)]));
    Ok(Contribution::new(
        entity_type,
        entity.document_id,
        bundle,
        contents,
        None,
    ))
}

/// Samples are the biomaterials an assay was performed on, found by walking
/// up from every file.
pub struct SampleTransformer<'a> {
    bundle: &'a Bundle,
    samples: BTreeSet<EntityId>,
}

impl<'a> SampleTransformer<'a> {
    pub fn new(bundle: &'a Bundle) -> Self {
        let mut samples = BTreeSet::new();
        for file in bundle.files() {
            find_ancestor_samples(bundle, file.document_id, &mut samples);
        }
        Self { bundle, samples }
    }
}

impl Transformer for SampleTransformer<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::Samples
    }

    fn entities(&self) -> Vec<EntityId> {
        self.samples.iter().copied().collect()
    }

    fn contribution(&self, entity_id: EntityId) -> AzulResult<Contribution> {
        let sample = require_entity(self.bundle, entity_id)?;
        biomaterial_contribution(
            self.bundle,
            EntityType::Samples,
            sample,
            &BTreeSet::from([entity_id]),
        )
    }
}

pub struct CellSuspensionTransformer<'a> {
    bundle: &'a Bundle,
}

impl<'a> CellSuspensionTransformer<'a> {
    pub fn new(bundle: &'a Bundle) -> Self {
        Self { bundle }
    }
}

impl Transformer for CellSuspensionTransformer<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::CellSuspensions
    }

    fn entities(&self) -> Vec<EntityId> {
        self.bundle
            .biomaterials()
            .filter(|entity| entity.is_cell_suspension())
            .map(|entity| entity.document_id)
            .collect()
    }

    fn contribution(&self, entity_id: EntityId) -> AzulResult<Contribution> {
        let suspension = require_entity(self.bundle, entity_id)?;
        let mut samples = BTreeSet::new();
        find_ancestor_samples(self.bundle, entity_id, &mut samples);
        biomaterial_contribution(
            self.bundle,
            EntityType::CellSuspensions,
            suspension,
            &samples,
        )
    }
}
