use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::domain::EntityType;
use crate::error::AzulResult;
use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{Entity, EntityId, FileKind};
use crate::transform::strata::{parse_strata, stratification_stubs};
use crate::transform::{
    Contribution, Replica, Transformer, aggregate_dates, inner_entities, require_entity, shape,
};
use crate::visitor::{TransformerVisitor, file_groups, find_ancestor_samples};

pub struct FileTransformer<'a> {
    bundle: &'a Bundle,
    related_files: BTreeMap<EntityId, Vec<&'a Entity>>,
}

impl<'a> FileTransformer<'a> {
    /// Stitched files belong to another bundle, which contributes them.
    pub fn new(bundle: &'a Bundle) -> Self {
        let related_files = file_groups(bundle.files().filter(|file| !file.is_stitched))
            .into_iter()
            .map(|group| (group.file.document_id, group.related_files))
            .collect();
        Self {
            bundle,
            related_files,
        }
    }
}

impl Transformer for FileTransformer<'_> {
    fn entity_type(&self) -> EntityType {
        EntityType::Files
    }

    fn entities(&self) -> Vec<EntityId> {
        self.related_files.keys().copied().collect()
    }

    fn contribution(&self, entity_id: EntityId) -> AzulResult<Contribution> {
        let bundle = self.bundle;
        let file = require_entity(bundle, entity_id)?;
        let related_files = self
            .related_files
            .get(&entity_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let visitor = bundle.ancestors(entity_id, TransformerVisitor::new());
        let mut samples = BTreeSet::new();
        find_ancestor_samples(bundle, entity_id, &mut samples);

        let mut contents = inner_entities(bundle, &visitor, &samples)?;
        contents.insert(
            "files".into(),
            json!([shape::file(bundle, file, related_files)?]),
        );
        for (inner_type, stubs) in matrix_strata(file)? {
            if let Some(Value::Array(entities)) = contents.get_mut(inner_type) {
                entities.extend(stubs);
            }
        }
        let dates = aggregate_dates(
            bundle,
            visitor
                .visited()
                .iter()
                .chain(samples.iter())
                .chain(std::iter::once(&entity_id)),
        )?;
        contents.insert("dates".into(), json!([shape::date(file, &dates)]));

        Ok(Contribution::new(
            EntityType::Files,
            entity_id,
            bundle,
            contents,
            Some(Replica::of("file", file)),
        ))
    }
}

/// Project-level matrices are not linked to the donors they summarize, so
/// their strata stand in for the missing part of the graph.
fn matrix_strata(file: &Entity) -> AzulResult<BTreeMap<&'static str, Vec<Value>>> {
    let Some(details) = file.as_file() else {
        return Ok(BTreeMap::new());
    };
    match &details.kind {
        FileKind::Supplementary {
            strata: Some(strata),
            ..
        } if details.is_matrix() => {
            let strata = parse_strata(strata, &file.address())?;
            Ok(stratification_stubs(file.document_id, &strata))
        }
        _ => Ok(BTreeMap::new()),
    }
}
