use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{AzulError, AzulResult};
use crate::metadata::entity::EntityId;

/// One stratum of a matrix: dimension name to the values it covers.
pub type Stratum = BTreeMap<String, Vec<String>>;

/// Parses `dim=v1,v2;dim2=v3` strata, one stratum per line.
pub fn parse_strata(text: &str, address: &str) -> AzulResult<Vec<Stratum>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut stratum = Stratum::new();
            for dimension in line.split(';').map(str::trim).filter(|d| !d.is_empty()) {
                let (name, values) = dimension.split_once('=').ok_or_else(|| {
                    AzulError::invalid(address, format!("malformed stratum {dimension:?}"))
                })?;
                let values = values
                    .split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                if name.trim().is_empty() || values.is_empty() {
                    return Err(AzulError::invalid(
                        address,
                        format!("malformed stratum {dimension:?}"),
                    ));
                }
                stratum.insert(name.trim().to_string(), values);
            }
            Ok(stratum)
        })
        .collect()
}

/// Inner entity list and field a stratification dimension maps onto.
fn target(dimension: &str) -> Option<(&'static str, &'static str)> {
    match dimension {
        "genusSpecies" => Some(("donors", "genus_species")),
        "developmentStage" => Some(("donors", "development_stage")),
        "organ" => Some(("specimens", "organ")),
        "libraryConstructionApproach" => Some(("protocols", "library_construction_approach")),
        _ => None,
    }
}

/// Synthesizes stub inner entities for the cohort a matrix stratifies over.
/// Stub IDs derive from the matrix file's ID so that they are stable across
/// reindexing.
pub fn stratification_stubs(
    file_id: EntityId,
    strata: &[Stratum],
) -> BTreeMap<&'static str, Vec<Value>> {
    let mut stubs: BTreeMap<&'static str, Vec<Value>> = BTreeMap::new();
    for (index, stratum) in strata.iter().enumerate() {
        let mut entities: BTreeMap<&'static str, Map<String, Value>> = BTreeMap::new();
        for (dimension, values) in stratum {
            let Some((inner_type, field)) = target(dimension) else {
                tracing::warn!(%file_id, %dimension, "unknown stratification dimension");
                continue;
            };
            let entity = entities.entry(inner_type).or_insert_with(|| {
                let id = Uuid::new_v5(&file_id, format!("{inner_type}/{index}").as_bytes());
                let mut entity = Map::new();
                entity.insert("document_id".to_string(), json!(id));
                entity
            });
            let mut values = values.clone();
            values.sort();
            values.dedup();
            entity.insert(field.to_string(), json!(values));
        }
        for (inner_type, entity) in entities {
            stubs.entry(inner_type).or_default().push(Value::Object(entity));
        }
    }
    stubs
}
