use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::domain::EntityType;
use crate::error::{AzulError, AzulResult};
use crate::fields::{FieldType, FieldTypes};
use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{
    Biomaterial, BiomaterialKind, Entity, FileKind, OntologyTerm, ProtocolKind, ontology_labels,
};
use crate::submitter::Submitter;
use crate::transform::is_intermediate_matrix;
use crate::transform::singleton::BundleAsEntity;
use crate::visitor::find_ancestor_samples;

fn label(term: Option<&OntologyTerm>) -> Value {
    term.map_or(Value::Null, |term| json!(term.label()))
}

fn labels(terms: &[OntologyTerm]) -> Value {
    json!(ontology_labels(terms))
}

fn label_text(term: Option<&OntologyTerm>) -> Option<String> {
    term.map(|term| term.label().to_string())
}

fn sorted<'a>(values: impl Iterator<Item = &'a str>) -> BTreeSet<&'a str> {
    values.collect()
}

fn required_label(entity: &Entity, term: Option<&OntologyTerm>, field: &str) -> AzulResult<Value> {
    term.map(|term| json!(term.label()))
        .ok_or_else(|| AzulError::invalid(entity.address(), format!("missing {field}")))
}

fn biomaterial(entity: &Entity) -> AzulResult<&Biomaterial> {
    entity
        .as_biomaterial()
        .ok_or_else(|| AzulError::Requirement(format!("{} is not a biomaterial", entity.address())))
}

fn mismatch(entity: &Entity, expected: &str) -> AzulError {
    AzulError::Requirement(format!("{} is not a {expected}", entity.address()))
}

pub fn project(entity: &Entity) -> AzulResult<Value> {
    let project = entity
        .as_project()
        .ok_or_else(|| mismatch(entity, "project"))?;
    let contributors = &project.contributors;
    Ok(json!({
        "document_id": entity.document_id,
        "project_title": project.project_title,
        "project_description": project.project_description,
        "project_short_name": project.project_short_name,
        "laboratory": sorted(contributors.iter().filter_map(|c| c.laboratory.as_deref())),
        "institutions": sorted(contributors.iter().filter_map(|c| c.institution.as_deref())),
        "contact_names": sorted(contributors.iter().map(|c| c.contact_name.as_str())),
        "contributors": contributors,
        "publication_titles": sorted(
            project
                .publications
                .iter()
                .filter_map(|p| p.publication_title.as_deref())
        ),
        "publications": project.publications,
        "insdc_project_accessions": project.insdc_project_accessions,
        "geo_series_accessions": project.geo_series_accessions,
        "array_express_accessions": project.array_express_accessions,
        "insdc_study_accessions": project.insdc_study_accessions,
        "supplementary_links": project.supplementary_links,
        "estimated_cell_count": project.estimated_cell_count,
        "data_use_restriction": project.data_use_restriction,
        "duos_id": project.duos_id,
    }))
}

pub fn donor(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::DonorOrganism(donor) = &biomaterial.kind else {
        return Err(mismatch(entity, "donor organism"));
    };
    let organism_age = donor.organism_age.as_ref().map(|age| {
        json!({
            "value": age,
            "unit": donor.organism_age_unit.as_ref().map(OntologyTerm::label),
        })
    });
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "biological_sex": donor.sex,
        "genus_species": labels(&donor.genus_species),
        "diseases": labels(&donor.diseases),
        "development_stage": label(donor.development_stage.as_ref()),
        "organism_age": organism_age,
        "organism_age_range": donor.organism_age_range().map(|range| range.to_json()),
    }))
}

pub fn specimen(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::SpecimenFromOrganism(specimen) = &biomaterial.kind else {
        return Err(mismatch(entity, "specimen"));
    };
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "has_input_biomaterial": biomaterial.has_input_biomaterial,
        "organ": required_label(entity, specimen.organ.as_ref(), "organ")?,
        "organ_part": labels(&specimen.organ_parts),
        "disease": labels(&specimen.diseases),
        "preservation_method": specimen.preservation_method,
    }))
}

/// Leaf suspensions are the only ones counted in `total_estimated_cells`,
/// so that nested suspensions do not count their cells twice.
pub fn cell_suspension(bundle: &Bundle, entity: &Entity, is_leaf: bool) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::CellSuspension(suspension) = &biomaterial.kind else {
        return Err(mismatch(entity, "cell suspension"));
    };
    let mut samples = BTreeSet::new();
    find_ancestor_samples(bundle, entity.document_id, &mut samples);
    let mut organs = BTreeSet::new();
    let mut organ_parts = BTreeSet::new();
    for sample in samples.iter().filter_map(|id| bundle.entity(id)) {
        let Some(sample) = sample.as_biomaterial() else {
            continue;
        };
        match &sample.kind {
            BiomaterialKind::SpecimenFromOrganism(specimen) => {
                organs.insert(label_text(specimen.organ.as_ref()));
                organ_parts.extend(
                    specimen
                        .organ_parts
                        .iter()
                        .map(|part| Some(part.label().to_string())),
                );
            }
            BiomaterialKind::CellLine(cell_line) => {
                organs.insert(label_text(cell_line.model_organ.as_ref()));
                organ_parts.insert(None);
            }
            BiomaterialKind::Organoid(organoid) => {
                organs.insert(label_text(organoid.model_organ.as_ref()));
                organ_parts.insert(label_text(organoid.model_organ_part.as_ref()));
            }
            _ => {}
        }
    }
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "total_estimated_cells": if is_leaf { suspension.estimated_cell_count } else { None },
        "total_estimated_cells_redundant": suspension.estimated_cell_count,
        "selected_cell_type": labels(&suspension.selected_cell_types),
        "organ": organs,
        "organ_part": organ_parts,
    }))
}

pub fn cell_line(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::CellLine(cell_line) = &biomaterial.kind else {
        return Err(mismatch(entity, "cell line"));
    };
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "cell_line_type": cell_line.cell_line_type,
        "model_organ": label(cell_line.model_organ.as_ref()),
    }))
}

pub fn organoid(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::Organoid(organoid) = &biomaterial.kind else {
        return Err(mismatch(entity, "organoid"));
    };
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "model_organ": label(organoid.model_organ.as_ref()),
        "model_organ_part": label(organoid.model_organ_part.as_ref()),
    }))
}

pub fn imaged_specimen(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let BiomaterialKind::ImagedSpecimen(imaged) = &biomaterial.kind else {
        return Err(mismatch(entity, "imaged specimen"));
    };
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "slice_thickness": imaged.slice_thickness,
    }))
}

/// A sample is shaped like its underlying biomaterial, plus the index it
/// came from and the organ it represents.
pub fn sample(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    let (entity_type, mut shaped, effective_organ) = match &biomaterial.kind {
        BiomaterialKind::SpecimenFromOrganism(specimen) => (
            "specimens",
            self::specimen(entity)?,
            label(specimen.organ.as_ref()),
        ),
        BiomaterialKind::CellLine(cell_line) => (
            "cell_lines",
            self::cell_line(entity)?,
            label(cell_line.model_organ.as_ref()),
        ),
        BiomaterialKind::Organoid(organoid) => (
            "organoids",
            self::organoid(entity)?,
            label(organoid.model_organ.as_ref()),
        ),
        _ => return Err(mismatch(entity, "sample")),
    };
    if let Some(object) = shaped.as_object_mut() {
        object.insert("entity_type".to_string(), json!(entity_type));
        object.insert("effective_organ".to_string(), effective_organ);
    }
    Ok(shaped)
}

pub fn file(bundle: &Bundle, entity: &Entity, related_files: &[&Entity]) -> AzulResult<Value> {
    let file = entity.as_file().ok_or_else(|| mismatch(entity, "file"))?;
    let manifest = &file.manifest_entry;
    let (read_index, lane_index) = match &file.kind {
        FileKind::Sequence {
            read_index,
            lane_index,
            ..
        } => (read_index.clone(), *lane_index),
        _ => (None, None),
    };
    let matrix_cell_count = match &file.kind {
        FileKind::Analysis { matrix_cell_count } => *matrix_cell_count,
        _ => None,
    };
    let related_files = related_files
        .iter()
        .filter_map(|related| related.as_file())
        .map(|related| {
            let entry = &related.manifest_entry;
            json!({
                "name": entry.name,
                "crc32c": entry.crc32c,
                "sha256": entry.sha256,
                "size": entry.size,
                "uuid": entry.uuid,
                "version": entry.version,
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({
        "document_id": entity.document_id,
        "file_type": entity.schema_name,
        "name": manifest.name,
        "format": file.file_format,
        "size": manifest.size,
        "uuid": manifest.uuid,
        "version": manifest.version,
        "crc32c": manifest.crc32c,
        "sha256": manifest.sha256,
        "content_type": manifest.content_type,
        "drs_uri": manifest.drs_uri,
        "read_index": read_index,
        "lane_index": lane_index,
        "is_intermediate": is_intermediate_matrix(bundle, entity),
        "file_source": Submitter::for_file(bundle, entity).map(|submitter| submitter.title()),
        "content_description": labels(&file.content_description),
        "matrix_cell_count": matrix_cell_count,
        "related_files": related_files,
    }))
}

/// Only library preparation, sequencing, analysis and imaging protocols
/// have an index shape.
pub fn protocol(entity: &Entity) -> AzulResult<Value> {
    let protocol = entity
        .as_protocol()
        .ok_or_else(|| mismatch(entity, "protocol"))?;
    let shaped = match &protocol.kind {
        ProtocolKind::LibraryPreparation {
            library_construction_method,
            nucleic_acid_source,
        } => json!({
            "document_id": entity.document_id,
            "library_construction_approach": label(library_construction_method.as_ref()),
            "nucleic_acid_source": nucleic_acid_source,
        }),
        ProtocolKind::Sequencing {
            instrument_manufacturer_model,
            paired_end,
            method,
        } => json!({
            "document_id": entity.document_id,
            "instrument_manufacturer_model": label(instrument_manufacturer_model.as_ref()),
            "paired_end": paired_end,
            "sequencing_approach": label(method.as_ref()),
        }),
        ProtocolKind::Analysis => json!({
            "document_id": entity.document_id,
            "workflow": protocol.protocol_id,
        }),
        ProtocolKind::Imaging { assay_types } => json!({
            "document_id": entity.document_id,
            "assay_type": assay_types,
        }),
        ProtocolKind::Method(_) => return Err(mismatch(entity, "indexed protocol")),
    };
    Ok(shaped)
}

pub fn sequencing_process(entity: &Entity) -> Value {
    json!({"document_id": entity.document_id})
}

pub fn sequencing_input(entity: &Entity) -> AzulResult<Value> {
    let biomaterial = biomaterial(entity)?;
    Ok(json!({
        "document_id": entity.document_id,
        "biomaterial_id": biomaterial.biomaterial_id,
        "sequencing_input_type": entity.schema_name,
    }))
}

pub fn matrix(bundle: &Bundle, entity: &Entity) -> AzulResult<Value> {
    let strata = match entity.as_file().map(|file| &file.kind) {
        Some(FileKind::Supplementary { strata, .. }) => strata.clone(),
        _ => None,
    };
    Ok(json!({
        "document_id": entity.document_id,
        "file": self::file(bundle, entity, &[])?,
        "strata": strata,
    }))
}

/// Submission and update dates across every entity of a contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDates {
    pub submission_date: Option<String>,
    pub update_date: Option<String>,
    pub last_modified_date: Option<String>,
}

impl AggregateDates {
    pub fn over<'a>(dates: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let mut submission_date: Option<&str> = None;
        let mut update_date: Option<&str> = None;
        let mut last_modified_date: Option<&str> = None;
        for (submitted, updated) in dates {
            submission_date = Some(submission_date.map_or(submitted, |date| date.min(submitted)));
            if let Some(updated) = updated {
                update_date = Some(update_date.map_or(updated, |date| date.max(updated)));
            }
            for date in std::iter::once(submitted).chain(updated) {
                last_modified_date = Some(last_modified_date.map_or(date, |last| last.max(date)));
            }
        }
        AggregateDates {
            submission_date: submission_date.map(str::to_string),
            update_date: update_date.map(str::to_string),
            last_modified_date: last_modified_date.map(str::to_string),
        }
    }
}

pub fn date(entity: &Entity, aggregate: &AggregateDates) -> Value {
    json!({
        "document_id": entity.document_id,
        "submission_date": entity.submission_date,
        "update_date": entity.update_date,
        "last_modified_date": entity.last_modified_date(),
        "aggregate_submission_date": aggregate.submission_date,
        "aggregate_update_date": aggregate.update_date,
        "aggregate_last_modified_date": aggregate.last_modified_date,
    })
}

/// The dates entry of a bundle, which has no metadata entity of its own.
pub fn bundle(bundle: &BundleAsEntity, aggregate: &AggregateDates) -> Value {
    json!({
        "document_id": bundle.uuid,
        "version": bundle.version,
        "submission_date": bundle.submission_date,
        "update_date": null,
        "last_modified_date": bundle.submission_date,
        "aggregate_submission_date": aggregate.submission_date,
        "aggregate_update_date": aggregate.update_date,
        "aggregate_last_modified_date": aggregate.last_modified_date,
    })
}

fn leaves<const N: usize>(fields: [(&str, FieldType); N]) -> FieldTypes {
    FieldTypes::Nested(
        fields
            .into_iter()
            .map(|(name, field_type)| (name.to_string(), FieldTypes::Leaf(field_type)))
            .collect(),
    )
}

fn biomaterial_types() -> Vec<(&'static str, FieldType)> {
    vec![
        ("document_id", FieldType::NullStr),
        ("biomaterial_id", FieldType::NullStr),
    ]
}

fn with_biomaterial<const N: usize>(fields: [(&'static str, FieldType); N]) -> FieldTypes {
    let mut all = biomaterial_types();
    all.extend(fields);
    FieldTypes::Nested(
        all.into_iter()
            .map(|(name, field_type)| (name.to_string(), FieldTypes::Leaf(field_type)))
            .collect(),
    )
}

fn specimen_types() -> FieldTypes {
    with_biomaterial([
        ("has_input_biomaterial", FieldType::NullStr),
        ("organ", FieldType::NullStr),
        ("organ_part", FieldType::NullStr),
        ("disease", FieldType::NullStr),
        ("preservation_method", FieldType::NullStr),
    ])
}

fn file_types() -> FieldTypes {
    let mut types = leaves([
        ("document_id", FieldType::NullStr),
        ("file_type", FieldType::NullStr),
        ("name", FieldType::NullStr),
        ("format", FieldType::NullStr),
        ("size", FieldType::NullInt),
        ("uuid", FieldType::NullStr),
        ("version", FieldType::NullStr),
        ("crc32c", FieldType::NullStr),
        ("sha256", FieldType::NullStr),
        ("content_type", FieldType::NullStr),
        ("drs_uri", FieldType::NullStr),
        ("read_index", FieldType::NullStr),
        ("lane_index", FieldType::NullInt),
        ("is_intermediate", FieldType::NullBool),
        ("file_source", FieldType::NullStr),
        ("content_description", FieldType::NullStr),
        ("matrix_cell_count", FieldType::NullInt),
    ]);
    if let FieldTypes::Nested(fields) = &mut types {
        fields.insert(
            "related_files".to_string(),
            leaves([
                ("name", FieldType::NullStr),
                ("crc32c", FieldType::NullStr),
                ("sha256", FieldType::NullStr),
                ("size", FieldType::NullInt),
                ("uuid", FieldType::NullStr),
                ("version", FieldType::NullStr),
            ]),
        );
    }
    types
}

fn date_types() -> FieldTypes {
    leaves([
        ("document_id", FieldType::NullStr),
        ("version", FieldType::NullStr),
        ("submission_date", FieldType::NullDatetime),
        ("update_date", FieldType::NullDatetime),
        ("last_modified_date", FieldType::NullDatetime),
        ("aggregate_submission_date", FieldType::NullDatetime),
        ("aggregate_update_date", FieldType::NullDatetime),
        ("aggregate_last_modified_date", FieldType::NullDatetime),
    ])
}

/// The field type tree of contributions to the index of `entity_type`.
pub fn field_types(entity_type: EntityType) -> FieldTypes {
    let mut sample = specimen_types();
    if let FieldTypes::Nested(fields) = &mut sample {
        for (name, field_type) in [
            ("entity_type", FieldType::NullStr),
            ("effective_organ", FieldType::NullStr),
            ("cell_line_type", FieldType::NullStr),
            ("model_organ", FieldType::NullStr),
            ("model_organ_part", FieldType::NullStr),
        ] {
            fields.insert(name.to_string(), FieldTypes::Leaf(field_type));
        }
    }
    let mut types = FieldTypes::nested([
        ("samples", sample),
        (
            "sequencing_inputs",
            with_biomaterial([("sequencing_input_type", FieldType::NullStr)]),
        ),
        ("specimens", specimen_types()),
        (
            "cell_suspensions",
            with_biomaterial([
                ("total_estimated_cells", FieldType::NullInt),
                ("total_estimated_cells_redundant", FieldType::NullInt),
                ("selected_cell_type", FieldType::NullStr),
                ("organ", FieldType::NullStr),
                ("organ_part", FieldType::NullStr),
            ]),
        ),
        (
            "cell_lines",
            with_biomaterial([
                ("cell_line_type", FieldType::NullStr),
                ("model_organ", FieldType::NullStr),
            ]),
        ),
        (
            "donors",
            with_biomaterial([
                ("biological_sex", FieldType::NullStr),
                ("genus_species", FieldType::NullStr),
                ("diseases", FieldType::NullStr),
                ("development_stage", FieldType::NullStr),
                ("organism_age", FieldType::ValueAndUnit),
                ("organism_age_range", FieldType::ClosedRange),
            ]),
        ),
        (
            "organoids",
            with_biomaterial([
                ("model_organ", FieldType::NullStr),
                ("model_organ_part", FieldType::NullStr),
            ]),
        ),
        (
            "imaged_specimens",
            with_biomaterial([("slice_thickness", FieldType::NullFloat)]),
        ),
        ("files", file_types()),
        (
            "protocols",
            leaves([
                ("document_id", FieldType::NullStr),
                ("library_construction_approach", FieldType::NullStr),
                ("nucleic_acid_source", FieldType::NullStr),
                ("instrument_manufacturer_model", FieldType::NullStr),
                ("paired_end", FieldType::NullBool),
                ("sequencing_approach", FieldType::NullStr),
                ("workflow", FieldType::NullStr),
                ("assay_type", FieldType::NullStr),
            ]),
        ),
        (
            "sequencing_processes",
            leaves([("document_id", FieldType::NullStr)]),
        ),
        (
            "projects",
            leaves([
                ("document_id", FieldType::NullStr),
                ("project_title", FieldType::NullStr),
                ("project_description", FieldType::NullStr),
                ("project_short_name", FieldType::NullStr),
                ("laboratory", FieldType::NullStr),
                ("institutions", FieldType::NullStr),
                ("contact_names", FieldType::NullStr),
                ("contributors", FieldType::PassThrough),
                ("publication_titles", FieldType::NullStr),
                ("publications", FieldType::PassThrough),
                ("insdc_project_accessions", FieldType::NullStr),
                ("geo_series_accessions", FieldType::NullStr),
                ("array_express_accessions", FieldType::NullStr),
                ("insdc_study_accessions", FieldType::NullStr),
                ("supplementary_links", FieldType::NullStr),
                ("estimated_cell_count", FieldType::NullInt),
                ("data_use_restriction", FieldType::NullStr),
                ("duos_id", FieldType::NullStr),
            ]),
        ),
        ("dates", date_types()),
    ]);
    if matches!(entity_type, EntityType::Projects | EntityType::Bundles)
        && let FieldTypes::Nested(fields) = &mut types
    {
        let matrix = FieldTypes::nested([
            ("document_id", FieldType::NullStr.into()),
            ("file", file_types()),
            ("strata", FieldType::NullStr.into()),
        ]);
        fields.insert("matrices".to_string(), matrix.clone());
        fields.insert("contributed_analyses".to_string(), matrix);
    }
    types
}
