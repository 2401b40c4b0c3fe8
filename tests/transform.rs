mod common;

use std::collections::BTreeSet;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use azul_metadata::domain::{BundlePartition, EntityType};
use azul_metadata::error::AzulError;
use azul_metadata::metadata::bundle::Bundle;
use azul_metadata::metadata::entity::{Entity, EntityId};
use azul_metadata::submitter::{Submitter, SubmitterCategory};
use azul_metadata::transform::{Contribution, Transformer, is_intermediate_matrix, transformers};
use azul_metadata::visitor::{
    EntityVisitor, TransformerVisitor, file_groups, find_ancestor_samples, group_zarrs,
};

use common::{BundleBuilder, VERSION, fqid, id, list, sequencing_bundle};

fn contributions(bundle: &Bundle, entity_type: EntityType) -> Vec<Contribution> {
    let transformer = transformers(bundle, &[entity_type]).unwrap().pop().unwrap();
    transformer
        .transform(&BundlePartition::root())
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn sequence_file_contribution() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));
    let contributions = contributions(&bundle, EntityType::Files);
    assert_eq!(contributions.len(), 1);

    let contribution = &contributions[0];
    assert_eq!(contribution.entity.entity_id, id("reads"));
    assert_eq!(contribution.bundle, fqid("bundle", VERSION));
    let contents = &contribution.contents;
    assert_eq!(list(contents, "donors").len(), 1);
    assert_eq!(list(contents, "specimens").len(), 1);
    assert_eq!(list(contents, "cell_suspensions").len(), 1);
    assert_eq!(list(contents, "projects").len(), 1);
    assert_eq!(list(contents, "protocols").len(), 2);
    assert_eq!(list(contents, "sequencing_processes").len(), 1);
    assert_eq!(list(contents, "sequencing_inputs").len(), 1);

    let samples = list(contents, "samples");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["entity_type"], json!("specimens"));
    assert_eq!(samples[0]["effective_organ"], json!("blood"));

    let donor = &list(contents, "donors")[0];
    assert_eq!(donor["genus_species"], json!(["Homo sapiens"]));
    assert_eq!(donor["organism_age"], json!({"value": "20-30", "unit": "year"}));
    assert!(donor["organism_age_range"]["gte"].is_number());

    let file = &list(contents, "files")[0];
    assert_eq!(file["name"], json!("reads_R1.fastq.gz"));
    assert_eq!(file["read_index"], json!("read1"));
    assert_eq!(file["is_intermediate"], Value::Null);

    let suspension = &list(contents, "cell_suspensions")[0];
    assert_eq!(suspension["total_estimated_cells"], json!(1000));
    assert_eq!(suspension["organ"], json!(["blood"]));

    let replica = contribution.replica.as_ref().unwrap();
    assert_eq!(replica.replica_type, "file");
    assert_eq!(replica.entity_id, id("reads"));
}

#[test]
fn samples_stop_at_specimen() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));
    let mut samples = BTreeSet::new();
    find_ancestor_samples(&bundle, id("reads"), &mut samples);
    assert_eq!(samples, BTreeSet::from([id("specimen")]));

    let contributions = contributions(&bundle, EntityType::Samples);
    assert_eq!(contributions.len(), 1);
    assert_eq!(contributions[0].entity.entity_id, id("specimen"));
    assert_eq!(list(&contributions[0].contents, "files").len(), 1);
}

#[test]
fn cell_suspension_contribution() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));
    let contributions = contributions(&bundle, EntityType::CellSuspensions);
    assert_eq!(contributions.len(), 1);
    let contents = &contributions[0].contents;
    assert_eq!(list(contents, "files").len(), 1);
    assert_eq!(list(contents, "donors").len(), 1);
    assert_eq!(list(contents, "samples").len(), 1);
}

#[test]
fn only_leaf_suspensions_count_cells() {
    let mut builder = sequencing_bundle();
    builder
        .biomaterial(
            "cell_suspension",
            "enriched",
            json!({"estimated_cell_count": 400}),
        )
        .process(
            "process",
            "enrichment",
            &[("suspension", "cell_suspension")],
            &[("enriched", "cell_suspension")],
            &[],
        );
    let bundle = builder.build(fqid("bundle", VERSION));
    let projects = contributions(&bundle, EntityType::Projects);
    let suspensions = list(&projects[0].contents, "cell_suspensions");
    assert_eq!(suspensions.len(), 2);
    let suspension = |name: &str| {
        suspensions
            .iter()
            .find(|suspension| suspension["document_id"] == json!(id(name).to_string()))
            .unwrap()
    };

    let parent = suspension("suspension");
    assert_eq!(parent["total_estimated_cells"], Value::Null);
    assert_eq!(parent["total_estimated_cells_redundant"], json!(1000));
    let leaf = suspension("enriched");
    assert_eq!(leaf["total_estimated_cells"], json!(400));
    assert_eq!(leaf["total_estimated_cells_redundant"], json!(400));
    assert_eq!(leaf["organ"], json!(["blood"]));
}

#[test]
fn matrix_hints_on_sequence_file_are_ignored() {
    let mut builder = BundleBuilder::new();
    builder
        .biomaterial(
            "specimen_from_organism",
            "specimen",
            json!({"organ": {"text": "blood"}}),
        )
        .file(
            "sequence_file",
            "reads",
            "reads.loom",
            json!({
                "format": "loom",
                "read_index": "read1",
                "content_description": [{"text": "Count matrix"}],
            }),
        )
        .process(
            "process",
            "assay",
            &[("specimen", "specimen_from_organism")],
            &[("reads", "sequence_file")],
            &[],
        );
    let bundle = builder.build(fqid("bundle", VERSION));
    let reads = bundle.entity(&id("reads")).unwrap();
    assert!(!reads.as_file().unwrap().is_matrix());
    assert_eq!(is_intermediate_matrix(&bundle, reads), None);

    let contributions = contributions(&bundle, EntityType::Files);
    assert_eq!(contributions.len(), 1);
    let file = &list(&contributions[0].contents, "files")[0];
    assert_eq!(file["is_intermediate"], Value::Null);
    assert_eq!(file["content_description"], json!(["Count matrix"]));
}

#[test]
fn singleton_contributions() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));

    let projects = contributions(&bundle, EntityType::Projects);
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].entity.entity_id, id("project"));
    assert_eq!(projects[0].replica.as_ref().unwrap().replica_type, "project");
    assert_eq!(list(&projects[0].contents, "files").len(), 1);
    assert!(list(&projects[0].contents, "matrices").is_empty());

    let bundles = contributions(&bundle, EntityType::Bundles);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].entity.entity_id, id("bundle"));
    let dates = list(&bundles[0].contents, "dates");
    assert_eq!(dates[0]["submission_date"], json!("2020-01-01T00:00:00.000000Z"));
    assert_eq!(dates[0]["aggregate_update_date"], json!("2020-02-01T00:00:00.000000Z"));
}

fn zarr_bundle() -> BundleBuilder {
    let mut builder = sequencing_bundle();
    let members = [
        ("zattrs", "matrix.zarr/.zattrs"),
        ("zarray_a", "matrix.zarr/a/.zarray"),
        ("zarray_b", "matrix.zarr/b/.zarray"),
        ("chunk", "matrix.zarr/a/0.0"),
    ];
    for (name, file_name) in members {
        builder.file("analysis_file", name, file_name, json!({"format": "zarr"}));
    }
    builder.protocol("analysis_protocol", "pipeline", json!({}));
    builder.process(
        "analysis_process",
        "analysis",
        &[("reads", "sequence_file")],
        &members.map(|(name, _)| (name, "analysis_file")),
        &[("pipeline", "analysis_protocol")],
    );
    builder
}

#[test]
fn zarr_members_travel_with_zattrs() {
    let bundle = zarr_bundle().build(fqid("bundle", VERSION));

    let stores = group_zarrs(bundle.files());
    assert_eq!(stores.len(), 1);
    let members = stores["matrix.zarr"]
        .iter()
        .map(|entity| entity.document_id)
        .collect::<BTreeSet<_>>();
    assert_eq!(
        members,
        BTreeSet::from([id("zarray_a"), id("zarray_b"), id("chunk")])
    );

    let groups = file_groups(bundle.files());
    assert_eq!(groups.len(), 2);

    let contributions = contributions(&bundle, EntityType::Files);
    let ids = contributions
        .iter()
        .map(|contribution| contribution.entity.entity_id)
        .collect::<BTreeSet<_>>();
    assert_eq!(ids, BTreeSet::from([id("reads"), id("zattrs")]));

    let zattrs = contributions
        .iter()
        .find(|contribution| contribution.entity.entity_id == id("zattrs"))
        .unwrap();
    let file = &list(&zattrs.contents, "files")[0];
    assert_eq!(file["related_files"].as_array().unwrap().len(), 3);
    assert_eq!(file["is_intermediate"], json!(true));
    assert_eq!(file["file_source"], json!("DCP/2 Analysis"));
}

#[test]
fn untagged_analysis_file_is_attributed_to_dcp2() {
    let bundle = zarr_bundle().build(fqid("bundle", VERSION));
    let file = bundle.entity(&id("zattrs")).unwrap();
    assert!(file.submitter_id.is_none());
    let submitter = Submitter::for_file(&bundle, file).unwrap();
    assert_eq!(submitter, Submitter::Dcp2);
    assert_eq!(submitter.category(), SubmitterCategory::Internal);
}

#[test]
fn stitched_files_are_not_contributed() {
    let mut builder = sequencing_bundle();
    builder.stitched("reads");
    let bundle = builder.build(fqid("bundle", VERSION));
    assert!(contributions(&bundle, EntityType::Files).is_empty());
}

#[test]
fn project_matrix_strata_become_stubs() {
    let mut builder = sequencing_bundle();
    builder.file(
        "supplementary_file",
        "matrix",
        "matrix.loom",
        json!({
            "format": "loom",
            "file_source": "ArrayExpress",
            "strata": "genusSpecies=Homo sapiens;organ=blood,brain\ngenusSpecies=Mus musculus",
        }),
    );
    let bundle = builder.build(fqid("bundle", VERSION));

    let contributions = contributions(&bundle, EntityType::Files);
    let matrix = contributions
        .iter()
        .find(|contribution| contribution.entity.entity_id == id("matrix"))
        .unwrap();
    let donors = list(&matrix.contents, "donors");
    let species = donors
        .iter()
        .flat_map(|donor| donor["genus_species"].as_array().cloned().unwrap_or_default())
        .filter_map(|species| species.as_str().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .len();
    assert_eq!(donors.len(), 2);
    assert_eq!(species, 2);
    assert_eq!(list(&matrix.contents, "specimens").len(), 1);
}

struct Collector(Vec<EntityId>);

impl EntityVisitor for Collector {
    fn visit(&mut self, _bundle: &Bundle, entity: &Entity) {
        self.0.push(entity.document_id);
    }
}

#[test]
fn traversal_visits_each_entity_once() {
    let bundle = zarr_bundle().build(fqid("bundle", VERSION));
    for root in bundle.root_entities() {
        let Collector(visited) = bundle.accept(root.document_id, Collector(Vec::new()));
        let unique = visited.iter().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), visited.len());

        // Independent walk over child edges, plus protocols of processes
        let mut expected = BTreeSet::new();
        let mut stack = vec![root.document_id];
        while let Some(next) = stack.pop() {
            if !expected.insert(next) {
                continue;
            }
            let entity = bundle.entity(&next).unwrap();
            stack.extend(entity.children.iter().copied());
            if let Some(process) = entity.as_process() {
                stack.extend(process.protocols.iter().copied());
            }
        }
        assert_eq!(unique.into_iter().copied().collect::<BTreeSet<_>>(), expected);
    }

    let visitor = bundle.ancestors(id("zattrs"), TransformerVisitor::new());
    assert_eq!(visitor.donors, BTreeSet::from([id("donor")]));
    assert_eq!(visitor.files, BTreeSet::from([id("reads")]));
    assert_eq!(visitor.analysis_processes, BTreeSet::from([id("analysis")]));
}

#[test]
fn partitions_are_exclusive_and_complete() {
    let bundle = zarr_bundle().build(fqid("bundle", VERSION));
    for entity_type in EntityType::ALL {
        let transformer = transformers(&bundle, &[entity_type]).unwrap().pop().unwrap();
        let all = transformer.entities();
        for bits in [1, 2, 4] {
            let mut seen = Vec::new();
            for partition in BundlePartition::root().divide(bits).unwrap() {
                assert_eq!(transformer.estimate(&partition), transformer.entities_in(&partition).len());
                seen.extend(transformer.entities_in(&partition));
            }
            seen.sort();
            assert_eq!(seen, all, "{entity_type} with {bits} bits");
        }
    }
}

#[test]
fn bundle_without_project_is_rejected() {
    let builder = sequencing_bundle();
    let mut source = builder.source(fqid("bundle", VERSION));
    source.metadata.remove("project_0.json");
    let bundle = Bundle::from_source(&source).unwrap();
    assert_matches!(
        transformers(&bundle, &[EntityType::Projects]).err(),
        Some(AzulError::Requirement(_))
    );
}
