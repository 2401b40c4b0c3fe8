mod common;

use std::collections::BTreeSet;

use serde_json::{Value, json};

use azul_metadata::aggregate::{Aggregate, AggregateCollector, reconcile_inner_entities};
use azul_metadata::domain::{BundlePartition, EntityReference, EntityType};
use azul_metadata::metadata::bundle::Bundle;
use azul_metadata::transform::{Contribution, Transformer, transformers};

use common::{VERSION, fqid, id, list, sequencing_bundle};

const LATER: &str = "2021-01-01T000000.000000Z";

fn contributions(bundle: &Bundle, entity_type: EntityType) -> Vec<Contribution> {
    transformers(bundle, &[entity_type])
        .unwrap()
        .pop()
        .unwrap()
        .transform(&BundlePartition::root())
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn all_contributions(bundle: &Bundle) -> Vec<Contribution> {
    EntityType::ALL
        .into_iter()
        .flat_map(|entity_type| contributions(bundle, entity_type))
        .collect()
}

fn aggregate(contributions: impl IntoIterator<Item = Contribution>) -> Vec<Aggregate> {
    let mut collector = AggregateCollector::default();
    collector.extend(contributions);
    collector.aggregates()
}

fn find(aggregates: &[Aggregate], entity_type: EntityType, name: &str) -> Aggregate {
    let entity = EntityReference {
        entity_type,
        entity_id: id(name),
    };
    aggregates
        .iter()
        .find(|aggregate| aggregate.entity == entity)
        .cloned()
        .unwrap()
}

fn strings(value: &Value) -> Vec<&str> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item.as_str().unwrap())
        .collect()
}

#[test]
fn shared_project_has_no_duplicate_contributors() {
    let first = sequencing_bundle().build(fqid("first", VERSION));
    let second = sequencing_bundle().build(fqid("second", VERSION));
    let aggregates = aggregate(
        contributions(&first, EntityType::Projects)
            .into_iter()
            .chain(contributions(&second, EntityType::Projects)),
    );
    assert_eq!(aggregates.len(), 1);

    let project = &aggregates[0];
    assert_eq!(project.num_contributions, 2);
    let projects = list(&project.contents, "projects");
    assert_eq!(projects.len(), 1);
    for field in ["institutions", "contact_names"] {
        let values = strings(&projects[0][field]);
        let unique = values.iter().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), values.len(), "{field}");
    }
    assert_eq!(strings(&projects[0]["institutions"]), vec!["EMBL-EBI", "UCSC"]);
}

#[test]
fn file_aggregate_folds_project_fields() {
    let first = sequencing_bundle().build(fqid("first", VERSION));
    let second = sequencing_bundle().build(fqid("second", VERSION));
    let aggregates = aggregate(
        contributions(&first, EntityType::Files)
            .into_iter()
            .chain(contributions(&second, EntityType::Files)),
    );
    let reads = find(&aggregates, EntityType::Files, "reads");
    assert_eq!(reads.bundles, vec![fqid("first", VERSION), fqid("second", VERSION)]);

    let projects = list(&reads.contents, "projects");
    assert_eq!(projects.len(), 1);
    assert_eq!(strings(&projects[0]["institutions"]), vec!["EMBL-EBI", "UCSC"]);
    assert_eq!(projects[0]["project_title"], json!(["Project title"]));
    assert!(projects[0].get("contributors").is_none());

    let files = list(&reads.contents, "files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], json!("reads_R1.fastq.gz"));
}

#[test]
fn folding_is_idempotent_and_order_independent() {
    let first = sequencing_bundle().build(fqid("first", VERSION));
    let second = sequencing_bundle().build(fqid("second", LATER));

    let mut contributions = all_contributions(&first);
    contributions.extend(all_contributions(&second));
    let forward = aggregate(contributions.clone());

    let mut reversed = contributions.clone();
    reversed.reverse();
    assert_eq!(aggregate(reversed), forward);

    let twice = contributions.iter().cloned().chain(contributions.iter().cloned());
    assert_eq!(aggregate(twice), forward);
}

#[test]
fn later_bundle_version_replaces_earlier() {
    let mut old = sequencing_bundle();
    old.biomaterial(
        "donor_organism",
        "extra",
        json!({"genus_species": [{"text": "Homo sapiens"}], "organism_age": "40"}),
    );
    old.process(
        "process",
        "extra_collection",
        &[("extra", "donor_organism")],
        &[("specimen", "specimen_from_organism")],
        &[],
    );
    let old = old.build(fqid("bundle", VERSION));
    let new = sequencing_bundle().build(fqid("bundle", LATER));

    let aggregates = aggregate(
        contributions(&old, EntityType::Files)
            .into_iter()
            .chain(contributions(&new, EntityType::Files)),
    );
    let reads = find(&aggregates, EntityType::Files, "reads");
    assert_eq!(reads.bundles, vec![fqid("bundle", LATER)]);
    assert_eq!(reads.num_contributions, 1);
    let donors = list(&reads.contents, "donors");
    assert_eq!(donors[0]["donor_count"], json!(1));
}

#[test]
fn deletion_of_latest_version_retracts_entity() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));
    let other = sequencing_bundle().build(fqid("other", VERSION));
    let mut retracted = contributions(&bundle, EntityType::Files);
    let deletions = retracted
        .iter()
        .map(|contribution| Contribution::deletion(contribution.entity, contribution.bundle.clone()))
        .collect::<Vec<_>>();
    retracted.extend(deletions);
    assert!(aggregate(retracted.clone()).is_empty());

    // Another bundle still contributes the same file
    let remaining = aggregate(
        retracted
            .into_iter()
            .chain(contributions(&other, EntityType::Files)),
    );
    let reads = find(&remaining, EntityType::Files, "reads");
    assert_eq!(reads.bundles, vec![fqid("other", VERSION)]);
}

#[test]
fn inner_entities_are_reconciled_by_version() {
    let old = json!({"document_id": "analysis", "workflow": "optimus_v1"});
    let new = json!({"document_id": "analysis", "workflow": "optimus_v2", "version": "2"});
    let got = reconcile_inner_entities("analysis_protocols", [(VERSION, &old), (LATER, &new)]);
    assert_eq!(got, vec![&new]);
}
