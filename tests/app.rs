mod common;

use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8Path;
use serde_json::json;

use azul_metadata::app::{App, DocumentStore, MemoryStore, NullSink, ProgressEvent, ProgressSink};
use azul_metadata::config::{ResolvedConfig, default_entity_types};
use azul_metadata::domain::{EntityReference, EntityType};
use azul_metadata::error::AzulError;
use azul_metadata::metadata::source::BundleSource;

use common::{VERSION, fqid, id, list, sequencing_bundle};

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

impl RecordingSink {
    fn count(&self, phase: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.starts_with(phase))
            .count()
    }
}

fn reference(entity_type: EntityType, name: &str) -> EntityReference {
    EntityReference {
        entity_type,
        entity_id: id(name),
    }
}

#[test]
fn transform_then_aggregate() {
    let app = App::new(MemoryStore::new(), ResolvedConfig::default());
    let source = sequencing_bundle().source(fqid("bundle", VERSION));

    let result = app.transform(&source, &NullSink).unwrap();
    assert!(!result.deleted);
    assert_eq!(result.contributions.len(), 5);
    for entity_type in EntityType::ALL {
        assert_eq!(result.counts[&entity_type], 1, "{entity_type}");
    }

    // Stored contributions are in index form
    let stored = app
        .store()
        .contributions(&reference(EntityType::Files, "reads"))
        .unwrap();
    assert_eq!(stored.len(), 1);
    let donor = &list(&stored[0].contents, "donors")[0];
    assert_eq!(donor["organism_age"], json!("20-30 year"));

    let aggregated = app.aggregate(None, &NullSink).unwrap();
    assert_eq!(aggregated.aggregates.len(), 5);
    let reads = app
        .store()
        .aggregate(&reference(EntityType::Files, "reads"))
        .unwrap()
        .unwrap();
    assert_eq!(reads.bundles, vec![fqid("bundle", VERSION)]);
    let donors = list(&reads.contents, "donors");
    assert_eq!(donors[0]["organism_age"], json!([{"value": "20-30", "unit": "year"}]));
    assert_eq!(donors[0]["donor_count"], json!(1));
}

#[test]
fn delete_retracts_aggregates() {
    let app = App::new(MemoryStore::new(), ResolvedConfig::default());
    let source = sequencing_bundle().source(fqid("bundle", VERSION));
    app.transform(&source, &NullSink).unwrap();
    app.aggregate(None, &NullSink).unwrap();

    let result = app.delete(&source, &NullSink).unwrap();
    assert!(result.deleted);
    assert!(result.contributions.iter().all(|contribution| contribution.deleted));

    let aggregated = app.aggregate(None, &NullSink).unwrap();
    assert!(aggregated.aggregates.is_empty());
    for entity_type in EntityType::ALL {
        let entity = result
            .contributions
            .iter()
            .find(|contribution| contribution.entity.entity_type == entity_type)
            .unwrap()
            .entity;
        assert_eq!(app.store().aggregate(&entity).unwrap(), None);
    }
}

#[test]
fn partitions_report_progress() {
    let config = ResolvedConfig {
        entity_types: default_entity_types(2),
        ..ResolvedConfig::default()
    };
    let app = App::new(MemoryStore::new(), config);
    let sink = RecordingSink::default();
    let source = sequencing_bundle().source(fqid("bundle", VERSION));
    let result = app.transform(&source, &sink).unwrap();
    assert_eq!(result.contributions.len(), 5);
    assert_eq!(sink.count("phase=Transform"), 4 * EntityType::ALL.len());
    assert_eq!(sink.count("phase=Done"), 1);

    app.aggregate(Some(&[reference(EntityType::Projects, "project")]), &sink)
        .unwrap();
    assert_eq!(sink.count("phase=Aggregate"), 1);
}

#[test]
fn invalid_bundle_is_malformed_input() {
    let app = App::new(MemoryStore::new(), ResolvedConfig::default());
    let mut source = sequencing_bundle().source(fqid("bundle", VERSION));
    source.metadata.remove("links.json");
    let err = app.transform(&source, &NullSink).unwrap_err();
    assert!(err.is_malformed_input());
    assert!(app.store().entities().unwrap().is_empty());
}

#[test]
fn bundle_directory_is_loaded() {
    let builder = sequencing_bundle();
    let fqid = fqid("bundle", VERSION);
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8Path::from_path(temp.path()).unwrap();

    let dir = root.join(fqid.to_string());
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("manifest.json"), builder.manifest().to_string()).unwrap();
    for (name, content) in builder.metadata() {
        fs::write(dir.join(name), content.to_string()).unwrap();
    }
    fs::write(dir.join("README.txt"), "ignored").unwrap();

    let source = BundleSource::from_dir(&dir).unwrap();
    assert_eq!(source.fqid, fqid);
    assert_eq!(source.metadata.len(), builder.metadata().len());

    let app = App::new(MemoryStore::new(), ResolvedConfig::default());
    let result = app.transform(&source, &NullSink).unwrap();
    assert_eq!(result.bundle, fqid);
    assert_eq!(result.contributions.len(), 5);
}

#[test]
fn wrapped_manifest_supplies_fqid() {
    let builder = sequencing_bundle();
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(temp.path()).unwrap();
    let manifest = json!({"bundle": {
        "uuid": id("bundle").to_string(),
        "version": VERSION,
        "files": builder.manifest(),
        "stitched": [id("reads").to_string()],
    }});
    fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    for (name, content) in builder.metadata() {
        fs::write(dir.join(name), content.to_string()).unwrap();
    }
    let source = BundleSource::from_dir(dir).unwrap();
    assert_eq!(source.fqid, fqid("bundle", VERSION));
    assert!(source.stitched.contains(&id("reads")));
}

#[test]
fn missing_manifest_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8Path::from_path(temp.path()).unwrap();
    assert_matches!(
        BundleSource::from_dir(dir),
        Err(AzulError::MissingMetadataFile(_))
    );
}
