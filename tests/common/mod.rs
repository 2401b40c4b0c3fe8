#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};
use uuid::Uuid;

use azul_metadata::domain::BundleFqid;
use azul_metadata::metadata::bundle::Bundle;
use azul_metadata::metadata::source::BundleSource;

pub const SCHEMA_BASE: &str = "https://schema.humancellatlas.org/type";
pub const VERSION: &str = "2020-01-01T000000.000000Z";

pub fn id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

pub fn fqid(name: &str, version: &str) -> BundleFqid {
    BundleFqid::new(id(name), version)
}

fn core_type(schema: &str) -> &'static str {
    if schema == "project" {
        "project"
    } else if schema.ends_with("_protocol") {
        "protocol"
    } else if schema.ends_with("_file") {
        "file"
    } else if schema.ends_with("process") {
        "process"
    } else {
        "biomaterial"
    }
}

/// Builds the metadata files and manifest of a DCP/2-style bundle, with
/// entity IDs derived from short names.
pub struct BundleBuilder {
    metadata: Map<String, Value>,
    manifest: Vec<Value>,
    links: Vec<Value>,
    counters: BTreeMap<String, usize>,
    stitched: BTreeSet<Uuid>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::with_project("project", "Project title")
    }

    pub fn with_project(name: &str, title: &str) -> Self {
        let mut builder = BundleBuilder {
            metadata: Map::new(),
            manifest: Vec::new(),
            links: Vec::new(),
            counters: BTreeMap::new(),
            stitched: BTreeSet::new(),
        };
        builder.entity(
            "project",
            name,
            json!({
                "project_core": {
                    "project_short_name": format!("{name}-short"),
                    "project_title": title,
                    "project_description": "A description",
                },
                "contributors": [
                    {"name": "Doe,Jane", "institution": "EMBL-EBI", "laboratory": "Lab A"},
                    {"name": "Roe,Rick", "institution": "UCSC"},
                ],
                "publications": [{"title": "A paper", "doi": "10.1000/xyz"}],
            }),
        );
        builder
    }

    pub fn entity(&mut self, schema: &str, name: &str, mut content: Value) -> &mut Self {
        let object = content.as_object_mut().expect("content is an object");
        object.insert(
            "describedBy".into(),
            json!(format!("{SCHEMA_BASE}/{}/1.0.0/{schema}", core_type(schema))),
        );
        object.insert(
            "provenance".into(),
            json!({
                "document_id": id(name).to_string(),
                "submission_date": "2020-01-01T00:00:00.000000Z",
                "update_date": "2020-02-01T00:00:00.000000Z",
            }),
        );
        let counter = self.counters.entry(schema.to_string()).or_default();
        self.metadata
            .insert(format!("{schema}_{counter}.json"), content);
        *counter += 1;
        self
    }

    pub fn biomaterial(&mut self, schema: &str, name: &str, mut content: Value) -> &mut Self {
        content
            .as_object_mut()
            .expect("content is an object")
            .insert("biomaterial_core".into(), json!({"biomaterial_id": name}));
        self.entity(schema, name, content)
    }

    pub fn file(&mut self, schema: &str, name: &str, file_name: &str, mut content: Value) -> &mut Self {
        let format = content
            .get("format")
            .cloned()
            .unwrap_or_else(|| json!("fastq.gz"));
        let object = content.as_object_mut().expect("content is an object");
        object.remove("format");
        let mut file_core = json!({"file_name": file_name, "format": format});
        if let Some(description) = object.remove("content_description") {
            file_core["content_description"] = description;
        }
        object.insert("file_core".into(), file_core);
        self.manifest.push(json!({
            "name": file_name,
            "uuid": id(&format!("{name}/data")).to_string(),
            "version": "2020-01-01T00:00:00.000000Z",
            "size": 100,
            "indexed": false,
            "content-type": "application/octet-stream",
            "crc32c": "00000000",
            "sha256": "ff",
        }));
        self.entity(schema, name, content)
    }

    pub fn protocol(&mut self, schema: &str, name: &str, mut content: Value) -> &mut Self {
        content
            .as_object_mut()
            .expect("content is an object")
            .insert("protocol_core".into(), json!({"protocol_id": name}));
        self.entity(schema, name, content)
    }

    pub fn process(
        &mut self,
        schema: &str,
        name: &str,
        inputs: &[(&str, &str)],
        outputs: &[(&str, &str)],
        protocols: &[(&str, &str)],
    ) -> &mut Self {
        self.entity(schema, name, json!({"process_core": {"process_id": name}}));
        let ids = |items: &[(&str, &str)], id_key: &str, type_key: &str| {
            items
                .iter()
                .map(|(item, item_type)| json!({id_key: id(item).to_string(), type_key: item_type}))
                .collect::<Vec<_>>()
        };
        self.links.push(json!({
            "link_type": "process_link",
            "process_id": id(name).to_string(),
            "process_type": schema,
            "inputs": ids(inputs, "input_id", "input_type"),
            "outputs": ids(outputs, "output_id", "output_type"),
            "protocols": ids(protocols, "protocol_id", "protocol_type"),
        }));
        self
    }

    pub fn stitched(&mut self, name: &str) -> &mut Self {
        self.stitched.insert(id(name));
        self
    }

    pub fn metadata(&self) -> Map<String, Value> {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            "links.json".into(),
            json!({"schema_version": "3.0.0", "links": self.links}),
        );
        metadata
    }

    pub fn manifest(&self) -> Value {
        Value::Array(self.manifest.clone())
    }

    pub fn source(&self, fqid: BundleFqid) -> BundleSource {
        BundleSource {
            fqid,
            manifest: self.manifest.clone(),
            metadata: self.metadata(),
            stitched: self.stitched.clone(),
        }
    }

    pub fn build(&self, fqid: BundleFqid) -> Bundle {
        Bundle::from_source(&self.source(fqid)).expect("valid bundle")
    }
}

/// Donor, specimen, cell suspension and a sequence file, with the library
/// preparation and sequencing protocols on the last step.
pub fn sequencing_bundle() -> BundleBuilder {
    let mut builder = BundleBuilder::new();
    builder
        .biomaterial(
            "donor_organism",
            "donor",
            json!({
                "genus_species": [{"text": "Homo sapiens", "ontology": "NCBITaxon:9606"}],
                "development_stage": {"text": "adult"},
                "sex": "female",
                "organism_age": "20-30",
                "organism_age_unit": {"text": "year"},
                "diseases": [{"text": "normal"}],
            }),
        )
        .biomaterial(
            "specimen_from_organism",
            "specimen",
            json!({
                "organ": {"text": "blood", "ontology_label": "blood"},
                "organ_parts": [{"text": "venous blood"}],
                "diseases": [{"text": "normal"}],
            }),
        )
        .biomaterial(
            "cell_suspension",
            "suspension",
            json!({
                "estimated_cell_count": 1000,
                "selected_cell_types": [{"text": "T cell"}],
            }),
        )
        .protocol(
            "library_preparation_protocol",
            "library",
            json!({"library_construction_method": {"text": "10x 3' v2"}}),
        )
        .protocol(
            "sequencing_protocol",
            "sequencing",
            json!({"instrument_manufacturer_model": {"text": "Illumina NovaSeq"}, "paired_end": true}),
        )
        .file(
            "sequence_file",
            "reads",
            "reads_R1.fastq.gz",
            json!({"read_index": "read1", "lane_index": 1}),
        )
        .process(
            "process",
            "collection",
            &[("donor", "donor_organism")],
            &[("specimen", "specimen_from_organism")],
            &[],
        )
        .process(
            "process",
            "dissociation",
            &[("specimen", "specimen_from_organism")],
            &[("suspension", "cell_suspension")],
            &[],
        )
        .process(
            "process",
            "assay",
            &[("suspension", "cell_suspension")],
            &[("reads", "sequence_file")],
            &[
                ("library", "library_preparation_protocol"),
                ("sequencing", "sequencing_protocol"),
            ],
        );
    builder
}

pub fn list<'a>(contents: &'a Map<String, Value>, key: &str) -> &'a Vec<Value> {
    contents[key].as_array().expect("inner entities are a list")
}
