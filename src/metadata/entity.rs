use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::domain::{normalize_date, parse_uuid};
use crate::error::{AzulError, AzulResult};
use crate::metadata::manifest::ManifestEntry;

pub type EntityId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreType {
    Project,
    Biomaterial,
    Process,
    Protocol,
    File,
}

impl CoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreType::Project => "project",
            CoreType::Biomaterial => "biomaterial",
            CoreType::Process => "process",
            CoreType::Protocol => "protocol",
            CoreType::File => "file",
        }
    }

    /// Key of the entity list inside a legacy bundle-level metadata file.
    pub fn plural(&self) -> &'static str {
        match self {
            CoreType::Project => "projects",
            CoreType::Biomaterial => "biomaterials",
            CoreType::Process => "processes",
            CoreType::Protocol => "protocols",
            CoreType::File => "files",
        }
    }
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every metadata schema the loader knows how to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaName {
    Project,
    DonorOrganism,
    SpecimenFromOrganism,
    CellSuspension,
    CellLine,
    Organoid,
    ImagedSpecimen,
    Process,
    AnalysisProcess,
    SequencingProcess,
    LibraryPreparationProcess,
    DissociationProcess,
    EnrichmentProcess,
    Protocol,
    AnalysisProtocol,
    AggregateGenerationProtocol,
    CollectionProtocol,
    DifferentiationProtocol,
    DissociationProtocol,
    EnrichmentProtocol,
    IpscInductionProtocol,
    ImagingProtocol,
    ImagingPreparationProtocol,
    LibraryPreparationProtocol,
    SequencingProtocol,
    AnalysisFile,
    ImageFile,
    ReferenceFile,
    SequenceFile,
    SupplementaryFile,
}

impl SchemaName {
    pub const ALL: [SchemaName; 30] = [
        SchemaName::Project,
        SchemaName::DonorOrganism,
        SchemaName::SpecimenFromOrganism,
        SchemaName::CellSuspension,
        SchemaName::CellLine,
        SchemaName::Organoid,
        SchemaName::ImagedSpecimen,
        SchemaName::Process,
        SchemaName::AnalysisProcess,
        SchemaName::SequencingProcess,
        SchemaName::LibraryPreparationProcess,
        SchemaName::DissociationProcess,
        SchemaName::EnrichmentProcess,
        SchemaName::Protocol,
        SchemaName::AnalysisProtocol,
        SchemaName::AggregateGenerationProtocol,
        SchemaName::CollectionProtocol,
        SchemaName::DifferentiationProtocol,
        SchemaName::DissociationProtocol,
        SchemaName::EnrichmentProtocol,
        SchemaName::IpscInductionProtocol,
        SchemaName::ImagingProtocol,
        SchemaName::ImagingPreparationProtocol,
        SchemaName::LibraryPreparationProtocol,
        SchemaName::SequencingProtocol,
        SchemaName::AnalysisFile,
        SchemaName::ImageFile,
        SchemaName::ReferenceFile,
        SchemaName::SequenceFile,
        SchemaName::SupplementaryFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaName::Project => "project",
            SchemaName::DonorOrganism => "donor_organism",
            SchemaName::SpecimenFromOrganism => "specimen_from_organism",
            SchemaName::CellSuspension => "cell_suspension",
            SchemaName::CellLine => "cell_line",
            SchemaName::Organoid => "organoid",
            SchemaName::ImagedSpecimen => "imaged_specimen",
            SchemaName::Process => "process",
            SchemaName::AnalysisProcess => "analysis_process",
            SchemaName::SequencingProcess => "sequencing_process",
            SchemaName::LibraryPreparationProcess => "library_preparation_process",
            SchemaName::DissociationProcess => "dissociation_process",
            SchemaName::EnrichmentProcess => "enrichment_process",
            SchemaName::Protocol => "protocol",
            SchemaName::AnalysisProtocol => "analysis_protocol",
            SchemaName::AggregateGenerationProtocol => "aggregate_generation_protocol",
            SchemaName::CollectionProtocol => "collection_protocol",
            SchemaName::DifferentiationProtocol => "differentiation_protocol",
            SchemaName::DissociationProtocol => "dissociation_protocol",
            SchemaName::EnrichmentProtocol => "enrichment_protocol",
            SchemaName::IpscInductionProtocol => "ipsc_induction_protocol",
            SchemaName::ImagingProtocol => "imaging_protocol",
            SchemaName::ImagingPreparationProtocol => "imaging_preparation_protocol",
            SchemaName::LibraryPreparationProtocol => "library_preparation_protocol",
            SchemaName::SequencingProtocol => "sequencing_protocol",
            SchemaName::AnalysisFile => "analysis_file",
            SchemaName::ImageFile => "image_file",
            SchemaName::ReferenceFile => "reference_file",
            SchemaName::SequenceFile => "sequence_file",
            SchemaName::SupplementaryFile => "supplementary_file",
        }
    }

    pub fn core_type(&self) -> CoreType {
        match self {
            SchemaName::Project => CoreType::Project,
            SchemaName::DonorOrganism
            | SchemaName::SpecimenFromOrganism
            | SchemaName::CellSuspension
            | SchemaName::CellLine
            | SchemaName::Organoid
            | SchemaName::ImagedSpecimen => CoreType::Biomaterial,
            SchemaName::Process
            | SchemaName::AnalysisProcess
            | SchemaName::SequencingProcess
            | SchemaName::LibraryPreparationProcess
            | SchemaName::DissociationProcess
            | SchemaName::EnrichmentProcess => CoreType::Process,
            SchemaName::Protocol
            | SchemaName::AnalysisProtocol
            | SchemaName::AggregateGenerationProtocol
            | SchemaName::CollectionProtocol
            | SchemaName::DifferentiationProtocol
            | SchemaName::DissociationProtocol
            | SchemaName::EnrichmentProtocol
            | SchemaName::IpscInductionProtocol
            | SchemaName::ImagingProtocol
            | SchemaName::ImagingPreparationProtocol
            | SchemaName::LibraryPreparationProtocol
            | SchemaName::SequencingProtocol => CoreType::Protocol,
            SchemaName::AnalysisFile
            | SchemaName::ImageFile
            | SchemaName::ReferenceFile
            | SchemaName::SequenceFile
            | SchemaName::SupplementaryFile => CoreType::File,
        }
    }

    pub fn lookup(name: &str) -> AzulResult<SchemaName> {
        SchemaName::ALL
            .into_iter()
            .find(|schema_name| schema_name.as_str() == name)
            .ok_or_else(|| AzulError::TypeLookup(name.to_string()))
    }

    /// Resolves the schema from a `describedBy` URL such as
    /// `https://schema.humancellatlas.org/type/biomaterial/15.5.0/donor_organism`.
    pub fn from_described_by(url: &str) -> AzulResult<SchemaName> {
        let name = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
        SchemaName::lookup(name).map_err(|_| AzulError::TypeLookup(url.to_string()))
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct OntologyTerm {
    pub ontology: Option<String>,
    pub text: Option<String>,
    pub ontology_label: Option<String>,
}

impl OntologyTerm {
    /// Accepts both ontology objects and the bare strings older schemas use.
    pub fn from_json(value: &Value, address: &str) -> AzulResult<Self> {
        let term = match value {
            Value::String(text) => OntologyTerm {
                ontology: None,
                text: non_empty(text),
                ontology_label: None,
            },
            Value::Object(object) => {
                let field = |key: &str| object.get(key).and_then(Value::as_str).and_then(non_empty);
                OntologyTerm {
                    ontology: field("ontology"),
                    text: field("text"),
                    ontology_label: field("ontology_label"),
                }
            }
            other => {
                return Err(AzulError::invalid(
                    address,
                    format!("expected an ontology term, got {other}"),
                ));
            }
        };
        if term.ontology.is_none() && term.text.is_none() && term.ontology_label.is_none() {
            return Err(AzulError::invalid(
                address,
                format!("ontology term without label, text or code: {value}"),
            ));
        }
        Ok(term)
    }

    pub fn label(&self) -> &str {
        self.ontology_label
            .as_deref()
            .or(self.text.as_deref())
            .or(self.ontology.as_deref())
            .unwrap_or_default()
    }
}

/// Prefers the ontology label, then the free text, then the ontology code.
pub fn ontology_label(term: Option<&OntologyTerm>, default: Option<&str>) -> AzulResult<String> {
    match (term, default) {
        (Some(term), _) => Ok(term.label().to_string()),
        (None, Some(default)) => Ok(default.to_string()),
        (None, None) => Err(AzulError::Requirement(
            "ontology term is absent and no default was given".to_string(),
        )),
    }
}

pub fn ontology_labels(terms: &[OntologyTerm]) -> Vec<String> {
    let labels = terms
        .iter()
        .map(|term| term.label().to_string())
        .collect::<BTreeSet<_>>();
    labels.into_iter().collect()
}

/// A closed age range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeRange {
    pub min: f64,
    pub max: f64,
}

static AGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(?:-\s*(\d+(?:\.\d+)?))?\s*$").expect("valid age regex")
});

impl AgeRange {
    const YEAR: f64 = 365.0 * 24.0 * 3600.0;

    pub fn parse(age: &str, unit: &str) -> Option<AgeRange> {
        let factor = match unit.trim().to_lowercase().trim_end_matches('s') {
            "year" => Self::YEAR,
            "month" => Self::YEAR / 12.0,
            "week" => 7.0 * 24.0 * 3600.0,
            "day" => 24.0 * 3600.0,
            "hour" => 3600.0,
            "minute" => 60.0,
            "second" => 1.0,
            _ => return None,
        };
        let captures = AGE_PATTERN.captures(age)?;
        let min = captures.get(1)?.as_str().parse::<f64>().ok()?;
        let max = match captures.get(2) {
            Some(max) => max.as_str().parse::<f64>().ok()?,
            None => min,
        };
        if max < min {
            return None;
        }
        Some(AgeRange {
            min: min * factor,
            max: max * factor,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({"gte": self.min, "lte": self.max})
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub project_short_name: String,
    pub project_title: String,
    pub project_description: Option<String>,
    pub contributors: Vec<Contributor>,
    pub publications: Vec<Publication>,
    pub insdc_project_accessions: Vec<String>,
    pub geo_series_accessions: Vec<String>,
    pub array_express_accessions: Vec<String>,
    pub insdc_study_accessions: Vec<String>,
    pub supplementary_links: Vec<String>,
    pub estimated_cell_count: Option<i64>,
    pub data_use_restriction: Option<String>,
    pub duos_id: Option<String>,
    /// Files attached to the project through supplementary file links.
    pub supplementary_files: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contributor {
    pub contact_name: String,
    pub email: Option<String>,
    pub institution: Option<String>,
    pub laboratory: Option<String>,
    pub corresponding_contributor: Option<bool>,
    pub project_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    pub publication_title: Option<String>,
    pub doi: Option<String>,
    pub official_hca_publication: Option<bool>,
    pub publication_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Biomaterial {
    pub biomaterial_id: String,
    pub ncbi_taxon_id: Vec<i64>,
    pub has_input_biomaterial: Option<String>,
    pub kind: BiomaterialKind,
}

#[derive(Debug, Clone)]
pub enum BiomaterialKind {
    DonorOrganism(DonorOrganism),
    SpecimenFromOrganism(SpecimenFromOrganism),
    CellSuspension(CellSuspension),
    CellLine(CellLine),
    Organoid(Organoid),
    ImagedSpecimen(ImagedSpecimen),
}

#[derive(Debug, Clone)]
pub struct DonorOrganism {
    pub genus_species: Vec<OntologyTerm>,
    pub diseases: Vec<OntologyTerm>,
    pub development_stage: Option<OntologyTerm>,
    pub ethnicity: Vec<OntologyTerm>,
    pub sex: Option<String>,
    pub is_living: Option<String>,
    pub organism_age: Option<String>,
    pub organism_age_unit: Option<OntologyTerm>,
}

impl DonorOrganism {
    pub fn organism_age_range(&self) -> Option<AgeRange> {
        let age = self.organism_age.as_deref()?;
        let unit = self.organism_age_unit.as_ref()?;
        let range = AgeRange::parse(age, unit.label());
        if range.is_none() {
            tracing::warn!(age, unit = unit.label(), "unparseable organism age");
        }
        range
    }
}

#[derive(Debug, Clone)]
pub struct SpecimenFromOrganism {
    pub organ: Option<OntologyTerm>,
    pub organ_parts: Vec<OntologyTerm>,
    pub diseases: Vec<OntologyTerm>,
    pub preservation_method: Option<String>,
    pub storage_method: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CellSuspension {
    pub estimated_cell_count: Option<i64>,
    pub selected_cell_types: Vec<OntologyTerm>,
}

#[derive(Debug, Clone)]
pub struct CellLine {
    pub cell_line_type: Option<String>,
    pub model_organ: Option<OntologyTerm>,
}

#[derive(Debug, Clone)]
pub struct Organoid {
    pub model_organ: Option<OntologyTerm>,
    pub model_organ_part: Option<OntologyTerm>,
}

#[derive(Debug, Clone)]
pub struct ImagedSpecimen {
    pub slice_thickness: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub process_id: String,
    /// Protocols this process uses; a one-directional edge.
    pub protocols: BTreeSet<EntityId>,
    pub kind: ProcessKind,
}

#[derive(Debug, Clone)]
pub enum ProcessKind {
    Generic,
    Analysis { analysis_run_type: Option<String> },
    Sequencing,
    LibraryPreparation,
    Dissociation,
    Enrichment,
}

#[derive(Debug, Clone)]
pub struct Protocol {
    pub protocol_id: String,
    pub kind: ProtocolKind,
}

#[derive(Debug, Clone)]
pub enum ProtocolKind {
    /// Protocols only described by an optional method.
    Method(Option<OntologyTerm>),
    Analysis,
    Imaging {
        assay_types: Vec<String>,
    },
    LibraryPreparation {
        library_construction_method: Option<OntologyTerm>,
        nucleic_acid_source: Option<String>,
    },
    Sequencing {
        instrument_manufacturer_model: Option<OntologyTerm>,
        paired_end: Option<bool>,
        method: Option<OntologyTerm>,
    },
}

#[derive(Debug, Clone)]
pub struct File {
    pub file_name: String,
    pub file_format: String,
    pub content_description: Vec<OntologyTerm>,
    pub file_source: Option<String>,
    pub manifest_entry: ManifestEntry,
    pub kind: FileKind,
}

#[derive(Debug, Clone)]
pub enum FileKind {
    Sequence {
        read_index: Option<String>,
        lane_index: Option<i64>,
        read_length: Option<i64>,
    },
    Analysis {
        matrix_cell_count: Option<i64>,
    },
    Supplementary {
        file_description: Option<String>,
        strata: Option<String>,
    },
    Reference {
        reference_type: Option<String>,
        assembly_type: Option<String>,
    },
    Image,
}

const MATRIX_FORMATS: [&str; 5] = ["loom", "h5ad", "mtx", "mtx.gz", "zarr"];

impl File {
    /// Only analysis and supplementary files can be matrices.
    pub fn is_matrix(&self) -> bool {
        if !matches!(
            self.kind,
            FileKind::Analysis { .. } | FileKind::Supplementary { .. }
        ) {
            return false;
        }
        let format = self.file_format.trim_start_matches('.').to_lowercase();
        MATRIX_FORMATS.contains(&format.as_str())
            || self.content_description.iter().any(|term| {
                term.label()
                    .split_whitespace()
                    .any(|word| word.eq_ignore_ascii_case("matrix"))
            })
    }

    /// Splits a zarr member name into its store (`X.zarr`) and member path.
    pub fn zarr_store(&self) -> Option<(&str, &str)> {
        let name = self.manifest_entry.name.as_str();
        let index = name.find(".zarr/")?;
        Some((&name[..index + ".zarr".len()], &name[index + ".zarr/".len()..]))
    }
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Project(Project),
    Biomaterial(Biomaterial),
    Process(Process),
    Protocol(Protocol),
    File(File),
}

/// A node of a bundle's metadata graph. Parent and child sets hold IDs that
/// resolve through the owning [`crate::metadata::bundle::Bundle`].
#[derive(Debug, Clone)]
pub struct Entity {
    pub document_id: EntityId,
    pub submitter_id: Option<String>,
    pub submission_date: String,
    pub update_date: Option<String>,
    pub schema_name: SchemaName,
    pub is_stitched: bool,
    pub json: Value,
    pub parents: BTreeSet<EntityId>,
    pub children: BTreeSet<EntityId>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn from_json(
        schema_name: SchemaName,
        content: &Value,
        provenance: &Value,
        manifest: &BTreeMap<String, ManifestEntry>,
        stitched: &BTreeSet<EntityId>,
    ) -> AzulResult<Entity> {
        let prov = Fields::new(provenance, schema_name.as_str());
        let document_id = prov
            .string(&["document_id"])
            .ok_or_else(|| AzulError::invalid(schema_name.as_str(), "missing document_id"))?;
        let document_id = parse_uuid(&document_id)?;
        let address = format!("{schema_name}@{document_id}");
        let prov = Fields::new(provenance, &address);
        let submission_date = prov.date(&["submission_date", "submissionDate"])?.ok_or_else(|| {
            AzulError::invalid(&address, "missing submission date")
        })?;
        let update_date = prov.date(&["update_date", "updateDate"])?;
        let submitter_id = prov.string(&["submitter_id"]);

        let fields = Fields::new(content, &address);
        let kind = match schema_name.core_type() {
            CoreType::Project => EntityKind::Project(project(&fields)?),
            CoreType::Biomaterial => EntityKind::Biomaterial(biomaterial(schema_name, &fields)?),
            CoreType::Process => EntityKind::Process(process(schema_name, &fields)?),
            CoreType::Protocol => EntityKind::Protocol(protocol(schema_name, &fields)?),
            CoreType::File => EntityKind::File(file(schema_name, &fields, manifest)?),
        };
        let is_stitched = stitched.contains(&document_id)
            || matches!(&kind, EntityKind::File(file) if file.manifest_entry.is_stitched);

        Ok(Entity {
            document_id,
            submitter_id,
            submission_date,
            update_date,
            schema_name,
            is_stitched,
            json: content.clone(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            kind,
        })
    }

    /// `schema_name@document_id`, used to locate offending records.
    pub fn address(&self) -> String {
        format!("{}@{}", self.schema_name, self.document_id)
    }

    pub fn core_type(&self) -> CoreType {
        self.schema_name.core_type()
    }

    pub fn last_modified_date(&self) -> &str {
        self.update_date.as_deref().unwrap_or(&self.submission_date)
    }

    pub fn as_project(&self) -> Option<&Project> {
        match &self.kind {
            EntityKind::Project(project) => Some(project),
            _ => None,
        }
    }

    pub fn as_biomaterial(&self) -> Option<&Biomaterial> {
        match &self.kind {
            EntityKind::Biomaterial(biomaterial) => Some(biomaterial),
            _ => None,
        }
    }

    pub fn as_process(&self) -> Option<&Process> {
        match &self.kind {
            EntityKind::Process(process) => Some(process),
            _ => None,
        }
    }

    pub fn as_protocol(&self) -> Option<&Protocol> {
        match &self.kind {
            EntityKind::Protocol(protocol) => Some(protocol),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match &self.kind {
            EntityKind::File(file) => Some(file),
            _ => None,
        }
    }

    /// Samples are what an assay was performed on: specimens, cell lines
    /// and organoids.
    pub fn is_sample(&self) -> bool {
        matches!(
            self.as_biomaterial().map(|b| &b.kind),
            Some(
                BiomaterialKind::SpecimenFromOrganism(_)
                    | BiomaterialKind::CellLine(_)
                    | BiomaterialKind::Organoid(_)
            )
        )
    }

    pub fn is_cell_suspension(&self) -> bool {
        matches!(
            self.as_biomaterial().map(|b| &b.kind),
            Some(BiomaterialKind::CellSuspension(_))
        )
    }

    pub fn is_analysis_process(&self) -> bool {
        matches!(
            self.as_process().map(|p| &p.kind),
            Some(ProcessKind::Analysis { .. })
        )
    }
}

fn project(fields: &Fields<'_>) -> AzulResult<Project> {
    let contributors = fields
        .list(&["contributors"])
        .into_iter()
        .map(|value| -> AzulResult<Contributor> {
            let contributor = fields.nested(value);
            Ok(Contributor {
                contact_name: contributor.required_string(&["contact_name", "name"])?,
                email: contributor.string(&["email"]),
                institution: contributor.string(&["institution"]),
                laboratory: contributor.string(&["laboratory"]),
                corresponding_contributor: contributor.bool(&["corresponding_contributor"]),
                project_role: contributor
                    .term(&["project_role"])?
                    .map(|term| term.label().to_string()),
            })
        })
        .collect::<AzulResult<Vec<_>>>()?;
    let publications = fields
        .list(&["publications"])
        .into_iter()
        .map(|value| {
            let publication = fields.nested(value);
            Publication {
                publication_title: publication.string(&["publication_title", "title"]),
                doi: publication.string(&["doi"]),
                official_hca_publication: publication.bool(&["official_hca_publication"]),
                publication_url: publication.string(&["publication_url", "url"]),
            }
        })
        .collect();
    Ok(Project {
        project_short_name: fields.required_string(&[
            "project_core.project_short_name",
            "project_core.project_shortname",
        ])?,
        project_title: fields.required_string(&["project_core.project_title"])?,
        project_description: fields.string(&["project_core.project_description"]),
        contributors,
        publications,
        insdc_project_accessions: fields
            .strings(&["insdc_project_accessions", "insdc_project"]),
        geo_series_accessions: fields.strings(&["geo_series_accessions", "geo_series"]),
        array_express_accessions: fields
            .strings(&["array_express_accessions", "array_express_investigation"]),
        insdc_study_accessions: fields.strings(&["insdc_study_accessions", "insdc_study"]),
        supplementary_links: fields.strings(&["supplementary_links"]),
        estimated_cell_count: fields.int(&["estimated_cell_count"]),
        data_use_restriction: fields.string(&["data_use_restriction"]),
        duos_id: fields.string(&["duos_id"]),
        supplementary_files: BTreeSet::new(),
    })
}

fn biomaterial(schema_name: SchemaName, fields: &Fields<'_>) -> AzulResult<Biomaterial> {
    let kind = match schema_name {
        SchemaName::DonorOrganism => BiomaterialKind::DonorOrganism(DonorOrganism {
            genus_species: fields.terms(&["genus_species"])?,
            diseases: fields.terms(&["diseases", "disease"])?,
            development_stage: fields.term(&["development_stage"])?,
            ethnicity: fields.terms(&["human_specific.ethnicity"])?,
            sex: fields.string(&["sex", "biological_sex"]),
            is_living: fields.string(&["is_living", "is_alive"]),
            organism_age: fields.string(&["organism_age"]),
            organism_age_unit: fields.term(&["organism_age_unit"])?,
        }),
        SchemaName::SpecimenFromOrganism => {
            BiomaterialKind::SpecimenFromOrganism(SpecimenFromOrganism {
                organ: fields.term(&["organ"])?,
                organ_parts: fields.terms(&["organ_parts", "organ_part"])?,
                diseases: fields.terms(&["diseases", "disease"])?,
                preservation_method: fields.string(&[
                    "preservation_storage.preservation_method",
                    "preservation_method",
                ]),
                storage_method: fields.string(&[
                    "preservation_storage.storage_method",
                    "storage_method",
                ]),
            })
        }
        SchemaName::CellSuspension => BiomaterialKind::CellSuspension(CellSuspension {
            estimated_cell_count: fields.int(&["estimated_cell_count", "total_estimated_cells"]),
            selected_cell_types: fields.terms(&["selected_cell_types", "selected_cell_type"])?,
        }),
        SchemaName::CellLine => BiomaterialKind::CellLine(CellLine {
            cell_line_type: fields.string(&["type", "cell_line_type"]),
            model_organ: fields.term(&["model_organ", "model_for_organ"])?,
        }),
        SchemaName::Organoid => BiomaterialKind::Organoid(Organoid {
            model_organ: fields.term(&["model_organ", "model_for_organ"])?,
            model_organ_part: fields.term(&["model_organ_part"])?,
        }),
        SchemaName::ImagedSpecimen => BiomaterialKind::ImagedSpecimen(ImagedSpecimen {
            slice_thickness: fields.float(&["slice_thickness"]),
        }),
        other => return Err(AzulError::TypeLookup(other.to_string())),
    };
    Ok(Biomaterial {
        biomaterial_id: fields.required_string(&["biomaterial_core.biomaterial_id"])?,
        ncbi_taxon_id: fields
            .list(&["biomaterial_core.ncbi_taxon_id"])
            .into_iter()
            .filter_map(Value::as_i64)
            .collect(),
        has_input_biomaterial: fields.string(&["biomaterial_core.has_input_biomaterial"]),
        kind,
    })
}

fn process(schema_name: SchemaName, fields: &Fields<'_>) -> AzulResult<Process> {
    let kind = match schema_name {
        SchemaName::Process => ProcessKind::Generic,
        SchemaName::AnalysisProcess => ProcessKind::Analysis {
            analysis_run_type: fields.string(&["analysis_run_type"]),
        },
        SchemaName::SequencingProcess => ProcessKind::Sequencing,
        SchemaName::LibraryPreparationProcess => ProcessKind::LibraryPreparation,
        SchemaName::DissociationProcess => ProcessKind::Dissociation,
        SchemaName::EnrichmentProcess => ProcessKind::Enrichment,
        other => return Err(AzulError::TypeLookup(other.to_string())),
    };
    Ok(Process {
        process_id: fields.required_string(&["process_core.process_id", "process_core.document_id"])?,
        protocols: BTreeSet::new(),
        kind,
    })
}

fn protocol(schema_name: SchemaName, fields: &Fields<'_>) -> AzulResult<Protocol> {
    let kind = match schema_name {
        SchemaName::Protocol
        | SchemaName::AggregateGenerationProtocol
        | SchemaName::CollectionProtocol
        | SchemaName::DifferentiationProtocol
        | SchemaName::DissociationProtocol
        | SchemaName::EnrichmentProtocol
        | SchemaName::IpscInductionProtocol
        | SchemaName::ImagingPreparationProtocol => {
            ProtocolKind::Method(fields.term(&["method", "dissociation_method"])?)
        }
        SchemaName::AnalysisProtocol => ProtocolKind::Analysis,
        SchemaName::ImagingProtocol => ProtocolKind::Imaging {
            assay_types: fields
                .list(&["target"])
                .into_iter()
                .filter_map(|target| {
                    fields
                        .nested(target)
                        .string(&["assay_type.ontology_label", "assay_type.text", "assay_type"])
                })
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        },
        SchemaName::LibraryPreparationProtocol => ProtocolKind::LibraryPreparation {
            library_construction_method: fields.term(&[
                "library_construction_method",
                "library_construction_approach",
            ])?,
            nucleic_acid_source: fields.string(&["nucleic_acid_source"]),
        },
        SchemaName::SequencingProtocol => ProtocolKind::Sequencing {
            instrument_manufacturer_model: fields.term(&["instrument_manufacturer_model"])?,
            paired_end: fields.bool(&["paired_end", "paired_ends"]),
            method: fields.term(&["method", "sequencing_approach"])?,
        },
        other => return Err(AzulError::TypeLookup(other.to_string())),
    };
    Ok(Protocol {
        protocol_id: fields.required_string(&["protocol_core.protocol_id"])?,
        kind,
    })
}

fn file(
    schema_name: SchemaName,
    fields: &Fields<'_>,
    manifest: &BTreeMap<String, ManifestEntry>,
) -> AzulResult<File> {
    let file_name = fields.required_string(&["file_core.file_name", "file_name"])?;
    let normalized = ManifestEntry::normalize_name(&file_name);
    let manifest_entry = manifest.get(&normalized).cloned().ok_or_else(|| {
        AzulError::invalid(
            fields.address,
            format!("no manifest entry for file {normalized}"),
        )
    })?;
    let kind = match schema_name {
        SchemaName::SequenceFile => FileKind::Sequence {
            read_index: fields.string(&["read_index"]),
            lane_index: fields.int(&["lane_index"]),
            read_length: fields.int(&["read_length"]),
        },
        SchemaName::AnalysisFile => FileKind::Analysis {
            matrix_cell_count: fields.int(&["matrix_cell_count"]),
        },
        SchemaName::SupplementaryFile => FileKind::Supplementary {
            file_description: fields.string(&["file_description"]),
            strata: fields.string(&["strata", "file_core.strata"]),
        },
        SchemaName::ReferenceFile => FileKind::Reference {
            reference_type: fields.string(&["reference_type"]),
            assembly_type: fields.string(&["assembly_type"]),
        },
        SchemaName::ImageFile => FileKind::Image,
        other => return Err(AzulError::TypeLookup(other.to_string())),
    };
    Ok(File {
        file_name: normalized,
        file_format: fields
            .string(&["file_core.format", "file_core.file_format", "format"])
            .unwrap_or_else(|| "unknown".to_string()),
        content_description: fields.terms(&["file_core.content_description"])?,
        file_source: fields.string(&["file_core.file_source", "file_source"]),
        manifest_entry,
        kind,
    })
}

/// Resolves a dotted path inside a JSON document.
pub fn lookup<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(json, |value, key| value.get(key))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Field access with fallback key names, so that differently-versioned
/// schemas sharing semantics go through the same accessor.
struct Fields<'a> {
    json: &'a Value,
    address: &'a str,
}

impl<'a> Fields<'a> {
    fn new(json: &'a Value, address: &'a str) -> Self {
        Self { json, address }
    }

    fn nested<'b>(&self, json: &'b Value) -> Fields<'b>
    where
        'a: 'b,
    {
        Fields::new(json, self.address)
    }

    fn find(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|key| lookup(self.json, key))
            .find(|value| !value.is_null())
    }

    fn string(&self, keys: &[&str]) -> Option<String> {
        match self.find(keys)? {
            Value::String(value) => non_empty(value),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    fn required_string(&self, keys: &[&str]) -> AzulResult<String> {
        self.string(keys).ok_or_else(|| {
            AzulError::invalid(self.address, format!("missing required field {}", keys[0]))
        })
    }

    fn date(&self, keys: &[&str]) -> AzulResult<Option<String>> {
        match self.string(keys) {
            Some(value) => normalize_date(&value).map(Some).ok_or_else(|| {
                AzulError::invalid(self.address, format!("invalid timestamp {value}"))
            }),
            None => Ok(None),
        }
    }

    fn int(&self, keys: &[&str]) -> Option<i64> {
        match self.find(keys)? {
            Value::Number(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|float| float as i64)),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    fn float(&self, keys: &[&str]) -> Option<f64> {
        match self.find(keys)? {
            Value::Number(value) => value.as_f64(),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    fn bool(&self, keys: &[&str]) -> Option<bool> {
        match self.find(keys)? {
            Value::Bool(value) => Some(*value),
            Value::String(value) => match value.trim().to_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn list(&self, keys: &[&str]) -> Vec<&'a Value> {
        match self.find(keys) {
            Some(Value::Array(values)) => values.iter().collect(),
            Some(value) => vec![value],
            None => Vec::new(),
        }
    }

    fn strings(&self, keys: &[&str]) -> Vec<String> {
        self.list(keys)
            .into_iter()
            .filter_map(|value| value.as_str().and_then(non_empty))
            .collect()
    }

    fn term(&self, keys: &[&str]) -> AzulResult<Option<OntologyTerm>> {
        self.list(keys)
            .first()
            .map(|value| OntologyTerm::from_json(value, self.address))
            .transpose()
    }

    fn terms(&self, keys: &[&str]) -> AzulResult<Vec<OntologyTerm>> {
        self.list(keys)
            .into_iter()
            .map(|value| OntologyTerm::from_json(value, self.address))
            .collect()
    }
}
