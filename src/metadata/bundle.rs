use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::BundleFqid;
use crate::error::{AzulError, AzulResult};
use crate::metadata::entity::{
    BiomaterialKind, CoreType, Entity, EntityId, EntityKind, FileKind, Process, ProcessKind,
    ProtocolKind, SchemaName,
};
use crate::metadata::links::{Link, LinkType};
use crate::metadata::manifest::ManifestEntry;
use crate::metadata::source::BundleSource;
use crate::visitor::EntityVisitor;

const LINKS_FILE: &str = "links.json";
const LEGACY_PROJECT_FILE: &str = "project.json";
const LEGACY_FILES: [(&str, CoreType); 5] = [
    ("project.json", CoreType::Project),
    ("biomaterial.json", CoreType::Biomaterial),
    ("process.json", CoreType::Process),
    ("protocol.json", CoreType::Protocol),
    ("file.json", CoreType::File),
];

static NUMBERED_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z_]+)_\d+\.json$").expect("valid metadata file regex"));

/// The entity graph of one bundle version. All entities live in a single
/// arena keyed by document ID; edges are sets of IDs on both endpoints.
#[derive(Debug, Clone)]
pub struct Bundle {
    fqid: BundleFqid,
    manifest: BTreeMap<String, ManifestEntry>,
    entities: BTreeMap<EntityId, Entity>,
    links: Vec<Link>,
}

impl Bundle {
    pub fn from_source(source: &BundleSource) -> AzulResult<Bundle> {
        Bundle::from_json(
            source.fqid.clone(),
            &source.manifest,
            &source.metadata,
            &source.stitched,
        )
    }

    pub fn from_json(
        fqid: BundleFqid,
        manifest: &[Value],
        metadata: &Map<String, Value>,
        stitched: &BTreeSet<EntityId>,
    ) -> AzulResult<Bundle> {
        let manifest = manifest
            .iter()
            .map(|entry| ManifestEntry::from_json(entry).map(|entry| (entry.name.clone(), entry)))
            .collect::<AzulResult<BTreeMap<_, _>>>()?;

        let documents = if metadata.contains_key(LEGACY_PROJECT_FILE) {
            legacy_documents(metadata)?
        } else {
            numbered_documents(metadata)?
        };

        let mut entities = BTreeMap::new();
        for document in documents {
            let entity = Entity::from_json(
                document.schema_name,
                document.content,
                document.provenance,
                &manifest,
                stitched,
            )?;
            if let Some(previous) = entities.insert(entity.document_id, entity) {
                return Err(AzulError::invalid(
                    previous.address(),
                    "document ID occurs more than once in bundle",
                ));
            }
        }

        let links = match metadata.get(LINKS_FILE) {
            Some(links) => Link::from_json(links)?,
            None if entities.values().all(|e| e.core_type() == CoreType::Project) => Vec::new(),
            None => return Err(AzulError::MissingMetadataFile(LINKS_FILE.to_string())),
        };

        let mut bundle = Bundle {
            fqid,
            manifest,
            entities,
            links,
        };
        bundle.link()?;
        tracing::info!(
            bundle = %bundle.fqid,
            entities = bundle.entities.len(),
            links = bundle.links.len(),
            "loaded bundle"
        );
        Ok(bundle)
    }

    fn link(&mut self) -> AzulResult<()> {
        let links = std::mem::take(&mut self.links);
        for link in &links {
            self.require(&link.source_id)?;
            self.require(&link.destination_id)?;
            match link.link_type {
                LinkType::ProcessLink => self.connect(link.source_id, link.destination_id)?,
                LinkType::SupplementaryFileLink => {
                    self.attach_supplementary_file(link.source_id, link.destination_id)?
                }
            }
        }
        self.links = links;
        Ok(())
    }

    fn require(&self, id: &EntityId) -> AzulResult<()> {
        if self.entities.contains_key(id) {
            Ok(())
        } else {
            Err(AzulError::invalid(
                LINKS_FILE,
                format!("link references unknown entity {id}"),
            ))
        }
    }

    /// Checks the edge from both endpoints before mutating either of them.
    fn connect(&mut self, source: EntityId, destination: EntityId) -> AzulResult<()> {
        let source_type = self.entities[&source].core_type();
        let destination_type = self.entities[&destination].core_type();
        self.check_connection(source, source_type, destination, destination_type, true)?;
        self.check_connection(destination, destination_type, source, source_type, false)?;

        match (source_type, destination_type) {
            (CoreType::Process, CoreType::Protocol) => {
                if let Some(process) = self.entity_mut(source).and_then(process_mut) {
                    process.protocols.insert(destination);
                }
                if let Some(protocol) = self.entity_mut(destination) {
                    protocol.parents.insert(source);
                }
            }
            _ => {
                if let Some(entity) = self.entity_mut(source) {
                    entity.children.insert(destination);
                }
                if let Some(entity) = self.entity_mut(destination) {
                    entity.parents.insert(source);
                }
            }
        }
        Ok(())
    }

    fn check_connection(
        &self,
        this: EntityId,
        this_type: CoreType,
        other: EntityId,
        other_type: CoreType,
        forward: bool,
    ) -> AzulResult<()> {
        let supported = match (this_type, other_type) {
            (CoreType::Biomaterial | CoreType::File, CoreType::Process) => true,
            (CoreType::Process, CoreType::Biomaterial | CoreType::File) => true,
            (CoreType::Process, CoreType::Protocol) => forward,
            (CoreType::Protocol, CoreType::Process) => !forward,
            _ => false,
        };
        if supported {
            Ok(())
        } else {
            Err(AzulError::Link {
                source_entity: self.address(&this),
                destination: self.address(&other),
                forward,
            })
        }
    }

    fn attach_supplementary_file(&mut self, project: EntityId, file: EntityId) -> AzulResult<()> {
        if self.entities[&project].core_type() != CoreType::Project
            || self.entities[&file].core_type() != CoreType::File
        {
            return Err(AzulError::Link {
                source_entity: self.address(&project),
                destination: self.address(&file),
                forward: true,
            });
        }
        if let Some(EntityKind::Project(project)) =
            self.entity_mut(project).map(|entity| &mut entity.kind)
        {
            project.supplementary_files.insert(file);
        }
        Ok(())
    }

    fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn fqid(&self) -> &BundleFqid {
        &self.fqid
    }

    pub fn manifest(&self) -> &BTreeMap<String, ManifestEntry> {
        &self.manifest
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// `schema_name@document_id`, or the bare ID for an unknown entity.
    pub fn address(&self, id: &EntityId) -> String {
        self.entities
            .get(id)
            .map(Entity::address)
            .unwrap_or_else(|| id.to_string())
    }

    /// The single project every bundle belongs to.
    pub fn project(&self) -> AzulResult<&Entity> {
        let mut projects = self.of_type(CoreType::Project);
        match (projects.next(), projects.next()) {
            (Some(project), None) => Ok(project),
            (None, _) => Err(AzulError::Requirement(format!(
                "bundle {} has no project",
                self.fqid
            ))),
            (Some(_), Some(_)) => Err(AzulError::Requirement(format!(
                "bundle {} has more than one project",
                self.fqid
            ))),
        }
    }

    fn of_type(&self, core_type: CoreType) -> impl Iterator<Item = &Entity> {
        self.entities
            .values()
            .filter(move |entity| entity.core_type() == core_type)
    }

    pub fn biomaterials(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(CoreType::Biomaterial)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(CoreType::Process)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(CoreType::Protocol)
    }

    pub fn files(&self) -> impl Iterator<Item = &Entity> {
        self.of_type(CoreType::File)
    }

    /// Linked entities without parents. Projects take no part in links.
    pub fn root_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|entity| {
            entity.core_type() != CoreType::Project && entity.parents.is_empty()
        })
    }

    pub fn specimens(&self) -> impl Iterator<Item = &Entity> {
        self.biomaterials().filter(|entity| {
            matches!(
                entity.as_biomaterial().map(|b| &b.kind),
                Some(BiomaterialKind::SpecimenFromOrganism(_))
            )
        })
    }

    /// Biomaterials fed into a sequencing process.
    pub fn sequencing_input(&self) -> impl Iterator<Item = &Entity> {
        self.biomaterials()
            .filter(|entity| self.is_sequencing_input(entity))
    }

    pub fn sequencing_output(&self) -> impl Iterator<Item = &Entity> {
        self.files().filter(|entity| {
            matches!(
                entity.as_file().map(|f| &f.kind),
                Some(FileKind::Sequence { .. })
            )
        })
    }

    /// A process is a sequencing process by schema or by using a
    /// sequencing protocol.
    pub fn is_sequencing_process(&self, entity: &Entity) -> bool {
        let Some(process) = entity.as_process() else {
            return false;
        };
        matches!(process.kind, ProcessKind::Sequencing)
            || process.protocols.iter().any(|id| {
                matches!(
                    self.entity(id)
                        .and_then(Entity::as_protocol)
                        .map(|protocol| &protocol.kind),
                    Some(ProtocolKind::Sequencing { .. })
                )
            })
    }

    pub fn is_sequencing_input(&self, entity: &Entity) -> bool {
        entity.core_type() == CoreType::Biomaterial
            && entity.children.iter().any(|id| {
                self.entity(id)
                    .is_some_and(|child| self.is_sequencing_process(child))
            })
    }

    /// Visits the entity, then everything downstream of it.
    pub fn accept<V: EntityVisitor>(&self, id: EntityId, visitor: V) -> V {
        let mut seen = BTreeSet::new();
        self.accept_from(id, visitor, &mut seen)
    }

    fn accept_from<V: EntityVisitor>(
        &self,
        id: EntityId,
        mut visitor: V,
        seen: &mut BTreeSet<EntityId>,
    ) -> V {
        if !seen.insert(id) {
            return visitor;
        }
        let Some(entity) = self.entity(&id) else {
            return visitor;
        };
        visitor.visit(self, entity);
        for child in &entity.children {
            visitor = self.accept_from(*child, visitor, seen);
        }
        visitor
    }

    /// Visits everything upstream of the entity, ancestors before their
    /// descendants. The entity itself is not visited.
    pub fn ancestors<V: EntityVisitor>(&self, id: EntityId, visitor: V) -> V {
        let mut seen = BTreeSet::new();
        self.ancestors_of(id, visitor, &mut seen)
    }

    fn ancestors_of<V: EntityVisitor>(
        &self,
        id: EntityId,
        mut visitor: V,
        seen: &mut BTreeSet<EntityId>,
    ) -> V {
        let Some(entity) = self.entity(&id) else {
            return visitor;
        };
        for parent_id in &entity.parents {
            if !seen.insert(*parent_id) {
                continue;
            }
            visitor = self.ancestors_of(*parent_id, visitor, seen);
            if let Some(parent) = self.entity(parent_id) {
                visitor.visit(self, parent);
            }
        }
        visitor
    }
}

fn process_mut(entity: &mut Entity) -> Option<&mut Process> {
    match &mut entity.kind {
        EntityKind::Process(process) => Some(process),
        _ => None,
    }
}

struct Document<'a> {
    schema_name: SchemaName,
    content: &'a Value,
    provenance: &'a Value,
}

impl<'a> Document<'a> {
    fn from_value(value: &'a Value, file_name: &str, default: Option<&str>) -> AzulResult<Self> {
        let content = value.get("content").unwrap_or(value);
        let provenance = value
            .get("provenance")
            .or_else(|| value.get("hca_ingest"))
            .or_else(|| content.get("provenance"))
            .or_else(|| content.get("hca_ingest"))
            .ok_or_else(|| AzulError::invalid(file_name, "missing provenance block"))?;
        let schema_name = match content.get("describedBy").and_then(Value::as_str) {
            Some(url) => SchemaName::from_described_by(url)?,
            None => match default {
                Some(name) => SchemaName::lookup(name)?,
                None => {
                    return Err(AzulError::invalid(file_name, "missing describedBy"));
                }
            },
        };
        Ok(Document {
            schema_name,
            content,
            provenance,
        })
    }
}

fn legacy_documents(metadata: &Map<String, Value>) -> AzulResult<Vec<Document<'_>>> {
    let mut documents = Vec::new();
    for (file_name, core_type) in LEGACY_FILES {
        let Some(value) = metadata.get(file_name) else {
            continue;
        };
        let items = match value.get(core_type.plural()) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => {
                return Err(AzulError::invalid(
                    file_name,
                    format!("`{}` must be a list, got {other}", core_type.plural()),
                ));
            }
            None => vec![value],
        };
        for item in items {
            let document = Document::from_value(item, file_name, None)?;
            if document.schema_name.core_type() != core_type {
                return Err(AzulError::invalid(
                    file_name,
                    format!("unexpected {} entity", document.schema_name),
                ));
            }
            documents.push(document);
        }
    }
    Ok(documents)
}

fn numbered_documents(metadata: &Map<String, Value>) -> AzulResult<Vec<Document<'_>>> {
    let mut documents = Vec::new();
    for (file_name, value) in metadata {
        if file_name == LINKS_FILE {
            continue;
        }
        let Some(captures) = NUMBERED_FILE.captures(file_name) else {
            tracing::debug!(%file_name, "ignoring unrecognized metadata file");
            continue;
        };
        let prefix = captures.get(1).map(|m| m.as_str());
        documents.push(Document::from_value(value, file_name, prefix)?);
    }
    Ok(documents)
}
