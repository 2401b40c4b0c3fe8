use std::collections::{BTreeMap, BTreeSet};

use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{
    BiomaterialKind, Entity, EntityId, EntityKind, Protocol, ProtocolKind,
};

pub trait EntityVisitor {
    fn visit(&mut self, bundle: &Bundle, entity: &Entity);
}

/// Collects the IDs of every entity of interest reachable by a traversal,
/// partitioned by kind. Visiting an entity twice has no effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformerVisitor {
    pub specimens: BTreeSet<EntityId>,
    pub cell_suspensions: BTreeSet<EntityId>,
    pub cell_lines: BTreeSet<EntityId>,
    pub donors: BTreeSet<EntityId>,
    pub organoids: BTreeSet<EntityId>,
    pub imaged_specimens: BTreeSet<EntityId>,
    pub protocols: BTreeSet<EntityId>,
    pub sequencing_processes: BTreeSet<EntityId>,
    pub analysis_processes: BTreeSet<EntityId>,
    pub sequencing_inputs: BTreeSet<EntityId>,
    pub files: BTreeSet<EntityId>,
}

impl TransformerVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ID recorded, regardless of kind.
    pub fn visited(&self) -> BTreeSet<EntityId> {
        [
            &self.specimens,
            &self.cell_suspensions,
            &self.cell_lines,
            &self.donors,
            &self.organoids,
            &self.imaged_specimens,
            &self.protocols,
            &self.sequencing_processes,
            &self.analysis_processes,
            &self.sequencing_inputs,
            &self.files,
        ]
        .into_iter()
        .flatten()
        .copied()
        .collect()
    }
}

impl EntityVisitor for TransformerVisitor {
    fn visit(&mut self, bundle: &Bundle, entity: &Entity) {
        let id = entity.document_id;
        match &entity.kind {
            EntityKind::Biomaterial(biomaterial) => {
                let target = match biomaterial.kind {
                    BiomaterialKind::DonorOrganism(_) => &mut self.donors,
                    BiomaterialKind::SpecimenFromOrganism(_) => &mut self.specimens,
                    BiomaterialKind::CellSuspension(_) => &mut self.cell_suspensions,
                    BiomaterialKind::CellLine(_) => &mut self.cell_lines,
                    BiomaterialKind::Organoid(_) => &mut self.organoids,
                    BiomaterialKind::ImagedSpecimen(_) => &mut self.imaged_specimens,
                };
                target.insert(id);
                if bundle.is_sequencing_input(entity) {
                    self.sequencing_inputs.insert(id);
                }
            }
            EntityKind::Process(process) => {
                if bundle.is_sequencing_process(entity) {
                    self.sequencing_processes.insert(id);
                }
                if entity.is_analysis_process() {
                    self.analysis_processes.insert(id);
                }
                let protocols = process.protocols.iter().filter(|id| {
                    bundle
                        .entity(id)
                        .and_then(Entity::as_protocol)
                        .is_some_and(is_indexed_protocol)
                });
                self.protocols.extend(protocols);
            }
            EntityKind::Protocol(protocol) => {
                if is_indexed_protocol(protocol) {
                    self.protocols.insert(id);
                }
            }
            EntityKind::File(file) => {
                let representative = match file.zarr_store() {
                    Some((_, member)) => member.ends_with(".zattrs"),
                    None => true,
                };
                if representative {
                    self.files.insert(id);
                }
            }
            EntityKind::Project(_) => {}
        }
    }
}

fn is_indexed_protocol(protocol: &Protocol) -> bool {
    !matches!(protocol.kind, ProtocolKind::Method(_))
}

/// Walks up from `id` and records the first sample on every path. Samples
/// shadow whatever lies above them.
pub fn find_ancestor_samples(bundle: &Bundle, id: EntityId, samples: &mut BTreeSet<EntityId>) {
    let mut seen = BTreeSet::new();
    find_samples_above(bundle, id, samples, &mut seen);
}

fn find_samples_above(
    bundle: &Bundle,
    id: EntityId,
    samples: &mut BTreeSet<EntityId>,
    seen: &mut BTreeSet<EntityId>,
) {
    let Some(entity) = bundle.entity(&id) else {
        return;
    };
    for parent_id in &entity.parents {
        if !seen.insert(*parent_id) {
            continue;
        }
        match bundle.entity(parent_id) {
            Some(parent) if parent.is_sample() => {
                samples.insert(*parent_id);
            }
            Some(_) => find_samples_above(bundle, *parent_id, samples, seen),
            None => {}
        }
    }
}

/// Members of each zarr store keyed by store name (`X.zarr`), leaving out
/// the `.zattrs` representative.
pub fn group_zarrs<'a>(
    files: impl IntoIterator<Item = &'a Entity>,
) -> BTreeMap<String, Vec<&'a Entity>> {
    let mut stores: BTreeMap<String, Vec<&'a Entity>> = BTreeMap::new();
    for entity in files {
        let Some((store, member)) = entity.as_file().and_then(|file| file.zarr_store()) else {
            continue;
        };
        if !member.ends_with(".zattrs") {
            stores.entry(store.to_string()).or_default().push(entity);
        }
    }
    stores
}

/// A file as it is contributed: zarr stores collapse into their `.zattrs`
/// member carrying the rest of the store.
#[derive(Debug, Clone)]
pub struct FileGroup<'a> {
    pub file: &'a Entity,
    pub related_files: Vec<&'a Entity>,
}

pub fn file_groups<'a>(files: impl IntoIterator<Item = &'a Entity>) -> Vec<FileGroup<'a>> {
    let files = files.into_iter().collect::<Vec<_>>();
    let mut stores = group_zarrs(files.iter().copied());
    let representatives = files
        .iter()
        .filter_map(|entity| entity.as_file()?.zarr_store())
        .filter(|(_, member)| member.ends_with(".zattrs"))
        .map(|(store, _)| store.to_string())
        .collect::<BTreeSet<_>>();

    let mut groups = Vec::new();
    for entity in files {
        match entity.as_file().and_then(|file| file.zarr_store()) {
            None => groups.push(FileGroup {
                file: entity,
                related_files: Vec::new(),
            }),
            Some((store, member)) if member.ends_with(".zattrs") => groups.push(FileGroup {
                file: entity,
                related_files: stores.remove(store).unwrap_or_default(),
            }),
            Some((store, _)) if !representatives.contains(store) => {
                tracing::warn!(
                    store,
                    file = %entity.address(),
                    "zarr store without .zattrs member, contributing member on its own"
                );
                groups.push(FileGroup {
                    file: entity,
                    related_files: Vec::new(),
                });
            }
            Some(_) => {}
        }
    }
    groups
}
