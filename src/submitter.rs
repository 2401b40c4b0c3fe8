use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::Serialize;
use uuid::Uuid;

use crate::metadata::bundle::Bundle;
use crate::metadata::entity::{Entity, FileKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitterCategory {
    Internal,
    External,
}

/// Organizations that submit data files. Each has a stable ID derived from
/// its slug, which producers record as the file's `submitter_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Submitter {
    ArrayExpress,
    Contributor,
    Geo,
    HcaRelease,
    Lattice,
    Publication,
    Scea,
    Scp,
    Zenodo,
    Dcp1MatrixService,
    Dcp2,
    Dcp2Ingest,
}

/// Namespace of the version 5 submitter UUIDs.
pub const SUBMITTER_NAMESPACE: Uuid = Uuid::from_u128(0x382415e5_67a6_49be_8f3c_aaaa707d82db);

impl Submitter {
    pub const ALL: [Submitter; 12] = [
        Submitter::ArrayExpress,
        Submitter::Contributor,
        Submitter::Geo,
        Submitter::HcaRelease,
        Submitter::Lattice,
        Submitter::Publication,
        Submitter::Scea,
        Submitter::Scp,
        Submitter::Zenodo,
        Submitter::Dcp1MatrixService,
        Submitter::Dcp2,
        Submitter::Dcp2Ingest,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Submitter::ArrayExpress => "arrayexpress",
            Submitter::Contributor => "contributor",
            Submitter::Geo => "geo",
            Submitter::HcaRelease => "hca_release",
            Submitter::Lattice => "lattice",
            Submitter::Publication => "publication",
            Submitter::Scea => "scea",
            Submitter::Scp => "scp",
            Submitter::Zenodo => "zenodo",
            Submitter::Dcp1MatrixService => "hca_dcp1_matrix_service",
            Submitter::Dcp2 => "dcp2",
            Submitter::Dcp2Ingest => "dcp2_ingest",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Submitter::ArrayExpress => "ArrayExpress",
            Submitter::Contributor => "Contributor",
            Submitter::Geo => "GEO",
            Submitter::HcaRelease => "HCA Release",
            Submitter::Lattice => "Lattice",
            Submitter::Publication => "Publication",
            Submitter::Scea => "Single Cell Expression Atlas",
            Submitter::Scp => "Single Cell Portal",
            Submitter::Zenodo => "Zenodo",
            Submitter::Dcp1MatrixService => "DCP/1 Matrix Service",
            Submitter::Dcp2 => "DCP/2 Analysis",
            Submitter::Dcp2Ingest => "DCP/2 Ingest",
        }
    }

    pub fn category(&self) -> SubmitterCategory {
        match self {
            Submitter::Dcp1MatrixService | Submitter::Dcp2 | Submitter::Dcp2Ingest => {
                SubmitterCategory::Internal
            }
            _ => SubmitterCategory::External,
        }
    }

    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&SUBMITTER_NAMESPACE, self.slug().as_bytes())
    }

    pub fn registry() -> &'static SubmitterRegistry {
        &REGISTRY
    }

    pub fn by_id(id: &str) -> Option<Submitter> {
        let id = Uuid::parse_str(id.trim()).ok()?;
        Self::registry().by_id.get(&id).copied()
    }

    pub fn by_title(title: &str) -> Option<Submitter> {
        Self::registry().by_title.get(title).copied()
    }

    /// Attributes a file to its submitter. An explicit `file_source` wins
    /// over the provenance `submitter_id`. Analysis files without either
    /// that were produced by an analysis process were not tagged by the
    /// DCP/2 analysis pipeline and are attributed to it here.
    pub fn for_file(bundle: &Bundle, file: &Entity) -> Option<Submitter> {
        let details = file.as_file()?;
        if let Some(source) = details.file_source.as_deref() {
            let submitter = Submitter::by_title(source);
            if submitter.is_none() {
                tracing::warn!(file = %file.address(), source, "unknown file source");
            }
            submitter
        } else if let Some(submitter_id) = file.submitter_id.as_deref() {
            Submitter::by_id(submitter_id)
        } else if matches!(details.kind, FileKind::Analysis { .. })
            && file.parents.iter().any(|id| {
                bundle
                    .entity(id)
                    .is_some_and(Entity::is_analysis_process)
            })
        {
            Some(Submitter::Dcp2)
        } else {
            None
        }
    }
}

impl fmt::Display for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title())
    }
}

#[derive(Debug)]
pub struct SubmitterRegistry {
    by_id: BTreeMap<Uuid, Submitter>,
    by_title: BTreeMap<&'static str, Submitter>,
}

impl SubmitterRegistry {
    /// Panics if two submitters share an ID or a title.
    pub fn build() -> SubmitterRegistry {
        let mut by_id = BTreeMap::new();
        let mut by_title = BTreeMap::new();
        for submitter in Submitter::ALL {
            let previous = by_id.insert(submitter.id(), submitter);
            assert!(previous.is_none(), "duplicate submitter ID for {submitter:?}");
            let previous = by_title.insert(submitter.title(), submitter);
            assert!(previous.is_none(), "duplicate submitter title for {submitter:?}");
        }
        SubmitterRegistry { by_id, by_title }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

static REGISTRY: LazyLock<SubmitterRegistry> = LazyLock::new(SubmitterRegistry::build);
