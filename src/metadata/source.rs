use std::collections::BTreeSet;
use std::fs;

use camino::Utf8Path;
use serde_json::{Map, Value};

use crate::domain::{BundleFqid, parse_uuid};
use crate::error::{AzulError, AzulResult};
use crate::metadata::entity::EntityId;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Raw bundle input as handed over by a repository client: the manifest
/// entries plus the content of every metadata file, keyed by file name.
#[derive(Debug, Clone)]
pub struct BundleSource {
    pub fqid: BundleFqid,
    pub manifest: Vec<Value>,
    pub metadata: Map<String, Value>,
    pub stitched: BTreeSet<EntityId>,
}

impl BundleSource {
    /// Accepts `{"bundle": {"uuid", "version", "files", "stitched"?}}` or a
    /// bare list of manifest entries, in which case `fqid` must be given.
    pub fn from_dss_json(
        manifest: &Value,
        fqid: Option<BundleFqid>,
        metadata: Map<String, Value>,
    ) -> AzulResult<BundleSource> {
        match manifest {
            Value::Array(files) => {
                let fqid = fqid.ok_or_else(|| {
                    AzulError::invalid(MANIFEST_FILE, "bare manifest lists need a bundle FQID")
                })?;
                Ok(BundleSource {
                    fqid,
                    manifest: files.clone(),
                    metadata,
                    stitched: BTreeSet::new(),
                })
            }
            Value::Object(_) => {
                let bundle = manifest.get("bundle").unwrap_or(manifest);
                let text = |key: &str| {
                    bundle.get(key).and_then(Value::as_str).ok_or_else(|| {
                        AzulError::invalid(MANIFEST_FILE, format!("missing bundle `{key}`"))
                    })
                };
                let fqid = match (bundle.get("uuid"), fqid) {
                    (None, Some(fqid)) => fqid,
                    _ => BundleFqid::new(parse_uuid(text("uuid")?)?, text("version")?),
                };
                let files = bundle
                    .get("files")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| AzulError::invalid(MANIFEST_FILE, "missing bundle `files`"))?;
                let stitched = bundle
                    .get("stitched")
                    .and_then(Value::as_array)
                    .map(|ids| {
                        ids.iter()
                            .map(|id| {
                                id.as_str()
                                    .ok_or_else(|| AzulError::InvalidUuid(id.to_string()))
                                    .and_then(parse_uuid)
                            })
                            .collect::<AzulResult<BTreeSet<_>>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                Ok(BundleSource {
                    fqid,
                    manifest: files,
                    metadata,
                    stitched,
                })
            }
            other => Err(AzulError::invalid(
                MANIFEST_FILE,
                format!("expected an object or a list, got {other}"),
            )),
        }
    }

    /// Reads `manifest.json` and every other `*.json` file of a bundle
    /// directory. A directory named `<uuid>.<version>` supplies the FQID for
    /// bare manifest lists.
    pub fn from_dir(dir: &Utf8Path) -> AzulResult<BundleSource> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(AzulError::MissingMetadataFile(manifest_path.to_string()));
        }
        let manifest = read_json(&manifest_path)?;

        let mut metadata = Map::new();
        let entries = fs::read_dir(dir)
            .map_err(|err| AzulError::Filesystem(format!("read dir {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| AzulError::Filesystem(err.to_string()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name == MANIFEST_FILE || !name.ends_with(".json") {
                continue;
            }
            metadata.insert(name.clone(), read_json(&dir.join(&name))?);
        }

        let fqid = dir.file_name().and_then(|name| name.parse::<BundleFqid>().ok());
        BundleSource::from_dss_json(&manifest, fqid, metadata)
    }
}

fn read_json(path: &Utf8Path) -> AzulResult<Value> {
    let content = fs::read_to_string(path)
        .map_err(|err| AzulError::Filesystem(format!("read {path}: {err}")))?;
    serde_json::from_str(&content).map_err(|err| AzulError::Json(format!("{path}: {err}")))
}
