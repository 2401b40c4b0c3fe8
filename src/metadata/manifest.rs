use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::parse_uuid;
use crate::error::{AzulError, AzulResult};

/// Storage metadata of one physical file in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub uuid: Uuid,
    pub version: String,
    pub size: u64,
    pub content_type: String,
    pub crc32c: String,
    pub sha256: String,
    pub indexed: bool,
    pub is_stitched: bool,
    pub sha1: Option<String>,
    pub s3_etag: Option<String>,
    pub url: Option<String>,
    pub drs_uri: Option<String>,
}

impl ManifestEntry {
    pub fn from_json(json: &Value) -> AzulResult<ManifestEntry> {
        let entry = json
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| json.get("uuid").and_then(Value::as_str))
            .unwrap_or("<unnamed>")
            .to_string();
        let required = |field: &str| required(json, &entry, field);
        let required_str = |field: &str| required_str(json, &entry, field);
        let optional_str = |field: &str| {
            json.get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let content_type = match json.get("content-type").filter(|value| !value.is_null()) {
            Some(_) => required_str("content-type")?,
            None => required_str("content_type")?,
        };
        Ok(ManifestEntry {
            name: Self::normalize_name(&required_str("name")?),
            uuid: parse_uuid(&required_str("uuid")?)?,
            version: required_str("version")?,
            size: required("size")?
                .as_u64()
                .ok_or_else(|| AzulError::invalid(&entry, "`size` must be a non-negative integer"))?,
            content_type,
            crc32c: required_str("crc32c")?,
            sha256: required_str("sha256")?,
            indexed: required("indexed")?
                .as_bool()
                .ok_or_else(|| AzulError::invalid(&entry, "`indexed` must be a boolean"))?,
            is_stitched: json
                .get("is_stitched")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            sha1: optional_str("sha1"),
            s3_etag: optional_str("s3_etag"),
            url: optional_str("url"),
            drs_uri: optional_str("drs_uri").or_else(|| optional_str("drs_path")),
        })
    }

    /// Old bundles escaped `/` in file names as `!`.
    pub fn normalize_name(name: &str) -> String {
        name.replace('!', "/")
    }
}

fn required<'a>(json: &'a Value, entry: &str, field: &str) -> AzulResult<&'a Value> {
    json.get(field)
        .filter(|value| !value.is_null())
        .ok_or_else(|| AzulError::MissingField {
            field: field.to_string(),
            entry: entry.to_string(),
        })
}

fn required_str(json: &Value, entry: &str, field: &str) -> AzulResult<String> {
    required(json, entry, field)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AzulError::invalid(entry, format!("`{field}` must be a string")))
}
