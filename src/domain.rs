use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AzulError;

/// Outer entity types, one index per type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Files,
    Samples,
    CellSuspensions,
    Projects,
    Bundles,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Files,
        EntityType::Samples,
        EntityType::CellSuspensions,
        EntityType::Projects,
        EntityType::Bundles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Files => "files",
            EntityType::Samples => "samples",
            EntityType::CellSuspensions => "cell_suspensions",
            EntityType::Projects => "projects",
            EntityType::Bundles => "bundles",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = AzulError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == value.trim())
            .ok_or_else(|| AzulError::InvalidEntityType(value.to_string()))
    }
}

/// A bundle version is a sortable timestamp, so ordering by
/// `(uuid, version)` orders versions of the same bundle chronologically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleFqid {
    pub uuid: Uuid,
    pub version: String,
}

impl BundleFqid {
    pub fn new(uuid: Uuid, version: impl Into<String>) -> Self {
        Self {
            uuid,
            version: version.into(),
        }
    }
}

impl fmt::Display for BundleFqid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.uuid, self.version)
    }
}

impl FromStr for BundleFqid {
    type Err = AzulError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (uuid, version) = value
            .trim()
            .split_once('.')
            .ok_or_else(|| AzulError::InvalidVersion(value.to_string()))?;
        let uuid = parse_uuid(uuid)?;
        parse_version(version)?;
        Ok(Self::new(uuid, version))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A slice of a bundle's entities selected by the leading `prefix_length`
/// bits of their document ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundlePartition {
    prefix_length: u8,
    prefix: u128,
}

impl BundlePartition {
    pub const MAX_PREFIX_LENGTH: u8 = 16;

    pub fn root() -> Self {
        Self {
            prefix_length: 0,
            prefix: 0,
        }
    }

    pub fn new(prefix_length: u8, prefix: u128) -> Result<Self, AzulError> {
        if prefix_length > Self::MAX_PREFIX_LENGTH {
            return Err(AzulError::Requirement(format!(
                "partition prefix length {prefix_length} exceeds {}",
                Self::MAX_PREFIX_LENGTH
            )));
        }
        if prefix >> prefix_length != 0 {
            return Err(AzulError::Requirement(format!(
                "partition prefix {prefix:#b} does not fit in {prefix_length} bits"
            )));
        }
        Ok(Self {
            prefix_length,
            prefix,
        })
    }

    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    pub fn prefix(&self) -> u128 {
        self.prefix
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        if self.prefix_length == 0 {
            return true;
        }
        id.as_u128() >> (128 - u32::from(self.prefix_length)) == self.prefix
    }

    /// Splits this partition into `2^bits` exclusive sub-partitions that
    /// together cover exactly the entities of this one.
    pub fn divide(&self, bits: u8) -> Result<Vec<BundlePartition>, AzulError> {
        let prefix_length = self.prefix_length.saturating_add(bits);
        if prefix_length > Self::MAX_PREFIX_LENGTH {
            return Err(AzulError::Requirement(format!(
                "cannot divide partition {self} by {bits} bits"
            )));
        }
        Ok((0..1u128 << bits)
            .map(|suffix| BundlePartition {
                prefix_length,
                prefix: (self.prefix << bits) | suffix,
            })
            .collect())
    }
}

impl fmt::Display for BundlePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix_length == 0 {
            write!(f, "/0")
        } else {
            write!(
                f,
                "{:0width$b}/{}",
                self.prefix,
                self.prefix_length,
                width = usize::from(self.prefix_length)
            )
        }
    }
}

pub fn parse_uuid(value: &str) -> Result<Uuid, AzulError> {
    Uuid::parse_str(value.trim()).map_err(|_| AzulError::InvalidUuid(value.to_string()))
}

const DSS_VERSION_FORMAT: &str = "%Y-%m-%dT%H%M%S%.fZ";
const DCP2_VERSION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Parses a bundle version in either the DSS (`2018-09-14T133314.453337Z`)
/// or DCP/2 (`2020-01-01T00:00:00.000000Z`) format.
pub fn parse_version(version: &str) -> Result<DateTime<Utc>, AzulError> {
    [DSS_VERSION_FORMAT, DCP2_VERSION_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(version, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AzulError::InvalidVersion(version.to_string()))
}

/// Normalizes a metadata timestamp so that dates compare correctly as strings.
pub fn normalize_date(value: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_version(value).ok())?;
    Some(format_date(&parsed))
}

pub fn format_date(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn entity_type_round_trip() {
        for entity_type in EntityType::ALL {
            let parsed: EntityType = entity_type.as_str().parse().unwrap();
            assert_eq!(parsed, entity_type);
        }
        assert_matches!(
            "donors".parse::<EntityType>(),
            Err(AzulError::InvalidEntityType(_))
        );
    }

    #[test]
    fn parse_both_version_formats() {
        let dss = parse_version("2018-09-14T133314.453337Z").unwrap();
        assert_eq!(format_date(&dss), "2018-09-14T13:33:14.453337Z");
        let dcp2 = parse_version("2021-01-01T00:00:00.000000Z").unwrap();
        assert_eq!(format_date(&dcp2), "2021-01-01T00:00:00.000000Z");
        assert_matches!(parse_version("yesterday"), Err(AzulError::InvalidVersion(_)));
    }

    #[test]
    fn normalize_short_fraction() {
        assert_eq!(
            normalize_date("2019-05-15T13:31:48.59Z").as_deref(),
            Some("2019-05-15T13:31:48.590000Z")
        );
    }

    #[test]
    fn root_partition_contains_everything() {
        let root = BundlePartition::root();
        assert!(root.contains(&Uuid::nil()));
        assert!(root.contains(&Uuid::from_u128(u128::MAX)));
    }

    #[test]
    fn divided_partitions_are_prefixed() {
        let parts = BundlePartition::root().divide(2).unwrap();
        assert_eq!(parts.len(), 4);
        let id = Uuid::parse_str("c0000000-0000-0000-0000-000000000000").unwrap();
        let owners = parts.iter().filter(|p| p.contains(&id)).collect::<Vec<_>>();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].prefix(), 0b11);
        assert_eq!(owners[0].to_string(), "11/2");
    }

    #[test]
    fn bundle_fqid_parse() {
        let fqid: BundleFqid = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa.2018-09-14T133314.453337Z"
            .parse()
            .unwrap();
        assert_eq!(fqid.version, "2018-09-14T133314.453337Z");
    }
}
