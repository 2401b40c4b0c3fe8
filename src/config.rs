use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_MAX_SET_SIZE;
use crate::domain::{BundlePartition, EntityType};
use crate::error::AzulError;

pub const DEFAULT_CONFIG_FILE: &str = "azul.json";
pub const DEFAULT_CATALOG: &str = "dcp2";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub entity_types: Option<Vec<EntityTypeEntry>>,
    #[serde(default)]
    pub partition_bits: Option<u8>,
    #[serde(default)]
    pub max_set_size: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EntityTypeEntry {
    Shorthand(String),
    Detailed(EntityTypeEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EntityTypeEntryObject {
    pub entity_type: String,
    #[serde(default)]
    pub partition_bits: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeRequest {
    pub entity_type: EntityType,
    pub partition_bits: u8,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog: String,
    pub entity_types: Vec<EntityTypeRequest>,
    pub max_set_size: usize,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            catalog: DEFAULT_CATALOG.to_string(),
            entity_types: default_entity_types(0),
            max_set_size: DEFAULT_MAX_SET_SIZE,
        }
    }
}

impl ResolvedConfig {
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.entity_types
            .iter()
            .map(|request| request.entity_type)
            .collect()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, AzulError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(AzulError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AzulError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AzulError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, AzulError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let partition_bits = config.partition_bits.unwrap_or(0);
        check_partition_bits(partition_bits)?;

        let entity_types = match config.entity_types {
            None => default_entity_types(partition_bits),
            Some(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    EntityTypeEntry::Shorthand(value) => Ok(EntityTypeRequest {
                        entity_type: value.parse()?,
                        partition_bits,
                    }),
                    EntityTypeEntry::Detailed(obj) => {
                        let bits = obj.partition_bits.unwrap_or(partition_bits);
                        check_partition_bits(bits)?;
                        Ok(EntityTypeRequest {
                            entity_type: obj.entity_type.parse()?,
                            partition_bits: bits,
                        })
                    }
                })
                .collect::<Result<Vec<_>, AzulError>>()?,
        };

        let max_set_size = config.max_set_size.unwrap_or(DEFAULT_MAX_SET_SIZE);
        if max_set_size == 0 {
            return Err(AzulError::ConfigParse(
                "max_set_size must be positive".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            catalog: config
                .catalog
                .unwrap_or_else(|| DEFAULT_CATALOG.to_string()),
            entity_types,
            max_set_size,
        })
    }
}

fn check_partition_bits(bits: u8) -> Result<(), AzulError> {
    if bits > BundlePartition::MAX_PREFIX_LENGTH {
        return Err(AzulError::ConfigParse(format!(
            "partition_bits {bits} exceeds {}",
            BundlePartition::MAX_PREFIX_LENGTH
        )));
    }
    Ok(())
}

pub fn default_entity_types(partition_bits: u8) -> Vec<EntityTypeRequest> {
    EntityType::ALL
        .into_iter()
        .map(|entity_type| EntityTypeRequest {
            entity_type,
            partition_bits,
        })
        .collect()
}
