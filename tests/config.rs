use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;

use azul_metadata::config::{
    Config, ConfigLoader, DEFAULT_CATALOG, EntityTypeEntry, EntityTypeRequest,
};
use azul_metadata::domain::EntityType;
use azul_metadata::error::AzulError;

#[test]
fn parse_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("azul.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "catalog": "dcp3",
            "partition_bits": 2,
            "max_set_size": 10,
            "entity_types": ["files", {"entity_type": "bundles", "partition_bits": 0}]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.catalog, "dcp3");
    assert_eq!(resolved.max_set_size, 10);
    assert_eq!(
        resolved.entity_types,
        vec![
            EntityTypeRequest {
                entity_type: EntityType::Files,
                partition_bits: 2,
            },
            EntityTypeRequest {
                entity_type: EntityType::Bundles,
                partition_bits: 0,
            },
        ]
    );
}

#[test]
fn explicit_missing_path_is_a_read_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(AzulError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("azul.json");
    fs::write(&path, "{\"entity_types\": ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(AzulError::ConfigParse(_))
    );
}

#[test]
fn unknown_entity_type_is_rejected() {
    let config = Config {
        entity_types: Some(vec![EntityTypeEntry::Shorthand("donors".to_string())]),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(AzulError::InvalidEntityType(_))
    );
}

#[test]
fn oversized_partitions_are_rejected() {
    let config = Config {
        partition_bits: Some(17),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(AzulError::ConfigParse(_))
    );

    let config = Config {
        max_set_size: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(AzulError::ConfigParse(_))
    );
}

#[test]
fn empty_config_uses_defaults() {
    let resolved = ConfigLoader::resolve_config(serde_json::from_str("{}").unwrap()).unwrap();
    assert_eq!(resolved.catalog, DEFAULT_CATALOG);
    assert_eq!(resolved.entity_types(), EntityType::ALL.to_vec());
    assert!(resolved.entity_types.iter().all(|request| request.partition_bits == 0));
}
