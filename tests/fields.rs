mod common;

use assert_matches::assert_matches;
use serde_json::{Value, json};

use azul_metadata::domain::{BundlePartition, EntityType};
use azul_metadata::error::AzulError;
use azul_metadata::fields::{Direction, FieldType, NULL_STR, ValueAndUnit, translate};
use azul_metadata::transform::shape::field_types;
use azul_metadata::transform::{Transformer, transformers};

use common::{VERSION, fqid, sequencing_bundle};

#[test]
fn extra_entries_are_rejected() {
    let err = ValueAndUnit::to_index(&json!({"value": "1", "unit": "day", "foo": 12})).unwrap_err();
    assert_matches!(err, AzulError::Requirement(_));
    assert!(err.to_string().contains("exactly two entries"), "{err}");
}

#[test]
fn value_and_unit_round_trip() {
    for value in [
        json!({"value": "1", "unit": "day"}),
        json!({"value": "20-30", "unit": "year"}),
        json!({"value": "0.5", "unit": null}),
        Value::Null,
    ] {
        let indexed = ValueAndUnit::to_index(&value).unwrap();
        assert_eq!(ValueAndUnit::from_index(&indexed).unwrap(), value);
    }
    assert_eq!(ValueAndUnit::to_index(&Value::Null).unwrap(), json!(NULL_STR));
}

#[test]
fn missing_unit_key_is_rejected() {
    assert_matches!(
        ValueAndUnit::to_index(&json!({"value": "1", "units": "day"})),
        Err(AzulError::Requirement(_))
    );
    assert_matches!(
        ValueAndUnit::to_index(&json!("1 day")),
        Err(AzulError::Requirement(_))
    );
}

#[test]
fn contributions_survive_the_index_round_trip() {
    let bundle = sequencing_bundle().build(fqid("bundle", VERSION));
    for entity_type in EntityType::ALL {
        let types = field_types(entity_type);
        let transformer = transformers(&bundle, &[entity_type]).unwrap().pop().unwrap();
        for contribution in transformer.transform(&BundlePartition::root()) {
            let contents = Value::Object(contribution.unwrap().contents);
            let indexed = translate(&contents, &types, Direction::ToIndex).unwrap();
            assert_eq!(
                translate(&indexed, &types, Direction::FromIndex).unwrap(),
                contents,
                "{entity_type}"
            );
        }
    }
}

#[test]
fn indexed_donor_fields() {
    let types = field_types(EntityType::Files);
    let doc = json!({"donors": [{
        "document_id": "d",
        "organism_age": {"value": "3", "unit": "week"},
        "biological_sex": null,
        "organism_age_range": null,
    }]});
    let indexed = translate(&doc, &types, Direction::ToIndex).unwrap();
    assert_eq!(indexed["donors"][0]["organism_age"], json!("3 week"));
    assert_eq!(indexed["donors"][0]["biological_sex"], json!(NULL_STR));
    assert_eq!(FieldType::NullBool.to_index(&Value::Null).unwrap(), json!(-1));
}
