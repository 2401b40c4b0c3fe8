use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::domain::normalize_date;
use crate::error::{AzulError, AzulResult};

pub const NULL_STR: &str = "~null";
pub const NULL_INT: i64 = i64::MIN;
pub const NULL_FLOAT: f64 = f64::MIN;
pub const NULL_DATETIME: &str = "0001-01-01T00:00:00.000000Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToIndex,
    FromIndex,
}

/// How a contribution field is represented in the index. Index documents
/// cannot hold nulls in every position, so nullable scalars use a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    NullStr,
    NullInt,
    NullFloat,
    NullBool,
    NullDatetime,
    ValueAndUnit,
    ClosedRange,
    PassThrough,
}

impl FieldType {
    pub fn translate(&self, value: &Value, direction: Direction) -> AzulResult<Value> {
        match direction {
            Direction::ToIndex => self.to_index(value),
            Direction::FromIndex => self.from_index(value),
        }
    }

    pub fn to_index(&self, value: &Value) -> AzulResult<Value> {
        match (self, value) {
            (FieldType::PassThrough, value) => Ok(value.clone()),
            (FieldType::ValueAndUnit, value) => ValueAndUnit::to_index(value),
            (FieldType::ClosedRange, value) => closed_range(value),
            (FieldType::NullStr, Value::Null) => Ok(json!(NULL_STR)),
            (FieldType::NullInt, Value::Null) => Ok(json!(NULL_INT)),
            (FieldType::NullFloat, Value::Null) => Ok(json!(NULL_FLOAT)),
            (FieldType::NullBool, Value::Null) => Ok(json!(-1)),
            (FieldType::NullBool, Value::Bool(value)) => Ok(json!(i64::from(*value))),
            (FieldType::NullDatetime, Value::Null) => Ok(json!(NULL_DATETIME)),
            (FieldType::NullDatetime, Value::String(date)) => normalize_date(date)
                .map(Value::String)
                .ok_or_else(|| AzulError::Requirement(format!("invalid timestamp {date:?}"))),
            (FieldType::NullStr, Value::String(_))
            | (FieldType::NullInt | FieldType::NullFloat, Value::Number(_)) => Ok(value.clone()),
            (field_type, value) => Err(AzulError::Requirement(format!(
                "{value} is not a valid {field_type:?} value"
            ))),
        }
    }

    pub fn from_index(&self, value: &Value) -> AzulResult<Value> {
        let restored = match self {
            FieldType::PassThrough | FieldType::ClosedRange => value.clone(),
            FieldType::ValueAndUnit => ValueAndUnit::from_index(value)?,
            FieldType::NullStr => match value.as_str() {
                Some(NULL_STR) => Value::Null,
                _ => value.clone(),
            },
            FieldType::NullInt => match value.as_i64() {
                Some(NULL_INT) => Value::Null,
                _ => value.clone(),
            },
            FieldType::NullFloat => match value.as_f64() {
                Some(float) if float == NULL_FLOAT => Value::Null,
                _ => value.clone(),
            },
            FieldType::NullBool => match value.as_i64() {
                Some(-1) => Value::Null,
                Some(0) => Value::Bool(false),
                Some(1) => Value::Bool(true),
                _ => {
                    return Err(AzulError::Requirement(format!(
                        "{value} is not an indexed boolean"
                    )));
                }
            },
            FieldType::NullDatetime => match value.as_str() {
                Some(NULL_DATETIME) => Value::Null,
                _ => value.clone(),
            },
        };
        Ok(restored)
    }
}

fn closed_range(value: &Value) -> AzulResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let bound = |key: &str| value.get(key).and_then(Value::as_f64);
    match (value.as_object().map(Map::len), bound("gte"), bound("lte")) {
        (Some(2), Some(gte), Some(lte)) if gte <= lte => Ok(value.clone()),
        _ => Err(AzulError::Requirement(format!(
            "{value} is not a closed range with `gte` <= `lte`"
        ))),
    }
}

/// Codec for `{value, unit}` pairs rendered as `"<value> <unit>"`.
pub struct ValueAndUnit;

impl ValueAndUnit {
    pub fn to_index(value: &Value) -> AzulResult<Value> {
        let object = match value {
            Value::Null => return Ok(json!(NULL_STR)),
            Value::Object(object) => object,
            other => {
                return Err(AzulError::Requirement(format!(
                    "expected a value and unit object, got {other}"
                )));
            }
        };
        if object.len() != 2 {
            return Err(AzulError::Requirement(format!(
                "{value} must contain exactly two entries, `value` and `unit`"
            )));
        }
        let (Some(inner), Some(unit)) = (object.get("value"), object.get("unit")) else {
            return Err(AzulError::Requirement(format!(
                "{value} must contain the keys `value` and `unit`"
            )));
        };
        let inner = match inner.as_str() {
            Some(inner) if is_token(inner) => inner,
            _ => {
                return Err(AzulError::Requirement(format!(
                    "`value` of {value} must be a non-empty string without spaces"
                )));
            }
        };
        match unit {
            Value::Null => Ok(json!(inner)),
            Value::String(unit) if is_token(unit) => Ok(json!(format!("{inner} {unit}"))),
            _ => Err(AzulError::Requirement(format!(
                "`unit` of {value} must be null or a non-empty string without spaces"
            ))),
        }
    }

    /// A bare token restores as a value without unit, so `"year"` yields
    /// `{"value": "year", "unit": null}`.
    pub fn from_index(value: &Value) -> AzulResult<Value> {
        let text = value.as_str().ok_or_else(|| {
            AzulError::Requirement(format!("expected an indexed value and unit, got {value}"))
        })?;
        if text == NULL_STR {
            return Ok(Value::Null);
        }
        let parts = text.split(' ').collect::<Vec<_>>();
        match parts.as_slice() {
            [inner] => Ok(json!({"value": inner, "unit": null})),
            [inner, unit] => Ok(json!({"value": inner, "unit": unit})),
            _ => Err(AzulError::Requirement(format!(
                "{text:?} must contain at most one space"
            ))),
        }
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty() && !value.contains(' ')
}

/// A tree of field types mirroring the shape of a contribution's contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldTypes {
    Leaf(FieldType),
    Nested(BTreeMap<String, FieldTypes>),
}

impl FieldTypes {
    pub fn nested<const N: usize>(fields: [(&str, FieldTypes); N]) -> FieldTypes {
        FieldTypes::Nested(
            fields
                .into_iter()
                .map(|(name, field_type)| (name.to_string(), field_type))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&FieldTypes> {
        match self {
            FieldTypes::Nested(fields) => fields.get(key),
            FieldTypes::Leaf(_) => None,
        }
    }
}

impl From<FieldType> for FieldTypes {
    fn from(field_type: FieldType) -> Self {
        FieldTypes::Leaf(field_type)
    }
}

/// Applies a field type tree to a document. Lists are translated element by
/// element and fields without a declared type pass through unchanged.
pub fn translate(doc: &Value, types: &FieldTypes, direction: Direction) -> AzulResult<Value> {
    match (types, doc) {
        (_, Value::Array(items)) => items
            .iter()
            .map(|item| translate(item, types, direction))
            .collect::<AzulResult<Vec<_>>>()
            .map(Value::Array),
        (FieldTypes::Leaf(field_type), doc) => field_type.translate(doc, direction),
        (FieldTypes::Nested(fields), Value::Object(object)) => {
            let mut translated = Map::new();
            for (key, value) in object {
                let value = match fields.get(key) {
                    Some(types) => translate(value, types, direction)?,
                    None => value.clone(),
                };
                translated.insert(key.clone(), value);
            }
            Ok(Value::Object(translated))
        }
        (FieldTypes::Nested(_), Value::Null) => Ok(Value::Null),
        (FieldTypes::Nested(_), other) => Err(AzulError::Requirement(format!(
            "expected an object, got {other}"
        ))),
    }
}
