use serde::Serialize;
use serde_json::Value;

use crate::domain::parse_uuid;
use crate::error::{AzulError, AzulResult};
use crate::metadata::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    ProcessLink,
    SupplementaryFileLink,
}

/// A single directed edge of the metadata graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub source_id: EntityId,
    pub source_type: String,
    pub destination_id: EntityId,
    pub destination_type: String,
    pub link_type: LinkType,
}

impl Link {
    fn process(
        source_id: EntityId,
        source_type: &str,
        destination_id: EntityId,
        destination_type: &str,
    ) -> Link {
        Link {
            source_id,
            source_type: source_type.to_string(),
            destination_id,
            destination_type: destination_type.to_string(),
            link_type: LinkType::ProcessLink,
        }
    }

    /// Normalizes the three historical shapes of `links.json` into edges.
    pub fn from_json(links: &Value) -> AzulResult<Vec<Link>> {
        let version = schema_major_version(links)?;
        let items = links
            .get("links")
            .and_then(Value::as_array)
            .ok_or_else(|| AzulError::invalid("links.json", "missing `links` array"))?;
        let mut result = Vec::new();
        for item in items {
            match version {
                1 => result.push(Link::from_v1(item)?),
                2 => result.extend(Link::from_v2(item)?),
                3 => result.extend(Link::from_v3(item)?),
                other => {
                    return Err(AzulError::invalid(
                        "links.json",
                        format!("unsupported schema version {other}"),
                    ));
                }
            }
        }
        Ok(result)
    }

    fn from_v1(item: &Value) -> AzulResult<Link> {
        Ok(Link::process(
            id(item, "source_id")?,
            text(item, "source_type")?,
            id(item, "destination_id")?,
            text(item, "destination_type")?,
        ))
    }

    fn from_v2(item: &Value) -> AzulResult<Vec<Link>> {
        let process_id = id(item, "process")?;
        let input_type = text(item, "input_type")?;
        let output_type = text(item, "output_type")?;
        let mut links = Vec::new();
        for input in array(item, "inputs") {
            links.push(Link::process(
                uuid_value(input)?,
                input_type,
                process_id,
                "process",
            ));
        }
        for output in array(item, "outputs") {
            links.push(Link::process(
                process_id,
                "process",
                uuid_value(output)?,
                output_type,
            ));
        }
        links.extend(protocol_links(item, process_id)?);
        Ok(links)
    }

    fn from_v3(item: &Value) -> AzulResult<Vec<Link>> {
        match item.get("link_type").and_then(Value::as_str) {
            Some("process_link") => {
                let process_id = id(item, "process_id")?;
                let process_type = text(item, "process_type")?;
                let mut links = Vec::new();
                for input in array(item, "inputs") {
                    links.push(Link::process(
                        id(input, "input_id")?,
                        text(input, "input_type")?,
                        process_id,
                        process_type,
                    ));
                }
                for output in array(item, "outputs") {
                    links.push(Link::process(
                        process_id,
                        process_type,
                        id(output, "output_id")?,
                        text(output, "output_type")?,
                    ));
                }
                links.extend(protocol_links(item, process_id)?);
                Ok(links)
            }
            Some("supplementary_file_link") => {
                let entity = item
                    .get("entity")
                    .ok_or_else(|| AzulError::invalid("links.json", "missing `entity`"))?;
                let source_id = id(entity, "entity_id")?;
                let source_type = text(entity, "entity_type")?;
                array(item, "files")
                    .into_iter()
                    .map(|file| {
                        Ok(Link {
                            source_id,
                            source_type: source_type.to_string(),
                            destination_id: id(file, "file_id")?,
                            destination_type: text(file, "file_type")?.to_string(),
                            link_type: LinkType::SupplementaryFileLink,
                        })
                    })
                    .collect()
            }
            other => Err(AzulError::invalid(
                "links.json",
                format!("unknown link type {other:?}"),
            )),
        }
    }
}

fn protocol_links(item: &Value, process_id: EntityId) -> AzulResult<Vec<Link>> {
    array(item, "protocols")
        .into_iter()
        .map(|protocol| {
            Ok(Link::process(
                process_id,
                "process",
                id(protocol, "protocol_id")?,
                text(protocol, "protocol_type")?,
            ))
        })
        .collect()
}

/// Reads the major version from `schema_version`, falling back to the
/// version segment of `describedBy` (`.../system/2.1.1/links`).
fn schema_major_version(links: &Value) -> AzulResult<u32> {
    let version = links
        .get("schema_version")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            links
                .get("describedBy")
                .and_then(Value::as_str)
                .and_then(|url| url.rsplit('/').nth(1))
                .map(str::to_string)
        })
        .ok_or_else(|| AzulError::invalid("links.json", "cannot determine schema version"))?;
    version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| AzulError::invalid("links.json", format!("bad schema version {version}")))
}

fn array<'a>(item: &'a Value, key: &str) -> Vec<&'a Value> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().collect())
        .unwrap_or_default()
}

fn text<'a>(item: &'a Value, key: &str) -> AzulResult<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AzulError::invalid("links.json", format!("missing `{key}` in {item}")))
}

fn id(item: &Value, key: &str) -> AzulResult<EntityId> {
    parse_uuid(text(item, key)?)
}

fn uuid_value(value: &Value) -> AzulResult<EntityId> {
    value
        .as_str()
        .ok_or_else(|| AzulError::invalid("links.json", format!("expected a UUID, got {value}")))
        .and_then(parse_uuid)
}
