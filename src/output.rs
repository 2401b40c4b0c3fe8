use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AggregateResult, ProgressEvent, ProgressSink, TransformResult};
use crate::domain::EntityType;
use crate::fields::FieldTypes;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_transform(result: &TransformResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_aggregate(result: &AggregateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_field_types(types: &BTreeMap<EntityType, FieldTypes>) -> io::Result<()> {
        Self::print_json(types)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes to the log rather than stdout, which carries the JSON.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
