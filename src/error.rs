use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AzulError {
    #[error("manifest entry {entry} is missing required field `{field}`")]
    #[diagnostic(code(azul::manifest::missing_field))]
    MissingField { field: String, entry: String },

    #[error("no entity type registered for schema {0}")]
    #[diagnostic(code(azul::metadata::type_lookup))]
    TypeLookup(String),

    #[error("cannot link {source_entity} to {destination} (forward: {forward})")]
    #[diagnostic(code(azul::metadata::link))]
    Link {
        source_entity: String,
        destination: String,
        forward: bool,
    },

    #[error("{0}")]
    #[diagnostic(code(azul::requirement))]
    Requirement(String),

    #[error("invalid metadata in {address}: {reason}")]
    #[diagnostic(code(azul::metadata::invalid))]
    InvalidMetadata { address: String, reason: String },

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("invalid bundle version: {0}")]
    InvalidVersion(String),

    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error("metadata file not found in bundle: {0}")]
    MissingMetadataFile(String),

    #[error("failed to parse JSON: {0}")]
    Json(String),

    #[error("missing config file azul.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl AzulError {
    pub fn invalid(address: impl Into<String>, reason: impl Into<String>) -> Self {
        AzulError::InvalidMetadata {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Malformed input is a producer defect and is never retried.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            AzulError::MissingField { .. }
                | AzulError::TypeLookup(_)
                | AzulError::Link { .. }
                | AzulError::Requirement(_)
                | AzulError::InvalidMetadata { .. }
                | AzulError::InvalidUuid(_)
                | AzulError::InvalidVersion(_)
                | AzulError::MissingMetadataFile(_)
                | AzulError::Json(_)
        )
    }
}

pub type AzulResult<T> = Result<T, AzulError>;
