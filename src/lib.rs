pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fields;
pub mod metadata;
pub mod output;
pub mod submitter;
pub mod transform;
pub mod visitor;
