pub mod bundle;
pub mod entity;
pub mod links;
pub mod manifest;
pub mod source;
