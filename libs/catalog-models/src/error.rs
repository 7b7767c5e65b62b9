//! Error types for catalog models

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid cardinality: {0}")]
    InvalidCardinality(String),

    #[error("Invalid entry kind: {0}")]
    InvalidKind(String),

    #[error("Invalid element path: {0}")]
    InvalidPath(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
