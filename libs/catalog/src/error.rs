//! Error types for the catalog pipeline

use crate::source::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document rejected: {name}: {reason}")]
    DocumentRejected { name: String, reason: String },

    #[error("Duplicate entry name '{name}' in family '{family}' (already defined by family '{existing_family}')")]
    DuplicateEntryName {
        name: String,
        family: String,
        existing_family: String,
    },

    #[error("Index inconsistency: resource index counts {resource_elements} elements but element index holds {element_paths} paths")]
    IndexInconsistency {
        resource_elements: usize,
        element_paths: usize,
    },

    #[error("Document source error: {0}")]
    Source(#[from] SourceError),

    #[error("Package error: {0}")]
    Package(#[from] ferrum_package::PackageError),

    #[error("Model error: {0}")]
    Model(#[from] ferrum_catalog_models::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rejected(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DocumentRejected {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether a batch may continue after this error.
    ///
    /// Rejected documents, unavailable documents and duplicate names only drop
    /// the entries involved. Inconsistencies are defects.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DocumentRejected { .. } | Error::DuplicateEntryName { .. } | Error::Source(_)
        )
    }
}

/// Element-scoped problems; never escape the document processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementError {
    #[error("element skipped: {reason}")]
    Skippable { reason: String },

    #[error("malformed cardinality '{value}' at {path}")]
    MalformedCardinality { path: String, value: String },
}

impl ElementError {
    pub(crate) fn skippable(reason: impl Into<String>) -> Self {
        ElementError::Skippable {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
