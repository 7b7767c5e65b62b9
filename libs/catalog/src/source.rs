//! Document sources
//!
//! The pipeline never loads documents itself; it asks a [`DocumentSource`] for
//! a raw StructureDefinition by name and treats any failure as "unavailable".

use async_trait::async_trait;
use ferrum_package::{is_profile, FhirPackage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("document '{0}' not found")]
    NotFound(String),

    #[error("document '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("'{name}' names {count} StructureDefinitions in the package")]
    Ambiguous { name: String, count: usize },
}

/// Supplies raw schema documents keyed by name.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Value, SourceError>;
}

/// One document to fetch and process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub name: String,
    #[serde(default)]
    pub is_profile: bool,
}

impl DocumentRequest {
    pub fn new(name: impl Into<String>, is_profile: bool) -> Self {
        Self {
            name: name.into(),
            is_profile,
        }
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }
}

/// Serves StructureDefinitions out of a loaded FHIR package.
#[derive(Debug, Clone)]
pub struct PackageSource {
    package: Arc<FhirPackage>,
}

impl PackageSource {
    pub fn new(package: FhirPackage) -> Self {
        Self {
            package: Arc::new(package),
        }
    }

    /// Load a package directory or `.tgz` archive.
    pub fn load(path: &Path) -> crate::Result<Self> {
        Ok(Self::new(FhirPackage::load(path)?))
    }

    pub fn package(&self) -> &FhirPackage {
        &self.package
    }

    /// Requests for the given names, or for every StructureDefinition in the
    /// package when `names` is empty.
    ///
    /// Names the package does not know are still requested (as non-profiles)
    /// so they surface as rejections instead of vanishing. A name shared by
    /// several definitions is requested once and rejected on fetch.
    pub fn requests<S: AsRef<str>>(&self, names: &[S]) -> Vec<DocumentRequest> {
        if names.is_empty() {
            let mut seen = HashSet::new();
            return self
                .package
                .structure_definitions()
                .iter()
                .filter_map(|sd| {
                    let name = sd
                        .get("name")
                        .or_else(|| sd.get("id"))
                        .and_then(Value::as_str)?;
                    seen.insert(name)
                        .then(|| DocumentRequest::new(name, is_profile(sd)))
                })
                .collect();
        }

        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                let profile = self
                    .package
                    .structure_definition(name)
                    .is_some_and(is_profile);
                DocumentRequest::new(name, profile)
            })
            .collect()
    }
}

#[async_trait]
impl DocumentSource for PackageSource {
    async fn fetch(&self, name: &str) -> Result<Value, SourceError> {
        let count = self.package.name_count(name);
        if count > 1 {
            return Err(SourceError::Ambiguous {
                name: name.to_string(),
                count,
            });
        }
        self.package
            .structure_definition(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}

/// In-memory source keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: HashMap<String, Value>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, document: Value) {
        self.documents.insert(name.into(), document);
    }

    pub fn with_document(mut self, name: impl Into<String>, document: Value) -> Self {
        self.insert(name, document);
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn fetch(&self, name: &str) -> Result<Value, SourceError> {
        self.documents
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))
    }
}
