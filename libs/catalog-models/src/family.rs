//! Specification family metadata

use serde::{Deserialize, Serialize};

/// A specification family: the base specification or an implementation guide
/// whose entries share one namespace of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecFamily {
    /// Family identifier (e.g. "fhir-r4", "us-core-stu6.1")
    pub id: String,

    /// Human-friendly title
    #[serde(default)]
    pub title: String,

    /// Specification version string (e.g. "4.0.1")
    #[serde(default)]
    pub version: String,

    /// Base URL of the published specification
    #[serde(default)]
    pub base_url: String,
}

impl SpecFamily {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            version: String::new(),
            base_url: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}
