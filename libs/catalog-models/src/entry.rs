//! Normalized catalog entry
//!
//! One resource, profile or data type definition with its metadata and the
//! ordered list of normalized elements.

use super::element::ElementRecord;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of definition an entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Resource,
    Profile,
    ComplexType,
    PrimitiveType,
    Logical,
}

impl EntryKind {
    pub const ALL: [EntryKind; 5] = [
        EntryKind::Resource,
        EntryKind::Profile,
        EntryKind::ComplexType,
        EntryKind::PrimitiveType,
        EntryKind::Logical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Resource => "resource",
            EntryKind::Profile => "profile",
            EntryKind::ComplexType => "complex-type",
            EntryKind::PrimitiveType => "primitive-type",
            EntryKind::Logical => "logical",
        }
    }

    /// Directory name used when entries of this kind are stored on disk
    pub fn directory(&self) -> &'static str {
        match self {
            EntryKind::Resource => "resources",
            EntryKind::Profile => "profiles",
            EntryKind::ComplexType => "datatypes",
            EntryKind::PrimitiveType => "primitives",
            EntryKind::Logical => "logical",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidKind(s.to_string()))
    }
}

/// Which element list of the source document the entry was built from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementListKind {
    /// Snapshot: inherited and local fields, fully expanded
    Expanded,
    /// Differential: only locally added or overridden fields
    Partial,
    /// Neither list was present
    #[default]
    Empty,
}

/// Per-entry element counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStatistics {
    pub element_count: usize,
    pub required_elements: usize,
    pub optional_elements: usize,
    pub summary_elements: usize,
    pub modifier_elements: usize,
}

impl EntryStatistics {
    pub fn from_elements(elements: &[ElementRecord]) -> Self {
        let required = elements
            .iter()
            .filter(|e| e.cardinality.is_required())
            .count();
        Self {
            element_count: elements.len(),
            required_elements: required,
            optional_elements: elements.len() - required,
            summary_elements: elements.iter().filter(|e| e.is_summary).count(),
            modifier_elements: elements.iter().filter(|e| e.is_modifier).count(),
        }
    }
}

/// One normalized resource or profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Name, unique within the specification family
    pub name: String,

    /// Logical id of the source document
    #[serde(default)]
    pub id: String,

    /// Human-friendly name
    #[serde(default)]
    pub title: String,

    /// Kind of definition
    pub kind: EntryKind,

    /// Specification family this entry belongs to
    pub family: String,

    /// Name of the entry this one derives from (None for root types)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,

    /// Type constrained or defined by this entry
    #[serde(default)]
    pub resource_type: String,

    /// Canonical URL of the source definition
    #[serde(default)]
    pub url: String,

    /// Business version
    #[serde(default)]
    pub version: String,

    /// Publication status
    #[serde(default)]
    pub status: String,

    /// Date last changed
    #[serde(default)]
    pub date: String,

    /// Natural language description
    #[serde(default)]
    pub description: String,

    /// FHIR version the definition targets
    #[serde(default)]
    pub fhir_version: String,

    /// Whether the definition is abstract
    #[serde(default)]
    pub is_abstract: bool,

    /// specialization | constraint
    #[serde(default)]
    pub derivation: String,

    /// Element list the entry was built from
    #[serde(default)]
    pub element_source: ElementListKind,

    /// Normalized elements in definition order
    #[serde(default)]
    pub elements: Vec<ElementRecord>,

    /// Number of must-support elements (profiles only)
    #[serde(default)]
    pub must_support_count: usize,

    /// Element counters
    #[serde(default)]
    pub statistics: EntryStatistics,
}

impl CatalogEntry {
    pub fn is_profile(&self) -> bool {
        self.kind == EntryKind::Profile
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Get an element by its entry-qualified path
    pub fn element(&self, path: &str) -> Option<&ElementRecord> {
        self.elements.iter().find(|e| e.path == path)
    }

    /// Elements flagged must-support
    pub fn must_support_elements(&self) -> impl Iterator<Item = &ElementRecord> {
        self.elements.iter().filter(|e| e.must_support)
    }

    /// Relative file path of the persisted entry (`family/kind-dir/name.json`)
    pub fn file_path(&self) -> String {
        format!("{}/{}/{}.json", self.family, self.kind.directory(), self.name)
    }
}
