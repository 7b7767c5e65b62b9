//! Top-level catalog summary

use crate::element_index::ElementIndex;
use crate::error::{Error, Result};
use crate::resource_index::ResourceIndex;
use chrono::{DateTime, SecondsFormat, Utc};
use ferrum_catalog_models::{EntryKind, SpecFamily};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INDEX_FORMAT_VERSION: &str = "1.0.0";

pub const RESOURCES_INDEX_FILE: &str = "index/resources.json";
pub const ELEMENTS_INDEX_FILE: &str = "index/elements.json";
pub const MASTER_INDEX_FILE: &str = "index/master.json";

/// Maximum number of error messages kept in the master index
const MAX_ERROR_SAMPLES: usize = 20;

/// Run-level counters accumulated while applying batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounters {
    pub documents_processed: usize,
    pub documents_unchanged: usize,
    pub documents_rejected: usize,
    pub elements_skipped: usize,
    /// Sample of rejection messages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl BatchCounters {
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(message.into());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub base_url: String,
    pub entry_count: usize,
    pub counts_by_kind: BTreeMap<EntryKind, usize>,
    /// Directory of the family's entry files
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPointers {
    pub resources: String,
    pub elements: String,
}

impl Default for IndexPointers {
    fn default() -> Self {
        Self {
            resources: RESOURCES_INDEX_FILE.to_string(),
            elements: ELEMENTS_INDEX_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterStats {
    pub total_entries: usize,
    pub total_elements: usize,
    pub total_field_names: usize,
    pub must_support_profiles: usize,
    #[serde(flatten)]
    pub counters: BatchCounters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterIndex {
    pub version: String,
    pub last_updated: String,
    pub specifications: BTreeMap<String, SpecificationSummary>,
    pub indexes: IndexPointers,
    pub stats: MasterStats,
}

/// Builds the master summary for a set of families.
#[derive(Debug, Clone, Default)]
pub struct MasterIndexBuilder {
    families: Vec<SpecFamily>,
}

impl MasterIndexBuilder {
    pub fn new(families: impl IntoIterator<Item = SpecFamily>) -> Self {
        Self {
            families: families.into_iter().collect(),
        }
    }

    /// Families present in the resource index but not configured here are
    /// still listed, with empty metadata.
    pub fn build(
        &self,
        resources: &ResourceIndex,
        elements: &ElementIndex,
        counters: &BatchCounters,
        last_updated: DateTime<Utc>,
    ) -> Result<MasterIndex> {
        let element_paths = elements.path_count();
        if resources.statistics.total_elements != element_paths {
            return Err(Error::IndexInconsistency {
                resource_elements: resources.statistics.total_elements,
                element_paths,
            });
        }

        let mut specifications: BTreeMap<String, SpecificationSummary> = self
            .families
            .iter()
            .map(|family| {
                (
                    family.id.clone(),
                    SpecificationSummary {
                        title: family.title.clone(),
                        version: family.version.clone(),
                        base_url: family.base_url.clone(),
                        path: family.id.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        for summary in resources.by_name.values() {
            let spec = specifications
                .entry(summary.family.clone())
                .or_insert_with(|| SpecificationSummary {
                    path: summary.family.clone(),
                    ..Default::default()
                });
            spec.entry_count += 1;
            *spec.counts_by_kind.entry(summary.kind).or_default() += 1;
        }

        Ok(MasterIndex {
            version: INDEX_FORMAT_VERSION.to_string(),
            last_updated: last_updated.to_rfc3339_opts(SecondsFormat::Secs, true),
            specifications,
            indexes: IndexPointers::default(),
            stats: MasterStats {
                total_entries: resources.statistics.total_entries,
                total_elements: resources.statistics.total_elements,
                total_field_names: elements.by_field_name.len(),
                must_support_profiles: elements.must_support_by_entry.len(),
                counters: counters.clone(),
            },
        })
    }
}
