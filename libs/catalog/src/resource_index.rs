//! Resource-level index
//!
//! One summary row per entry name plus the family and kind partitions and the
//! catalog-wide counters. All maps are ordered so the persisted document is
//! byte-stable across runs.

use crate::error::{Error, Result};
use crate::hasher::ContentHash;
use crate::merger::MergeTarget;
use ferrum_catalog_models::{CatalogEntry, EntryKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Summary of one entry as seen by the resource index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub family: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    /// False when `base_name` names no entry of the index
    #[serde(default = "default_true")]
    pub base_resolved: bool,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    /// Source `date` of the definition
    #[serde(default)]
    pub last_modified: String,
    /// Entry file relative to the catalog root
    pub file: String,
    pub content_hash: ContentHash,
    pub element_count: usize,
    #[serde(default)]
    pub must_support_count: usize,
}

fn default_true() -> bool {
    true
}

impl ResourceSummary {
    pub fn from_entry(entry: &CatalogEntry, content_hash: ContentHash) -> Self {
        Self {
            family: entry.family.clone(),
            kind: entry.kind,
            base_name: entry.base_name.clone(),
            base_resolved: true,
            resource_type: entry.resource_type.clone(),
            url: entry.url.clone(),
            version: entry.version.clone(),
            last_modified: entry.date.clone(),
            file: entry.file_path(),
            content_hash,
            element_count: entry.element_count(),
            must_support_count: entry.must_support_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatistics {
    pub total_entries: usize,
    pub total_elements: usize,
    pub per_family: BTreeMap<String, usize>,
    pub per_kind: BTreeMap<EntryKind, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIndex {
    pub by_name: BTreeMap<String, ResourceSummary>,
    pub by_family: BTreeMap<String, BTreeSet<String>>,
    pub by_kind: BTreeMap<EntryKind, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub unresolved_bases: BTreeSet<String>,
    pub statistics: ResourceStatistics,
}

impl ResourceIndex {
    pub fn get(&self, name: &str) -> Option<&ResourceSummary> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Names of a family, sorted
    pub fn family_names(&self, family: &str) -> impl Iterator<Item = &str> {
        self.by_family
            .get(family)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    fn unlink(&mut self, name: &str, summary: &ResourceSummary) {
        if let Some(names) = self.by_family.get_mut(&summary.family) {
            names.remove(name);
            if names.is_empty() {
                self.by_family.remove(&summary.family);
            }
        }
        if let Some(names) = self.by_kind.get_mut(&summary.kind) {
            names.remove(name);
            if names.is_empty() {
                self.by_kind.remove(&summary.kind);
            }
        }
    }
}

impl MergeTarget for ResourceIndex {
    fn content_hash(&self, name: &str) -> Option<&ContentHash> {
        self.by_name.get(name).map(|s| &s.content_hash)
    }

    fn family_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|s| s.family.as_str())
    }

    fn upsert(&mut self, entry: &CatalogEntry, content_hash: ContentHash) {
        let summary = ResourceSummary::from_entry(entry, content_hash);
        if let Some(previous) = self.by_name.remove(&entry.name) {
            self.unlink(&entry.name, &previous);
        }

        self.by_family
            .entry(summary.family.clone())
            .or_default()
            .insert(entry.name.clone());
        self.by_kind
            .entry(summary.kind)
            .or_default()
            .insert(entry.name.clone());
        self.by_name.insert(entry.name.clone(), summary);
    }

    fn remove(&mut self, name: &str) -> bool {
        match self.by_name.remove(name) {
            Some(previous) => {
                self.unlink(name, &previous);
                true
            }
            None => false,
        }
    }

    /// Base resolution and statistics span the whole catalog.
    fn refresh(&mut self) {
        let known: BTreeSet<String> = self.by_name.keys().cloned().collect();
        let mut unresolved = BTreeSet::new();
        for (name, summary) in self.by_name.iter_mut() {
            summary.base_resolved = summary
                .base_name
                .as_ref()
                .map_or(true, |base| known.contains(base));
            if !summary.base_resolved {
                unresolved.insert(name.clone());
            }
        }
        for name in unresolved.difference(&self.unresolved_bases) {
            if let Some(summary) = self.by_name.get(name) {
                warn!(
                    name = %name,
                    family = %summary.family,
                    base = ?summary.base_name,
                    "Base definition does not resolve to a known entry"
                );
            }
        }
        self.unresolved_bases = unresolved;

        let mut statistics = ResourceStatistics {
            total_entries: self.by_name.len(),
            ..Default::default()
        };
        for summary in self.by_name.values() {
            statistics.total_elements += summary.element_count;
            *statistics
                .per_family
                .entry(summary.family.clone())
                .or_default() += 1;
            *statistics.per_kind.entry(summary.kind).or_default() += 1;
        }
        self.statistics = statistics;
    }
}

/// Builds a [`ResourceIndex`] from a complete set of entries.
#[derive(Debug, Default)]
pub struct ResourceIndexBuilder {
    index: ResourceIndex,
}

impl ResourceIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry; a name seen before is a hard error.
    pub fn add(&mut self, entry: &CatalogEntry) -> Result<()> {
        if let Some(existing) = self.index.by_name.get(&entry.name) {
            return Err(Error::DuplicateEntryName {
                name: entry.name.clone(),
                family: entry.family.clone(),
                existing_family: existing.family.clone(),
            });
        }
        let content_hash = ContentHash::of_entry(entry)?;
        self.index.upsert(entry, content_hash);
        Ok(())
    }

    pub fn build(mut self) -> ResourceIndex {
        self.index.refresh();
        self.index
    }

    pub fn from_entries<'a, I>(entries: I) -> Result<ResourceIndex>
    where
        I: IntoIterator<Item = &'a CatalogEntry>,
    {
        let mut builder = Self::new();
        for entry in entries {
            builder.add(entry)?;
        }
        Ok(builder.build())
    }
}
