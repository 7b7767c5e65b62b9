//! Element-level cross-reference index
//!
//! `by_path` is the primary partition: one row per entry-qualified path,
//! carrying everything the other partitions are derived from. Field-name
//! summaries, must-support sets, the constraint catalog and the type usage
//! table are recomputed from it after each batch of changes.

use crate::config::DEFAULT_SAMPLE_PATH_CAP;
use crate::error::{Error, Result};
use crate::hasher::ContentHash;
use crate::merger::MergeTarget;
use ferrum_catalog_models::{
    Binding, CatalogEntry, Cardinality, Constraint, ConstraintSeverity, EntryKind, TypeExpression,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Curated free-text terms and the entry names they point to.
pub const SEARCH_TERM_SEEDS: &[(&str, &[&str])] = &[
    ("allergy", &["AllergyIntolerance"]),
    ("condition", &["Condition"]),
    ("demographics", &["Patient"]),
    ("diagnosis", &["Condition"]),
    ("doctor", &["Practitioner"]),
    ("encounter", &["Encounter"]),
    ("facility", &["Organization"]),
    ("lab", &["Observation"]),
    ("medication", &["Medication", "MedicationRequest"]),
    ("observation", &["Observation"]),
    ("organization", &["Organization"]),
    ("patient", &["Patient"]),
    ("practitioner", &["Practitioner"]),
    ("procedure", &["Procedure"]),
    ("provider", &["Practitioner"]),
    ("visit", &["Encounter"]),
    ("vital", &["Observation"]),
];

/// All elements sharing one field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldNameSummary {
    /// Entries declaring a field with this name
    pub resources: BTreeSet<String>,
    pub frequency: usize,
    /// Type codes observed for this field name
    pub types: BTreeSet<String>,
}

/// One entry-qualified path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSummary {
    /// Owning entry
    pub entry: String,
    pub field_name: String,
    pub cardinality: Cardinality,
    #[serde(rename = "type", default)]
    pub types: TypeExpression,
    /// Only ever true for profile entries
    #[serde(default)]
    pub must_support: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,
    #[serde(default)]
    pub is_modifier: bool,
    #[serde(default)]
    pub is_summary: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeUsage {
    pub frequency: usize,
    /// First paths using the type, in path order, capped
    pub sample_paths: Vec<String>,
}

/// Catalog entry for one constraint key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintSummary {
    pub severity: ConstraintSeverity,
    #[serde(default)]
    pub human: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub paths: BTreeSet<String>,
}

/// Per-entry bookkeeping used for change detection and profile lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEntry {
    pub family: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    pub content_hash: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementIndex {
    #[serde(rename = "byName")]
    pub by_field_name: BTreeMap<String, FieldNameSummary>,
    pub by_path: BTreeMap<String, PathSummary>,
    #[serde(rename = "mustSupportElements")]
    pub must_support_by_entry: BTreeMap<String, BTreeSet<String>>,
    #[serde(rename = "dataTypeUsage")]
    pub type_usage: BTreeMap<String, TypeUsage>,
    pub constraints: BTreeMap<String, ConstraintSummary>,
    pub search_terms: BTreeMap<String, BTreeSet<String>>,
    pub entries: BTreeMap<String, IndexedEntry>,

    #[serde(skip, default = "default_sample_path_cap")]
    sample_path_cap: usize,
    #[serde(skip)]
    touched: Touched,
}

fn default_sample_path_cap() -> usize {
    DEFAULT_SAMPLE_PATH_CAP
}

/// Partitions invalidated since the last refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Touched {
    field_names: BTreeSet<String>,
    constraint_keys: BTreeSet<String>,
    entries: BTreeSet<String>,
}

impl Touched {
    fn is_empty(&self) -> bool {
        self.field_names.is_empty() && self.constraint_keys.is_empty() && self.entries.is_empty()
    }

    fn mark(&mut self, entry: &str, path: &PathSummary) {
        self.entries.insert(entry.to_string());
        self.field_names.insert(path.field_name.clone());
        self.constraint_keys
            .extend(path.constraints.iter().map(|c| c.key.clone()));
    }
}

impl Default for ElementIndex {
    fn default() -> Self {
        Self::with_sample_path_cap(DEFAULT_SAMPLE_PATH_CAP)
    }
}

impl ElementIndex {
    pub fn with_sample_path_cap(sample_path_cap: usize) -> Self {
        let mut index = Self {
            by_field_name: BTreeMap::new(),
            by_path: BTreeMap::new(),
            must_support_by_entry: BTreeMap::new(),
            type_usage: BTreeMap::new(),
            constraints: BTreeMap::new(),
            search_terms: BTreeMap::new(),
            entries: BTreeMap::new(),
            sample_path_cap,
            touched: Touched::default(),
        };
        index.refresh_search_terms();
        index
    }

    pub fn sample_path_cap(&self) -> usize {
        self.sample_path_cap
    }

    /// Change the sample cap; the type usage table is rebuilt on the next refresh.
    pub fn set_sample_path_cap(&mut self, sample_path_cap: usize) {
        if self.sample_path_cap != sample_path_cap {
            self.sample_path_cap = sample_path_cap;
            self.rebuild_type_usage();
        }
    }

    pub fn path(&self, path: &str) -> Option<&PathSummary> {
        self.by_path.get(path)
    }

    pub fn path_count(&self) -> usize {
        self.by_path.len()
    }

    /// Entry names mapped to a free-text term
    pub fn search(&self, term: &str) -> Option<&BTreeSet<String>> {
        self.search_terms.get(&term.to_lowercase())
    }

    /// Paths owned by one entry, in path order
    ///
    /// The prefix narrows the scan; ownership is decided by `PathSummary::entry`
    /// so `Foo` never claims paths of an entry named `Foo.Ext`.
    pub fn entry_paths<'a>(&'a self, entry: &'a str) -> impl Iterator<Item = (&'a String, &'a PathSummary)> + 'a {
        let prefix = format!("{}.", entry);
        self.by_path
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(&prefix))
            .filter(move |(_, summary)| summary.entry == entry)
    }

    fn remove_paths(&mut self, entry: &str) {
        let owned: Vec<String> = self.entry_paths(entry).map(|(path, _)| path.clone()).collect();
        for path in owned {
            if let Some(removed) = self.by_path.remove(&path) {
                self.touched.mark(entry, &removed);
            }
        }
        self.touched.entries.insert(entry.to_string());
    }

    fn refresh_field_names(&mut self, names: &BTreeSet<String>) {
        let mut fresh: BTreeMap<String, FieldNameSummary> = BTreeMap::new();
        for path in self.by_path.values() {
            if !names.contains(&path.field_name) {
                continue;
            }
            let summary = fresh.entry(path.field_name.clone()).or_default();
            summary.resources.insert(path.entry.clone());
            summary.frequency += 1;
            summary.types.extend(path.types.codes().map(str::to_string));
        }
        for name in names {
            match fresh.remove(name) {
                Some(summary) => self.by_field_name.insert(name.clone(), summary),
                None => self.by_field_name.remove(name),
            };
        }
    }

    fn refresh_must_support(&mut self, entries: &BTreeSet<String>) {
        for entry in entries {
            let fields: BTreeSet<String> = self
                .entry_paths(entry)
                .filter(|(_, path)| path.must_support)
                .map(|(_, path)| path.field_name.clone())
                .collect();
            if fields.is_empty() {
                self.must_support_by_entry.remove(entry);
            } else {
                self.must_support_by_entry.insert(entry.clone(), fields);
            }
        }
    }

    /// First definition in path order wins for severity and text.
    fn refresh_constraints(&mut self, keys: &BTreeSet<String>) {
        let mut fresh: BTreeMap<String, ConstraintSummary> = BTreeMap::new();
        for (path_name, path) in &self.by_path {
            for constraint in path.constraints.iter().filter(|c| keys.contains(&c.key)) {
                fresh
                    .entry(constraint.key.clone())
                    .or_insert_with(|| ConstraintSummary {
                        severity: constraint.severity.clone(),
                        human: constraint.human.clone(),
                        expression: constraint.expression.clone(),
                        paths: BTreeSet::new(),
                    })
                    .paths
                    .insert(path_name.clone());
            }
        }
        for key in keys {
            match fresh.remove(key) {
                Some(summary) => self.constraints.insert(key.clone(), summary),
                None => self.constraints.remove(key),
            };
        }
    }

    /// Frequencies span the whole catalog, so the table is always rebuilt.
    fn rebuild_type_usage(&mut self) {
        let mut usage: BTreeMap<String, TypeUsage> = BTreeMap::new();
        for (path_name, path) in &self.by_path {
            for code in path.types.codes() {
                let entry = usage.entry(code.to_string()).or_default();
                entry.frequency += 1;
                if entry.sample_paths.len() < self.sample_path_cap {
                    entry.sample_paths.push(path_name.clone());
                }
            }
        }
        self.type_usage = usage;
    }

    /// Seeded terms, extended with every profile whose base is a seeded name.
    fn refresh_search_terms(&mut self) {
        let mut terms: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (term, names) in SEARCH_TERM_SEEDS {
            let mapped = terms.entry(term.to_string()).or_default();
            mapped.extend(names.iter().map(|name| name.to_string()));

            let profiles = self.entries.iter().filter(|(_, entry)| {
                entry.kind == EntryKind::Profile
                    && entry
                        .base_name
                        .as_deref()
                        .is_some_and(|base| names.contains(&base))
            });
            mapped.extend(profiles.map(|(name, _)| name.clone()));
        }
        self.search_terms = terms;
    }
}

impl MergeTarget for ElementIndex {
    fn content_hash(&self, name: &str) -> Option<&ContentHash> {
        self.entries.get(name).map(|e| &e.content_hash)
    }

    fn family_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.family.as_str())
    }

    fn upsert(&mut self, entry: &CatalogEntry, content_hash: ContentHash) {
        self.remove_paths(&entry.name);

        let is_profile = entry.is_profile();
        for element in &entry.elements {
            let path = PathSummary {
                entry: entry.name.clone(),
                field_name: element.field_name.clone(),
                cardinality: element.cardinality,
                types: element.types.clone(),
                must_support: is_profile && element.must_support,
                binding: element.binding.clone(),
                is_modifier: element.is_modifier,
                is_summary: element.is_summary,
                constraints: element.constraints.clone(),
            };
            self.touched.mark(&entry.name, &path);
            self.by_path.insert(element.path.clone(), path);
        }

        self.entries.insert(
            entry.name.clone(),
            IndexedEntry {
                family: entry.family.clone(),
                kind: entry.kind,
                base_name: entry.base_name.clone(),
                content_hash,
            },
        );
    }

    fn remove(&mut self, name: &str) -> bool {
        if self.entries.remove(name).is_none() {
            return false;
        }
        self.remove_paths(name);
        true
    }

    fn refresh(&mut self) {
        if self.touched.is_empty() {
            return;
        }
        let touched = std::mem::take(&mut self.touched);

        self.refresh_field_names(&touched.field_names);
        self.refresh_must_support(&touched.entries);
        self.refresh_constraints(&touched.constraint_keys);
        self.rebuild_type_usage();
        self.refresh_search_terms();
    }
}

/// Builds an [`ElementIndex`] from a complete set of entries.
#[derive(Debug)]
pub struct ElementIndexBuilder {
    index: ElementIndex,
}

impl Default for ElementIndexBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_PATH_CAP)
    }
}

impl ElementIndexBuilder {
    pub fn new(sample_path_cap: usize) -> Self {
        Self {
            index: ElementIndex::with_sample_path_cap(sample_path_cap),
        }
    }

    pub fn add(&mut self, entry: &CatalogEntry) -> Result<()> {
        if let Some(existing) = self.index.entries.get(&entry.name) {
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

    pub fn build(mut self) -> ElementIndex {
        self.index.refresh();
        self.index
    }

    pub fn from_entries<'a, I>(entries: I, sample_path_cap: usize) -> Result<ElementIndex>
    where
        I: IntoIterator<Item = &'a CatalogEntry>,
    {
        let mut builder = Self::new(sample_path_cap);
        for entry in entries {
            builder.add(entry)?;
        }
        Ok(builder.build())
    }
}
