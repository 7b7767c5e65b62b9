//! Incremental index maintenance
//!
//! [`IndexMerger`] folds a batch of entries into an existing index. It is
//! additive: names disappear only through [`IndexMerger::prune`]. Entries whose
//! content hash matches the indexed one are left untouched.

use crate::error::{Error, Result};
use crate::hasher::ContentHash;
use ferrum_catalog_models::CatalogEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// An index that can absorb entries one at a time.
///
/// `upsert` and `remove` only touch the rows of the named entry; derived
/// partitions are brought up to date by a single `refresh` afterwards.
pub trait MergeTarget {
    fn content_hash(&self, name: &str) -> Option<&ContentHash>;

    fn family_of(&self, name: &str) -> Option<&str>;

    fn upsert(&mut self, entry: &CatalogEntry, content_hash: ContentHash);

    fn remove(&mut self, name: &str) -> bool;

    fn refresh(&mut self);
}

/// A batch entry left out of a merge because its name is not unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateName {
    pub name: String,
    pub family: String,
    /// Family of the conflicting entry (in the batch or in the index)
    pub existing_family: String,
}

impl DuplicateName {
    pub fn to_error(&self) -> Error {
        Error::DuplicateEntryName {
            name: self.name.clone(),
            family: self.family.clone(),
            existing_family: self.existing_family.clone(),
        }
    }
}

/// What a merge or prune changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Entries that were not merged, one per offending batch entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<DuplicateName>,
}

impl MergeReport {
    pub fn mutations(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexMerger;

impl IndexMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merge a batch into `index`.
    ///
    /// Name conflicts are fatal only for the names involved: every entry whose
    /// name is repeated in the batch, or already owned by another family, is
    /// left out and listed in [`MergeReport::duplicates`]. Neither copy of a
    /// repeated name is merged. The rest of the batch is merged normally.
    pub fn merge<T: MergeTarget>(&self, index: &mut T, entries: &[CatalogEntry]) -> Result<MergeReport> {
        let mut families_by_name: HashMap<&str, Vec<&str>> = HashMap::with_capacity(entries.len());
        for entry in entries {
            families_by_name
                .entry(entry.name.as_str())
                .or_default()
                .push(entry.family.as_str());
        }

        let mut report = MergeReport::default();
        let mut accepted = Vec::with_capacity(entries.len());

        for (position, entry) in entries.iter().enumerate() {
            let conflict = match families_by_name.get(entry.name.as_str()) {
                // Pair each occurrence with another one of the same name.
                Some(families) if families.len() > 1 => entries
                    .iter()
                    .enumerate()
                    .find(|(other, candidate)| *other != position && candidate.name == entry.name)
                    .map(|(_, candidate)| candidate.family.clone()),
                _ => index
                    .family_of(&entry.name)
                    .filter(|existing| *existing != entry.family)
                    .map(str::to_string),
            };

            match conflict {
                Some(existing_family) => {
                    let duplicate = DuplicateName {
                        name: entry.name.clone(),
                        family: entry.family.clone(),
                        existing_family,
                    };
                    warn!(error = %duplicate.to_error(), "Entry left out of merge");
                    report.duplicates.push(duplicate);
                }
                None => accepted.push((entry, ContentHash::of_entry(entry)?)),
            }
        }

        for (entry, content_hash) in accepted {
            match index.content_hash(&entry.name) {
                Some(existing) if *existing == content_hash => {
                    report.unchanged.push(entry.name.clone());
                    continue;
                }
                Some(_) => report.updated.push(entry.name.clone()),
                None => report.added.push(entry.name.clone()),
            }
            index.upsert(entry, content_hash);
        }

        if !report.is_noop() {
            index.refresh();
        }
        Ok(report)
    }

    /// Remove the named entries; names not present are ignored.
    pub fn prune<T: MergeTarget, S: AsRef<str>>(&self, index: &mut T, names: &[S]) -> MergeReport {
        let mut report = MergeReport::default();
        for name in names {
            if index.remove(name.as_ref()) {
                report.removed.push(name.as_ref().to_string());
            }
        }
        if !report.is_noop() {
            index.refresh();
            info!(removed = report.removed.len(), "Pruned entries from index");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element_index::{ElementIndex, ElementIndexBuilder};
    use crate::processor::DocumentProcessor;
    use crate::resource_index::{ResourceIndex, ResourceIndexBuilder};
    use ferrum_catalog_models::SpecFamily;
    use serde_json::json;

    fn entry(family: &str, name: &str, fields: &[&str]) -> CatalogEntry {
        let elements: Vec<_> = fields
            .iter()
            .map(|field| json!({ "path": format!("{}.{}", name, field), "type": [{ "code": "string" }] }))
            .collect();
        DocumentProcessor::for_family(SpecFamily::new(family))
            .process(
                &json!({ "name": name, "kind": "resource", "snapshot": { "element": elements } }),
                false,
            )
            .unwrap()
    }

    #[test]
    fn merge_adds_updates_and_skips() {
        let merger = IndexMerger::new();
        let mut index = ResourceIndexBuilder::from_entries(&[entry("fhir-r4", "Patient", &["name"])]).unwrap();

        let report = merger
            .merge(
                &mut index,
                &[
                    entry("fhir-r4", "Patient", &["name"]),
                    entry("fhir-r4", "Observation", &["code"]),
                ],
            )
            .unwrap();
        assert_eq!(report.added, vec!["Observation"]);
        assert_eq!(report.unchanged, vec!["Patient"]);

        let report = merger
            .merge(&mut index, &[entry("fhir-r4", "Patient", &["name", "gender"])])
            .unwrap();
        assert_eq!(report.updated, vec!["Patient"]);
        assert_eq!(index.statistics.total_elements, 3);
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let merger = IndexMerger::new();
        let batch = vec![
            entry("fhir-r4", "Patient", &["name", "gender"]),
            entry("fhir-r4", "Encounter", &["status"]),
        ];

        let mut resources = ResourceIndex::default();
        let mut elements = ElementIndex::default();
        merger.merge(&mut resources, &batch).unwrap();
        merger.merge(&mut elements, &batch).unwrap();
        let (resources_once, elements_once) = (resources.clone(), elements.clone());

        let second = merger.merge(&mut resources, &batch).unwrap();
        merger.merge(&mut elements, &batch).unwrap();

        assert!(second.is_noop());
        assert_eq!(resources, resources_once);
        assert_eq!(elements, elements_once);
    }

    #[test]
    fn merge_matches_a_full_build() {
        let merger = IndexMerger::new();
        let first = vec![entry("fhir-r4", "Patient", &["name"])];
        let second = vec![entry("fhir-r4", "Patient", &["name", "birthDate"]), entry("fhir-r4", "Group", &["name"])];

        let mut merged = ElementIndexBuilder::from_entries(&first, 50).unwrap();
        merger.merge(&mut merged, &second).unwrap();

        let rebuilt = ElementIndexBuilder::from_entries(&second, 50).unwrap();
        assert_eq!(merged, rebuilt);
    }

    #[test]
    fn duplicate_within_batch_is_left_out() {
        let merger = IndexMerger::new();
        let mut index = ResourceIndexBuilder::from_entries(&[entry("fhir-r4", "Observation", &["code"])]).unwrap();

        let report = merger
            .merge(
                &mut index,
                &[
                    entry("fhir-r4", "Patient", &["name"]),
                    entry("fhir-r4", "Encounter", &["status"]),
                    entry("fhir-r4", "Patient", &["gender"]),
                ],
            )
            .unwrap();

        assert_eq!(report.added, vec!["Encounter"]);
        assert_eq!(report.duplicates.len(), 2);
        assert!(report.duplicates.iter().all(|d| d.name == "Patient"));
        assert!(matches!(
            report.duplicates[0].to_error(),
            Error::DuplicateEntryName { ref name, .. } if name == "Patient"
        ));
        assert!(!index.contains("Patient"));
        assert!(index.contains("Encounter"));
        assert_eq!(index.statistics.total_elements, 2);
    }

    #[test]
    fn name_owned_by_another_family_is_a_duplicate() {
        let merger = IndexMerger::new();
        let mut index = ElementIndexBuilder::from_entries(&[entry("fhir-r4", "Patient", &["name"])], 50).unwrap();
        let before = index.clone();

        let report = merger
            .merge(&mut index, &[entry("us-core", "Patient", &["name", "gender"])])
            .unwrap();

        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].family, "us-core");
        assert_eq!(report.duplicates[0].existing_family, "fhir-r4");
        assert!(report.is_noop());
        assert_eq!(index, before);
    }

    #[test]
    fn prune_removes_only_named_entries() {
        let merger = IndexMerger::new();
        let mut index = ResourceIndexBuilder::from_entries(&[
            entry("fhir-r4", "Patient", &["name"]),
            entry("fhir-r4", "Observation", &["code", "status"]),
        ])
        .unwrap();

        let report = merger.prune(&mut index, &["Observation", "Unknown"]);

        assert_eq!(report.removed, vec!["Observation"]);
        assert!(!index.contains("Observation"));
        assert!(index.contains("Patient"));
        assert_eq!(index.statistics.total_elements, 1);
        assert_eq!(index.by_family["fhir-r4"].len(), 1);
    }
}
