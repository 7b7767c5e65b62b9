//! On-disk catalog layout
//!
//! ```text
//! <root>/
//!   <family>/<kind-dir>/<name>.json   entry + `_metadata`
//!   index/resources.json
//!   index/elements.json
//!   index/master.json
//! ```
//!
//! Every file is pretty JSON with a trailing newline, written to a temporary
//! sibling first and renamed into place.

use crate::config::IndexConfig;
use crate::element_index::ElementIndex;
use crate::error::Result;
use crate::hasher::ContentHash;
use crate::master_index::{MasterIndex, ELEMENTS_INDEX_FILE, MASTER_INDEX_FILE, RESOURCES_INDEX_FILE};
use crate::pipeline::CatalogIndexes;
use crate::resource_index::ResourceIndex;
use ferrum_catalog_models::{CatalogEntry, EntryKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const METADATA_KEY: &str = "_metadata";

/// Metadata embedded in every entry file for change detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub element_count: usize,
    pub content_hash: ContentHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored file already carries the same content hash
    Unchanged,
}

/// Reads only the `_metadata` block of an entry file.
#[derive(Deserialize)]
struct MetadataOnly {
    #[serde(rename = "_metadata")]
    metadata: Option<EntryMetadata>,
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, family: &str, kind: EntryKind, name: &str) -> PathBuf {
        self.root
            .join(family)
            .join(kind.directory())
            .join(format!("{}.json", name))
    }

    /// Persist an entry unless the stored copy has the same content hash.
    pub fn write_entry(&self, entry: &CatalogEntry) -> Result<WriteOutcome> {
        let content_hash = ContentHash::of_entry(entry)?;
        let existing = self.read_entry_metadata(&entry.family, entry.kind, &entry.name)?;
        if existing.is_some_and(|m| m.content_hash == content_hash) {
            debug!(name = %entry.name, family = %entry.family, "Entry unchanged, not rewriting");
            return Ok(WriteOutcome::Unchanged);
        }

        let metadata = EntryMetadata {
            element_count: entry.element_count(),
            content_hash,
        };
        let mut value = serde_json::to_value(entry)?;
        if let Value::Object(map) = &mut value {
            map.insert(METADATA_KEY.to_string(), serde_json::to_value(&metadata)?);
        }

        write_json(&self.root.join(entry.file_path()), &value)?;
        self.remove_stale_copies(entry)?;
        Ok(WriteOutcome::Written)
    }

    /// Drop files left under another kind directory when an entry's kind changed.
    fn remove_stale_copies(&self, entry: &CatalogEntry) -> Result<()> {
        for kind in EntryKind::ALL.into_iter().filter(|kind| *kind != entry.kind) {
            if self.delete_entry(&entry.family, kind, &entry.name)? {
                info!(
                    name = %entry.name,
                    family = %entry.family,
                    previous_kind = %kind,
                    kind = %entry.kind,
                    "Removed entry file stored under its previous kind"
                );
            }
        }
        Ok(())
    }

    /// Returns the number of files actually written.
    pub fn write_entries(&self, entries: &[CatalogEntry]) -> Result<usize> {
        let mut written = 0;
        for entry in entries {
            if self.write_entry(entry)? == WriteOutcome::Written {
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn read_entry(&self, family: &str, kind: EntryKind, name: &str) -> Result<Option<CatalogEntry>> {
        read_json(&self.entry_path(family, kind, name))
    }

    pub fn read_entry_metadata(&self, family: &str, kind: EntryKind, name: &str) -> Result<Option<EntryMetadata>> {
        let stored: Option<MetadataOnly> = read_json(&self.entry_path(family, kind, name))?;
        Ok(stored.and_then(|s| s.metadata))
    }

    pub fn delete_entry(&self, family: &str, kind: EntryKind, name: &str) -> Result<bool> {
        let path = self.entry_path(family, kind, name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    pub fn write_indexes(&self, indexes: &CatalogIndexes, master: &MasterIndex) -> Result<()> {
        write_json(&self.root.join(RESOURCES_INDEX_FILE), &indexes.resources)?;
        write_json(&self.root.join(ELEMENTS_INDEX_FILE), &indexes.elements)?;
        write_json(&self.root.join(MASTER_INDEX_FILE), master)?;

        info!(
            root = %self.root.display(),
            entries = indexes.resources.len(),
            paths = indexes.elements.path_count(),
            "Wrote catalog indexes"
        );
        Ok(())
    }

    /// Existing indexes, or empty ones when the catalog has none yet.
    pub fn load_indexes(&self, config: &IndexConfig) -> Result<CatalogIndexes> {
        let resources: ResourceIndex = read_json(&self.root.join(RESOURCES_INDEX_FILE))?.unwrap_or_default();
        let elements: ElementIndex = read_json(&self.root.join(ELEMENTS_INDEX_FILE))?.unwrap_or_default();
        Ok(CatalogIndexes::from_parts(resources, elements, config))
    }

    pub fn load_master(&self) -> Result<Option<MasterIndex>> {
        read_json(&self.root.join(MASTER_INDEX_FILE))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
