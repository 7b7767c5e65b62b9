//! Document processing
//!
//! Converts one raw StructureDefinition into a [`CatalogEntry`]. Failures are
//! entry-scoped: a document either yields a complete entry or is rejected as a
//! whole, and element-level problems only drop the affected element.

use crate::error::{ElementError, Error, Result};
use crate::normalizer::ElementNormalizer;
use ferrum_catalog_models::{
    canonical_tail, CatalogEntry, ElementListKind, EntryKind, EntryStatistics, SpecFamily,
};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

const STRUCTURE_DEFINITION: &str = "StructureDefinition";

/// A processed document plus what had to be dropped on the way.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub entry: CatalogEntry,

    /// Elements dropped for malformed cardinalities or repeated paths
    pub skipped_elements: usize,
}

/// Processes raw documents belonging to one specification family.
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    family: SpecFamily,
}

impl DocumentProcessor {
    pub fn for_family(family: SpecFamily) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &SpecFamily {
        &self.family
    }

    pub fn process(&self, document: &Value, is_profile: bool) -> Result<CatalogEntry> {
        self.process_document(document, is_profile)
            .map(|processed| processed.entry)
    }

    pub fn process_document(&self, document: &Value, is_profile: bool) -> Result<ProcessedDocument> {
        let name = text(document, "name")
            .or_else(|| text(document, "id"))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::rejected("<unnamed>", "document has neither name nor id"))?;

        // Paths are qualified as `<name>.<field>`, so a dotted name would make
        // them ambiguous with another entry's paths.
        if name.contains('.') {
            return Err(Error::rejected(name, "entry name must not contain '.'"));
        }

        if let Some(resource_type) = text(document, "resourceType") {
            if resource_type != STRUCTURE_DEFINITION {
                return Err(Error::rejected(
                    name,
                    format!("expected {}, got {}", STRUCTURE_DEFINITION, resource_type),
                ));
            }
        }

        let kind = if is_profile {
            EntryKind::Profile
        } else {
            entry_kind(text(document, "kind")).ok_or_else(|| {
                Error::rejected(
                    name,
                    format!("unsupported kind {:?}", text(document, "kind")),
                )
            })?
        };

        let resource_type = text(document, "type").unwrap_or(name).to_string();
        let (element_source, raw_elements) = element_list(document);

        let normalizer = ElementNormalizer::new(name, resource_type.as_str());
        let mut elements = Vec::with_capacity(raw_elements.len());
        let mut seen_paths = HashSet::new();
        let mut skipped_elements = 0;

        for raw in raw_elements {
            match normalizer.normalize(raw) {
                Ok(record) => {
                    if !seen_paths.insert(record.path.clone()) {
                        warn!(name = %name, path = %record.path, "Duplicate element path, keeping the first definition");
                        skipped_elements += 1;
                        continue;
                    }
                    elements.push(record);
                }
                Err(ElementError::Skippable { reason }) => {
                    debug!(name = %name, reason = %reason, "Skipping element");
                }
                Err(err @ ElementError::MalformedCardinality { .. }) => {
                    warn!(name = %name, error = %err, "Skipping element with malformed cardinality");
                    skipped_elements += 1;
                }
            }
        }

        let must_support_count = if is_profile {
            elements.iter().filter(|e| e.must_support).count()
        } else {
            0
        };
        let statistics = EntryStatistics::from_elements(&elements);

        let entry = CatalogEntry {
            name: name.to_string(),
            id: text(document, "id").unwrap_or(name).to_string(),
            title: text(document, "title").unwrap_or(name).to_string(),
            kind,
            family: self.family.id.clone(),
            base_name: text(document, "baseDefinition")
                .map(canonical_tail)
                .filter(|base| !base.is_empty())
                .map(str::to_string),
            resource_type,
            url: owned(document, "url"),
            version: owned(document, "version"),
            status: owned(document, "status"),
            date: owned(document, "date"),
            description: owned(document, "description"),
            fhir_version: owned(document, "fhirVersion"),
            is_abstract: document
                .get("abstract")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            derivation: owned(document, "derivation"),
            element_source,
            elements,
            must_support_count,
            statistics,
        };

        debug!(
            name = %entry.name,
            family = %entry.family,
            kind = %entry.kind,
            elements = entry.element_count(),
            "Processed document"
        );

        Ok(ProcessedDocument {
            entry,
            skipped_elements,
        })
    }
}

fn text<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    document.get(field).and_then(Value::as_str)
}

fn owned(document: &Value, field: &str) -> String {
    text(document, field).unwrap_or_default().to_string()
}

fn entry_kind(kind: Option<&str>) -> Option<EntryKind> {
    match kind? {
        "resource" => Some(EntryKind::Resource),
        "complex-type" => Some(EntryKind::ComplexType),
        "primitive-type" => Some(EntryKind::PrimitiveType),
        "logical" => Some(EntryKind::Logical),
        _ => None,
    }
}

/// Prefer the snapshot (expanded) over the differential (partial).
fn element_list(document: &Value) -> (ElementListKind, &[Value]) {
    let list = |field: &str| {
        document
            .get(field)
            .and_then(|section| section.get("element"))
            .and_then(Value::as_array)
            .filter(|elements| !elements.is_empty())
            .map(Vec::as_slice)
    };

    if let Some(elements) = list("snapshot") {
        (ElementListKind::Expanded, elements)
    } else if let Some(elements) = list("differential") {
        (ElementListKind::Partial, elements)
    } else {
        (ElementListKind::Empty, &[])
    }
}
