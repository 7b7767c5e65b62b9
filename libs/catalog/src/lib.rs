//! FHIR StructureDefinition catalog
//!
//! Normalizes StructureDefinitions into flat element records and maintains
//! three cross-referenced indexes over them:
//!
//! - a resource index (`resources.json`): one row per entry name, partitioned
//!   by family and kind
//! - an element index (`elements.json`): per path, per field name, per data
//!   type, must-support sets, constraint catalog and search terms
//! - a master index (`master.json`): versions, counts and index pointers
//!
//! # Pipeline
//!
//! ```text
//! DocumentSource ──fetch──▶ DocumentProcessor ──▶ CatalogEntry
//!     (concurrent, bounded)        │
//!                                  ▼  bounded queue
//!                        coordinator (BatchOutcome)
//!                                  │
//!                                  ▼
//!              CatalogIndexes::apply (IndexMerger, single writer)
//! ```
//!
//! Unchanged documents are detected through [`ContentHash`] and never touch
//! the indexes.
//!
//! # Example
//!
//! ```rust
//! use ferrum_catalog::{DocumentProcessor, ElementIndexBuilder, ResourceIndexBuilder};
//! use ferrum_catalog_models::SpecFamily;
//! use serde_json::json;
//!
//! let processor = DocumentProcessor::for_family(SpecFamily::new("fhir-r4"));
//! let entry = processor
//!     .process(
//!         &json!({
//!             "resourceType": "StructureDefinition",
//!             "name": "Patient",
//!             "kind": "resource",
//!             "snapshot": { "element": [
//!                 { "path": "Patient" },
//!                 { "path": "Patient.name", "min": 0, "max": "*", "type": [{ "code": "HumanName" }] }
//!             ]}
//!         }),
//!         false,
//!     )
//!     .unwrap();
//!
//! let resources = ResourceIndexBuilder::from_entries([&entry]).unwrap();
//! let elements = ElementIndexBuilder::from_entries([&entry], 50).unwrap();
//! assert_eq!(resources.statistics.total_elements, elements.path_count());
//! ```

pub mod config;
pub mod element_index;
pub mod error;
pub mod hasher;
pub mod master_index;
pub mod merger;
pub mod normalizer;
pub mod pipeline;
pub mod processor;
pub mod resource_index;
pub mod source;
pub mod store;

pub use config::{IndexConfig, PipelineConfig};
pub use element_index::{ElementIndex, ElementIndexBuilder};
pub use error::{ElementError, Error, Result};
pub use hasher::ContentHash;
pub use master_index::{BatchCounters, MasterIndex, MasterIndexBuilder};
pub use merger::{DuplicateName, IndexMerger, MergeReport, MergeTarget};
pub use normalizer::ElementNormalizer;
pub use pipeline::{BatchOutcome, CatalogIndexes, CatalogPipeline, Rejection};
pub use processor::{DocumentProcessor, ProcessedDocument};
pub use resource_index::{ResourceIndex, ResourceIndexBuilder};
pub use source::{DocumentRequest, DocumentSource, MemorySource, PackageSource, SourceError};
pub use store::{CatalogStore, EntryMetadata, WriteOutcome};
