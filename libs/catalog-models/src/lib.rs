//! FHIR catalog models
//!
//! This crate provides the strict value types produced when FHIR
//! StructureDefinitions are normalized into a flat, queryable catalog.
//!
//! # Module Organization
//!
//! - `element`: One normalized field (`ElementRecord`) and its parts
//!   (cardinality, type expression, binding, constraints)
//! - `entry`: One normalized resource or profile (`CatalogEntry`)
//! - `family`: Metadata about a specification family (base spec, IG, ...)
//!
//! # Design Philosophy
//!
//! - **Strict**: Every field has a concrete value; optional source data is
//!   defaulted during extraction, never left half-built
//! - **Immutable**: Records are produced once and replaced wholesale
//! - **Stable on the wire**: camelCase JSON, structured types with separate
//!   display projections
//!
//! # Example
//!
//! ```rust
//! use ferrum_catalog_models::{Cardinality, MaxCardinality, TypeExpression, TypeRef};
//!
//! let card: Cardinality = "1..*".parse().unwrap();
//! assert_eq!(card.max, MaxCardinality::Unbounded);
//!
//! let types = TypeExpression::new(vec![
//!     TypeRef::new("Reference").with_targets(["Patient", "Group"]),
//!     TypeRef::new("string"),
//! ]);
//! assert_eq!(types.to_string(), "Reference(Patient, Group) | string");
//! ```

pub mod element;
pub mod entry;
pub mod error;
pub mod family;

// Re-export commonly used types
pub use element::*;
pub use entry::*;
pub use error::{Error, Result};
pub use family::*;
