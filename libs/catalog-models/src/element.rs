//! Normalized element record
//!
//! Flat projection of one ElementDefinition from a StructureDefinition snapshot
//! or differential. Everything here is plain data: no validation of FHIRPath
//! expressions, value sets or type targets happens at this level.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Upper bound of a cardinality ("*" or a non-negative integer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxCardinality {
    Bounded(u32),
    Unbounded,
}

impl MaxCardinality {
    /// Check whether `count` occurrences fit under this bound
    pub fn allows(&self, count: u32) -> bool {
        match self {
            MaxCardinality::Bounded(max) => count <= *max,
            MaxCardinality::Unbounded => true,
        }
    }
}

impl fmt::Display for MaxCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxCardinality::Bounded(max) => write!(f, "{}", max),
            MaxCardinality::Unbounded => f.write_str("*"),
        }
    }
}

impl FromStr for MaxCardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(MaxCardinality::Unbounded);
        }
        s.parse::<u32>()
            .map(MaxCardinality::Bounded)
            .map_err(|_| Error::InvalidCardinality(format!("invalid upper bound '{}'", s)))
    }
}

impl Serialize for MaxCardinality {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MaxCardinality {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawMax {
            Text(String),
            Number(u32),
        }

        match RawMax::deserialize(deserializer)? {
            RawMax::Text(text) => text.parse().map_err(serde::de::Error::custom),
            RawMax::Number(max) => Ok(MaxCardinality::Bounded(max)),
        }
    }
}

/// Element cardinality (`min..max`)
///
/// Invariant: `min <= max` whenever `max` is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    pub max: MaxCardinality,
}

impl Cardinality {
    /// Create a cardinality, rejecting `min > max`
    pub fn new(min: u32, max: MaxCardinality) -> Result<Self> {
        if !max.allows(min) {
            return Err(Error::InvalidCardinality(format!(
                "min {} exceeds max {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Optional singleton (`0..1`)
    pub fn optional() -> Self {
        Self {
            min: 0,
            max: MaxCardinality::Bounded(1),
        }
    }

    pub fn is_required(&self) -> bool {
        self.min > 0
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::optional()
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

impl FromStr for Cardinality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (min, max) = s
            .split_once("..")
            .ok_or_else(|| Error::InvalidCardinality(format!("expected 'min..max', got '{}'", s)))?;
        let min = min
            .parse::<u32>()
            .map_err(|_| Error::InvalidCardinality(format!("invalid lower bound '{}'", min)))?;
        Self::new(min, max.parse()?)
    }
}

/// One allowed type of an element, with optional target entry names
///
/// Targets are the trailing segments of the profile / targetProfile canonicals
/// (e.g. `Reference(Patient, Group)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    /// Type code (e.g. "string", "Reference", "CodeableConcept")
    pub code: String,

    /// Allowed target entry names for reference-like types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl TypeRef {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            targets: Vec::new(),
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for target in targets {
            let target = target.into();
            if !self.targets.contains(&target) {
                self.targets.push(target);
            }
        }
        self
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.targets.is_empty() {
            f.write_str(&self.code)
        } else {
            write!(f, "{}({})", self.code, self.targets.join(", "))
        }
    }
}

/// Ordered set of allowed types for an element
///
/// Declaration order is preserved; a code listed twice is folded into its
/// first occurrence with the targets merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeExpression(Vec<TypeRef>);

impl TypeExpression {
    pub fn new(types: Vec<TypeRef>) -> Self {
        types.into_iter().collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypeRef> {
        self.0.iter()
    }

    /// Type codes in declaration order
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|t| t.code.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<TypeRef> for TypeExpression {
    fn from_iter<I: IntoIterator<Item = TypeRef>>(iter: I) -> Self {
        let mut types: Vec<TypeRef> = Vec::new();
        for ty in iter {
            match types.iter_mut().find(|existing| existing.code == ty.code) {
                Some(existing) => {
                    for target in ty.targets {
                        if !existing.targets.contains(&target) {
                            existing.targets.push(target);
                        }
                    }
                }
                None => types.push(ty),
            }
        }
        Self(types)
    }
}

impl<'a> IntoIterator for &'a TypeExpression {
    type Item = &'a TypeRef;
    type IntoIter = std::slice::Iter<'a, TypeRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for TypeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("unknown");
        }
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", ty)?;
        }
        Ok(())
    }
}

/// Binding strength (required | extensible | preferred | example)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
    Unknown(String),
}

impl BindingStrength {
    pub fn as_str(&self) -> &str {
        match self {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
            BindingStrength::Unknown(s) => s,
        }
    }
}

impl From<&str> for BindingStrength {
    fn from(s: &str) -> Self {
        match s {
            "required" => BindingStrength::Required,
            "extensible" => BindingStrength::Extensible,
            "preferred" => BindingStrength::Preferred,
            "example" => BindingStrength::Example,
            other => BindingStrength::Unknown(other.to_string()),
        }
    }
}

impl Serialize for BindingStrength {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BindingStrength {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(BindingStrength::from(s.as_str()))
    }
}

/// ValueSet binding for a coded element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Binding strength
    pub strength: BindingStrength,

    /// Canonical reference to the bound value set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,

    /// Human explanation of the value set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Severity of a constraint (error | warning)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ConstraintSeverity {
    #[default]
    Error,
    Warning,
    Unknown(String),
}

impl ConstraintSeverity {
    pub fn as_str(&self) -> &str {
        match self {
            ConstraintSeverity::Error => "error",
            ConstraintSeverity::Warning => "warning",
            ConstraintSeverity::Unknown(s) => s,
        }
    }
}

impl From<&str> for ConstraintSeverity {
    fn from(s: &str) -> Self {
        match s {
            "error" => ConstraintSeverity::Error,
            "warning" => ConstraintSeverity::Warning,
            other => ConstraintSeverity::Unknown(other.to_string()),
        }
    }
}

impl Serialize for ConstraintSeverity {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConstraintSeverity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ConstraintSeverity::from(s.as_str()))
    }
}

/// Invariant declared on an element (cataloged, never evaluated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    /// Constraint key (e.g. "ele-1")
    pub key: String,

    /// Severity
    #[serde(default)]
    pub severity: ConstraintSeverity,

    /// Human description of the constraint
    #[serde(default)]
    pub human: String,

    /// FHIRPath expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// XPath expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

/// One normalized field of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRecord {
    /// Element id from the source document (falls back to the source path)
    pub id: String,

    /// Entry-qualified path, always starting with the owning entry's name
    pub path: String,

    /// Path as written in the source document
    pub source_path: String,

    /// Last path segment without any slice suffix
    pub field_name: String,

    /// Slice name when this element defines or lives inside a slice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    /// Short label
    #[serde(default)]
    pub short: String,

    /// Full formal definition (falls back to the short label)
    #[serde(default)]
    pub description: String,

    /// Allowed occurrences
    pub cardinality: Cardinality,

    /// Allowed types in declaration order
    #[serde(rename = "type", default)]
    pub types: TypeExpression,

    /// If this modifies the meaning of other elements
    #[serde(default)]
    pub is_modifier: bool,

    /// Include when in summary
    #[serde(default)]
    pub is_summary: bool,

    /// ValueSet binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<Binding>,

    /// Declared invariants in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,

    /// Must-support flag (meaningful inside profiles only)
    #[serde(default)]
    pub must_support: bool,
}

/// Field name of a path: the last segment with any `:slice` suffix removed.
pub fn field_name_of(path: &str) -> &str {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.split(':').next().unwrap_or(last)
}

/// Last segment of a canonical URL (`http://.../StructureDefinition/Patient` → `Patient`).
///
/// A `|version` suffix is dropped.
pub fn canonical_tail(canonical: &str) -> &str {
    let without_version = canonical.split('|').next().unwrap_or(canonical);
    without_version
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_max_round_trips() {
        let max: MaxCardinality = "*".parse().unwrap();
        assert_eq!(max, MaxCardinality::Unbounded);

        let serialized = serde_json::to_value(max).unwrap();
        assert_eq!(serialized, serde_json::json!("*"));

        let reparsed: MaxCardinality = serde_json::from_value(serialized).unwrap();
        assert_eq!(reparsed, max);
        assert_eq!(reparsed.to_string().parse::<MaxCardinality>().unwrap(), max);
    }

    #[test]
    fn bounded_max_accepts_numbers_and_strings() {
        let from_str: MaxCardinality = serde_json::from_value(serde_json::json!("3")).unwrap();
        let from_num: MaxCardinality = serde_json::from_value(serde_json::json!(3)).unwrap();
        assert_eq!(from_str, MaxCardinality::Bounded(3));
        assert_eq!(from_num, from_str);
        assert!("-1".parse::<MaxCardinality>().is_err());
        assert!("many".parse::<MaxCardinality>().is_err());
    }

    #[test]
    fn cardinality_rejects_min_above_max() {
        assert!(Cardinality::new(2, MaxCardinality::Bounded(1)).is_err());
        assert!(Cardinality::new(5, MaxCardinality::Unbounded).is_ok());
        assert!("3..1".parse::<Cardinality>().is_err());
    }

    #[test]
    fn test_cardinality_string() {
        let card: Cardinality = "1..*".parse().unwrap();
        assert_eq!(card.to_string(), "1..*");
        assert!(card.is_required());
        assert_eq!(card.max, MaxCardinality::Unbounded);

        let prohibited: Cardinality = "0..0".parse().unwrap();
        assert!(!prohibited.is_required());
        assert!(!prohibited.max.allows(1));
    }

    #[test]
    fn type_expression_folds_duplicate_codes() {
        let types = TypeExpression::new(vec![
            TypeRef::new("Reference").with_targets(["Patient"]),
            TypeRef::new("string"),
            TypeRef::new("Reference").with_targets(["Group", "Patient"]),
        ]);

        assert_eq!(types.len(), 2);
        assert_eq!(types.codes().collect::<Vec<_>>(), vec!["Reference", "string"]);
        assert_eq!(types.to_string(), "Reference(Patient, Group) | string");
    }

    #[test]
    fn empty_type_expression_displays_unknown() {
        assert_eq!(TypeExpression::default().to_string(), "unknown");
    }

    #[test]
    fn unknown_binding_strength_is_preserved() {
        let binding: Binding = serde_json::from_value(serde_json::json!({
            "strength": "suggested",
            "valueSet": "http://example.org/ValueSet/x"
        }))
        .unwrap();

        assert_eq!(
            binding.strength,
            BindingStrength::Unknown("suggested".to_string())
        );
        let round_trip = serde_json::to_value(&binding).unwrap();
        assert_eq!(round_trip["strength"], "suggested");
    }

    #[test]
    fn field_name_strips_slices() {
        assert_eq!(field_name_of("Patient.name.family"), "family");
        assert_eq!(field_name_of("Observation.component:systolic"), "component");
        assert_eq!(field_name_of("Observation"), "Observation");
    }

    #[test]
    fn canonical_tail_drops_version() {
        assert_eq!(
            canonical_tail("http://hl7.org/fhir/StructureDefinition/Patient|4.0.1"),
            "Patient"
        );
        assert_eq!(canonical_tail("Patient"), "Patient");
    }
}
