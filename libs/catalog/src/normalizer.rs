//! Element normalization
//!
//! Turns one raw ElementDefinition (as found in a StructureDefinition snapshot
//! or differential) into a flat [`ElementRecord`]. Paths are re-rooted at the
//! owning entry's name so that records from a profile never collide with the
//! records of the resource it constrains.

use crate::error::ElementError;
use ferrum_catalog_models::{
    canonical_tail, field_name_of, Binding, BindingStrength, Cardinality, Constraint,
    ConstraintSeverity, ElementRecord, MaxCardinality, TypeExpression, TypeRef,
};
use serde_json::Value;

/// Normalizes the elements of a single entry.
#[derive(Debug, Clone)]
pub struct ElementNormalizer {
    entry_name: String,
    type_name: String,
}

impl ElementNormalizer {
    /// `entry_name` is the owning entry; `type_name` is the type it defines or
    /// constrains (the root segment raw paths are written against).
    pub fn new(entry_name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            entry_name: entry_name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn normalize(&self, raw: &Value) -> Result<ElementRecord, ElementError> {
        let source_path = text(raw, "path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ElementError::skippable("missing path"))?;

        if !source_path.contains('.') {
            return Err(ElementError::skippable(format!(
                "root element {}",
                source_path
            )));
        }

        let id = text(raw, "id").unwrap_or(source_path);
        let path = self.qualified_path(id, source_path)?;
        let field_name = field_name_of(&path).to_string();
        let slice_name = text(raw, "sliceName")
            .map(str::to_string)
            .or_else(|| innermost_slice(&path).map(str::to_string));

        let cardinality = parse_cardinality(raw, &path)?;

        let short = text(raw, "short").unwrap_or_default().to_string();
        let description = text(raw, "definition")
            .map(str::to_string)
            .unwrap_or_else(|| short.clone());

        Ok(ElementRecord {
            id: id.to_string(),
            path,
            source_path: source_path.to_string(),
            field_name,
            slice_name,
            short,
            description,
            cardinality,
            types: parse_types(raw),
            is_modifier: flag(raw, "isModifier"),
            is_summary: flag(raw, "isSummary"),
            binding: parse_binding(raw),
            constraints: parse_constraints(raw),
            must_support: flag(raw, "mustSupport"),
        })
    }

    /// Entry-qualified path. Slice-aware ids win over plain paths so that
    /// two slices of the same element stay distinct.
    fn qualified_path(&self, id: &str, source_path: &str) -> Result<String, ElementError> {
        let basis = if id.contains(':') && self.rest_of(id).is_some() {
            id
        } else {
            source_path
        };

        self.rest_of(basis)
            .map(|rest| format!("{}.{}", self.entry_name, rest))
            .ok_or_else(|| {
                ElementError::skippable(format!(
                    "path {} is outside {} ({})",
                    source_path, self.entry_name, self.type_name
                ))
            })
    }

    fn rest_of<'a>(&self, path: &'a str) -> Option<&'a str> {
        let (root, rest) = path.split_once('.')?;
        (root == self.entry_name || root == self.type_name).then_some(rest)
    }
}

fn text<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field).and_then(Value::as_str)
}

fn flag(raw: &Value, field: &str) -> bool {
    raw.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn innermost_slice(path: &str) -> Option<&str> {
    path.rsplit('.')
        .find_map(|segment| segment.split_once(':').map(|(_, slice)| slice))
}

fn parse_cardinality(raw: &Value, path: &str) -> Result<Cardinality, ElementError> {
    let malformed = |value: String| ElementError::MalformedCardinality {
        path: path.to_string(),
        value,
    };

    let min = match raw.get("min") {
        None | Some(Value::Null) => 0,
        Some(value) => value
            .as_u64()
            .and_then(|min| u32::try_from(min).ok())
            .ok_or_else(|| malformed(format!("min={}", value)))?,
    };

    let max = match raw.get("max") {
        None | Some(Value::Null) => MaxCardinality::Bounded(1),
        Some(Value::String(max)) => max
            .parse::<MaxCardinality>()
            .map_err(|_| malformed(format!("max={}", max)))?,
        Some(value) => value
            .as_u64()
            .and_then(|max| u32::try_from(max).ok())
            .map(MaxCardinality::Bounded)
            .ok_or_else(|| malformed(format!("max={}", value)))?,
    };

    Cardinality::new(min, max).map_err(|_| malformed(format!("{}..{}", min, max)))
}

/// `profile` / `targetProfile` are arrays in R4 and plain strings in STU3.
fn canonical_list(raw: &Value, field: &str) -> Vec<String> {
    match raw.get(field) {
        Some(Value::String(url)) => vec![canonical_tail(url).to_string()],
        Some(Value::Array(urls)) => urls
            .iter()
            .filter_map(Value::as_str)
            .map(|url| canonical_tail(url).to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_types(raw: &Value) -> TypeExpression {
    let Some(types) = raw.get("type").and_then(Value::as_array) else {
        return TypeExpression::default();
    };

    types
        .iter()
        .filter_map(|ty| {
            let code = text(ty, "code")?;
            let mut targets = canonical_list(ty, "targetProfile");
            targets.extend(canonical_list(ty, "profile"));
            Some(TypeRef::new(code).with_targets(targets))
        })
        .collect()
}

fn parse_binding(raw: &Value) -> Option<Binding> {
    let binding = raw.get("binding")?;
    let strength = text(binding, "strength")?;

    let value_set = text(binding, "valueSet")
        .or_else(|| text(binding, "valueSetUri"))
        .or_else(|| {
            binding
                .get("valueSetReference")
                .and_then(|reference| text(reference, "reference"))
        })
        .map(str::to_string);

    Some(Binding {
        strength: BindingStrength::from(strength),
        value_set,
        description: text(binding, "description").map(str::to_string),
    })
}

fn parse_constraints(raw: &Value) -> Vec<Constraint> {
    let Some(constraints) = raw.get("constraint").and_then(Value::as_array) else {
        return Vec::new();
    };

    constraints
        .iter()
        .filter_map(|constraint| {
            let key = text(constraint, "key")?;
            Some(Constraint {
                key: key.to_string(),
                severity: text(constraint, "severity")
                    .map(ConstraintSeverity::from)
                    .unwrap_or_default(),
                human: text(constraint, "human").unwrap_or_default().to_string(),
                expression: text(constraint, "expression").map(str::to_string),
                xpath: text(constraint, "xpath").map(str::to_string),
            })
        })
        .collect()
}
