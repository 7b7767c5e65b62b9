//! FHIR NPM package loading for StructureDefinition catalogs.
//!
//! Reads a package from a directory or a `.tgz` archive, keeps the
//! `package.json` manifest, and indexes the StructureDefinitions it contains
//! by name, id and canonical URL.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "package.json";
const INDEX_FILE: &str = ".index.json";
const STRUCTURE_DEFINITION: &str = "StructureDefinition";

/// FHIR NPM Package manifest (`package/package.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Validate manifest (name and version are required).
    pub fn validate(&self) -> Result<(), PackageError> {
        if self.name.is_empty() {
            return Err(PackageError::ValidationError(
                "Package name required".into(),
            ));
        }
        if self.version.is_empty() {
            return Err(PackageError::ValidationError(
                "Package version required".into(),
            ));
        }
        Ok(())
    }

    /// Base URL of the published package (canonical, else url).
    pub fn base_url(&self) -> Option<&str> {
        self.canonical.as_deref().or(self.url.as_deref())
    }
}

/// Package index (`.index.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    #[serde(rename = "index-version")]
    pub index_version: u8,
    pub files: Vec<IndexedFile>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// File entry in package index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub filename: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),
    #[error("Missing file: {0}")]
    MissingFile(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type PackageResult<T> = Result<T, PackageError>;

/// Whether a StructureDefinition constrains another one (a profile).
pub fn is_profile(structure_definition: &Value) -> bool {
    structure_definition.get("derivation").and_then(Value::as_str) == Some("constraint")
}

/// Loaded FHIR package with manifest, optional index, and StructureDefinitions.
///
/// Definitions are indexed by name, id and canonical URL for fast lookups.
#[derive(Debug, Clone)]
pub struct FhirPackage {
    pub manifest: PackageManifest,
    pub index: Option<PackageIndex>,
    structure_definitions: Vec<Value>,

    /// Positions in load order; a name may be shared by several definitions
    by_name: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, usize>,
    by_url: HashMap<String, usize>,
}

impl FhirPackage {
    /// Create a package from a manifest and raw resources.
    ///
    /// Anything that is not a StructureDefinition is ignored.
    pub fn new(manifest: PackageManifest, resources: Vec<Value>) -> Self {
        let mut package = Self {
            manifest,
            index: None,
            structure_definitions: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            by_url: HashMap::new(),
        };

        for resource in resources {
            package.add_resource(resource);
        }
        package
    }

    /// Load package from tar.gz reader.
    pub fn from_tar_gz<R: Read>(reader: R) -> PackageResult<Self> {
        let mut archive = Archive::new(GzDecoder::new(reader));
        let mut file_map: HashMap<String, Vec<u8>> = HashMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().to_string();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            file_map.insert(path, contents);
        }

        let manifest_path = format!("package/{}", MANIFEST_FILE);
        let manifest = file_map
            .get(&manifest_path)
            .ok_or_else(|| PackageError::MissingFile(manifest_path.clone()))
            .and_then(|bytes| parse_json::<PackageManifest>(bytes))?;
        manifest.validate()?;

        let index = file_map
            .get(&format!("package/{}", INDEX_FILE))
            .and_then(|bytes| parse_json::<PackageIndex>(bytes).ok());

        let mut paths: Vec<&String> = file_map
            .keys()
            .filter(|path| is_resource_file(path, "package/"))
            .collect();
        paths.sort();

        let mut package = Self::new(manifest, Vec::new());
        package.index = index;
        for path in paths {
            package.add_file(path, &file_map[path]);
        }
        Ok(package)
    }

    /// Load package from tar.gz bytes.
    pub fn from_tar_gz_bytes(bytes: &[u8]) -> PackageResult<Self> {
        Self::from_tar_gz(std::io::Cursor::new(bytes))
    }

    /// Load package from directory.
    pub fn from_directory(package_dir: &Path) -> PackageResult<Self> {
        let manifest_path = package_dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(PackageError::MissingFile(
                manifest_path.to_string_lossy().into(),
            ));
        }

        let manifest = parse_json::<PackageManifest>(&fs::read(manifest_path)?)?;
        manifest.validate()?;

        let index = package_dir
            .join(INDEX_FILE)
            .exists()
            .then(|| package_dir.join(INDEX_FILE))
            .and_then(|p| fs::read(p).ok())
            .and_then(|bytes| parse_json::<PackageIndex>(&bytes).ok());

        let mut paths = Vec::new();
        for entry in fs::read_dir(package_dir)? {
            let path = entry?.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if is_resource_file(name, "") {
                    paths.push(path);
                }
            }
        }
        paths.sort();

        let mut package = Self::new(manifest, Vec::new());
        package.index = index;
        for path in paths {
            let bytes = fs::read(&path)?;
            package.add_file(&path.to_string_lossy(), &bytes);
        }
        Ok(package)
    }

    /// Load from a directory or a `.tgz`/`.tar.gz` archive, by path.
    pub fn load(path: &Path) -> PackageResult<Self> {
        if path.is_dir() {
            let nested = path.join("package");
            if nested.join(MANIFEST_FILE).exists() {
                return Self::from_directory(&nested);
            }
            return Self::from_directory(path);
        }
        Self::from_tar_gz(fs::File::open(path)?)
    }

    /// All StructureDefinitions in load order.
    pub fn structure_definitions(&self) -> &[Value] {
        &self.structure_definitions
    }

    /// Look up a StructureDefinition by name, then id, then canonical URL or its tail.
    ///
    /// A name shared by several definitions resolves to the first one loaded;
    /// see [`FhirPackage::name_count`].
    pub fn structure_definition(&self, key: &str) -> Option<&Value> {
        self.by_name
            .get(key)
            .and_then(|positions| positions.first())
            .or_else(|| self.by_id.get(key))
            .or_else(|| self.by_url.get(key))
            .map(|&i| &self.structure_definitions[i])
    }

    /// Number of StructureDefinitions declaring `name`.
    pub fn name_count(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.structure_definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structure_definitions.is_empty()
    }

    fn add_file(&mut self, path: &str, bytes: &[u8]) {
        match parse_json::<Value>(bytes) {
            Ok(resource) => self.add_resource(resource),
            Err(e) => warn!(path = %path, error = %e, "Skipping unreadable package file"),
        }
    }

    fn add_resource(&mut self, resource: Value) {
        if resource.get("resourceType").and_then(Value::as_str) != Some(STRUCTURE_DEFINITION) {
            return;
        }

        let position = self.structure_definitions.len();
        let text = |field: &str| resource.get(field).and_then(Value::as_str).map(str::to_string);

        if let Some(name) = text("name") {
            let positions = self.by_name.entry(name.clone()).or_default();
            if !positions.is_empty() {
                debug!(name = %name, "StructureDefinition name appears more than once in package");
            }
            positions.push(position);
        }
        if let Some(id) = text("id") {
            self.by_id.insert(id, position);
        }
        if let Some(url) = text("url") {
            let tail = url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .map(str::to_string);
            self.by_url.insert(url, position);
            if let Some(tail) = tail {
                self.by_url.entry(tail).or_insert(position);
            }
        }

        self.structure_definitions.push(resource);
    }
}

fn is_resource_file(path: &str, prefix: &str) -> bool {
    let Some(relative) = path.strip_prefix(prefix) else {
        return false;
    };
    relative.ends_with(".json")
        && !relative.contains('/')
        && relative != MANIFEST_FILE
        && relative != INDEX_FILE
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> PackageResult<T> {
    let cleaned = clean_bytes(bytes)?;
    Ok(serde_json::from_str(&cleaned)?)
}

fn clean_bytes(bytes: &[u8]) -> PackageResult<String> {
    let bytes = if bytes.len() >= 3 && &bytes[..3] == b"\xEF\xBB\xBF" {
        &bytes[3..]
    } else {
        bytes
    };

    let content = String::from_utf8(bytes.to_vec())
        .map_err(|e| PackageError::InvalidStructure(format!("Invalid UTF-8: {}", e)))?;

    Ok(content
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\x7F'))
        .collect::<String>()
        .trim()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;

    fn manifest_json() -> Value {
        json!({
            "name": "hl7.fhir.us.core",
            "version": "6.1.0",
            "canonical": "http://hl7.org/fhir/us/core",
            "title": "US Core Implementation Guide",
            "fhirVersions": ["4.0.1"],
            "dependencies": { "hl7.fhir.r4.core": "4.0.1" },
            "tools-version": 3
        })
    }

    fn patient_profile() -> Value {
        json!({
            "resourceType": "StructureDefinition",
            "id": "us-core-patient",
            "url": "http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient",
            "name": "USCorePatientProfile",
            "kind": "resource",
            "type": "Patient",
            "derivation": "constraint"
        })
    }

    fn build_archive(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_slice())
                .expect("append tar entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    #[test]
    fn manifest_keeps_unknown_fields() {
        let manifest: PackageManifest = serde_json::from_value(manifest_json()).expect("deserializes");

        assert_eq!(manifest.name, "hl7.fhir.us.core");
        assert_eq!(manifest.base_url(), Some("http://hl7.org/fhir/us/core"));
        assert_eq!(manifest.fhir_versions, vec!["4.0.1".to_string()]);
        assert_eq!(manifest.extra.get("tools-version"), Some(&Value::from(3)));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn manifest_requires_version() {
        let mut manifest: PackageManifest = serde_json::from_value(manifest_json()).unwrap();
        manifest.version.clear();
        assert!(matches!(
            manifest.validate(),
            Err(PackageError::ValidationError(_))
        ));
    }

    #[test]
    fn load_package_from_tar_gz() {
        let bytes = build_archive(&[
            (
                "package/package.json",
                serde_json::to_vec(&manifest_json()).unwrap(),
            ),
            (
                "package/StructureDefinition-us-core-patient.json",
                serde_json::to_vec(&patient_profile()).unwrap(),
            ),
            (
                "package/ValueSet-example.json",
                serde_json::to_vec(&json!({"resourceType": "ValueSet", "id": "x"})).unwrap(),
            ),
            (
                "package/example/Patient-example.json",
                serde_json::to_vec(&json!({"resourceType": "StructureDefinition", "name": "Ignored"}))
                    .unwrap(),
            ),
        ]);

        let package = FhirPackage::from_tar_gz_bytes(&bytes).expect("should load package from tar.gz");

        assert_eq!(package.manifest.version, "6.1.0");
        assert_eq!(package.len(), 1);
        assert!(package.structure_definition("USCorePatientProfile").is_some());
        assert!(package.structure_definition("us-core-patient").is_some());
        assert!(package
            .structure_definition("http://hl7.org/fhir/us/core/StructureDefinition/us-core-patient")
            .is_some());
        assert!(package.structure_definition("Ignored").is_none());
    }

    #[test]
    fn missing_manifest_is_reported() {
        let bytes = build_archive(&[(
            "package/StructureDefinition-us-core-patient.json",
            serde_json::to_vec(&patient_profile()).unwrap(),
        )]);

        let err = FhirPackage::from_tar_gz_bytes(&bytes).unwrap_err();
        assert!(matches!(err, PackageError::MissingFile(_)));
    }

    #[test]
    fn bom_and_control_characters_are_stripped() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(b"{\"name\": \"x\",\x01 \"version\": \"1.0.0\"}");
        let manifest: PackageManifest = parse_json(&bytes).expect("parses cleaned bytes");
        assert_eq!(manifest.name, "x");
    }

    #[test]
    fn shared_names_are_counted() {
        let manifest: PackageManifest = serde_json::from_value(manifest_json()).unwrap();
        let package = FhirPackage::new(
            manifest,
            vec![
                json!({"resourceType": "StructureDefinition", "id": "first", "name": "Shared"}),
                json!({"resourceType": "StructureDefinition", "id": "second", "name": "Shared"}),
                json!({"resourceType": "StructureDefinition", "id": "other", "name": "Other"}),
            ],
        );

        assert_eq!(package.name_count("Shared"), 2);
        assert_eq!(package.name_count("Other"), 1);
        assert_eq!(package.name_count("Missing"), 0);
        assert_eq!(package.structure_definition("Shared").unwrap()["id"], "first");
        assert_eq!(package.structure_definition("second").unwrap()["id"], "second");
    }

    #[test]
    fn detects_profiles_by_derivation() {
        assert!(is_profile(&patient_profile()));
        assert!(!is_profile(&json!({"derivation": "specialization"})));
        assert!(!is_profile(&json!({})));
    }
}
