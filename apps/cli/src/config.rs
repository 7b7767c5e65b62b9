//! Layered configuration for the catalog builder
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. a TOML file (`--config`, or `fhir-catalog.toml` when present)
//! 3. environment variables prefixed `FHIR_CATALOG__`, nested with `__`
//!    (e.g. `FHIR_CATALOG__PIPELINE__MAX_CONCURRENT_DOCUMENTS=16`)
//!
//! A `.env` file in the working directory is loaded first.

use config::{Config, Environment, File, FileFormat};
use ferrum_catalog::{IndexConfig, PipelineConfig};
use ferrum_catalog_models::SpecFamily;
use ferrum_package::PackageManifest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "fhir-catalog.toml";
const ENV_PREFIX: &str = "FHIR_CATALOG";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory of the generated catalog
    pub output_dir: PathBuf,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub index: IndexConfig,
    pub families: Vec<FamilyConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("catalog"),
            logging: LoggingConfig::default(),
            pipeline: PipelineConfig::default(),
            index: IndexConfig::default(),
            families: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level applied to the catalog crates when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One specification family and the package it is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub base_url: String,
    /// Package directory or `.tgz` archive
    pub package: PathBuf,
    /// Restrict the batch to these StructureDefinitions (all when empty)
    #[serde(default)]
    pub names: Vec<String>,
}

impl FamilyConfig {
    /// Family metadata; blanks are filled from the package manifest.
    pub fn spec_family(&self, manifest: &PackageManifest) -> SpecFamily {
        let pick = |configured: &str, fallback: Option<&str>| {
            if configured.is_empty() {
                fallback.unwrap_or_default().to_string()
            } else {
                configured.to_string()
            }
        };

        SpecFamily::new(self.id.clone())
            .with_title(pick(&self.title, manifest.title.as_deref()))
            .with_version(pick(&self.version, Some(manifest.version.as_str())))
            .with_base_url(pick(&self.base_url, manifest.base_url()))
    }
}

impl AppConfig {
    /// Load configuration from defaults, file and environment.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline.max_concurrent_documents == 0 {
            return Err("pipeline.max_concurrent_documents must be greater than zero".into());
        }
        if self.pipeline.queue_capacity == 0 {
            return Err("pipeline.queue_capacity must be greater than zero".into());
        }
        if self.index.sample_path_cap == 0 {
            return Err("index.sample_path_cap must be greater than zero".into());
        }

        let mut seen = HashSet::new();
        for family in &self.families {
            if family.id.trim().is_empty() {
                return Err("family id must not be empty".into());
            }
            if !seen.insert(family.id.as_str()) {
                return Err(format!("family '{}' is configured more than once", family.id));
            }
        }
        Ok(())
    }

    /// Configured families, optionally restricted to `only` (by id).
    pub fn selected_families(&self, only: &[String]) -> Vec<&FamilyConfig> {
        self.families
            .iter()
            .filter(|family| only.is_empty() || only.contains(&family.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn family(id: &str) -> FamilyConfig {
        FamilyConfig {
            id: id.to_string(),
            title: String::new(),
            version: String::new(),
            base_url: String::new(),
            package: PathBuf::from("packages/hl7.fhir.r4.core.tgz"),
            names: Vec::new(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.max_concurrent_documents, 8);
        assert_eq!(config.pipeline.queue_capacity, 32);
        assert_eq!(config.index.sample_path_cap, 50);
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = AppConfig::default();
        config.pipeline.max_concurrent_documents = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.index.sample_path_cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_and_empty_family_ids() {
        let mut config = AppConfig::default();
        config.families = vec![family("fhir-r4"), family("fhir-r4")];
        assert!(config.validate().unwrap_err().contains("fhir-r4"));

        config.families = vec![family(" ")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_a_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
output_dir = "out"

[pipeline]
max_concurrent_documents = 2

[logging]
json = true

[[families]]
id = "us-core"
package = "packages/hl7.fhir.us.core.tgz"
names = ["us-core-patient"]
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.pipeline.max_concurrent_documents, 2);
        assert_eq!(config.pipeline.queue_capacity, 32);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.families.len(), 1);
        assert_eq!(config.families[0].names, vec!["us-core-patient".to_string()]);
    }

    #[test]
    fn selects_families_by_id() {
        let mut config = AppConfig::default();
        config.families = vec![family("fhir-r4"), family("us-core")];

        assert_eq!(config.selected_families(&[]).len(), 2);
        let only = config.selected_families(&["us-core".to_string()]);
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "us-core");
    }
}
