use anyhow::{bail, Context};
use chrono::Utc;
use ferrum_catalog::{CatalogIndexes, CatalogPipeline, CatalogStore, MasterIndex, PackageSource};
use ferrum_catalog_models::{CatalogEntry, SpecFamily};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{AppConfig, FamilyConfig};

/// Raise the shutdown flag on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing with the documents already processed");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Families already described by the stored master index.
fn known_families(master: Option<&MasterIndex>) -> BTreeMap<String, SpecFamily> {
    master
        .map(|master| {
            master
                .specifications
                .iter()
                .map(|(id, spec)| {
                    let family = SpecFamily::new(id.clone())
                        .with_title(spec.title.clone())
                        .with_version(spec.version.clone())
                        .with_base_url(spec.base_url.clone());
                    (id.clone(), family)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn write_catalog(
    store: &CatalogStore,
    indexes: &CatalogIndexes,
    families: &BTreeMap<String, SpecFamily>,
) -> anyhow::Result<MasterIndex> {
    let families: Vec<SpecFamily> = families.values().cloned().collect();
    let master = indexes
        .master(&families, Utc::now())
        .context("Failed to build master index")?;
    store
        .write_indexes(indexes, &master)
        .context("Failed to write catalog indexes")?;
    Ok(master)
}

pub async fn build(config: &AppConfig, only: &[String]) -> anyhow::Result<()> {
    let selected = config.selected_families(only);
    if selected.is_empty() {
        bail!("No families selected; configure [[families]] or check --family");
    }

    let store = CatalogStore::new(&config.output_dir);
    let mut indexes = store
        .load_indexes(&config.index)
        .context("Failed to load existing indexes")?;
    let mut families = known_families(store.load_master()?.as_ref());

    let pipeline = CatalogPipeline::new(config.pipeline.clone());
    let shutdown = shutdown_on_ctrl_c();
    let mut interrupted = false;
    let mut failure = None;

    for family_config in selected {
        match build_family(&pipeline, &store, &mut indexes, family_config, shutdown.clone()).await {
            Ok((family, cancelled)) => {
                families.insert(family.id.clone(), family);
                if cancelled {
                    interrupted = true;
                    break;
                }
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // Families merged so far are persisted even when a later one failed.
    let master = write_catalog(&store, &indexes, &families)?;
    info!(
        entries = master.stats.total_entries,
        elements = master.stats.total_elements,
        rejected = master.stats.counters.documents_rejected,
        "Catalog written"
    );

    if let Some(err) = failure {
        return Err(err);
    }
    if interrupted {
        bail!("Build interrupted; indexes reflect the documents processed before the interrupt");
    }
    Ok(())
}

/// Run, merge and persist one family. Returns the family and whether the
/// batch was cancelled.
async fn build_family(
    pipeline: &CatalogPipeline,
    store: &CatalogStore,
    indexes: &mut CatalogIndexes,
    family_config: &FamilyConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<(SpecFamily, bool)> {
    let source = PackageSource::load(&family_config.package).with_context(|| {
        format!(
            "Failed to load package {} for family '{}'",
            family_config.package.display(),
            family_config.id
        )
    })?;
    let family = family_config.spec_family(&source.package().manifest);
    let requests = source.requests(&family_config.names);

    let outcome = pipeline.run(Arc::new(source), &family, requests, shutdown).await;
    let report = indexes
        .apply(&outcome)
        .with_context(|| format!("Failed to merge family '{}'", family.id))?;

    let duplicates: HashSet<&str> = report.duplicates.iter().map(|d| d.name.as_str()).collect();
    let merged: Vec<CatalogEntry> = outcome
        .entries
        .iter()
        .filter(|entry| !duplicates.contains(entry.name.as_str()))
        .cloned()
        .collect();
    let written = store
        .write_entries(&merged)
        .context("Failed to write catalog entries")?;

    info!(
        family = %family.id,
        added = report.added.len(),
        updated = report.updated.len(),
        unchanged = report.unchanged.len(),
        rejected = outcome.rejected.len(),
        duplicates = report.duplicates.len(),
        files_written = written,
        "Family indexed"
    );
    Ok((family, outcome.cancelled))
}

pub fn prune(config: &AppConfig, names: &[String]) -> anyhow::Result<()> {
    let store = CatalogStore::new(&config.output_dir);
    let mut indexes = store
        .load_indexes(&config.index)
        .context("Failed to load existing indexes")?;
    let families = known_families(store.load_master()?.as_ref());

    let locations: Vec<_> = names
        .iter()
        .filter_map(|name| {
            let summary = indexes.resources.get(name)?;
            Some((name.clone(), summary.family.clone(), summary.kind))
        })
        .collect();

    let report = indexes.prune(names);
    for (name, family, kind) in locations {
        store
            .delete_entry(&family, kind, &name)
            .with_context(|| format!("Failed to delete entry file for '{}'", name))?;
    }

    if report.is_noop() {
        info!("Nothing to prune");
        return Ok(());
    }

    write_catalog(&store, &indexes, &families)?;
    info!(removed = report.removed.len(), "Pruned catalog entries");
    Ok(())
}

/// Print the stored master index.
pub fn stats(config: &AppConfig) -> anyhow::Result<()> {
    let store = CatalogStore::new(&config.output_dir);
    let Some(master) = store.load_master()? else {
        bail!("No catalog found under {}", config.output_dir.display());
    };
    println!("{}", serde_json::to_string_pretty(&master)?);
    Ok(())
}
