//! Batch pipeline
//!
//! Documents are fetched and normalized concurrently (bounded by a semaphore),
//! then handed over a bounded channel to a single coordinator that owns the
//! batch outcome. Index aggregation happens afterwards through
//! [`CatalogIndexes::apply`], which is the only writer of the indexes.

use crate::config::{IndexConfig, PipelineConfig};
use crate::element_index::ElementIndex;
use crate::error::{Error, Result};
use crate::master_index::{BatchCounters, MasterIndex, MasterIndexBuilder};
use crate::merger::{IndexMerger, MergeReport};
use crate::processor::{DocumentProcessor, ProcessedDocument};
use crate::resource_index::ResourceIndex;
use crate::source::{DocumentRequest, DocumentSource};
use chrono::{DateTime, Utc};
use ferrum_catalog_models::{CatalogEntry, SpecFamily};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// A document that produced no entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reason: String,
}

/// Result of one batch. Partial batches (cancelled) are still valid input
/// for [`CatalogIndexes::apply`].
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub family: String,
    /// Entries in completion order
    pub entries: Vec<CatalogEntry>,
    pub rejected: Vec<Rejection>,
    pub elements_skipped: usize,
    pub cancelled: bool,
}

impl BatchOutcome {
    fn new(family: &str) -> Self {
        Self {
            family: family.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, completed: Completed) {
        match completed.result {
            Ok(processed) => {
                self.elements_skipped += processed.skipped_elements;
                self.entries.push(processed.entry);
            }
            Err(err) => {
                warn!(name = %completed.name, family = %self.family, error = %err, "Document rejected");
                self.rejected.push(Rejection {
                    name: completed.name,
                    reason: err.to_string(),
                });
            }
        }
    }
}

struct Completed {
    name: String,
    result: Result<ProcessedDocument>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogPipeline {
    config: PipelineConfig,
}

impl CatalogPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch and process `requests` for one family.
    ///
    /// Setting the `shutdown` flag aborts outstanding work; entries already
    /// completed are kept and the outcome is marked cancelled.
    pub async fn run<S>(
        &self,
        source: Arc<S>,
        family: &SpecFamily,
        requests: Vec<DocumentRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BatchOutcome
    where
        S: DocumentSource + ?Sized + 'static,
    {
        info!(family = %family.id, documents = requests.len(), "Starting batch");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_documents.max(1)));
        let (tx, mut rx) = mpsc::channel::<Completed>(self.config.queue_capacity.max(1));
        let processor = Arc::new(DocumentProcessor::for_family(family.clone()));
        let mut tasks = JoinSet::new();

        for request in requests {
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&source);
            let processor = Arc::clone(&processor);
            let tx = tx.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = match source.fetch(&request.name).await {
                    Ok(document) => processor.process_document(&document, request.is_profile),
                    Err(err) => Err(Error::from(err)),
                };
                let _ = tx
                    .send(Completed {
                        name: request.name,
                        result,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut outcome = BatchOutcome::new(&family.id);
        let mut watching = true;

        if *shutdown.borrow() {
            outcome.cancelled = true;
        }

        while !outcome.cancelled {
            tokio::select! {
                completed = rx.recv() => match completed {
                    Some(completed) => outcome.record(completed),
                    None => break,
                },
                changed = shutdown.changed(), if watching => match changed {
                    Ok(()) if *shutdown.borrow() => outcome.cancelled = true,
                    Ok(()) => {}
                    // Sender dropped: nobody can cancel any more.
                    Err(_) => watching = false,
                },
            }
        }

        if outcome.cancelled {
            tasks.abort_all();
            rx.close();
            while let Some(completed) = rx.recv().await {
                outcome.record(completed);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    error!(family = %family.id, error = %err, "Document task panicked");
                }
            }
        }

        info!(
            family = %family.id,
            entries = outcome.entries.len(),
            rejected = outcome.rejected.len(),
            elements_skipped = outcome.elements_skipped,
            cancelled = outcome.cancelled,
            "Batch finished"
        );
        outcome
    }
}

/// The aggregated indexes and the run counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogIndexes {
    pub resources: ResourceIndex,
    pub elements: ElementIndex,
    pub counters: BatchCounters,
}

impl CatalogIndexes {
    pub fn new(config: &IndexConfig) -> Self {
        Self::from_parts(ResourceIndex::default(), ElementIndex::default(), config)
    }

    pub fn from_parts(resources: ResourceIndex, mut elements: ElementIndex, config: &IndexConfig) -> Self {
        elements.set_sample_path_cap(config.sample_path_cap);
        Self {
            resources,
            elements,
            counters: BatchCounters::default(),
        }
    }

    /// Merge a batch into both indexes.
    ///
    /// Entries with a conflicting name are left out of both indexes and
    /// counted as rejected; the rest of the batch is merged.
    pub fn apply(&mut self, outcome: &BatchOutcome) -> Result<MergeReport> {
        let merger = IndexMerger::new();
        let report = merger.merge(&mut self.resources, &outcome.entries)?;
        merger.merge(&mut self.elements, &outcome.entries)?;

        self.counters.documents_processed += outcome.entries.len() - report.duplicates.len();
        self.counters.documents_unchanged += report.unchanged.len();
        self.counters.documents_rejected += outcome.rejected.len() + report.duplicates.len();
        self.counters.elements_skipped += outcome.elements_skipped;
        for rejection in &outcome.rejected {
            self.counters
                .record_error(format!("{}: {}", rejection.name, rejection.reason));
        }
        for duplicate in &report.duplicates {
            self.counters.record_error(duplicate.to_error().to_string());
        }

        info!(
            family = %outcome.family,
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            duplicates = report.duplicates.len(),
            "Merged batch into indexes"
        );
        Ok(report)
    }

    pub fn prune<S: AsRef<str>>(&mut self, names: &[S]) -> MergeReport {
        let merger = IndexMerger::new();
        let report = merger.prune(&mut self.resources, names);
        merger.prune(&mut self.elements, names);
        report
    }

    pub fn master(&self, families: &[SpecFamily], last_updated: DateTime<Utc>) -> Result<MasterIndex> {
        MasterIndexBuilder::new(families.iter().cloned()).build(
            &self.resources,
            &self.elements,
            &self.counters,
            last_updated,
        )
    }
}
