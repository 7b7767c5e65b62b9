//! Tuning knobs for the batch pipeline and the index builders

use serde::{Deserialize, Serialize};

/// Concurrency limits for per-document processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of documents fetched and normalized at the same time
    pub max_concurrent_documents: usize,

    /// Capacity of the queue between the workers and the aggregation coordinator
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 8,
            queue_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum number of sample paths kept per data type in the type usage table
    pub sample_path_cap: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            sample_path_cap: DEFAULT_SAMPLE_PATH_CAP,
        }
    }
}

pub const DEFAULT_SAMPLE_PATH_CAP: usize = 50;
