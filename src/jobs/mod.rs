//! Job queue: records, status taxonomy and store backends

pub mod model;
pub mod queue;
pub mod store;

pub use model::{
    JobMeta, JobMetaPatch, JobRecord, JobStatus, JobTask, NewJob, RawJobState, RetentionPolicy,
};
pub use queue::QueueState;
pub use store::{FileJobStore, JobStore, MemoryJobStore};

use crate::config::JobsConfig;
use std::sync::Arc;

/// Build the store named by configuration; no path means in-memory
pub fn open_store(config: &JobsConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.store_path {
        Some(path) => {
            tracing::info!(path = ?path, "Using file-backed job store");
            Ok(Arc::new(FileJobStore::new(path)?))
        }
        None => {
            tracing::warn!("No job store path configured, jobs are held in memory");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

impl From<&JobsConfig> for RetentionPolicy {
    fn from(config: &JobsConfig) -> Self {
        Self {
            result_ttl_secs: config.result_ttl_secs,
            failure_ttl_secs: config.failure_ttl_secs,
        }
    }
}
