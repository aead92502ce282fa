//! Job store backends
//!
//! The gateway and the workers must see one queue. [`FileJobStore`] shares it through a
//! JSON file guarded by `flock(2)`; [`MemoryJobStore`] keeps everything in-process for
//! single-binary deployments and tests.

use super::model::{JobMetaPatch, JobRecord, NewJob, RawJobState};
use super::queue::QueueState;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use nix::fcntl::{Flock, FlockArg};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

// ============================================================================
// Trait Definition
// ============================================================================

/// Durable FIFO of jobs with per-job metadata
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a queued job and return its record
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord>;

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>>;

    /// Drop a job from the pending list; `false` if it was not pending
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Number of pending jobs
    async fn len(&self) -> Result<usize>;

    /// Zero-based position among pending jobs
    async fn position(&self, id: &str) -> Result<Option<usize>>;

    async fn update_meta(&self, id: &str, patch: JobMetaPatch) -> Result<()>;

    async fn set_state(&self, id: &str, state: RawJobState) -> Result<()>;

    /// Hand the oldest queued job to a worker, marking it started
    async fn claim_next(&self) -> Result<Option<JobRecord>>;

    /// Record a result; returns `false` when the job had been cancelled
    async fn complete(&self, id: &str, result: Value) -> Result<bool>;

    /// Record a failure; returns `false` when the job had been cancelled
    async fn fail(&self, id: &str, error: String) -> Result<bool>;

    /// Job a worker is currently executing, if any
    async fn current_job(&self) -> Result<Option<String>>;
}

// ============================================================================
// In-memory Implementation
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<QueueState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        Ok(self.state.lock().await.enqueue(job, Utc::now()))
    }

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().await.fetch(id))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.state.lock().await.remove(id))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.len())
    }

    async fn position(&self, id: &str) -> Result<Option<usize>> {
        Ok(self.state.lock().await.position(id))
    }

    async fn update_meta(&self, id: &str, patch: JobMetaPatch) -> Result<()> {
        self.state.lock().await.update_meta(id, patch)
    }

    async fn set_state(&self, id: &str, state: RawJobState) -> Result<()> {
        self.state.lock().await.set_state(id, state, Utc::now())
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().await.claim_next(Utc::now()))
    }

    async fn complete(&self, id: &str, result: Value) -> Result<bool> {
        self.state.lock().await.complete(id, result, Utc::now())
    }

    async fn fail(&self, id: &str, error: String) -> Result<bool> {
        self.state.lock().await.fail(id, error, Utc::now())
    }

    async fn current_job(&self) -> Result<Option<String>> {
        Ok(self.state.lock().await.current_job())
    }
}

// ============================================================================
// File-backed Implementation
// ============================================================================

/// Queue persisted as one JSON document next to a `.lock` file
///
/// Every operation is load, apply, save under an exclusive `flock`, run on the
/// blocking pool.
pub struct FileJobStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create job store directory: {:?}", parent))?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&QueueState) -> R + Send + 'static,
    {
        self.with_state(false, move |state| Ok(op(state))).await
    }

    async fn write<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut QueueState) -> Result<R> + Send + 'static,
    {
        self.with_state(true, op).await
    }

    async fn with_state<R, F>(&self, persist: bool, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut QueueState) -> Result<R> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        tokio::task::spawn_blocking(move || {
            let lock_file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)
                .with_context(|| format!("Failed to open job store lock: {:?}", lock_path))?;
            let _lock = Flock::lock(lock_file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| anyhow!("flock on {:?} failed: {}", lock_path, errno))?;

            let mut state = load_state(&path)?;
            let result = op(&mut state)?;
            if persist {
                save_state(&path, &state)?;
            }
            Ok(result)
        })
        .await
        .context("Job store task panicked")?
    }
}

fn load_state(path: &Path) -> Result<QueueState> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(QueueState::default()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read job store: {:?}", path)),
    };
    if content.trim().is_empty() {
        return Ok(QueueState::default());
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse job store: {:?}", path))
}

fn save_state(path: &Path, state: &QueueState) -> Result<()> {
    let content = serde_json::to_vec(state).context("Failed to serialize job store")?;

    // Atomic write: write to temp file, then rename
    let temp_file = path.with_extension("tmp");
    let mut file =
        std::fs::File::create(&temp_file).context("Failed to create temp job store file")?;
    file.write_all(&content)
        .context("Failed to write job store")?;
    file.sync_all().context("Failed to sync job store")?;
    std::fs::rename(&temp_file, path).context("Failed to rename temp job store file")?;

    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        self.write(move |state| Ok(state.enqueue(job, Utc::now())))
            .await
    }

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>> {
        let id = id.to_string();
        self.read(move |state| state.fetch(&id)).await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.write(move |state| Ok(state.remove(&id))).await
    }

    async fn len(&self) -> Result<usize> {
        self.read(|state| state.len()).await
    }

    async fn position(&self, id: &str) -> Result<Option<usize>> {
        let id = id.to_string();
        self.read(move |state| state.position(&id)).await
    }

    async fn update_meta(&self, id: &str, patch: JobMetaPatch) -> Result<()> {
        let id = id.to_string();
        self.write(move |state| state.update_meta(&id, patch)).await
    }

    async fn set_state(&self, id: &str, raw: RawJobState) -> Result<()> {
        let id = id.to_string();
        self.write(move |state| state.set_state(&id, raw, Utc::now()))
            .await
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>> {
        self.write(|state| Ok(state.claim_next(Utc::now()))).await
    }

    async fn complete(&self, id: &str, result: Value) -> Result<bool> {
        let id = id.to_string();
        self.write(move |state| state.complete(&id, result, Utc::now()))
            .await
    }

    async fn fail(&self, id: &str, error: String) -> Result<bool> {
        let id = id.to_string();
        self.write(move |state| state.fail(&id, error, Utc::now()))
            .await
    }

    async fn current_job(&self) -> Result<Option<String>> {
        self.read(|state| state.current_job()).await
    }
}
