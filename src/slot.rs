//! Backend slot state and its on-disk mirror

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Lifecycle of the single backend slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Ready,
    Stopping,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        }
    }

    /// A switch is under way somewhere in the deployment
    pub fn is_transitional(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Stopping)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SlotSnapshot {
    pub active_model: Option<String>,
    pub state: LifecycleState,
    pub switching: bool,
}

impl SlotSnapshot {
    /// `model` occupies the slot, is ready, and nothing is switching
    pub fn is_serving(&self, model: &str) -> bool {
        self.active_model.as_deref() == Some(model)
            && self.state == LifecycleState::Ready
            && !self.switching
    }
}

/// Persisted occupant and state of the slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SlotRecord {
    pub active_model: Option<String>,
    pub state: LifecycleState,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// JSON file shared by every controller instance driving the same slot
///
/// Only the holder of the switch lock writes it; readers may read at any time since
/// writes land through an atomic rename.
pub struct SlotRecordFile {
    path: PathBuf,
}

impl SlotRecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<SlotRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read slot record: {:?}", self.path));
            }
        };

        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse slot record: {:?}", self.path))?;
        Ok(Some(record))
    }

    pub async fn save(&self, record: &SlotRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create slot record directory: {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(record).context("Failed to serialize slot record")?;

        // Atomic write: write to temp file, then rename
        let temp_file = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp slot record")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write slot record")?;
        file.sync_all().await.context("Failed to sync slot record")?;

        fs::rename(&temp_file, &self.path)
            .await
            .context("Failed to rename temp slot record")?;

        Ok(())
    }

    /// Synchronous save for drop paths that cannot await
    pub fn save_blocking(&self, record: &SlotRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record).context("Failed to serialize slot record")?;
        let temp_file = self.path.with_extension("tmp");
        std::fs::write(&temp_file, content).context("Failed to write temp slot record")?;
        std::fs::rename(&temp_file, &self.path).context("Failed to rename temp slot record")?;
        Ok(())
    }
}
