//! Container runtime adapter for the single backend slot

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Everything needed to launch one backend container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub env: Vec<(String, String)>,
    /// `host:container` volume specs
    pub mounts: Vec<String>,
    /// Command and arguments run inside the image
    pub args: Vec<String>,
}

/// Imperative operations against named containers
///
/// `stop`, `kill` and `remove` tolerate an absent container without raising.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached container
    async fn run(&self, spec: &ContainerSpec) -> Result<()>;

    /// Graceful stop; returns whether the runtime acknowledged it
    async fn stop(&self, name: &str, grace: Duration) -> Result<bool>;

    async fn kill(&self, name: &str) -> Result<()>;

    /// Force-remove
    async fn remove(&self, name: &str) -> Result<()>;

    /// Last `tail` lines of stdout and stderr
    async fn logs(&self, name: &str, tail: usize) -> Result<String>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Runtime driving the `docker` CLI
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[String]) -> Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}", self.binary, args.join(" ")))
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Build the `docker run` argument list for a container spec
pub fn docker_run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--network".to_string(),
        spec.network.clone(),
    ];

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for mount in &spec.mounts {
        args.push("-v".to_string());
        args.push(mount.clone());
    }

    args.push(spec.image.clone());
    args.extend(spec.args.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<()> {
        let output = self.docker(&docker_run_args(spec)).await?;

        if !output.status.success() {
            anyhow::bail!(
                "docker run for '{}' exited with {}: {}",
                spec.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        tracing::info!(
            container = %spec.name,
            image = %spec.image,
            container_id = %String::from_utf8_lossy(&output.stdout).trim(),
            "Backend container launched"
        );

        Ok(())
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<bool> {
        let args = [
            "stop".to_string(),
            "--time".to_string(),
            grace.as_secs().to_string(),
            name.to_string(),
        ];
        let output = self.docker(&args).await?;

        if !output.status.success() {
            tracing::debug!(
                container = %name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker stop not acknowledged"
            );
        }

        Ok(output.status.success())
    }

    async fn kill(&self, name: &str) -> Result<()> {
        let output = self.docker(&["kill".to_string(), name.to_string()]).await?;
        if !output.status.success() {
            tracing::debug!(container = %name, "docker kill found nothing to kill");
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let output = self
            .docker(&["rm".to_string(), "-f".to_string(), name.to_string()])
            .await?;
        if !output.status.success() {
            tracing::debug!(container = %name, "docker rm found nothing to remove");
        }
        Ok(())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let args = [
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            name.to_string(),
        ];
        let output = self.docker(&args).await?;

        Ok(format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
