//! rclone-backed storage: every operation shells out to the rclone binary.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::RcloneConfig;
use crate::storage::{RemoteEntry, Storage};
use crate::utils::errors::{BackupError, Result};

pub struct RcloneStorage {
    binary: String,
    config_file: Option<String>,
    extra_args: Vec<String>,
    verbose: bool,
}

/// One row of `rclone lsjson` output.
#[derive(Debug, Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size")]
    size: i64,
    #[serde(rename = "ModTime", default)]
    mod_time: Option<DateTime<Utc>>,
    #[serde(rename = "IsDir")]
    is_dir: bool,
}

impl RcloneStorage {
    pub fn new(config: &RcloneConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            config_file: config
                .config_file
                .as_ref()
                .map(|p| p.display().to_string()),
            extra_args: config.extra_args.clone(),
            verbose: config.verbose,
        }
    }

    /// Assemble the full argument list for one rclone invocation.
    ///
    /// `cat` output is consumed programmatically, so it always runs quiet;
    /// other commands run quiet unless verbose mode is on.
    fn build_args(&self, command: &str, operands: &[&str]) -> Vec<String> {
        let mut args = vec![command.to_string()];

        if let Some(config_file) = &self.config_file {
            args.push("--config".to_string());
            args.push(config_file.clone());
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(operands.iter().map(|s| s.to_string()));

        if command == "cat" || !self.verbose {
            args.push("--quiet".to_string());
            args.push("--progress=false".to_string());
        }

        args
    }

    async fn run_raw(&self, command: &str, operands: &[&str]) -> Result<Output> {
        let args = self.build_args(command, operands);
        debug!("running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BackupError::Storage(format!("failed to run {}: {}", self.binary, e))
            })?;

        if self.verbose && !output.stderr.is_empty() {
            debug!(
                "rclone {} stderr: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(output)
    }

    async fn run(&self, command: &str, operands: &[&str]) -> Result<Vec<u8>> {
        let output = self.run_raw(command, operands).await?;
        if !output.status.success() {
            return Err(BackupError::Storage(format!(
                "rclone {} failed: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Storage for RcloneStorage {
    async fn list(&self, remote_path: &str) -> Result<Vec<RemoteEntry>> {
        let stdout = self.run("lsjson", &[remote_path]).await?;
        let rows: Vec<LsJsonEntry> = serde_json::from_slice(&stdout)?;

        Ok(rows
            .into_iter()
            .map(|row| RemoteEntry {
                name: row.name,
                size: row.size.max(0) as u64,
                modified: row.mod_time,
                is_dir: row.is_dir,
            })
            .collect())
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let local = local_path.display().to_string();
        self.run("copyto", &[local.as_str(), remote_path])
            .await
            .map_err(|e| {
                BackupError::Upload(format!(
                    "failed to upload {} to {}: {}",
                    local, remote_path, e
                ))
            })?;
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let local = local_path.display().to_string();
        self.run("copyto", &[remote_path, local.as_str()]).await?;
        Ok(())
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let output = self.run_raw("lsf", &[remote_path]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // rclone reports a missing object/directory as an error
            if stderr.contains("not found") {
                return Ok(false);
            }
            return Err(BackupError::Storage(format!(
                "rclone lsf failed: {}",
                stderr.trim()
            )));
        }

        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn read_small_file(&self, remote_path: &str) -> Result<Vec<u8>> {
        self.run("cat", &[remote_path]).await
    }
}
