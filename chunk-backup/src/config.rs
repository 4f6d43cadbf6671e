//! Configuration management for the backup tool.
//!
//! Loads configuration from a TOML file with CLI flag overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the chunk namespace root (the `.chunk` directory)
    #[serde(default)]
    pub chunk_path: PathBuf,

    /// Remote storage path, e.g. `remote:bucket/pbs-backup`
    #[serde(default)]
    pub remote_path: String,

    /// Scratch directory for archives and the local metadata copy
    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,

    /// Grouping granularity in hex digits (full backups only; incremental
    /// runs reuse the value recorded in the previous metadata)
    #[serde(default = "default_prefix_digits")]
    pub prefix_digits: u8,

    /// Maximum number of archive groups processed concurrently
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,

    #[serde(default)]
    pub rclone: RcloneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcloneConfig {
    /// rclone binary path or name
    #[serde(default = "default_rclone_binary")]
    pub binary: String,

    /// rclone configuration file, passed as `--config`
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Extra arguments appended to every rclone invocation
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Let rclone write its own progress output instead of running quiet
    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_path: PathBuf::new(),
            remote_path: String::new(),
            temp_path: default_temp_path(),
            prefix_digits: default_prefix_digits(),
            max_concurrent_groups: default_max_concurrent_groups(),
            rclone: RcloneConfig::default(),
        }
    }
}

impl Default for RcloneConfig {
    fn default() -> Self {
        Self {
            binary: default_rclone_binary(),
            config_file: None,
            extra_args: Vec::new(),
            verbose: false,
        }
    }
}

// Default values
fn default_temp_path() -> PathBuf {
    std::env::temp_dir().join("chunk-backup")
}

fn default_prefix_digits() -> u8 {
    2
}

fn default_max_concurrent_groups() -> usize {
    1
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| BackupError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Check that the configuration is usable before any work begins.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_path.as_os_str().is_empty() {
            return Err(BackupError::Config("chunk-path is required".to_string()));
        }
        if !self.chunk_path.is_dir() {
            return Err(BackupError::Config(format!(
                "chunk directory does not exist: {}",
                self.chunk_path.display()
            )));
        }
        if self.remote_path.is_empty() {
            return Err(BackupError::Config("remote-path is required".to_string()));
        }
        if !(1..=4).contains(&self.prefix_digits) {
            return Err(BackupError::InvalidPrefixDigits(self.prefix_digits));
        }
        if self.max_concurrent_groups == 0 {
            return Err(BackupError::Config(
                "max-concurrent-groups must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn valid_config(chunk_dir: &Path) -> Config {
        Config {
            chunk_path: chunk_dir.to_path_buf(),
            remote_path: "remote:backup".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.prefix_digits, 2);
        assert_eq!(config.max_concurrent_groups, 1);
        assert_eq!(config.rclone.binary, "rclone");
        assert!(!config.rclone.verbose);

        // An empty TOML document deserializes to the same defaults
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.prefix_digits, config.prefix_digits);
        assert_eq!(parsed.rclone.binary, config.rclone.binary);
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "chunk_path = \"/data/.chunk\"\nremote_path = \"remote:backup\"\nprefix_digits = 3\n\n[rclone]\nbinary = \"/usr/bin/rclone\"\nextra_args = [\"--transfers=4\"]"
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.chunk_path, PathBuf::from("/data/.chunk"));
        assert_eq!(config.prefix_digits, 3);
        assert_eq!(config.rclone.binary, "/usr/bin/rclone");
        assert_eq!(config.rclone.extra_args, vec!["--transfers=4".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_prefix_digits() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path());
        config.prefix_digits = 5;
        assert!(matches!(
            config.validate(),
            Err(BackupError::InvalidPrefixDigits(5))
        ));

        config.prefix_digits = 0;
        assert!(matches!(
            config.validate(),
            Err(BackupError::InvalidPrefixDigits(0))
        ));
    }

    #[test]
    fn test_validate_requires_paths() {
        let dir = TempDir::new().unwrap();

        let mut config = valid_config(dir.path());
        config.remote_path = String::new();
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));

        let mut config = valid_config(dir.path());
        config.chunk_path = dir.path().join("missing");
        assert!(matches!(config.validate(), Err(BackupError::Config(_))));

        let config = valid_config(dir.path());
        assert!(config.validate().is_ok());
    }
}
