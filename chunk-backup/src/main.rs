//! Chunk-store backup tool - Main entry point
//!
//! Backs up a sharded chunk namespace into prefix-grouped tar.gz archives
//! on remote storage via rclone, either fully or incrementally.

use anyhow::Result;
use chunk_backup::{backup::RunResult, storage::RcloneStorage, utils, BackupRunner, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path of the chunk namespace root (the .chunk directory)
    #[arg(long, value_name = "DIR")]
    chunk_path: Option<PathBuf>,

    /// Remote storage path, e.g. remote:bucket/pbs-backup
    #[arg(long)]
    remote_path: Option<String>,

    /// Scratch directory for archives and the local metadata copy
    #[arg(long, value_name = "DIR")]
    temp_path: Option<PathBuf>,

    /// rclone binary path or name
    #[arg(long)]
    rclone_binary: Option<String>,

    /// rclone configuration file
    #[arg(long, value_name = "FILE")]
    rclone_config: Option<PathBuf>,

    /// Extra rclone arguments (comma separated, may be repeated)
    #[arg(long = "rclone-args", value_name = "ARGS")]
    rclone_args: Vec<String>,

    /// Maximum number of archive groups processed concurrently
    #[arg(long)]
    max_concurrent_groups: Option<usize>,

    /// Operation timeout in seconds
    #[arg(long, default_value_t = 1800)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full backup: every archive group is rebuilt and uploaded
    Full {
        /// Grouping prefix digits (1-4)
        #[arg(long, default_value_t = 2)]
        prefix_digits: u8,
    },

    /// Run an incremental backup against the previous backup metadata
    Incremental,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    utils::logger::init(level)?;

    // Load configuration file, then apply CLI overrides
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(chunk_path) = args.chunk_path {
        config.chunk_path = chunk_path;
    }
    if let Some(remote_path) = args.remote_path {
        config.remote_path = remote_path;
    }
    if let Some(temp_path) = args.temp_path {
        config.temp_path = temp_path;
    }
    if let Some(binary) = args.rclone_binary {
        config.rclone.binary = binary;
    }
    if let Some(config_file) = args.rclone_config {
        config.rclone.config_file = Some(config_file);
    }
    if !args.rclone_args.is_empty() {
        config.rclone.extra_args = split_rclone_args(&args.rclone_args);
    }
    if let Some(max_concurrent) = args.max_concurrent_groups {
        config.max_concurrent_groups = max_concurrent;
    }
    config.rclone.verbose = config.rclone.verbose || args.verbose;

    let is_full = matches!(args.command, Command::Full { .. });
    if let Command::Full { prefix_digits } = &args.command {
        config.prefix_digits = *prefix_digits;
    }

    config.validate()?;

    let mode = if is_full { "full" } else { "incremental" };
    println!("Starting {} backup...", mode);
    println!("Chunk path:  {}", config.chunk_path.display());
    println!("Remote path: {}", config.remote_path);
    println!("Temp path:   {}", config.temp_path.display());
    if is_full {
        println!("Prefix digits: {}", config.prefix_digits);
    }

    // One token cancels on Ctrl-C/SIGTERM and on the deadline
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown signal received, cancelling backup");
        signal_cancel.cancel();
    });

    let deadline = Duration::from_secs(args.timeout);
    let deadline_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        tracing::warn!("Timeout after {:?}, cancelling backup", deadline);
        deadline_cancel.cancel();
    });

    let storage = Arc::new(RcloneStorage::new(&config.rclone));
    let runner = BackupRunner::new(config, storage, cancel);

    let result = if is_full {
        runner.run_full().await?
    } else {
        runner.run_incremental().await?
    };

    print_result(&result, args.verbose);
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Support both repeated flags and comma-separated lists for --rclone-args.
fn split_rclone_args(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_result(result: &RunResult, verbose: bool) {
    println!();
    println!("=== Backup complete ===");
    println!("Duration:         {:.1?}", result.duration);
    println!("Total archives:   {}", result.total_archives);
    println!("Updated archives: {}", result.updated_archives);
    println!("Skipped archives: {}", result.skipped_archives);
    println!("Errored archives: {}", result.errors.len());
    println!("Uploaded files:   {}", result.uploaded_files.len());

    if !result.errors.is_empty() {
        println!();
        println!("Errors:");
        for (archive_id, error) in &result.errors {
            println!("  - {}: {}", archive_id, error);
        }
    }

    if verbose && !result.details.is_empty() {
        println!();
        println!("Details:");
        for (archive_id, detail) in &result.details {
            println!("  {}: {}", archive_id, detail);
        }
    }

    if !result.uploaded_files.is_empty() {
        println!();
        println!("Uploaded:");
        for file in &result.uploaded_files {
            println!("  - {}", file);
        }
    }

    if result.has_errors() {
        tracing::warn!("Backup finished with {} error(s)", result.errors.len());
    } else {
        println!();
        println!("Backup completed successfully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rclone_args() {
        let raw = vec![
            "--transfers=4,--checkers=8".to_string(),
            " --fast-list ".to_string(),
            "".to_string(),
        ];
        assert_eq!(
            split_rclone_args(&raw),
            vec!["--transfers=4", "--checkers=8", "--fast-list"]
        );
    }
}
