//! Backup orchestrator — drives full and incremental runs.
//!
//! A run moves through scan -> (diff) -> group -> process groups -> persist
//! metadata. Group processing is failure-isolated: one group failing to
//! build or upload is recorded in the result and does not stop the others,
//! and metadata is persisted after every run so the next incremental run
//! diffs against the latest snapshot. Only state-level failures (scan,
//! metadata load/persist, cancellation) abort the run as a whole.

pub mod metadata;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::builder::parse_checksum_record;
use crate::archive::{build_groups, mark_dirty, ArchiveBuilder, ArchiveGroup};
use crate::config::Config;
use crate::fs::diff::changed_shards;
use crate::fs::scanner::ChunkScanner;
use crate::fs::snapshot::Snapshot;
use crate::storage::{remote_join, Storage};
use crate::utils::errors::{BackupError, Result};
use metadata::{Metadata, METADATA_FILE_NAME, SCHEMA_VERSION};

/// Outcome of one backup run.
#[derive(Debug, Default)]
pub struct RunResult {
    pub total_archives: usize,
    pub updated_archives: usize,
    pub skipped_archives: usize,
    /// archive_id -> error text, for groups whose processing failed
    pub errors: BTreeMap<String, String>,
    /// Remote file names uploaded during this run
    pub uploaded_files: Vec<String>,
    /// archive_id -> human-readable outcome
    pub details: BTreeMap<String, String>,
    pub duration: Duration,
}

impl RunResult {
    /// True when at least one group failed (the run is partially failed
    /// rather than done).
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of processing a single group. `checksum` is only set when the run
/// may record a hash for the group (uploaded, confirmed identical, or
/// carried forward); failed groups leave it unset so the previously
/// recorded value survives.
#[derive(Debug)]
struct GroupOutcome {
    archive_id: String,
    detail: String,
    checksum: Option<String>,
    uploaded: Vec<String>,
    updated: bool,
    error: Option<String>,
}

impl GroupOutcome {
    fn failed(archive_id: String, error: BackupError) -> Self {
        let text = error.to_string();
        Self {
            archive_id,
            detail: text.clone(),
            checksum: None,
            uploaded: Vec::new(),
            updated: false,
            error: Some(text),
        }
    }
}

/// Drives full and incremental backup runs against one namespace and one
/// remote target. The storage backend and the cancellation token are
/// supplied by the caller; the runner owns no global state.
pub struct BackupRunner {
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    cancel: CancellationToken,
}

impl BackupRunner {
    pub fn new(config: Config, storage: Arc<dyn Storage>, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            cancel,
        }
    }

    /// Run a full backup: every group is rebuilt and offered for upload.
    pub async fn run_full(&self) -> Result<RunResult> {
        let started = Instant::now();
        let captured_at = Utc::now();
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        info!(
            "starting full backup of {} (prefix digits: {})",
            self.config.chunk_path.display(),
            self.config.prefix_digits
        );

        let snapshot = self.scan_snapshot().await?;
        info!("scanned {} shards", snapshot.len());

        let mut groups = build_groups(&snapshot.shard_names(), self.config.prefix_digits)?;
        for group in &mut groups {
            group.dirty = true;
        }

        let outcomes = self.process_groups(&groups, &BTreeMap::new()).await?;

        let mut checksums = BTreeMap::new();
        let mut result = assemble_result(groups.len(), outcomes, &mut checksums);

        self.persist_metadata(&Metadata {
            schema_version: SCHEMA_VERSION,
            prefix_digits: self.config.prefix_digits,
            captured_at,
            snapshot,
            checksums,
        })
        .await?;

        result.duration = started.elapsed();
        log_completion("full", &result);
        Ok(result)
    }

    /// Run an incremental backup against the previously persisted metadata.
    ///
    /// Fails with [`BackupError::NoPriorBackup`] when no metadata exists.
    /// The recorded `prefix_digits` is reused so group identities keep
    /// corresponding across runs.
    pub async fn run_incremental(&self) -> Result<RunResult> {
        let started = Instant::now();
        let captured_at = Utc::now();
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        info!(
            "starting incremental backup of {}",
            self.config.chunk_path.display()
        );

        let prior = self.load_metadata().await?;
        let snapshot = self.scan_snapshot().await?;

        let changed = changed_shards(&prior.snapshot, &snapshot);
        info!(
            "scanned {} shards, {} changed since {}",
            snapshot.len(),
            changed.len(),
            prior.captured_at
        );

        let mut groups = build_groups(&snapshot.shard_names(), prior.prefix_digits)?;
        mark_dirty(&mut groups, &changed);

        let outcomes = self.process_groups(&groups, &prior.checksums).await?;

        // Seed with every previously recorded checksum; groups processed this
        // run overwrite their entry, failed groups keep the old value.
        let mut checksums = prior.checksums.clone();
        let mut result = assemble_result(groups.len(), outcomes, &mut checksums);

        self.persist_metadata(&Metadata {
            schema_version: SCHEMA_VERSION,
            prefix_digits: prior.prefix_digits,
            captured_at,
            snapshot,
            checksums,
        })
        .await?;

        result.duration = started.elapsed();
        log_completion("incremental", &result);
        Ok(result)
    }

    /// Build the current snapshot on the blocking pool.
    async fn scan_snapshot(&self) -> Result<Snapshot> {
        let scanner = ChunkScanner::new(self.config.chunk_path.clone());
        let handle = tokio::task::spawn_blocking(move || scanner.scan());
        tokio::select! {
            joined = handle => joined
                .map_err(|e| BackupError::NamespaceUnavailable(format!("scan task failed: {}", e)))?,
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled),
        }
    }

    /// Fetch and validate the metadata document from the remote.
    async fn load_metadata(&self) -> Result<Metadata> {
        let remote = remote_join(&self.config.remote_path, METADATA_FILE_NAME);

        let exists = with_cancel(&self.cancel, self.storage.exists(&remote)).await?;
        if !exists {
            return Err(BackupError::NoPriorBackup);
        }

        let bytes = with_cancel(&self.cancel, self.storage.read_small_file(&remote)).await?;
        Metadata::from_json(&bytes)
    }

    /// Write the metadata document under the temp path and upload it.
    ///
    /// Runs after every backup regardless of group failures; the local copy
    /// is kept for inspection.
    async fn persist_metadata(&self, metadata: &Metadata) -> Result<()> {
        let bytes = metadata
            .to_json()
            .map_err(|e| BackupError::MetadataPersist(e.to_string()))?;

        tokio::fs::create_dir_all(&self.config.temp_path)
            .await
            .map_err(|e| BackupError::MetadataPersist(e.to_string()))?;
        let local = self.config.temp_path.join(METADATA_FILE_NAME);
        tokio::fs::write(&local, &bytes)
            .await
            .map_err(|e| BackupError::MetadataPersist(e.to_string()))?;

        let remote = remote_join(&self.config.remote_path, METADATA_FILE_NAME);
        with_cancel(&self.cancel, self.storage.upload(&local, &remote))
            .await
            .map_err(|e| match e {
                BackupError::Cancelled => BackupError::Cancelled,
                other => BackupError::MetadataPersist(other.to_string()),
            })?;

        debug!("metadata persisted to {}", remote);
        Ok(())
    }

    /// Process every group: dirty ones are rebuilt (and uploaded when their
    /// content actually changed) on a bounded worker pool; clean ones are
    /// recorded as skipped with their prior checksum carried forward.
    /// Outcomes come back sorted by archive id, not completion order.
    async fn process_groups(
        &self,
        groups: &[ArchiveGroup],
        prior_checksums: &BTreeMap<String, String>,
    ) -> Result<Vec<GroupOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_groups));
        let mut join_set = JoinSet::new();
        let mut outcomes = Vec::with_capacity(groups.len());

        for group in groups {
            if !group.dirty {
                debug!("group {} unchanged, skipping", group.archive_id);
                outcomes.push(GroupOutcome {
                    archive_id: group.archive_id.clone(),
                    detail: "unchanged, skipped".to_string(),
                    checksum: prior_checksums.get(&group.archive_id).cloned(),
                    uploaded: Vec::new(),
                    updated: false,
                    error: None,
                });
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let config = Arc::clone(&self.config);
            let storage = Arc::clone(&self.storage);
            let cancel = self.cancel.clone();
            let group = group.clone();
            let prior = prior_checksums.get(&group.archive_id).cloned();

            join_set.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => {
                        permit.map_err(|_| BackupError::Cancelled)?
                    }
                    _ = cancel.cancelled() => return Err(BackupError::Cancelled),
                };
                process_group(config, storage, cancel, group, prior).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => return Err(e),
                Err(e) if e.is_cancelled() => return Err(BackupError::Cancelled),
                Err(e) => {
                    return Err(BackupError::ArchiveWrite(format!(
                        "group worker panicked: {}",
                        e
                    )))
                }
            }
        }

        outcomes.sort_by(|a, b| a.archive_id.cmp(&b.archive_id));
        Ok(outcomes)
    }
}

/// Process one dirty group: rebuild the archive, hash it, and upload it
/// together with its checksum record unless the content is unchanged.
///
/// Every failure is contained in the returned outcome; the only `Err` this
/// function produces is [`BackupError::Cancelled`], which aborts the run.
async fn process_group(
    config: Arc<Config>,
    storage: Arc<dyn Storage>,
    cancel: CancellationToken,
    group: ArchiveGroup,
    prior_checksum: Option<String>,
) -> Result<GroupOutcome> {
    let archive_id = group.archive_id.clone();
    info!(
        "processing group {} ({} shards)",
        archive_id,
        group.members.len()
    );

    // Build and hash on the blocking pool
    let build_config = Arc::clone(&config);
    let build_group = group.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let builder = ArchiveBuilder::new(&build_config.chunk_path, &build_config.temp_path);
        let artifact = builder.build(&build_group)?;
        let checksum = builder.checksum(artifact.path())?;
        Ok::<_, BackupError>((artifact, checksum))
    });
    let built = tokio::select! {
        joined = handle => joined
            .map_err(|e| BackupError::ArchiveWrite(format!("archive task failed: {}", e)))
            .and_then(|res| res),
        _ = cancel.cancelled() => return Err(BackupError::Cancelled),
    };
    let (artifact, checksum) = match built {
        Ok(pair) => pair,
        Err(e) => return contain(&archive_id, e),
    };

    // Gate the upload on the previously recorded checksum; without a
    // metadata entry (full runs, groups new to the metadata) fall back to
    // the remote companion record.
    let prior_hash = match prior_checksum {
        Some(hash) => Some(hash),
        None => {
            let record_remote = remote_join(&config.remote_path, &group.checksum_name());
            match with_cancel(&cancel, storage.read_small_file(&record_remote)).await {
                Ok(bytes) => parse_checksum_record(&bytes),
                Err(BackupError::Cancelled) => return Err(BackupError::Cancelled),
                Err(_) => None,
            }
        }
    };

    if prior_hash.as_deref() == Some(checksum.as_str()) {
        info!("group {} content unchanged, skipping upload", archive_id);
        return Ok(GroupOutcome {
            archive_id,
            detail: "checksum unchanged, skipped upload".to_string(),
            checksum: Some(checksum),
            uploaded: Vec::new(),
            updated: false,
            error: None,
        });
    }

    // Upload the archive, then its checksum record
    let archive_remote = remote_join(&config.remote_path, &group.archive_name());
    if let Err(e) = with_cancel(&cancel, storage.upload(artifact.path(), &archive_remote)).await {
        return contain(&archive_id, e);
    }

    let builder = ArchiveBuilder::new(&config.chunk_path, &config.temp_path);
    let record = match builder.write_checksum_file(artifact.path(), &checksum) {
        Ok(record) => record,
        Err(e) => return contain(&archive_id, e),
    };
    let record_remote = remote_join(&config.remote_path, &group.checksum_name());
    if let Err(e) = with_cancel(&cancel, storage.upload(record.path(), &record_remote)).await {
        return contain(&archive_id, e);
    }

    info!("group {} uploaded as {}", archive_id, group.archive_name());
    Ok(GroupOutcome {
        archive_id,
        detail: "created and uploaded".to_string(),
        checksum: Some(checksum),
        uploaded: vec![group.archive_name(), group.checksum_name()],
        updated: true,
        error: None,
    })
}

/// Contain a per-group failure, or propagate cancellation.
fn contain(archive_id: &str, error: BackupError) -> Result<GroupOutcome> {
    if matches!(error, BackupError::Cancelled) {
        return Err(error);
    }
    warn!("group {} failed: {}", archive_id, error);
    Ok(GroupOutcome::failed(archive_id.to_string(), error))
}

/// Race a future against cancellation.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        res = fut => res,
        _ = cancel.cancelled() => Err(BackupError::Cancelled),
    }
}

/// Fold group outcomes into the run result and the new checksums map.
fn assemble_result(
    total: usize,
    outcomes: Vec<GroupOutcome>,
    checksums: &mut BTreeMap<String, String>,
) -> RunResult {
    let mut result = RunResult {
        total_archives: total,
        ..RunResult::default()
    };

    for outcome in outcomes {
        if let Some(checksum) = &outcome.checksum {
            checksums.insert(outcome.archive_id.clone(), checksum.clone());
        }
        result
            .details
            .insert(outcome.archive_id.clone(), outcome.detail);

        match outcome.error {
            Some(error) => {
                result.errors.insert(outcome.archive_id, error);
            }
            None if outcome.updated => result.updated_archives += 1,
            None => result.skipped_archives += 1,
        }
        result.uploaded_files.extend(outcome.uploaded);
    }

    result
}

fn log_completion(mode: &str, result: &RunResult) {
    if result.has_errors() {
        warn!(
            "{} backup finished with {} failed group(s): {} updated, {} skipped of {} total in {:.1?}",
            mode,
            result.errors.len(),
            result.updated_archives,
            result.skipped_archives,
            result.total_archives,
            result.duration
        );
    } else {
        info!(
            "{} backup finished: {} updated, {} skipped of {} total in {:.1?}",
            mode,
            result.updated_archives,
            result.skipped_archives,
            result.total_archives,
            result.duration
        );
    }
}
