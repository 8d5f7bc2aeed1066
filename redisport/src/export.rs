//! Resumable export session: drives the key source and serializer,
//! appends records to the destination file, and keeps the status store
//! current so `/data status` and `/data cancel` work mid-run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::quote::format_arg;
use crate::scan::{CancelFlag, KeySource, ScanMode, SCAN_BATCH_HINT};
use crate::serialize::serialize_key;
use crate::status::{OperationKind, OperationState, StatusStore};
use crate::store::Store;

pub const EXPORT_FILE_PREFIX: &str = "redis-export";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Glob pattern for keys to export.
    pub pattern: String,
    /// Destination folder, created if missing.
    pub folder: PathBuf,
    /// Enumeration mode; full scan blocks the store and is opt-in.
    pub mode: ScanMode,
    /// Scan batch size hint.
    pub batch_hint: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            folder: PathBuf::from("."),
            mode: ScanMode::Incremental,
            batch_hint: SCAN_BATCH_HINT,
        }
    }
}

#[derive(Debug)]
pub struct ExportOutcome {
    pub file: PathBuf,
    pub processed: u64,
    pub errors: u64,
    /// `Completed` on natural exhaustion, `Cancelled` on cancel.
    pub state: OperationState,
}

pub struct ExportSession {
    store: Arc<dyn Store>,
    status: Arc<StatusStore>,
    cancel: CancelFlag,
}

impl ExportSession {
    pub fn new(store: Arc<dyn Store>, status: Arc<StatusStore>) -> Self {
        Self {
            store,
            status,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle for cancelling this session from another task (e.g. a
    /// Ctrl-C handler). Equivalent to a persisted cancel request.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run one export to completion, cancellation, or failure.
    ///
    /// Per-key serialization problems are counted and written as
    /// comment records; only file I/O and dead-connection errors abort
    /// the session. A cancelled run leaves a valid truncated file.
    pub async fn run(&self, opts: ExportOptions) -> Result<ExportOutcome> {
        if opts.pattern.is_empty() {
            return Err(Error::Precondition("empty key pattern".to_string()));
        }
        std::fs::create_dir_all(&opts.folder)?;

        let (host, port) = self.store.endpoint();
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = opts
            .folder
            .join(format!("{EXPORT_FILE_PREFIX}-{timestamp}-{host}-{port}.txt"));

        let total = self.estimate_total(&opts.pattern).await;
        self.status.begin(
            OperationKind::Export,
            &opts.pattern,
            &path.display().to_string(),
            total,
        )?;
        tracing::info!(
            pattern = %opts.pattern,
            file = %path.display(),
            total_estimated = total,
            "export started"
        );

        let mut processed = 0u64;
        let mut errors = 0u64;
        match self
            .write_records(&opts, &path, &mut processed, &mut errors)
            .await
        {
            Ok(cancelled) => {
                let state = if cancelled {
                    OperationState::Cancelled
                } else {
                    OperationState::Completed
                };
                self.status.finish(state, processed, errors);
                tracing::info!(processed, errors, %state, "export finished");
                Ok(ExportOutcome {
                    file: path,
                    processed,
                    errors,
                    state,
                })
            }
            Err(e) => {
                self.status.finish(OperationState::Failed, processed, errors);
                tracing::error!(processed, errors, "export failed: {e}");
                Err(e)
            }
        }
    }

    /// Returns true when the run ended through cancellation.
    async fn write_records(
        &self,
        opts: &ExportOptions,
        path: &Path,
        processed: &mut u64,
        errors: &mut u64,
    ) -> Result<bool> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let mut source = KeySource::new(
            self.store.clone(),
            &opts.pattern,
            opts.mode,
            self.cancel.clone(),
        )
        .with_batch_hint(opts.batch_hint);

        loop {
            // Pick up cancel requests persisted by another process.
            if self.status.cancel_requested() {
                self.cancel.request();
            }

            let Some(batch) = source.next_batch().await? else {
                writer.flush()?;
                return Ok(source.is_cancelled());
            };

            for key in &batch {
                match serialize_key(&*self.store, key).await {
                    Ok(record) => {
                        for warning in &record.warnings {
                            tracing::warn!("{warning}");
                        }
                        if !record.warnings.is_empty() {
                            *errors += 1;
                        }
                        for line in &record.lines {
                            writeln!(writer, "{line}")?;
                        }
                    }
                    Err(e) if !e.is_fatal() => {
                        *errors += 1;
                        tracing::warn!(
                            "could not serialize key {}: {e}",
                            String::from_utf8_lossy(key)
                        );
                        writeln!(writer, "# Error exporting key {}: {e}", format_arg(key))?;
                    }
                    Err(e) => return Err(e),
                }
                *processed += 1;
            }

            // Flush per batch so a cancelled or failed run leaves every
            // completed record on disk.
            writer.flush()?;
            self.status.update(*processed, *errors);
        }
    }

    async fn estimate_total(&self, pattern: &str) -> u64 {
        if pattern != "*" {
            return 0;
        }
        let nodes = if self.store.is_multi_node() {
            self.store.nodes()
        } else {
            vec![self.store.clone()]
        };
        let mut total = 0;
        for node in nodes {
            total += node.total_keys().await.unwrap_or(0);
        }
        total
    }
}
