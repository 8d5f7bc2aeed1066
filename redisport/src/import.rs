//! Replay-file import: streams the file line by line, re-issues each
//! command against the target store, and reports a terminal summary.
//! One bad record never aborts the batch; only a missing file or a
//! fatal transport/file error does.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::quote::split_line;
use crate::status::{OperationKind, OperationState, StatusStore};
use crate::store::Store;

/// Status updates are persisted every this many applied lines.
const PROGRESS_EVERY: u64 = 100;

const TTL_COMMANDS: [&str; 2] = ["EXPIRE", "PEXPIRE"];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    pub errors: u64,
}

pub struct ImportSession {
    store: Arc<dyn Store>,
    status: Arc<StatusStore>,
}

impl ImportSession {
    pub fn new(store: Arc<dyn Store>, status: Arc<StatusStore>) -> Self {
        Self { store, status }
    }

    /// Replay `path` against the store in file order.
    ///
    /// Runs to completion or fatal error; there is no cancel for an
    /// import. TTL commands for a key whose value command failed in
    /// this run are skipped so a key that was never created cannot be
    /// given an expiry.
    pub async fn run(&self, path: &Path) -> Result<ImportSummary> {
        if !path.is_file() {
            return Err(Error::Precondition(format!(
                "import file {} does not exist",
                path.display()
            )));
        }
        let file = File::open(path).map_err(|e| {
            Error::Precondition(format!("cannot read {}: {e}", path.display()))
        })?;

        self.status
            .begin(OperationKind::Import, "", &path.display().to_string(), 0)?;
        tracing::info!(file = %path.display(), "import started");

        let mut summary = ImportSummary::default();
        match self.replay(BufReader::new(file), &mut summary).await {
            Ok(()) => {
                self.status
                    .finish(OperationState::Completed, summary.imported, summary.errors);
                tracing::info!(
                    imported = summary.imported,
                    errors = summary.errors,
                    "import finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.status
                    .finish(OperationState::Failed, summary.imported, summary.errors);
                tracing::error!(
                    imported = summary.imported,
                    errors = summary.errors,
                    "import failed: {e}"
                );
                Err(e)
            }
        }
    }

    async fn replay(&self, reader: impl BufRead, summary: &mut ImportSummary) -> Result<()> {
        // Keys whose value command failed; their TTL lines are skipped.
        let mut failed_keys: HashSet<Vec<u8>> = HashSet::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let args = match split_line(line) {
                Ok(args) if !args.is_empty() => args,
                Ok(_) => continue,
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!("skipping malformed line: {e}");
                    continue;
                }
            };

            let command = String::from_utf8_lossy(&args[0]).to_uppercase();
            let key = args.get(1).cloned();

            if TTL_COMMANDS.contains(&command.as_str()) {
                if let Some(key) = &key {
                    if failed_keys.contains(key) {
                        summary.errors += 1;
                        tracing::warn!(
                            "skipping {command} for key {} whose value command failed",
                            String::from_utf8_lossy(key)
                        );
                        continue;
                    }
                }
            }

            match self.store.issue_command(&args).await {
                Ok(()) => {
                    summary.imported += 1;
                    if summary.imported.is_multiple_of(PROGRESS_EVERY) {
                        self.status.update(summary.imported, summary.errors);
                    }
                }
                Err(e) if !e.is_fatal() => {
                    summary.errors += 1;
                    if let Some(key) = key {
                        failed_keys.insert(key);
                    }
                    tracing::warn!("command {command} rejected: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        self.status.update(summary.imported, summary.errors);
        Ok(())
    }
}
