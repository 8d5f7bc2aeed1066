//! Shared, persisted record of the last/active operation.
//!
//! One slot per logical target, guarded by an explicit busy check:
//! starting a second operation while one is running is a conflict, not
//! a silent overwrite. The slot is written through to a JSON state file
//! on every mutation and reloaded on reads, so a status or cancel
//! request from another invocation of the shell sees the live state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const STATE_FILE_NAME: &str = ".redisport-state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Export,
    Import,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Export => write!(f, "export"),
            OperationKind::Import => write!(f, "import"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl OperationState {
    /// Terminal states do not self-transition; only `reset` leaves them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Running)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationState::Running => "running",
            OperationState::Cancelled => "cancelled",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Live/last status of an export or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub kind: OperationKind,
    pub state: OperationState,
    pub pattern: String,
    pub file: String,
    pub total_estimated: u64,
    pub processed: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// Set by `cancel`; the running session observes it between batches.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl OperationStatus {
    fn begin(kind: OperationKind, pattern: &str, file: &str, total_estimated: u64) -> Self {
        Self {
            kind,
            state: OperationState::Running,
            pattern: pattern.to_string(),
            file: file.to_string(),
            total_estimated,
            processed: 0,
            errors: 0,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
            cancel_requested: false,
        }
    }
}

/// Single shared mutable slot for the active/last operation.
pub struct StatusStore {
    path: PathBuf,
    slot: RwLock<Option<OperationStatus>>,
}

impl StatusStore {
    /// Open the status store backed by `path`, loading any persisted
    /// status from a previous process.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let slot = RwLock::new(load(&path));
        Self { path, slot }
    }

    /// Default location under the user's home directory.
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STATE_FILE_NAME);
        Self::open(path)
    }

    /// Current status, refreshed from disk so mutations by another
    /// process (a running session, a cancel request) are visible.
    pub fn get(&self) -> Option<OperationStatus> {
        let mut slot = self.slot.write();
        if let Some(persisted) = load(&self.path) {
            *slot = Some(persisted);
        }
        slot.clone()
    }

    /// Claim the slot for a new operation. Fails with [`Error::Busy`]
    /// while another operation is still running.
    pub fn begin(
        &self,
        kind: OperationKind,
        pattern: &str,
        file: &str,
        total_estimated: u64,
    ) -> Result<()> {
        let mut slot = self.slot.write();
        if let Some(persisted) = load(&self.path) {
            *slot = Some(persisted);
        }
        if let Some(current) = slot.as_ref() {
            if !current.state.is_terminal() {
                return Err(Error::Busy(format!(
                    "{} started at {} is still running",
                    current.kind, current.started_at
                )));
            }
        }
        let status = OperationStatus::begin(kind, pattern, file, total_estimated);
        self.persist(&status)?;
        *slot = Some(status);
        Ok(())
    }

    /// Write progress counters for the running operation.
    pub fn update(&self, processed: u64, errors: u64) {
        let mut slot = self.slot.write();
        if let Some(status) = slot.as_mut() {
            // Keep a cancel flag written by another process.
            if let Some(persisted) = load(&self.path) {
                status.cancel_requested |= persisted.cancel_requested;
            }
            status.processed = processed;
            status.errors = errors;
            status.elapsed_secs = elapsed_since(status.started_at);
            if let Err(e) = self.persist(status) {
                tracing::warn!("could not persist status: {e}");
            }
        }
    }

    /// Move the running operation to a terminal state with final counts.
    pub fn finish(&self, state: OperationState, processed: u64, errors: u64) {
        let mut slot = self.slot.write();
        if let Some(status) = slot.as_mut() {
            status.state = state;
            status.processed = processed;
            status.errors = errors;
            status.elapsed_secs = elapsed_since(status.started_at);
            if let Err(e) = self.persist(status) {
                tracing::warn!("could not persist status: {e}");
            }
        }
    }

    /// Flag the running operation for cooperative cancellation.
    /// Returns false when nothing is running.
    pub fn request_cancel(&self) -> Result<bool> {
        let mut slot = self.slot.write();
        if let Some(persisted) = load(&self.path) {
            *slot = Some(persisted);
        }
        match slot.as_mut() {
            Some(status) if !status.state.is_terminal() => {
                status.cancel_requested = true;
                self.persist(status)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Whether a cancel was requested for the running operation, as
    /// seen by any process sharing the state file.
    pub fn cancel_requested(&self) -> bool {
        self.get().map(|s| s.cancel_requested).unwrap_or(false)
    }

    /// Clear a terminal status back to idle. Rejected while running.
    pub fn reset(&self) -> Result<()> {
        let mut slot = self.slot.write();
        if let Some(persisted) = load(&self.path) {
            *slot = Some(persisted);
        }
        if let Some(current) = slot.as_ref() {
            if !current.state.is_terminal() {
                return Err(Error::Busy(format!(
                    "cannot reset while {} is running",
                    current.kind
                )));
            }
        }
        *slot = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Clear the slot unconditionally, even while `running`. Escape
    /// hatch for a status orphaned by a crashed session.
    pub fn force_reset(&self) -> Result<()> {
        let mut slot = self.slot.write();
        *slot = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn persist(&self, status: &OperationStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(status)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn elapsed_since(started_at: DateTime<Utc>) -> f64 {
    (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0
}

fn load(path: &Path) -> Option<OperationStatus> {
    let data = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!("ignoring unreadable state file {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StatusStore {
        StatusStore::open(dir.path().join("state.json"))
    }

    #[test]
    fn starts_idle() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).get().is_none());
    }

    #[test]
    fn begin_claims_and_finish_releases() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .begin(OperationKind::Export, "*", "out.txt", 10)
            .unwrap();
        let status = store.get().unwrap();
        assert_eq!(status.state, OperationState::Running);

        // Second begin while running is a conflict.
        let err = store
            .begin(OperationKind::Import, "", "in.txt", 0)
            .unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        store.finish(OperationState::Completed, 10, 0);
        assert_eq!(store.get().unwrap().state, OperationState::Completed);

        // Terminal status can be replaced by a new operation.
        store
            .begin(OperationKind::Import, "", "in.txt", 0)
            .unwrap();
    }

    #[test]
    fn status_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let store = StatusStore::open(&path);
        store
            .begin(OperationKind::Export, "user:*", "out.txt", 5)
            .unwrap();
        store.finish(OperationState::Completed, 5, 1);

        let reopened = StatusStore::open(&path);
        let status = reopened.get().unwrap();
        assert_eq!(status.pattern, "user:*");
        assert_eq!(status.processed, 5);
        assert_eq!(status.errors, 1);
        assert_eq!(status.state, OperationState::Completed);
    }

    #[test]
    fn cancel_reaches_a_sibling_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let session_side = StatusStore::open(&path);
        session_side
            .begin(OperationKind::Export, "*", "out.txt", 0)
            .unwrap();

        let shell_side = StatusStore::open(&path);
        assert!(shell_side.request_cancel().unwrap());
        assert!(session_side.cancel_requested());
    }

    #[test]
    fn cancel_without_running_operation_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(!store.request_cancel().unwrap());
    }

    #[test]
    fn reset_clears_terminal_but_not_running() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .begin(OperationKind::Export, "*", "out.txt", 0)
            .unwrap();
        assert!(matches!(store.reset(), Err(Error::Busy(_))));

        store.finish(OperationState::Cancelled, 3, 0);
        store.reset().unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn force_reset_clears_a_running_status() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store
            .begin(OperationKind::Export, "*", "out.txt", 0)
            .unwrap();
        store.force_reset().unwrap();
        assert!(store.get().is_none());
    }
}
