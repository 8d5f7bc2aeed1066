//! Status, cancel, and reset commands over the shared status slot.

use std::sync::Arc;

use anyhow::Result;
use redisport::{OperationKind, StatusStore};

pub fn run_status(status: Arc<StatusStore>) -> Result<()> {
    match status.get() {
        Some(op) => {
            println!("{} ({})", op.kind, op.state);
            if !op.pattern.is_empty() {
                println!("  Pattern: {}", op.pattern);
            }
            println!("  File: {}", op.file);
            if op.total_estimated > 0 {
                println!("  Processed: {} / ~{}", op.processed, op.total_estimated);
            } else {
                println!("  Processed: {}", op.processed);
            }
            println!("  Errors: {}", op.errors);
            println!("  Started: {}", op.started_at.to_rfc3339());
            println!("  Elapsed: {:.1}s", op.elapsed_secs);
            if op.cancel_requested {
                println!("  Cancel requested");
            }
        }
        None => println!("No data operations have been performed yet."),
    }
    Ok(())
}

pub fn run_cancel(status: Arc<StatusStore>) -> Result<()> {
    if status.request_cancel()? {
        println!("{}", cancel_note(status.get().map(|s| s.kind)));
    } else {
        println!("No running operation to cancel.");
    }
    Ok(())
}

/// Imports never observe the cancel flag; only exports stop early.
fn cancel_note(kind: Option<OperationKind>) -> &'static str {
    match kind {
        Some(OperationKind::Import) => {
            "Cancel recorded, but a running import always runs to completion."
        }
        _ => "Cancel requested; the export stops after its current batch.",
    }
}

pub fn run_reset(status: Arc<StatusStore>, force: bool) -> Result<()> {
    if force {
        status.force_reset()?;
    } else {
        status.reset()?;
    }
    println!("Status cleared.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_note_distinguishes_imports_from_exports() {
        assert!(cancel_note(Some(OperationKind::Import)).contains("runs to completion"));
        assert!(cancel_note(Some(OperationKind::Export)).contains("stops after its current batch"));
    }
}
