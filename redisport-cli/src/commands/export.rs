//! Export command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use redisport::{ExportOptions, ExportSession, RedisStore, ScanMode, StatusStore};

/// Run one export; Ctrl-C files a cooperative cancel and the session
/// stops after the batch in flight.
pub async fn run_export(
    url: &str,
    status: Arc<StatusStore>,
    pattern: String,
    folder: PathBuf,
    full_scan: bool,
) -> Result<()> {
    let store = RedisStore::connect(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let session = ExportSession::new(store, status);

    let cancel = session.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after the current batch...");
            cancel.request();
        }
    });

    let mode = if full_scan {
        ScanMode::Full
    } else {
        ScanMode::Incremental
    };
    let outcome = session
        .run(ExportOptions {
            pattern,
            folder,
            mode,
            ..Default::default()
        })
        .await?;

    println!(
        "Export {}: {} keys written to {} ({} errors)",
        outcome.state,
        outcome.processed,
        outcome.file.display(),
        outcome.errors
    );
    Ok(())
}
