//! Import command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use redisport::{ImportSession, RedisStore, StatusStore};

pub async fn run_import(url: &str, status: Arc<StatusStore>, file: PathBuf) -> Result<()> {
    let store = RedisStore::connect(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let session = ImportSession::new(store, status);

    let summary = session.run(&file).await?;
    println!(
        "Import completed. {} commands executed successfully, {} failed.",
        summary.imported, summary.errors
    );
    Ok(())
}
