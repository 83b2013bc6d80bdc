//! OpenDAL Operator factory for the on-disk block store

use blksync_core::config::ServerConfig;
use blksync_core::{BlksyncError, BlksyncResult};
use opendal::layers::{LoggingInterceptor, LoggingLayer};
use opendal::raw::{AccessorInfo, Operation};
use opendal::{ErrorKind, Operator};
use std::path::Path;
use tracing::Level;

/// Create the store root and staging directory, and remove staging files
/// left behind by writes that never completed.
///
/// Staging must be a different directory from the store root: its contents
/// are deleted here.
pub async fn prepare_dirs(server: &ServerConfig) -> BlksyncResult<()> {
    let root = &server.dictionary;
    let staging = server.staging_dir();
    if staging == *root {
        return Err(BlksyncError::Config(format!(
            "server.staging_dir must differ from server.dictionary ({})",
            root.display()
        )));
    }

    tokio::fs::create_dir_all(root).await?;
    tokio::fs::create_dir_all(&staging).await?;

    let removed = clear_staging(&staging).await?;
    if removed > 0 {
        tracing::info!(
            staging = %staging.display(),
            removed,
            "removed stale staging files"
        );
    }
    Ok(())
}

async fn clear_staging(staging: &Path) -> BlksyncResult<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(staging).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Build an OpenDAL Operator rooted at `server.dictionary`.
///
/// Writes land in the staging directory first and are renamed into place,
/// so a block file is either absent or complete.
pub fn build_fs_operator(server: &ServerConfig) -> BlksyncResult<Operator> {
    let root = server.dictionary.to_string_lossy();
    let staging = server.staging_dir();
    let staging = staging.to_string_lossy();

    // opendal 0.55: builders use consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::Fs::default()
        .root(&root)
        .atomic_write_dir(&staging);

    let op = Operator::new(builder)
        .map_err(|e| BlksyncError::Storage(format!("creating OpenDAL fs operator: {e}")))?
        .layer(LoggingLayer::new(StoreLogInterceptor))
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(3)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Forwards OpenDAL operation logs to `tracing`.
///
/// A missing object is an ordinary answer for a content-addressed store
/// (`NoSuchBlock`, `exists` misses), so NotFound stays at debug.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreLogInterceptor;

fn severity(err: Option<&opendal::Error>) -> Level {
    match err.map(|e| e.kind()) {
        None | Some(ErrorKind::NotFound) => Level::DEBUG,
        Some(ErrorKind::Unexpected) => Level::ERROR,
        Some(_) => Level::WARN,
    }
}

impl LoggingInterceptor for StoreLogInterceptor {
    fn log(
        &self,
        info: &AccessorInfo,
        operation: Operation,
        context: &[(&str, &str)],
        message: &str,
        err: Option<&opendal::Error>,
    ) {
        let level = severity(err);
        if level > tracing::level_filters::LevelFilter::current() {
            return;
        }

        let context = context
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        let service = info.scheme();
        let error = err.map(|e| e.to_string()).unwrap_or_default();

        match level {
            Level::ERROR => tracing::error!(service, %operation, %context, %error, "{message}"),
            Level::WARN => tracing::warn!(service, %operation, %context, %error, "{message}"),
            _ => tracing::debug!(service, %operation, %context, %error, "{message}"),
        }
    }
}
