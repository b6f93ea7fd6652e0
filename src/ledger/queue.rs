//! Buffered NDJSON writer for abandoned branches.

use bytes::Bytes;
use chrono::Utc;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use rand::Rng;
use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::LedgerConfig;
use crate::emit;
use crate::error::{
    ErrorKind, LedgerDirSnafu, LedgerError, LedgerOpenSnafu, LedgerSerializeSnafu,
    LedgerWriteSnafu,
};
use crate::metrics::events::{LedgerFlushed, StageName};

use super::types::{AbandonedBranch, LedgerStats};

/// Records abandoned branches to a local directory.
///
/// Each run writes one `abandoned-<timestamp>-<suffix>.ndjson` file, where
/// the random suffix keeps ledgers opened within the same second apart. Every flush
/// rewrites the file with all records seen so far, so a crash after a flush
/// never loses earlier lines.
pub struct BranchLedger {
    store: Arc<dyn ObjectStore>,
    filename: String,
    buffer: Mutex<Vec<AbandonedBranch>>,
    written: Mutex<Vec<u8>>,
    stats: Mutex<LedgerStats>,
    buffer_size: usize,
}

impl BranchLedger {
    /// Create a ledger from configuration.
    ///
    /// Returns `None` if no ledger is configured.
    pub fn from_config(config: Option<&LedgerConfig>) -> Result<Option<Self>, LedgerError> {
        config.map(|c| Self::open(&c.path)).transpose()
    }

    /// Open a ledger writing under `dir`, creating the directory if needed.
    pub fn open(dir: &str) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir).context(LedgerDirSnafu { path: dir })?;
        let store = LocalFileSystem::new_with_prefix(dir).context(LedgerOpenSnafu { path: dir })?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix: u32 = rand::rng().random();
        let filename = format!("abandoned-{timestamp}-{suffix:08x}.ndjson");

        info!("Branch ledger enabled: {}/{}", dir, filename);

        Ok(Self {
            store: Arc::new(store),
            filename,
            buffer: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            stats: Mutex::new(LedgerStats::default()),
            buffer_size: 50,
        })
    }

    /// Name of the file this run writes.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Record an abandoned branch.
    pub async fn record(&self, entry: AbandonedBranch) {
        debug!(
            branch = %entry.branch,
            stage = entry.stage.as_str(),
            kind = entry.kind.as_str(),
            "Recording abandoned branch"
        );

        self.stats.lock().await.increment(entry.stage);

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(entry);
            buffer.len() >= self.buffer_size
        };

        if should_flush && let Err(e) = self.flush().await {
            error!("Failed to flush branch ledger: {}", e);
        }
    }

    /// Shorthand for [`record`](Self::record) stamped with the current time.
    pub async fn record_abandoned(
        &self,
        branch: &str,
        stage: StageName,
        kind: ErrorKind,
        reason: impl Into<String>,
        failed_checks: Vec<String>,
    ) {
        self.record(AbandonedBranch {
            branch: branch.to_string(),
            stage,
            kind,
            reason: reason.into(),
            failed_checks,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Write buffered records.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let records = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let count = records.len();
        debug!("Flushing {} ledger records", count);

        let mut written = self.written.lock().await;
        for record in &records {
            let line = serde_json::to_vec(record).context(LedgerSerializeSnafu)?;
            written.extend_from_slice(&line);
            written.push(b'\n');
        }

        let path = Path::from(self.filename.as_str());
        let payload = PutPayload::from(Bytes::from(written.clone()));
        self.store
            .put(&path, payload)
            .await
            .context(LedgerWriteSnafu)?;

        emit!(LedgerFlushed { count });
        info!("Flushed {} records to branch ledger", count);
        Ok(())
    }

    /// Flush remaining records and log a summary.
    pub async fn finalize(&self) -> Result<LedgerStats, LedgerError> {
        self.flush().await?;
        let stats = self.stats.lock().await.clone();
        info!(
            "Branch ledger finalized: {} abandoned branch(es) (ingestion={}, promotion={})",
            stats.total(),
            stats.ingestion,
            stats.promotion
        );
        Ok(stats)
    }
}
