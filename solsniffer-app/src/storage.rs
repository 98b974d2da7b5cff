//! Provides the `sled`-based implementation of the storage traits
//! defined in the `solsniffer-connector` library.
use async_trait::async_trait;
use sled::Db;
use solsniffer_connector::{
    models::CanonicalTransaction,
    storage::{CheckpointStore, TransactionSink},
    Result, SnifferError,
};

const CHECKPOINT_KEY: &str = "sync::last_processed_block";
const RECORD_PREFIX: &str = "tx::";

fn persistence(err: impl std::fmt::Display) -> SnifferError {
    SnifferError::Persistence(err.to_string())
}

fn parse_height(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            SnifferError::Persistence(format!(
                "stored checkpoint {:?} is not a block height",
                String::from_utf8_lossy(bytes)
            ))
        })
}

/// A `sled`-backed store for matched transactions and the backfill checkpoint.
///
/// Records are keyed by `tx::{hash}::{mint}::{amount}` and inserted with
/// compare-and-swap, so the same transfer seen by both the live stream and a
/// backfill run is stored once.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Loads one stored record by its dedup key.
    pub fn get(&self, dedup_key: &str) -> Result<Option<CanonicalTransaction>> {
        self.db
            .get(format!("{}{}", RECORD_PREFIX, dedup_key))
            .map_err(persistence)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(persistence))
            .transpose()
    }

    /// Number of stored records, excluding the checkpoint.
    pub fn record_count(&self) -> usize {
        self.db.scan_prefix(RECORD_PREFIX).count()
    }
}

#[async_trait]
impl TransactionSink for SledStore {
    async fn save(&self, transaction: &CanonicalTransaction) -> Result<()> {
        let key = format!("{}{}", RECORD_PREFIX, transaction.dedup_key());
        let value = serde_json::to_vec(transaction).map_err(persistence)?;

        let inserted = self
            .db
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))
            .map_err(persistence)?;
        if inserted.is_err() {
            tracing::debug!(key = %key, "Record already stored; skipping duplicate");
            return Ok(());
        }

        self.db.flush_async().await.map_err(persistence)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db.size_on_disk().map(|_| ()).map_err(persistence)
    }
}

#[async_trait]
impl CheckpointStore for SledStore {
    /// Returns 0 if no checkpoint has been stored yet.
    async fn get_checkpoint(&self) -> Result<u64> {
        let stored = self.db.get(CHECKPOINT_KEY).map_err(persistence)?;
        Ok(stored.as_deref().map(parse_height).transpose()?.unwrap_or(0))
    }

    /// A corrupt stored value is left untouched and reported.
    async fn set_checkpoint(&self, height: u64) -> Result<()> {
        let mut corrupt = None;
        self.db
            .fetch_and_update(CHECKPOINT_KEY, |old| {
                let current = match old.map(parse_height).transpose() {
                    Ok(current) => current.unwrap_or(0),
                    Err(e) => {
                        corrupt = Some(e);
                        return old.map(|v| v.to_vec());
                    }
                };
                Some(current.max(height).to_string().into_bytes())
            })
            .map_err(persistence)?;
        if let Some(e) = corrupt {
            return Err(e);
        }

        self.db.flush_async().await.map_err(persistence)?;
        Ok(())
    }
}
