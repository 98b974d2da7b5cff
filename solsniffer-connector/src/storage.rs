use crate::{error::Result, models::CanonicalTransaction};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Destination for matched transactions.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    /// Persists one record. Saving the same record twice must not duplicate it.
    async fn save(&self, transaction: &CanonicalTransaction) -> Result<()>;

    /// Reports whether the sink is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Durable storage for the highest fully processed block height.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint, or `0` if none has been written yet.
    async fn get_checkpoint(&self) -> Result<u64>;

    /// Records `height` as processed. Idempotent; never moves the checkpoint backwards.
    async fn set_checkpoint(&self, height: u64) -> Result<()>;
}

/// A process-local store implementing both traits, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transactions: DashMap<String, CanonicalTransaction>,
    checkpoint: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(height: u64) -> Self {
        Self {
            transactions: DashMap::new(),
            checkpoint: AtomicU64::new(height),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Returns a copy of every stored record, in no particular order.
    pub fn transactions(&self) -> Vec<CanonicalTransaction> {
        self.transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl TransactionSink for MemoryStore {
    async fn save(&self, transaction: &CanonicalTransaction) -> Result<()> {
        self.transactions
            .entry(transaction.dedup_key())
            .or_insert_with(|| transaction.clone());
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_checkpoint(&self) -> Result<u64> {
        Ok(self.checkpoint.load(Ordering::SeqCst))
    }

    async fn set_checkpoint(&self, height: u64) -> Result<()> {
        self.checkpoint.fetch_max(height, Ordering::SeqCst);
        Ok(())
    }
}
