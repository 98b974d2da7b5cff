use std::sync::atomic::{AtomicU64, Ordering};

/// Everything the pipeline reports about its own progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    MessageReceived,
    MessageRejected,
    TransactionResolved,
    MalformedTransaction,
    RecordSaved,
    RecordSaveFailed,
    BlockProcessed { height: u64 },
    BlockFailed { height: u64 },
    CheckpointAdvanced { height: u64 },
    ConnectionLost,
    Reconnected,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, event: PipelineEvent);
}

/// In-process counters for every [`PipelineEvent`].
#[derive(Debug, Default)]
pub struct PipelineStats {
    messages_received: AtomicU64,
    messages_rejected: AtomicU64,
    transactions_resolved: AtomicU64,
    malformed_transactions: AtomicU64,
    records_saved: AtomicU64,
    record_save_failures: AtomicU64,
    blocks_processed: AtomicU64,
    blocks_failed: AtomicU64,
    last_checkpoint: AtomicU64,
    connections_lost: AtomicU64,
    reconnects: AtomicU64,
}

/// A point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_rejected: u64,
    pub transactions_resolved: u64,
    pub malformed_transactions: u64,
    pub records_saved: u64,
    pub record_save_failures: u64,
    pub blocks_processed: u64,
    pub blocks_failed: u64,
    pub last_checkpoint: u64,
    pub connections_lost: u64,
    pub reconnects: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: load(&self.messages_received),
            messages_rejected: load(&self.messages_rejected),
            transactions_resolved: load(&self.transactions_resolved),
            malformed_transactions: load(&self.malformed_transactions),
            records_saved: load(&self.records_saved),
            record_save_failures: load(&self.record_save_failures),
            blocks_processed: load(&self.blocks_processed),
            blocks_failed: load(&self.blocks_failed),
            last_checkpoint: load(&self.last_checkpoint),
            connections_lost: load(&self.connections_lost),
            reconnects: load(&self.reconnects),
        }
    }
}

impl EventRecorder for PipelineStats {
    fn record(&self, event: PipelineEvent) {
        tracing::trace!(?event, "pipeline event");
        let counter = match event {
            PipelineEvent::MessageReceived => &self.messages_received,
            PipelineEvent::MessageRejected => &self.messages_rejected,
            PipelineEvent::TransactionResolved => &self.transactions_resolved,
            PipelineEvent::MalformedTransaction => &self.malformed_transactions,
            PipelineEvent::RecordSaved => &self.records_saved,
            PipelineEvent::RecordSaveFailed => &self.record_save_failures,
            PipelineEvent::BlockProcessed { .. } => &self.blocks_processed,
            PipelineEvent::BlockFailed { .. } => &self.blocks_failed,
            PipelineEvent::CheckpointAdvanced { height } => {
                self.last_checkpoint.fetch_max(height, Ordering::Relaxed);
                return;
            }
            PipelineEvent::ConnectionLost => &self.connections_lost,
            PipelineEvent::Reconnected => &self.reconnects,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_event_kind() {
        let stats = PipelineStats::new();
        stats.record(PipelineEvent::RecordSaved);
        stats.record(PipelineEvent::RecordSaved);
        stats.record(PipelineEvent::BlockFailed { height: 9 });
        stats.record(PipelineEvent::CheckpointAdvanced { height: 12 });
        stats.record(PipelineEvent::CheckpointAdvanced { height: 10 });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.records_saved, 2);
        assert_eq!(snapshot.blocks_failed, 1);
        assert_eq!(snapshot.last_checkpoint, 12);
        assert_eq!(snapshot.reconnects, 0);
    }
}
