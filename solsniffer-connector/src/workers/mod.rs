//! # Sniffer Service & Background Workers
//!
//! This module defines the `SnifferService`, which orchestrates every background task
//! needed to ingest matching transactions from the live stream and from history.
//!
//! ## Core Components
//!
//! - [`SnifferService`]: Owns and runs the workers. It is consumed by its `run` method.
//! - [`SnifferHandle`]: A clonable handle used to stop the service and read its counters.
//! - **Workers**:
//!   - [`MonitorCoordinator`]: Owns one subscription and turns its notifications into records.
//!   - [`HealthSupervisor`]: Checks the live connection and rebuilds it when it dies.
//!   - [`BackfillEngine`]: Closes the gap between the stored checkpoint and the chain head.

mod backfill;
mod live;
mod supervisor;

pub use backfill::{chunk_ranges, BackfillEngine, BackfillReport};
pub use live::MonitorCoordinator;
pub use supervisor::{HealthSupervisor, LiveSession};

use crate::{
    config::ConnectorConfig,
    error::Result,
    models::{MonitoredSet, RawTransaction},
    processor::TransactionProcessor,
    rpc::ChainClient,
    storage::{CheckpointStore, TransactionSink},
    telemetry::{EventRecorder, PipelineEvent, PipelineStats, StatsSnapshot},
    transport::Dialer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A shared context containing all dependencies required by the workers.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<ConnectorConfig>,
    pub chain: Arc<dyn ChainClient>,
    pub sink: Arc<dyn TransactionSink>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub processor: Arc<TransactionProcessor>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl WorkerContext {
    /// Builds the context; the monitored set is derived from `config.monitor`.
    pub fn new(
        config: Arc<ConnectorConfig>,
        chain: Arc<dyn ChainClient>,
        sink: Arc<dyn TransactionSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let monitored = MonitoredSet::new(
            config.monitor.wallets.iter().cloned(),
            config.monitor.tokens.iter().cloned(),
        );
        Self {
            config,
            chain,
            sink,
            checkpoints,
            processor: Arc::new(TransactionProcessor::new(Arc::new(monitored))),
            recorder,
        }
    }

    /// Filters one transaction and saves every match.
    ///
    /// Failed saves are logged and counted; only a malformed transaction is an error.
    /// Returns the number of records saved.
    pub async fn ingest(&self, raw: &RawTransaction) -> Result<usize> {
        let records = self.processor.process(raw).inspect_err(|_| {
            self.recorder.record(PipelineEvent::MalformedTransaction);
        })?;

        let mut saved = 0;
        for record in &records {
            match self.sink.save(record).await {
                Ok(()) => {
                    saved += 1;
                    self.recorder.record(PipelineEvent::RecordSaved);
                    tracing::info!(
                        hash = %record.hash,
                        destination = %record.destination,
                        mint = %record.token_mint,
                        amount = %record.amount,
                        "Saved matching transaction"
                    );
                }
                Err(e) => {
                    self.recorder.record(PipelineEvent::RecordSaveFailed);
                    tracing::error!(hash = %record.hash, mint = %record.token_mint, "Failed to persist transaction: {}", e);
                }
            }
        }
        Ok(saved)
    }
}

/// A clonable handle for interacting with a running [`SnifferService`].
#[derive(Debug, Clone)]
pub struct SnifferHandle {
    cancel: CancellationToken,
    stats: Arc<PipelineStats>,
}

impl SnifferHandle {
    /// Signals every worker to finish its current unit of work and exit.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// The main background service manager.
///
/// Created once; [`run()`](Self::run) establishes the live subscription, optionally
/// runs a backfill pass, and then supervises the live connection until stopped.
pub struct SnifferService {
    ctx: WorkerContext,
    supervisor: HealthSupervisor,
    backfill: BackfillEngine,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl SnifferService {
    /// Creates the service and its [`SnifferHandle`] without starting anything.
    pub fn new(
        config: Arc<ConnectorConfig>,
        chain: Arc<dyn ChainClient>,
        sink: Arc<dyn TransactionSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        dialer: Arc<dyn Dialer>,
    ) -> (Self, SnifferHandle) {
        let stats = Arc::new(PipelineStats::new());
        let ctx = WorkerContext::new(config, chain, sink, checkpoints, stats.clone());
        let cancel = CancellationToken::new();

        let runner = Self {
            supervisor: HealthSupervisor::new(ctx.clone(), dialer),
            backfill: BackfillEngine::new(ctx.clone()),
            ctx,
            stats: stats.clone(),
            cancel: cancel.clone(),
        };
        let handle = SnifferHandle { cancel, stats };
        (runner, handle)
    }

    /// Runs all background services until [`SnifferHandle::stop()`] is called.
    ///
    /// Failing to establish the live subscription within its retry budget is fatal.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            wallets = self.ctx.processor.monitored().wallet_count(),
            tokens = self.ctx.processor.monitored().token_count(),
            "SOLSniffer is running all background services."
        );

        let session = self.supervisor.establish(&self.cancel).await?;

        let backfill = async {
            if !self.ctx.config.backfill.run_on_startup {
                return;
            }
            match self.backfill.backfill_missed_blocks(&self.cancel).await {
                Ok(report) => tracing::info!(?report, "Startup backfill finished."),
                Err(e) if e.is_cancelled() => tracing::info!("Startup backfill cancelled."),
                Err(e) => tracing::error!("Startup backfill failed: {}", e),
            }
        };

        tokio::join!(self.supervisor.run(&self.cancel, session), backfill);

        tracing::info!(stats = ?self.stats.snapshot(), "All background services have shut down.");
        Ok(())
    }
}
