use crate::{
    config::CheckpointMode,
    error::Result,
    retry::{retry_notify, RetryPolicy},
    storage::CheckpointStore,
    telemetry::PipelineEvent,
    workers::WorkerContext,
};
use futures::{future::join_all, stream, StreamExt};
use std::{collections::BTreeSet, ops::RangeInclusive};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// The outcome of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// First height scanned, or `None` when the checkpoint was already at the head.
    pub from: Option<u64>,
    pub to: u64,
    pub blocks_processed: u64,
    /// Heights whose fetch failed after every retry, ascending.
    pub failed_blocks: Vec<u64>,
    /// Heights left unprocessed because the run was cancelled.
    pub skipped_blocks: u64,
    pub transactions_saved: u64,
    /// The checkpoint stored when the run finished.
    pub checkpoint: u64,
}

enum BlockOutcome {
    Processed { saved: usize },
    Failed(u64),
    Skipped,
}

/// Replays historical blocks between the stored checkpoint and the chain head.
///
/// The range is split into chunks of `backfill.chunk-size` consecutive heights and
/// chunks are scheduled lazily: at most `backfill.max-concurrency` chunks are live at
/// once, and a single semaphore caps block fetches in flight at the same number.
/// Memory therefore depends on the tuning, not on the length of the range.
pub struct BackfillEngine {
    ctx: WorkerContext,
    block_policy: RetryPolicy,
}

impl BackfillEngine {
    pub fn new(ctx: WorkerContext) -> Self {
        let block_policy = ctx.config.retry.backfill_block.to_policy();
        Self { ctx, block_policy }
    }

    /// Processes every block in `(checkpoint, head]`, bounded by `backfill.max-lookback`.
    ///
    /// Reading the head or the checkpoint is not retried here; those errors propagate.
    /// A block that cannot be fetched is logged and reported, never fatal.
    pub async fn backfill_missed_blocks(&self, cancel: &CancellationToken) -> Result<BackfillReport> {
        let head = self.ctx.chain.get_chain_height().await?;
        let checkpoint = self.ctx.checkpoints.get_checkpoint().await?;

        if checkpoint >= head {
            tracing::info!(checkpoint, head, "Backfill not needed, checkpoint is at the chain head.");
            return Ok(BackfillReport {
                to: head,
                checkpoint,
                ..BackfillReport::default()
            });
        }

        let settings = &self.ctx.config.backfill;
        let from = scan_start(checkpoint, head, settings.max_lookback);
        if from > checkpoint + 1 {
            tracing::warn!(
                checkpoint,
                head,
                from,
                ignored = from - checkpoint - 1,
                "Checkpoint is older than the lookback window; earlier blocks are not scanned."
            );
        }
        let window = settings.max_concurrency.max(1);
        tracing::info!(from, to = head, chunk_size = settings.chunk_size, window, "Starting backfill");

        let semaphore = Semaphore::new(window);
        let tracker = CheckpointTracker::new(settings.checkpoint_mode, from - 1);

        let mut chunks = stream::iter(
            chunk_ranges(from, head, settings.chunk_size).take_while(|_| !cancel.is_cancelled()),
        )
        .map(|range| self.process_chunk(range, &semaphore, &tracker, cancel))
        .buffered(window);

        let mut report = BackfillReport {
            from: Some(from),
            to: head,
            ..BackfillReport::default()
        };
        while let Some(outcomes) = chunks.next().await {
            for outcome in outcomes {
                match outcome {
                    BlockOutcome::Processed { saved } => {
                        report.blocks_processed += 1;
                        report.transactions_saved += saved as u64;
                    }
                    BlockOutcome::Failed(height) => report.failed_blocks.push(height),
                    BlockOutcome::Skipped => {}
                }
            }
        }
        drop(chunks);

        let total = head - from + 1;
        report.skipped_blocks = total - report.blocks_processed - report.failed_blocks.len() as u64;
        report.failed_blocks.sort_unstable();
        report.checkpoint = match self.ctx.checkpoints.get_checkpoint().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Could not re-read the checkpoint after backfill: {}", e);
                tracker.watermark().await.max(checkpoint)
            }
        };

        if report.checkpoint < head {
            tracing::warn!(
                checkpoint = report.checkpoint,
                head,
                failed = report.failed_blocks.len(),
                skipped = report.skipped_blocks,
                "Backfill finished below the chain head; remaining blocks are revisited on the next run."
            );
        } else {
            tracing::info!(checkpoint = report.checkpoint, saved = report.transactions_saved, "Backfill complete");
        }
        Ok(report)
    }

    async fn process_chunk(
        &self,
        range: RangeInclusive<u64>,
        semaphore: &Semaphore,
        tracker: &CheckpointTracker,
        cancel: &CancellationToken,
    ) -> Vec<BlockOutcome> {
        tracing::debug!(start = range.start(), end = range.end(), "Processing backfill chunk");
        join_all(range.map(|height| self.process_block(height, semaphore, tracker, cancel))).await
    }

    async fn process_block(
        &self,
        height: u64,
        semaphore: &Semaphore,
        tracker: &CheckpointTracker,
        cancel: &CancellationToken,
    ) -> BlockOutcome {
        if cancel.is_cancelled() {
            return BlockOutcome::Skipped;
        }

        let fetched = {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return BlockOutcome::Skipped,
                permit = semaphore.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return BlockOutcome::Skipped,
                },
            };
            let chain = &self.ctx.chain;
            let fetch = retry_notify(
                cancel,
                &self.block_policy,
                move || async move { chain.get_block(height).await },
                |attempt, e| tracing::warn!(height, attempt, "Failed to fetch block: {}", e),
            );
            tokio::select! {
                _ = cancel.cancelled() => return BlockOutcome::Skipped,
                fetched = fetch => fetched,
            }
        };

        let block = match fetched {
            Ok(block) => block,
            Err(e) if e.is_cancelled() => return BlockOutcome::Skipped,
            Err(e) => {
                self.ctx.recorder.record(PipelineEvent::BlockFailed { height });
                tracing::error!(height, "Giving up on block: {}", e);
                tracker.fail(height).await;
                return BlockOutcome::Failed(height);
            }
        };

        let mut saved = 0;
        for raw in &block.transactions {
            match self.ctx.ingest(raw).await {
                Ok(count) => saved += count,
                Err(e) => tracing::warn!(height, "Skipping transaction: {}", e),
            }
        }
        self.ctx.recorder.record(PipelineEvent::BlockProcessed { height });
        tracing::debug!(height, transactions = block.transactions.len(), saved, "Processed block");

        match tracker.complete(height, self.ctx.checkpoints.as_ref()).await {
            Ok(Some(advanced)) => {
                self.ctx.recorder.record(PipelineEvent::CheckpointAdvanced { height: advanced })
            }
            Ok(None) => {}
            Err(e) => tracing::error!(height, "Failed to advance checkpoint: {}", e),
        }

        BlockOutcome::Processed { saved }
    }
}

/// First height to scan: right after the checkpoint, but no deeper than `max_lookback` below `head`.
fn scan_start(checkpoint: u64, head: u64, max_lookback: Option<u64>) -> u64 {
    let next = checkpoint + 1;
    match max_lookback {
        Some(depth) if depth > 0 => next.max(head.saturating_sub(depth - 1)).max(1),
        _ => next,
    }
}

/// Splits `[from, to]` into consecutive ranges of at most `size` heights.
///
/// Ranges are produced on demand.
pub fn chunk_ranges(from: u64, to: u64, size: u64) -> ChunkRanges {
    ChunkRanges {
        next: (from <= to).then_some(from),
        to,
        size: size.max(1),
    }
}

/// Iterator returned by [`chunk_ranges`].
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    next: Option<u64>,
    to: u64,
    size: u64,
}

impl Iterator for ChunkRanges {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let end = start.saturating_add(self.size - 1).min(self.to);
        self.next = end.checked_add(1).filter(|n| *n <= self.to);
        Some(start..=end)
    }
}

/// Serializes checkpoint writes for a run.
///
/// In contiguous mode only the highest height below which every block has completed
/// is written, so a failed block keeps the checkpoint beneath it. Once a block has
/// failed, completions above it are no longer tracked.
struct CheckpointTracker {
    mode: CheckpointMode,
    state: Mutex<TrackerState>,
}

struct TrackerState {
    watermark: u64,
    completed: BTreeSet<u64>,
    stalled_at: Option<u64>,
}

impl CheckpointTracker {
    fn new(mode: CheckpointMode, start: u64) -> Self {
        Self {
            mode,
            state: Mutex::new(TrackerState {
                watermark: start,
                completed: BTreeSet::new(),
                stalled_at: None,
            }),
        }
    }

    async fn watermark(&self) -> u64 {
        self.state.lock().await.watermark
    }

    /// Records a block that will not complete in this run.
    async fn fail(&self, height: u64) {
        if self.mode != CheckpointMode::Contiguous {
            return;
        }
        let mut state = self.state.lock().await;
        let stalled = state.stalled_at.map_or(height, |s| s.min(height));
        state.stalled_at = Some(stalled);
        drop(state.completed.split_off(&stalled));
    }

    /// Marks `height` done and writes the checkpoint if it moved. Returns the written value.
    async fn complete(&self, height: u64, store: &dyn CheckpointStore) -> Result<Option<u64>> {
        let mut state = self.state.lock().await;

        let target = match self.mode {
            CheckpointMode::PerBlock => height,
            CheckpointMode::Contiguous => {
                if state.stalled_at.is_some_and(|stalled| height > stalled) {
                    return Ok(None);
                }
                state.completed.insert(height);
                let mut next = state.watermark;
                while state.completed.contains(&(next + 1)) {
                    next += 1;
                }
                if next == state.watermark {
                    return Ok(None);
                }
                next
            }
        };

        store.set_checkpoint(target).await?;

        if self.mode == CheckpointMode::Contiguous {
            state.completed = state.completed.split_off(&(target + 1));
        }
        state.watermark = state.watermark.max(target);
        Ok(Some(target))
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.state.lock().await.completed.len()
    }
}
