use crate::{
    error::{Result, SnifferError},
    events::{parse_notification_signature, SubscriptionAction},
    retry::{retry_notify, RetryPolicy},
    subscription::SubscriptionClient,
    telemetry::PipelineEvent,
    workers::WorkerContext,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Owns one [`SubscriptionClient`] and routes its notifications into the sink.
pub struct MonitorCoordinator {
    ctx: WorkerContext,
    client: Arc<SubscriptionClient>,
    action: SubscriptionAction,
    lookup_policy: RetryPolicy,
    loop_token: Mutex<Option<CancellationToken>>,
    lost: Notify,
}

impl MonitorCoordinator {
    pub fn new(ctx: WorkerContext, client: Arc<SubscriptionClient>) -> Self {
        let action = ctx.config.monitor.subscription.subscribe_action();
        let lookup_policy = ctx.config.retry.transaction_lookup.to_policy();
        Self {
            ctx,
            client,
            action,
            lookup_policy,
            loop_token: Mutex::new(None),
            lost: Notify::new(),
        }
    }

    pub fn client(&self) -> &Arc<SubscriptionClient> {
        &self.client
    }

    /// Subscribes once and spawns the read loop, governed by a child of `cancel`.
    ///
    /// A failed subscribe is returned immediately; retrying is up to the caller.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Result<JoinHandle<()>> {
        self.client.subscribe(cancel, self.action).await?;

        let token = cancel.child_token();
        *self.loop_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.read_loop(token).await }))
    }

    /// Cancels the read loop, then unsubscribes and closes the connection.
    ///
    /// Both steps run even if the first fails; the first failure is returned.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(token) = self
            .loop_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }

        let unsubscribed = self.client.unsubscribe(cancel, self.action.counterpart()).await;
        let closed = self.client.close().await;

        match (unsubscribed, closed) {
            (Err(primary), Err(secondary)) => {
                tracing::warn!("Close failed after unsubscribe failure: {}", secondary);
                Err(primary)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// Resolves once the read loop has observed a transport loss.
    pub async fn connection_lost(&self) {
        self.lost.notified().await
    }

    async fn read_loop(&self, cancel: CancellationToken) {
        tracing::info!(endpoint = %self.client.endpoint(), "Live worker listening for transactions...");

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = self.client.read_message() => frame,
            };

            match frame {
                Ok(bytes) => {
                    self.ctx.recorder.record(PipelineEvent::MessageReceived);
                    match self.handle_message(&cancel, &bytes).await {
                        Ok(_) => {}
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => {
                            self.ctx.recorder.record(PipelineEvent::MessageRejected);
                            tracing::error!("Error handling live message: {}", e);
                        }
                    }
                }
                Err(e) => {
                    self.ctx.recorder.record(PipelineEvent::ConnectionLost);
                    tracing::warn!("Live stream lost, waiting for the supervisor: {}", e);
                    self.lost.notify_one();
                    cancel.cancelled().await;
                    break;
                }
            }
        }

        let unsubscribe = self
            .client
            .unsubscribe(&CancellationToken::new(), self.action.counterpart())
            .await;
        if let Err(e) = unsubscribe {
            tracing::debug!("Best-effort unsubscribe failed: {}", e);
        }
        tracing::info!("Live worker: shutdown signal received, exiting.");
    }

    /// Resolves the referenced signature and ingests the transaction.
    async fn handle_message(&self, cancel: &CancellationToken, bytes: &[u8]) -> Result<usize> {
        let Some(signature) = parse_notification_signature(bytes)? else {
            tracing::trace!("Ignoring non-notification frame");
            return Ok(0);
        };

        let chain = &self.ctx.chain;
        let sig = signature.as_str();
        let raw = retry_notify(
            cancel,
            &self.lookup_policy,
            move || async move {
                chain.get_transaction_by_signature(sig).await?.ok_or_else(|| {
                    SnifferError::UpstreamUnavailable(format!("transaction {} not available yet", sig))
                })
            },
            |attempt, e| tracing::debug!(signature = %sig, attempt, "Transaction lookup failed: {}", e),
        )
        .await?;
        self.ctx.recorder.record(PipelineEvent::TransactionResolved);

        let saved = self.ctx.ingest(&raw).await?;
        tracing::debug!(signature = %signature, saved, "[LIVE] transaction processed");
        Ok(saved)
    }
}
