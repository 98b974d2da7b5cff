use crate::{
    error::Result,
    retry::retry_notify,
    subscription::SubscriptionClient,
    telemetry::PipelineEvent,
    transport::Dialer,
    workers::{live::MonitorCoordinator, WorkerContext},
};
use std::sync::Arc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A started coordinator together with its read-loop task.
pub struct LiveSession {
    coordinator: Arc<MonitorCoordinator>,
    task: JoinHandle<()>,
}

impl LiveSession {
    /// Stops the coordinator and waits for its read loop to exit.
    pub async fn shutdown(self) {
        if let Err(e) = self.coordinator.stop(&CancellationToken::new()).await {
            tracing::debug!("Error while stopping live coordinator: {}", e);
        }
        if let Err(e) = self.task.await {
            tracing::error!("Live worker task failed: {}", e);
        }
    }
}

/// Keeps one live session running.
///
/// Every health-check interval, or as soon as the read loop reports a loss, the
/// connection is checked. A dead session is torn down and replaced by a freshly
/// dialed client and a new coordinator. Notifications emitted while disconnected
/// are not replayed; the next backfill pass covers that gap.
pub struct HealthSupervisor {
    ctx: WorkerContext,
    dialer: Arc<dyn Dialer>,
}

impl HealthSupervisor {
    pub fn new(ctx: WorkerContext, dialer: Arc<dyn Dialer>) -> Self {
        Self { ctx, dialer }
    }

    /// Dials a new client and starts a coordinator on it, each under its retry policy.
    pub async fn establish(&self, cancel: &CancellationToken) -> Result<LiveSession> {
        let config = &self.ctx.config;
        let dialer = &self.dialer;
        let request_timeout = config.solana.request_timeout();

        let client = retry_notify(
            cancel,
            &config.retry.websocket.to_policy(),
            move || async move {
                let client = SubscriptionClient::new(Arc::clone(dialer), request_timeout);
                client.connect().await?;
                Ok(Arc::new(client))
            },
            |attempt, e| {
                tracing::warn!(attempt, endpoint = %dialer.endpoint(), "Failed to connect to streaming endpoint: {}", e)
            },
        )
        .await?;

        let coordinator = Arc::new(MonitorCoordinator::new(self.ctx.clone(), client));
        let started = retry_notify(
            cancel,
            &config.retry.coordinator_start.to_policy(),
            || coordinator.start(cancel),
            |attempt, e| tracing::warn!(attempt, "Failed to start live coordinator: {}", e),
        )
        .await;

        match started {
            Ok(task) => Ok(LiveSession { coordinator, task }),
            Err(e) => {
                if let Err(close_err) = coordinator.client().close().await {
                    tracing::debug!("Error while closing the unstarted client: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Supervises `session` until `cancel` fires, then shuts it down.
    pub async fn run(&self, cancel: &CancellationToken, session: LiveSession) {
        let mut session = Some(session);
        let mut ticker = tokio::time::interval(self.ctx.config.monitor.health_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
                _ = wait_for_loss(&session) => {},
            }

            if let Err(e) = self.ctx.sink.ping().await {
                tracing::warn!("Transaction sink health check failed: {}", e);
            }

            if let Some(active) = &session {
                if active.coordinator.is_connected().await {
                    continue;
                }
            }

            tracing::warn!("Live connection is down, rebuilding the subscription client.");
            if let Some(stale) = session.take() {
                stale.shutdown().await;
            }

            match self.establish(cancel).await {
                Ok(fresh) => {
                    self.ctx.recorder.record(PipelineEvent::Reconnected);
                    tracing::info!("Live connection re-established.");
                    session = Some(fresh);
                }
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::error!("Failed to rebuild the live connection, retrying at the next health check: {}", e);
                }
            }
        }

        if let Some(active) = session {
            active.shutdown().await;
        }
        tracing::info!("Health supervisor has shut down.");
    }
}

async fn wait_for_loss(session: &Option<LiveSession>) {
    match session {
        Some(active) => active.coordinator.connection_lost().await,
        None => std::future::pending().await,
    }
}
