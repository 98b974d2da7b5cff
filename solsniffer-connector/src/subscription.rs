//! A single subscription over one streaming connection.
//!
//! The client performs the subscribe/unsubscribe handshakes, checks liveness and
//! hands raw frames to its caller. It never reconnects on its own: recovery is the
//! job of the supervisor that owns it.

use crate::{
    error::{Result, SnifferError},
    events::{RpcFrame, RpcRequest, SubscriptionAction, SubscriptionId},
    transport::{Dialer, FrameSink, FrameStream},
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Upper bound for a liveness ping.
pub const PING_DEADLINE: Duration = Duration::from_secs(1);

/// Lifecycle of the connection owned by a [`SubscriptionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    /// Connected, with no subscription in place.
    Connecting,
    Subscribed,
    /// At least one frame has been received on the subscription.
    Active,
    Closing,
    Closed,
}

impl SubscriptionState {
    pub fn can_transition_to(self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Subscribed)
                | (Subscribed, Active)
                | (Subscribed | Active, Connecting)
                | (Disconnected | Connecting | Subscribed | Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Whether a subscription id may be held in this state.
    pub fn holds_subscription(self) -> bool {
        matches!(self, SubscriptionState::Subscribed | SubscriptionState::Active)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct Session {
    state: SubscriptionState,
    subscription: Option<SubscriptionId>,
}

impl Session {
    fn transition(&mut self, next: SubscriptionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "Ignoring invalid subscription state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Subscription state changed");
        self.state = next;
        if !next.holds_subscription() {
            self.subscription = None;
        }
    }
}

pub struct SubscriptionClient {
    dialer: Arc<dyn Dialer>,
    request_timeout: Duration,
    writer: Mutex<Option<Box<dyn FrameSink>>>,
    reader: Mutex<Option<Box<dyn FrameStream>>>,
    session: StdMutex<Session>,
    next_request_id: AtomicU64,
    lost: AtomicBool,
}

impl SubscriptionClient {
    /// Creates a disconnected client. Call [`connect`](Self::connect) before subscribing.
    pub fn new(dialer: Arc<dyn Dialer>, request_timeout: Duration) -> Self {
        Self {
            dialer,
            request_timeout,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            session: StdMutex::new(Session {
                state: SubscriptionState::Disconnected,
                subscription: None,
            }),
            next_request_id: AtomicU64::new(1),
            lost: AtomicBool::new(false),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SubscriptionState {
        self.session().state
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.session().subscription.clone()
    }

    pub fn endpoint(&self) -> String {
        self.dialer.endpoint()
    }

    /// Dials the endpoint. On success the client is `Connecting` and awaits a subscribe.
    pub async fn connect(&self) -> Result<()> {
        let state = self.state();
        if state != SubscriptionState::Disconnected {
            return Err(SnifferError::Protocol(format!(
                "cannot connect a client in state {}",
                state
            )));
        }

        let (sink, stream) = self.dialer.dial().await?;
        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(stream);
        self.lost.store(false, Ordering::SeqCst);
        self.session().transition(SubscriptionState::Connecting);

        tracing::info!(endpoint = %self.dialer.endpoint(), "Connected to streaming endpoint");
        Ok(())
    }

    /// Sends a subscribe request and waits for its correlated response.
    pub async fn subscribe(
        &self,
        cancel: &CancellationToken,
        action: SubscriptionAction,
    ) -> Result<SubscriptionId> {
        if !action.is_subscribe() {
            return Err(SnifferError::Protocol(format!("{} is not a subscribe method", action)));
        }
        let state = self.state();
        if state != SubscriptionState::Connecting {
            return Err(SnifferError::Protocol(format!(
                "cannot subscribe in state {}",
                state
            )));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&RpcRequest::subscribe(request_id, action))?;

        let exchange = async {
            self.write(payload).await?;
            self.await_response(request_id).await
        };
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SnifferError::Cancelled),
            outcome = tokio::time::timeout(self.request_timeout, exchange) => outcome.map_err(|_| {
                SnifferError::Protocol(format!(
                    "no response to {} (request {}) within {:?}",
                    action, request_id, self.request_timeout
                ))
            })??,
        };

        let subscription = response.subscription_id()?;
        {
            let mut session = self.session();
            session.transition(SubscriptionState::Subscribed);
            session.subscription = Some(subscription.clone());
        }

        tracing::info!(%action, subscription = %subscription, "Subscribed");
        Ok(subscription)
    }

    /// Cancels the stored subscription. A no-op when nothing is subscribed.
    ///
    /// The stored id is released as soon as the request is attempted.
    pub async fn unsubscribe(&self, cancel: &CancellationToken, action: SubscriptionAction) -> Result<()> {
        if !action.is_unsubscribe() {
            return Err(SnifferError::Protocol(format!("{} is not an unsubscribe method", action)));
        }
        let subscription = {
            let mut session = self.session();
            let subscription = session.subscription.take();
            if session.state.holds_subscription() {
                session.transition(SubscriptionState::Connecting);
            }
            subscription
        };
        let Some(subscription) = subscription else {
            tracing::debug!(%action, "No active subscription, skipping unsubscribe");
            return Ok(());
        };

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&RpcRequest::unsubscribe(request_id, action, &subscription))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(SnifferError::Cancelled),
            outcome = tokio::time::timeout(self.request_timeout, self.write(payload)) => {
                outcome.map_err(|_| SnifferError::Protocol(format!("{} timed out", action)))??;
                tracing::info!(%action, subscription = %subscription, "Unsubscribed");
                Ok(())
            }
        }
    }

    /// Blocks until the next data frame arrives.
    pub async fn read_message(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader.lock().await;
        let stream = reader
            .as_mut()
            .ok_or_else(|| SnifferError::ConnectionLost("not connected".to_string()))?;

        match stream.next_frame().await {
            Ok(frame) => {
                let mut session = self.session();
                if session.state == SubscriptionState::Subscribed {
                    session.transition(SubscriptionState::Active);
                }
                Ok(frame)
            }
            Err(e) => {
                self.mark_lost();
                Err(e)
            }
        }
    }

    /// Checks the connection with a ping bounded by [`PING_DEADLINE`].
    pub async fn is_connected(&self) -> bool {
        if self.lost.load(Ordering::SeqCst) {
            return false;
        }
        if matches!(
            self.state(),
            SubscriptionState::Disconnected | SubscriptionState::Closing | SubscriptionState::Closed
        ) {
            return false;
        }

        let ping = async {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink.ping().await.is_ok(),
                None => false,
            }
        };
        tokio::time::timeout(PING_DEADLINE, ping)
            .await
            .unwrap_or(false)
    }

    /// Closes the connection. Safe to call repeatedly or after the transport died.
    pub async fn close(&self) -> Result<()> {
        if self.state() == SubscriptionState::Closed {
            return Ok(());
        }
        self.session().transition(SubscriptionState::Closing);

        let sink = self.writer.lock().await.take();
        let outcome = match sink {
            Some(mut sink) => match tokio::time::timeout(self.request_timeout, sink.close()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) | Err(_) if self.lost.load(Ordering::SeqCst) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(SnifferError::ConnectionLost("close handshake timed out".to_string())),
            },
            None => Ok(()),
        };
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        self.lost.store(true, Ordering::SeqCst);
        self.session().transition(SubscriptionState::Closed);
        tracing::info!(endpoint = %self.dialer.endpoint(), "Streaming connection closed");
        outcome
    }

    async fn write(&self, payload: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| SnifferError::ConnectionLost("not connected".to_string()))?;
        match sink.send_text(payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_lost();
                Err(e)
            }
        }
    }

    async fn await_response(&self, request_id: u64) -> Result<RpcFrame> {
        let mut reader = self.reader.lock().await;
        let stream = reader
            .as_mut()
            .ok_or_else(|| SnifferError::ConnectionLost("not connected".to_string()))?;

        loop {
            let bytes = match stream.next_frame().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.mark_lost();
                    return Err(e);
                }
            };
            let frame = RpcFrame::parse(&bytes).map_err(|e| SnifferError::Protocol(e.to_string()))?;
            if frame.is_notification() {
                tracing::trace!("Skipping notification while awaiting response {}", request_id);
                continue;
            }
            return match frame.id {
                Some(id) if id == request_id => Ok(frame),
                other => Err(SnifferError::Protocol(format!(
                    "response id {:?} does not match request {}",
                    other, request_id
                ))),
            };
        }
    }

    fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        let mut session = self.session();
        if session.state.holds_subscription() {
            session.transition(SubscriptionState::Connecting);
        }
    }
}

impl fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("endpoint", &self.dialer.endpoint())
            .field("state", &self.state())
            .finish()
    }
}
