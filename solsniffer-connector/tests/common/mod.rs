#![allow(dead_code)]

use async_trait::async_trait;
use solsniffer_connector::{
    config::{ConnectorConfig, DelayType, RetrySettings},
    models::{BlockContents, RawTransaction, TokenBalance, NATIVE_SOL_MINT},
    rpc::ChainClient,
    storage::MemoryStore,
    telemetry::PipelineStats,
    transport::{Dialer, FrameSink, FrameStream},
    workers::WorkerContext,
    Result, SnifferError,
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;

pub const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// A config with the watched wallet/mint and retries fast enough for tests.
pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    config.monitor.wallets = vec![WALLET.to_string()];
    config.monitor.tokens = vec![USDC.to_string()];
    config.backfill.chunk_size = 2;
    config.backfill.max_concurrency = 2;
    config.solana.request_timeout_secs = 2;

    let fast = RetrySettings::new(2, 1, DelayType::Fixed);
    config.retry.database = fast.clone();
    config.retry.websocket = fast.clone();
    config.retry.backfill_block = fast.clone();
    config.retry.coordinator_start = fast.clone();
    config.retry.transaction_lookup = fast;
    config
}

pub fn context(
    config: ConnectorConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<MemoryStore>,
    stats: Arc<PipelineStats>,
) -> WorkerContext {
    WorkerContext::new(Arc::new(config), chain, store.clone(), store, stats)
}

/// A transfer of `amount` (raw, `decimals`) of `mint` to `destination`.
pub fn transfer(signature: &str, destination: &str, mint: &str, amount: &str, decimals: u8) -> RawTransaction {
    RawTransaction {
        signatures: vec![signature.as_bytes().to_vec()],
        accounts: vec!["Sender1111".to_string(), destination.to_string()],
        token_balances: vec![TokenBalance {
            mint: mint.to_string(),
            amount: amount.to_string(),
            decimals,
        }],
    }
}

pub fn native_transfer(signature: &str, destination: &str) -> RawTransaction {
    transfer(signature, destination, NATIVE_SOL_MINT, "1000000000", 9)
}

/// An in-memory chain: fixed head, scripted blocks and signature lookups.
#[derive(Default)]
pub struct StubChain {
    pub height: u64,
    pub blocks: HashMap<u64, Vec<RawTransaction>>,
    pub failing_blocks: HashSet<u64>,
    pub transactions: HashMap<String, RawTransaction>,
    pub fetch_delay: Duration,
    pub block_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubChain {
    pub fn at_height(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    pub fn with_block(mut self, height: u64, transactions: Vec<RawTransaction>) -> Self {
        self.blocks.insert(height, transactions);
        self
    }

    pub fn with_transaction(mut self, signature: &str, transaction: RawTransaction) -> Self {
        self.transactions.insert(signature.to_string(), transaction);
        self
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn get_chain_height(&self) -> Result<u64> {
        Ok(self.height)
    }

    async fn get_block(&self, height: u64) -> Result<BlockContents> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_blocks.contains(&height) {
            return Err(SnifferError::UpstreamUnavailable(format!("block {} unavailable", height)));
        }
        Ok(BlockContents {
            height,
            transactions: self.blocks.get(&height).cloned().unwrap_or_default(),
        })
    }

    async fn get_transaction_by_signature(&self, signature: &str) -> Result<Option<RawTransaction>> {
        Ok(self.transactions.get(signature).cloned())
    }
}

struct ChannelSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0
            .send(text)
            .map_err(|_| SnifferError::ConnectionLost("peer gone".into()))
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<Vec<u8>>);

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next_frame(&mut self) -> Result<Vec<u8>> {
        self.0
            .recv()
            .await
            .ok_or_else(|| SnifferError::ConnectionLost("stream ended".into()))
    }
}

/// The server side of one scripted connection.
pub struct ScriptedConnection {
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ScriptedConnection {
    pub fn push(&self, frame: &str) {
        self.inbound
            .send(frame.as_bytes().to_vec())
            .expect("client side dropped");
    }

    pub fn push_subscribed(&self, request_id: u64, subscription: u64) {
        self.push(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"result":{}}}"#,
            request_id, subscription
        ));
    }

    pub fn push_notification(&self, signature: &str) {
        self.push(&format!(
            r#"{{"jsonrpc":"2.0","method":"logsNotification","params":{{"result":{{"context":{{"slot":1}},"value":{{"signature":"{}","err":null,"logs":[]}}}},"subscription":1}}}}"#,
            signature
        ));
    }
}

/// Hands out pre-built connections in order; dialing past the last one fails.
pub struct ScriptedDialer {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<Vec<u8>>>>,
    outbound: mpsc::UnboundedSender<String>,
    pub dials: AtomicUsize,
}

impl ScriptedDialer {
    /// Returns the dialer, the server ends of `connections` connections, and the
    /// receiver of every request the client writes.
    pub fn new(connections: usize) -> (Arc<Self>, Vec<ScriptedConnection>, mpsc::UnboundedReceiver<String>) {
        let (outbound, requests) = mpsc::unbounded_channel();
        let mut pending = VecDeque::new();
        let mut servers = Vec::new();
        for _ in 0..connections {
            let (inbound, frames) = mpsc::unbounded_channel();
            pending.push_back(frames);
            servers.push(ScriptedConnection { inbound });
        }
        let dialer = Arc::new(Self {
            pending: Mutex::new(pending),
            outbound,
            dials: AtomicUsize::new(0),
        });
        (dialer, servers, requests)
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let frames = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SnifferError::ConnectionLost("connection refused".into()))?;
        Ok((
            Box::new(ChannelSink(self.outbound.clone())),
            Box::new(ChannelStream(frames)),
        ))
    }

    fn endpoint(&self) -> String {
        "scripted://stream".to_string()
    }
}

/// Polls `condition` every few milliseconds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
