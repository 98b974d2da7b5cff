use crate::{
    error::{Result, SnifferError},
    events::SubscriptionAction,
    retry::{Backoff, RetryPolicy},
};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentLevel;
use std::time::Duration;
use url::Url;

/// The top-level configuration for the `solsniffer-connector` library.
///
/// This struct aggregates the Solana endpoints, the monitored wallets and mints,
/// backfill tuning and retry presets. It is typically deserialized from a
/// configuration file and handed to the `SnifferService` at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    #[serde(default)]
    pub solana: Solana,
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default)]
    pub backfill: Backfill,
    #[serde(default)]
    pub retry: RetryPresets,
}

/// Defines the connection settings for the Solana cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Solana {
    pub rpc_url: String,
    pub ws: WebSocketEndpoint,
    #[serde(with = "serde_commitment")]
    pub commitment: CommitmentLevel,
    /// How long a subscribe/unsubscribe exchange may take.
    pub request_timeout_secs: u64,
}

/// The streaming endpoint, split the way operators usually configure it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WebSocketEndpoint {
    pub scheme: String,
    pub host: String,
    pub path: String,
}

/// Which stream the live worker subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionKind {
    #[default]
    Logs,
    Program,
}

/// What to watch and how often to check the live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Monitor {
    /// Destination wallets whose incoming transfers are recorded.
    pub wallets: Vec<String>,
    /// Token mints of interest. Native SOL is always included.
    pub tokens: Vec<String>,
    pub subscription: SubscriptionKind,
    /// The interval in seconds between liveness checks of the streaming connection.
    pub health_check_interval_secs: u64,
}

/// How backfill advances the durable checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointMode {
    /// Only the highest contiguously completed height is written.
    #[default]
    Contiguous,
    /// Every completed block writes its own height.
    PerBlock,
}

/// Defines behavior for the historical backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Backfill {
    pub run_on_startup: bool,
    /// Number of consecutive blocks grouped into one unit of work.
    pub chunk_size: u64,
    /// Upper bound on in-flight block fetches across the whole run.
    pub max_concurrency: usize,
    pub checkpoint_mode: CheckpointMode,
    /// Upper bound on how many heights below the head one run scans.
    /// A fresh store starts at `head - max-lookback` instead of height 1.
    pub max_lookback: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelayType {
    #[default]
    Fixed,
    /// `attempt * delay`.
    Linear,
    /// `delay * 2^(attempt - 1)`, capped at `max-delay-ms`.
    Exponential,
}

/// A retry policy as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay_ms: u64,
    #[serde(default)]
    pub delay_type: DelayType,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// The named retry policies used across the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPresets {
    pub database: RetrySettings,
    pub websocket: RetrySettings,
    pub backfill_block: RetrySettings,
    pub coordinator_start: RetrySettings,
    pub transaction_lookup: RetrySettings,
}

impl Solana {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WebSocketEndpoint {
    /// Joins scheme, host and path into the dialable URL.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{}://{}", self.scheme, self.host)).map_err(|e| {
            SnifferError::Config(format!(
                "invalid websocket endpoint '{}://{}': {}",
                self.scheme, self.host, e
            ))
        })?;
        url.set_path(&self.path);
        Ok(url)
    }
}

impl SubscriptionKind {
    pub fn subscribe_action(self) -> SubscriptionAction {
        match self {
            SubscriptionKind::Logs => SubscriptionAction::LogsSubscribe,
            SubscriptionKind::Program => SubscriptionAction::ProgramSubscribe,
        }
    }
}

impl Monitor {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl RetrySettings {
    pub fn new(attempts: u32, delay_ms: u64, delay_type: DelayType) -> Self {
        Self {
            attempts,
            delay_ms,
            delay_type,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let backoff = match self.delay_type {
            DelayType::Fixed => Backoff::Fixed,
            DelayType::Linear => Backoff::Linear(delay),
            DelayType::Exponential => Backoff::Exponential {
                max: Duration::from_millis(self.max_delay_ms),
            },
        };
        RetryPolicy::new(self.attempts, delay, backoff)
    }
}

impl ConnectorConfig {
    /// Checks the settings that have no usable default.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SnifferError::Config(msg.to_string()));

        if self.solana.rpc_url.trim().is_empty() {
            return invalid("solana.rpc-url must not be empty");
        }
        let ws = &self.solana.ws;
        if ws.scheme.trim().is_empty() || ws.host.trim().is_empty() || ws.path.trim().is_empty() {
            return invalid("solana.ws scheme, host and path must all be set");
        }
        ws.url()?;
        if self.monitor.wallets.iter().all(|w| w.trim().is_empty()) {
            return invalid("monitor.wallets must list at least one wallet");
        }
        if self.monitor.tokens.iter().all(|t| t.trim().is_empty()) {
            return invalid("monitor.tokens must list at least one token mint");
        }
        if self.monitor.health_check_interval_secs == 0 {
            return invalid("monitor.health-check-interval-secs must be positive");
        }
        if self.backfill.chunk_size == 0 {
            return invalid("backfill.chunk-size must be positive");
        }
        if self.backfill.max_concurrency == 0 {
            return invalid("backfill.max-concurrency must be positive");
        }
        if self.backfill.max_lookback == Some(0) {
            return invalid("backfill.max-lookback must be positive when set");
        }
        Ok(())
    }
}

impl Default for Solana {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            ws: WebSocketEndpoint::default(),
            commitment: CommitmentLevel::Confirmed,
            request_timeout_secs: 10,
        }
    }
}

impl Default for WebSocketEndpoint {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "127.0.0.1:8900".to_string(),
            path: "/".to_string(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            tokens: Vec::new(),
            subscription: SubscriptionKind::Logs,
            health_check_interval_secs: 30,
        }
    }
}

impl Default for Backfill {
    fn default() -> Self {
        Self {
            run_on_startup: true,
            chunk_size: 10,
            max_concurrency: 5,
            checkpoint_mode: CheckpointMode::Contiguous,
            max_lookback: Some(10_000),
        }
    }
}

impl Default for RetryPresets {
    fn default() -> Self {
        Self {
            database: RetrySettings::new(3, 2_000, DelayType::Linear),
            websocket: RetrySettings::new(10, 500, DelayType::Linear),
            backfill_block: RetrySettings::new(3, 2_000, DelayType::Exponential),
            coordinator_start: RetrySettings::new(3, 2_000, DelayType::Exponential),
            transaction_lookup: RetrySettings::new(3, 500, DelayType::Linear),
        }
    }
}

fn default_max_delay_ms() -> u64 {
    30_000
}

mod serde_commitment {

    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(c: &CommitmentLevel, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = match c {
            CommitmentLevel::Processed => "processed",
            CommitmentLevel::Confirmed => "confirmed",
            CommitmentLevel::Finalized => "finalized",
        };
        serializer.serialize_str(s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<CommitmentLevel, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "processed" => Ok(CommitmentLevel::Processed),
            "confirmed" => Ok(CommitmentLevel::Confirmed),
            "finalized" => Ok(CommitmentLevel::Finalized),
            other => Err(serde::de::Error::custom(format!(
                "unknown commitment level '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ConnectorConfig {
        let mut config = ConnectorConfig::default();
        config.monitor.wallets = vec!["Wallet".to_string()];
        config.monitor.tokens = vec!["Mint".to_string()];
        config
    }

    #[test]
    fn default_retry_settings_match_named_policies() {
        let presets = RetryPresets::default();
        let pairs = [
            (presets.database.to_policy(), RetryPolicy::database()),
            (presets.websocket.to_policy(), RetryPolicy::websocket()),
            (presets.backfill_block.to_policy(), RetryPolicy::backfill_block()),
            (presets.coordinator_start.to_policy(), RetryPolicy::coordinator_start()),
            (presets.transaction_lookup.to_policy(), RetryPolicy::transaction_lookup()),
        ];
        for (configured, named) in pairs {
            assert_eq!(configured.max_attempts, named.max_attempts);
            for attempt in 1..=4 {
                assert_eq!(configured.delay_for(attempt), named.delay_for(attempt));
            }
        }
    }

    #[test]
    fn websocket_url_is_assembled() {
        let endpoint = WebSocketEndpoint {
            scheme: "wss".into(),
            host: "api.mainnet-beta.solana.com".into(),
            path: "/ws".into(),
        };
        assert_eq!(endpoint.url().unwrap().as_str(), "wss://api.mainnet-beta.solana.com/ws");
    }

    #[test]
    fn validation_rules() {
        assert!(valid().validate().is_ok());
        assert!(ConnectorConfig::default().validate().is_err());

        let mut no_tokens = valid();
        no_tokens.monitor.tokens.clear();
        assert!(no_tokens.validate().is_err());

        let mut zero_chunk = valid();
        zero_chunk.backfill.chunk_size = 0;
        assert!(zero_chunk.validate().is_err());

        let mut zero_lookback = valid();
        zero_lookback.backfill.max_lookback = Some(0);
        assert!(zero_lookback.validate().is_err());

        let mut no_path = valid();
        no_path.solana.ws.path = String::new();
        assert!(no_path.validate().is_err());
    }

    #[test]
    fn deserializes_kebab_case_with_defaults() {
        let json = serde_json::json!({
            "solana": { "commitment": "Finalized", "ws": { "host": "node:8900" } },
            "monitor": { "wallets": ["W"], "tokens": ["T"], "subscription": "program" },
            "backfill": { "checkpoint-mode": "per-block", "chunk-size": 2 },
            "retry": { "database": { "attempts": 5, "delay-ms": 100 } }
        });
        let config: ConnectorConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.solana.commitment, CommitmentLevel::Finalized);
        assert_eq!(config.solana.ws.scheme, "ws");
        assert_eq!(config.solana.ws.host, "node:8900");
        assert_eq!(config.monitor.subscription.subscribe_action(), SubscriptionAction::ProgramSubscribe);
        assert_eq!(config.backfill.checkpoint_mode, CheckpointMode::PerBlock);
        assert_eq!(config.backfill.chunk_size, 2);
        assert_eq!(config.backfill.max_concurrency, 5);
        assert_eq!(config.retry.database.delay_type, DelayType::Fixed);
        assert_eq!(config.retry.websocket.attempts, 10);
    }
}
