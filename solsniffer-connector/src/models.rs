use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The mint identifier standing in for native SOL transfers. It always passes the token filter.
pub const NATIVE_SOL_MINT: &str = "NativeSOL";

/// The wallets and token mints an ingestion pipeline watches. Fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct MonitoredSet {
    wallets: HashSet<String>,
    tokens: HashSet<String>,
}

impl MonitoredSet {
    /// Builds the set; the native SOL sentinel is always added to the token mints.
    pub fn new<W, T>(wallets: W, tokens: T) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let wallets = wallets.into_iter().map(Into::into).collect();
        let mut tokens: HashSet<String> = tokens.into_iter().map(Into::into).collect();
        tokens.insert(NATIVE_SOL_MINT.to_string());
        Self { wallets, tokens }
    }

    pub fn watches_wallet(&self, address: &str) -> bool {
        self.wallets.contains(address)
    }

    pub fn watches_token(&self, mint: &str) -> bool {
        mint == NATIVE_SOL_MINT || self.tokens.contains(mint)
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Number of watched mints, the sentinel included.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

/// One token-balance entry of a fetched transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub mint: String,
    /// Integer amount in the mint's smallest unit, as reported by the node.
    pub amount: String,
    pub decimals: u8,
}

/// A transaction as returned by the chain client, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransaction {
    pub signatures: Vec<Vec<u8>>,
    /// Account keys in message order (base58).
    pub accounts: Vec<String>,
    pub token_balances: Vec<TokenBalance>,
}

/// The transactions contained in one block.
#[derive(Debug, Clone, Default)]
pub struct BlockContents {
    pub height: u64,
    pub transactions: Vec<RawTransaction>,
}

/// The normalized record handed to the sink, one per matching balance entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTransaction {
    pub hash: String,
    pub source: String,
    pub destination: String,
    pub amount: Decimal,
    pub token_mint: String,
    pub observed_at: DateTime<Utc>,
}

impl CanonicalTransaction {
    /// A key identifying this record independently of when it was observed.
    pub fn dedup_key(&self) -> String {
        format!("{}::{}::{}", self.hash, self.token_mint, self.amount)
    }
}
