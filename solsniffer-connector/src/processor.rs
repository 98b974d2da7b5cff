//! Filters raw transactions against the monitored wallets and mints and
//! normalizes matching balance entries into [`CanonicalTransaction`] records.

use crate::{
    error::{Result, SnifferError},
    models::{CanonicalTransaction, MonitoredSet, RawTransaction, TokenBalance},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Stateless apart from the read-only [`MonitoredSet`]; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct TransactionProcessor {
    monitored: Arc<MonitoredSet>,
}

impl TransactionProcessor {
    pub fn new(monitored: Arc<MonitoredSet>) -> Self {
        Self { monitored }
    }

    pub fn monitored(&self) -> &MonitoredSet {
        &self.monitored
    }

    /// Returns one record per balance entry that passes both the token and the
    /// destination-wallet filter.
    ///
    /// The first signature (hex) is the hash, the first account the source and the
    /// second account the destination. Entries with unparseable amounts are skipped.
    pub fn process(&self, raw: &RawTransaction) -> Result<Vec<CanonicalTransaction>> {
        let first_signature = raw.signatures.first().ok_or_else(|| {
            SnifferError::MalformedTransaction("transaction has no signatures".to_string())
        })?;
        let (source, destination) = match raw.accounts.as_slice() {
            [source, destination, ..] => (source, destination),
            accounts => {
                return Err(SnifferError::MalformedTransaction(format!(
                    "expected at least 2 accounts, found {}",
                    accounts.len()
                )))
            }
        };

        if raw.token_balances.is_empty() {
            return Ok(Vec::new());
        }

        let hash = hex::encode(first_signature);
        let observed_at = Utc::now();
        let destination_watched = self.monitored.watches_wallet(destination);

        let matches = raw
            .token_balances
            .iter()
            .filter_map(|balance| {
                let amount = match normalize_amount(balance) {
                    Ok(amount) => amount,
                    Err(e) => {
                        tracing::warn!(hash = %hash, mint = %balance.mint, "Skipping balance entry: {}", e);
                        return None;
                    }
                };
                if !destination_watched || !self.monitored.watches_token(&balance.mint) {
                    return None;
                }
                Some(CanonicalTransaction {
                    hash: hash.clone(),
                    source: source.clone(),
                    destination: destination.clone(),
                    amount,
                    token_mint: balance.mint.clone(),
                    observed_at,
                })
            })
            .collect();

        Ok(matches)
    }
}

/// Converts a raw integer amount into an exact decimal with `decimals` fractional digits.
pub fn normalize_amount(balance: &TokenBalance) -> Result<Decimal> {
    let raw: u64 = balance.amount.trim().parse().map_err(|e| {
        SnifferError::MalformedTransaction(format!("invalid amount '{}': {}", balance.amount, e))
    })?;
    Decimal::try_from_i128_with_scale(i128::from(raw), u32::from(balance.decimals)).map_err(|e| {
        SnifferError::MalformedTransaction(format!(
            "amount '{}' with {} decimals is not representable: {}",
            balance.amount, balance.decimals, e
        ))
    })
}
