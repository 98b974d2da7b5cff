//! The chain-facing seam of the pipeline and its Solana RPC implementation.

use crate::{
    error::{Result, SnifferError},
    models::{BlockContents, RawTransaction, TokenBalance},
};
use async_trait::async_trait;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcBlockConfig, RpcTransactionConfig},
    rpc_request::RpcError,
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    signature::Signature,
};
use solana_transaction_status::{
    EncodedTransactionWithStatusMeta, TransactionDetails, UiTransactionEncoding,
    UiTransactionTokenBalance,
};
use std::{str::FromStr, sync::Arc};

/// `Slot was skipped, or missing due to ledger jump to recent snapshot`.
const SLOT_SKIPPED: i64 = -32007;
/// `Slot was skipped, or missing in long-term storage`.
const LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;

/// Read access to the chain, as needed by the live and backfill workers.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Returns the current chain head.
    async fn get_chain_height(&self) -> Result<u64>;

    /// Fetches every transaction of the block at `height`.
    async fn get_block(&self, height: u64) -> Result<BlockContents>;

    /// Resolves a signature. `Ok(None)` means the node does not know it (yet).
    async fn get_transaction_by_signature(&self, signature: &str) -> Result<Option<RawTransaction>>;
}

/// A [`ChainClient`] backed by the nonblocking Solana `RpcClient`.
///
/// Heights are slots. Transactions are requested base64-encoded and decoded locally,
/// with token balances taken from the status meta.
pub struct RpcChainClient {
    rpc_client: Arc<RpcClient>,
    commitment: CommitmentLevel,
}

impl RpcChainClient {
    pub fn new(rpc_client: Arc<RpcClient>, commitment: CommitmentLevel) -> Self {
        Self {
            rpc_client,
            commitment,
        }
    }

    /// Blocks are not served at `processed`; fall back to `confirmed` for them.
    fn block_commitment(&self) -> CommitmentConfig {
        match self.commitment {
            CommitmentLevel::Processed => CommitmentConfig::confirmed(),
            commitment => CommitmentConfig { commitment },
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_chain_height(&self) -> Result<u64> {
        let slot = self
            .rpc_client
            .get_slot_with_commitment(CommitmentConfig {
                commitment: self.commitment,
            })
            .await?;
        Ok(slot)
    }

    async fn get_block(&self, height: u64) -> Result<BlockContents> {
        let config = RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            transaction_details: Some(TransactionDetails::Full),
            rewards: Some(false),
            commitment: Some(self.block_commitment()),
            max_supported_transaction_version: Some(0),
        };

        let block = match self.rpc_client.get_block_with_config(height, config).await {
            Ok(block) => block,
            Err(e) if is_skipped_slot(&e) => {
                tracing::debug!(slot = height, "Slot was skipped, treating as empty block");
                return Ok(BlockContents {
                    height,
                    transactions: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let transactions = block
            .transactions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tx| {
                let raw = to_raw_transaction(tx);
                if raw.is_none() {
                    tracing::warn!(slot = height, "Skipping transaction that could not be decoded");
                }
                raw
            })
            .collect();

        Ok(BlockContents {
            height,
            transactions,
        })
    }

    async fn get_transaction_by_signature(&self, signature: &str) -> Result<Option<RawTransaction>> {
        let sig = Signature::from_str(signature).map_err(|e| {
            SnifferError::InvalidMessage(format!("invalid signature '{}': {}", signature, e))
        })?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.block_commitment()),
            max_supported_transaction_version: Some(0),
        };

        match self.rpc_client.get_transaction_with_config(&sig, config).await {
            Ok(tx) => Ok(to_raw_transaction(tx.transaction)),
            // The node answers `null` for signatures it has not seen.
            Err(e) if matches!(e.kind(), ClientErrorKind::SerdeJson(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_skipped_slot(err: &ClientError) -> bool {
    matches!(
        err.kind(),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. })
            if *code == SLOT_SKIPPED || *code == LONG_TERM_STORAGE_SLOT_SKIPPED
    )
}

fn to_raw_transaction(tx: EncodedTransactionWithStatusMeta) -> Option<RawTransaction> {
    let decoded = tx.transaction.decode()?;

    let signatures = decoded
        .signatures
        .iter()
        .map(|sig| sig.as_ref().to_vec())
        .collect();
    let accounts = decoded
        .message
        .static_account_keys()
        .iter()
        .map(ToString::to_string)
        .collect();
    let token_balances = tx
        .meta
        .and_then(|meta| Option::<Vec<UiTransactionTokenBalance>>::from(meta.pre_token_balances))
        .unwrap_or_default()
        .into_iter()
        .map(|balance| TokenBalance {
            mint: balance.mint,
            amount: balance.ui_token_amount.amount,
            decimals: balance.ui_token_amount.decimals,
        })
        .collect();

    Some(RawTransaction {
        signatures,
        accounts,
        token_balances,
    })
}
