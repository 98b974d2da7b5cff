//! A core Rust library for ingesting Solana token transfers to watched wallets.
//!
//! Transactions arrive from two sources: a live WebSocket subscription and a
//! historical block range. Both feed the same filter and the same sink, so a
//! matching transfer is recorded once whichever source sees it first.
//!
//! # Key Components
//!
//! *   [`workers::SnifferService`]: The main entry point. It runs the live worker under
//!     a health supervisor and, optionally, a startup backfill.
//! *   [`subscription::SubscriptionClient`]: One subscription over one streaming connection.
//! *   [`processor::TransactionProcessor`]: The wallet/mint filter and amount normalizer.
//! *   [`retry`]: The bounded, cancellable retry primitive shared by every component.
//! *   [`rpc::ChainClient`], [`storage::TransactionSink`], [`storage::CheckpointStore`]:
//!     The seams to the chain and to persistence.

/// Defines configuration structures for the connector.
pub mod config;
pub mod error;
/// JSON-RPC envelopes of the live stream.
pub mod events;
pub mod models;
/// Filtering and normalization of raw transactions.
pub mod processor;
pub mod retry;
/// The `ChainClient` trait and its Solana RPC implementation.
pub mod rpc;
/// Sink and checkpoint traits, plus an in-memory implementation.
pub mod storage;
pub mod subscription;
/// Event counters for the running pipeline.
pub mod telemetry;
/// The streaming transport seam and its WebSocket implementation.
pub mod transport;
/// The background workers: live coordinator, health supervisor and backfill.
pub mod workers;

pub use error::{Result, SnifferError};
