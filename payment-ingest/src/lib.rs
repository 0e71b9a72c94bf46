//! CallMeter Payment Ingestion
//!
//! Converts external payment events into ledger entries exactly once.
//!
//! # Architecture
//!
//! - **Verify-then-apply**: slow external I/O (chain RPC, processor lookups)
//!   always happens before the money-moving ledger write
//! - **Two idempotency layers**: per-business-action ledger refs, plus a
//!   global per-delivery event guard consumed only after commit
//! - **Closed event union**: processor events are a tagged enum with an
//!   explicit ignore arm for anything unrecognized
//! - **Ack-always**: authenticated deliveries are acknowledged even when
//!   internal processing fails, keeping them retryable

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod chain;
pub mod config;
pub mod error;
pub mod processor;
pub mod types;
pub mod webhook;

// Re-exports
pub use chain::{ChainRpc, StablecoinClaims};
pub use config::{ChainConfig, IngestConfig};
pub use error::{Error, Result};
pub use processor::ProcessorIngestor;
pub use types::{
    Ack, ChainClaim, ClaimOutcome, DisputeOutcome, ProcessorEvent, TokenTransfer, TxReceipt,
    WebhookEnvelope,
};
pub use webhook::{SignatureVerifier, WebhookIngestor};
