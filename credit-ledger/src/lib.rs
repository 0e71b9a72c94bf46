//! CallMeter Credit Ledger
//!
//! Append-only idempotent ledger with denormalized balances, the single
//! choke point through which every balance mutation passes.
//!
//! # Architecture
//!
//! - **Idempotency refs**: every economic effect is keyed by a globally
//!   unique ref; replays resolve to zero additional entries
//! - **Single writer**: one actor task serializes all balance mutations
//! - **Atomic batches**: an entry and the balance it moves commit together
//! - **Two balance domains**: spendable credits and creator earnings
//!
//! # Invariants
//!
//! - Credit balances never go negative; debits are bounded in-transaction
//! - At call boundaries, a balance equals the signed sum of its entries
//! - Entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod pricing;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::CreditLedger;
pub use storage::Storage;
pub use types::{
    AccountId, AccountProfile, Applied, CallClose, CallRecord, CallStatus, CreatorAccount,
    EntryKind, LedgerEntry, NewCall, NewEntry, NewPayout, PayoutMethod, PayoutRequest,
    PayoutStatus, TickOutcome,
};
