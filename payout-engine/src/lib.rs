//! CallMeter Payout Engine
//!
//! Creator payout eligibility and request lifecycle over the credit ledger.
//!
//! # Architecture
//!
//! - **Reservation accounting**: REQUESTED payouts reserve against
//!   `earned − paid_out` until sent
//! - **Serialized authorization**: the ledger validates each request inside
//!   one transaction, so concurrent requests cannot jointly overdraw
//! - **One-way status**: REQUESTED → SENT, transitioned only by an operator
//!   action and never reverted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accountant;
pub mod error;

// Re-exports
pub use accountant::{CreatorBalance, PayoutAccountant};
pub use error::{Error, Result};
