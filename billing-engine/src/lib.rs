//! CallMeter Billing Engine
//!
//! Per-call periodic metering against prepaid credit balances.
//!
//! # Architecture
//!
//! - **One task per call**: each active call owns an independent tick task
//! - **Server-authoritative**: rate and payer come from the call record;
//!   clients cannot influence the charge
//! - **Whole seconds only**: floor-division elapsed time, fractional
//!   remainders carry to the next tick
//! - **Advisory events**: per-tick progress and end-of-call notifications on
//!   a lossy broadcast channel, with no correctness obligation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod engine;
pub mod error;
pub mod events;

// Re-exports
pub use engine::{BillingConfig, BillingEngine};
pub use error::{Error, Result};
pub use events::{BillingEvent, EventBus};
