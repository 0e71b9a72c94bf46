//! Core types for the credit ledger
//!
//! All amounts are integer milli-credits (1 credit = 1000 milli-credits,
//! $1 = 60 credits). Durable types serialize deterministically with bincode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Account identifier (one account may be a payer, a creator, or both)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryKind {
    /// Credits bought (card checkout or on-chain transfer)
    Purchase = 1,
    /// Credits clawed back (processor refund or dispute)
    Refund = 2,
    /// Per-call spend audit (balance was debited tick by tick)
    Spend = 3,
    /// Creator share of a finished call
    Earning = 4,
    /// Bookkeeping marker (dispute outcome, payout fulfilment)
    Adjust = 5,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Purchase => "PURCHASE",
            EntryKind::Refund => "REFUND",
            EntryKind::Spend => "SPEND",
            EntryKind::Earning => "EARNING",
            EntryKind::Adjust => "ADJUST",
        };
        write!(f, "{}", s)
    }
}

/// Append-only ledger entry
///
/// Entries are never mutated or deleted. `idempotency_ref` is globally unique:
/// a second entry with the same ref is absorbed as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Account whose balance domain this entry moves
    pub account: AccountId,

    /// Entry kind
    pub kind: EntryKind,

    /// Signed amount in milli-credits
    pub delta_milli: i64,

    /// USD amount the entry originated from, if any
    pub usd_cents: Option<i64>,

    /// Idempotency ref tied to one real-world economic event
    pub idempotency_ref: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Input for a new ledger entry
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Target account
    pub account: AccountId,
    /// Entry kind
    pub kind: EntryKind,
    /// Signed amount in milli-credits
    pub delta_milli: i64,
    /// USD amount the entry originated from, if any
    pub usd_cents: Option<i64>,
    /// Idempotency ref (globally unique)
    pub idempotency_ref: String,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl NewEntry {
    /// Convenience constructor with empty metadata
    pub fn new(
        account: AccountId,
        kind: EntryKind,
        delta_milli: i64,
        usd_cents: Option<i64>,
        idempotency_ref: impl Into<String>,
    ) -> Self {
        Self {
            account,
            kind,
            delta_milli,
            usd_cents,
            idempotency_ref: idempotency_ref.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Result of applying an entry
#[derive(Debug, Clone, Copy)]
pub struct Applied {
    /// ID of the entry holding this ref (new or pre-existing)
    pub entry_id: Uuid,
    /// False when the ref already existed and the operation was absorbed
    pub newly_applied: bool,
    /// Credit balance after the operation
    pub balance_after: i64,
}

/// Call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallStatus {
    /// Call in progress, billing active
    Active = 1,
    /// Call ended normally (terminal)
    Ended = 2,
    /// Call killed because the payer ran out of credits (terminal)
    KilledInsufficientCredits = 3,
}

impl CallStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Active)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Active => "ACTIVE",
            CallStatus::Ended => "ENDED",
            CallStatus::KilledInsufficientCredits => "KILLED_INSUFFICIENT_CREDITS",
        };
        write!(f, "{}", s)
    }
}

/// Durable record of a billed call
///
/// Mutated only by billing operations: `seconds_billed`/`credits_spent_milli`
/// accumulate during ticks, `status`/`end_time` are set once at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call ID
    pub call_id: Uuid,
    /// Paying account
    pub payer: AccountId,
    /// Creator account receiving the earning split
    pub creator: AccountId,
    /// Fixed rate in milli-credits per elapsed second
    pub rate_milli_per_second: i64,
    /// Current status
    pub status: CallStatus,
    /// Call start time
    pub start_time: DateTime<Utc>,
    /// Call end time (set at finalization)
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds billed so far
    pub seconds_billed: u64,
    /// Total milli-credits taken from the payer, including a final partial charge
    pub credits_spent_milli: i64,
}

/// Input for a new call record
#[derive(Debug, Clone)]
pub struct NewCall {
    /// Paying account
    pub payer: AccountId,
    /// Creator account
    pub creator: AccountId,
    /// Rate in milli-credits per second
    pub rate_milli_per_second: i64,
}

/// Result of one atomic billing charge
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    /// Milli-credits actually debited this charge
    pub charged_milli: i64,
    /// Whole seconds covered by this charge
    pub seconds_billed: u64,
    /// Payer balance after the charge
    pub balance_after: i64,
    /// Cumulative seconds billed on the call
    pub call_seconds_billed: u64,
    /// Cumulative milli-credits spent on the call
    pub call_spent_milli: i64,
    /// True when the balance could not cover the requested seconds
    pub exhausted: bool,
}

/// Result of finalizing a call
#[derive(Debug, Clone)]
pub struct CallClose {
    /// The call record after finalization
    pub record: CallRecord,
    /// True when this finalization inserted the spend audit entry
    pub spend_recorded: bool,
    /// True when this finalization inserted the earning entry
    pub earning_recorded: bool,
    /// Milli-credits credited to the creator by this finalization
    pub earned_milli: i64,
}

/// Payout method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayoutMethod {
    /// On-chain stablecoin transfer to a wallet
    Crypto = 1,
    /// Card-processor connected-account transfer
    StripeLike = 2,
}

/// Payout request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayoutStatus {
    /// Requested by the creator, reserved against available balance
    Requested = 1,
    /// Sent by an operator (never reverted)
    Sent = 2,
}

/// Creator payout request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    /// Request ID
    pub request_id: Uuid,
    /// Creator account
    pub creator: AccountId,
    /// Destination (wallet address or connected-account id)
    pub destination: String,
    /// Payout method
    pub method: PayoutMethod,
    /// Amount in milli-credits
    pub amount_milli: i64,
    /// Current status
    pub status: PayoutStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Input for a new payout request
#[derive(Debug, Clone)]
pub struct NewPayout {
    /// Creator account
    pub creator: AccountId,
    /// Amount in milli-credits
    pub amount_milli: i64,
    /// Destination
    pub destination: String,
    /// Payout method
    pub method: PayoutMethod,
}

/// Per-account profile (wallet binding, freeze state)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Registered wallet for on-chain purchase verification
    pub wallet: Option<String>,
    /// Frozen for manual review
    pub frozen: bool,
    /// Why the account was frozen
    pub frozen_reason: Option<String>,
}

/// Creator earnings aggregates (separate domain from spendable credits)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CreatorAccount {
    /// Total milli-credits earned from finished calls
    pub earned_milli: i64,
    /// Total milli-credits paid out
    pub paid_out_milli: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status_terminal() {
        assert!(!CallStatus::Active.is_terminal());
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::KilledInsufficientCredits.is_terminal());
    }

    #[test]
    fn test_account_id_display() {
        let account = AccountId::new("user-42");
        assert_eq!(account.as_str(), "user-42");
        assert_eq!(account.to_string(), "user-42");
        assert!(!account.is_empty());
        assert!(AccountId::new("").is_empty());
    }

    #[test]
    fn test_entry_kind_display() {
        assert_eq!(EntryKind::Purchase.to_string(), "PURCHASE");
        assert_eq!(EntryKind::Earning.to_string(), "EARNING");
    }
}
