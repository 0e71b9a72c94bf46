//! Main ledger orchestration layer
//!
//! Ties together storage, the single-writer actor, and metrics into a
//! high-level API. This is the single choke point through which every
//! balance mutation passes; the embedding services (billing, ingestion,
//! payouts) hold it by `Arc` and never touch RocksDB directly.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger::{Config, CreditLedger};
//!
//! #[tokio::main]
//! async fn main() -> credit_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = CreditLedger::open(config).await?;
//!
//!     // let applied = ledger.apply_entry(...).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    types::{
        AccountId, AccountProfile, Applied, CallClose, CallRecord, CallStatus, CreatorAccount,
        LedgerEntry, NewCall, NewEntry, NewPayout, PayoutRequest, PayoutStatus, TickOutcome,
    },
    Config, Error, Result, Storage,
};
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct CreditLedger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics collector
    metrics: Metrics,

    /// Account freeze capability, resolved once at open
    freeze_accounts: bool,
}

impl CreditLedger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let handle = spawn_ledger_actor(storage.clone());
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;

        if !config.freeze_accounts {
            tracing::info!("Account freezing disabled; freeze requests will be no-ops");
        }

        Ok(Self {
            handle,
            storage,
            metrics,
            freeze_accounts: config.freeze_accounts,
        })
    }

    // Mutations (serialized through the actor)

    /// Apply a ledger entry against the credit balance.
    ///
    /// Replays of the same idempotency ref are absorbed and reported as
    /// success with `newly_applied = false`; callers must not distinguish
    /// that from success for purposes of continuing their own workflow.
    pub async fn apply_entry(&self, entry: NewEntry) -> Result<Applied> {
        let timer = self.metrics.apply_duration.start_timer();
        let applied = self.handle.apply_entry(entry, false).await?;
        timer.observe_duration();
        self.metrics.record_applied(applied.newly_applied);
        Ok(applied)
    }

    /// Apply a debit clamped at the current balance (refunds, clawbacks)
    pub async fn apply_bounded_debit(&self, entry: NewEntry) -> Result<Applied> {
        if entry.delta_milli > 0 {
            return Err(Error::Validation("bounded debit requires a negative delta".into()));
        }
        let timer = self.metrics.apply_duration.start_timer();
        let applied = self.handle.apply_entry(entry, true).await?;
        timer.observe_duration();
        self.metrics.record_applied(applied.newly_applied);
        Ok(applied)
    }

    /// Create a durable call record in ACTIVE status
    pub async fn create_call(&self, call: NewCall) -> Result<CallRecord> {
        self.handle.create_call(call).await
    }

    /// Charge a call's payer for whole elapsed seconds, atomically
    pub async fn bill_call_seconds(&self, call_id: Uuid, seconds: u64) -> Result<TickOutcome> {
        let outcome = self.handle.bill_call_seconds(call_id, seconds).await?;
        self.metrics.record_seconds_billed(outcome.seconds_billed);
        Ok(outcome)
    }

    /// Finalize a call exactly once (idempotent)
    pub async fn finalize_call(&self, call_id: Uuid, status: CallStatus) -> Result<CallClose> {
        let close = self.handle.finalize_call(call_id, status).await?;
        if close.spend_recorded || close.earning_recorded {
            self.metrics.record_call_finalized();
        }
        if close.spend_recorded {
            self.metrics.record_applied(true);
        }
        if close.earning_recorded {
            self.metrics.record_applied(true);
        }
        Ok(close)
    }

    /// Create a payout request, validated against available balance
    pub async fn create_payout(&self, payout: NewPayout) -> Result<PayoutRequest> {
        self.handle.create_payout(payout).await
    }

    /// Fulfil a payout request (REQUESTED → SENT, exactly once)
    pub async fn fulfill_payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        self.handle.fulfill_payout(request_id).await
    }

    /// Register the wallet an account claims on-chain purchases from
    pub async fn set_wallet(&self, account: AccountId, wallet: impl Into<String>) -> Result<()> {
        self.handle.set_wallet(account, wallet.into()).await
    }

    /// Flag an account for manual review.
    ///
    /// Returns whether the flag was actually set: with the freeze capability
    /// disabled in config this is an explicit no-op, decided once at open
    /// rather than probed per call.
    pub async fn freeze_account(
        &self,
        account: AccountId,
        reason: impl Into<String>,
    ) -> Result<bool> {
        if !self.freeze_accounts {
            tracing::warn!(account = %account, "Freeze requested but capability is disabled");
            return Ok(false);
        }
        let reason = reason.into();
        tracing::warn!(account = %account, reason = %reason, "Freezing account");
        self.handle.set_frozen(account, true, Some(reason)).await?;
        Ok(true)
    }

    /// Clear the frozen flag (no-op when the capability is disabled)
    pub async fn unfreeze_account(&self, account: AccountId) -> Result<bool> {
        if !self.freeze_accounts {
            return Ok(false);
        }
        self.handle.set_frozen(account, false, None).await?;
        Ok(true)
    }

    /// Record an inbound event id as fully processed.
    ///
    /// Callers must only invoke this after the event's ledger effect has
    /// committed, so a failed delivery stays retryable.
    pub async fn mark_event_processed(
        &self,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Result<()> {
        self.handle
            .mark_event_processed(event_id.into(), event_type.into())
            .await
    }

    // Reads (straight to storage)

    /// Current credit balance (denormalized; never computed by summing)
    pub fn balance(&self, account: &AccountId) -> Result<i64> {
        self.storage.balance(account)
    }

    /// Get the entry holding an idempotency ref, if any
    pub fn entry_by_ref(&self, idempotency_ref: &str) -> Result<Option<LedgerEntry>> {
        self.storage.entry_by_ref(idempotency_ref)
    }

    /// All ledger entries for an account
    pub fn account_entries(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.storage.account_entries(account)
    }

    /// Get call record by ID
    pub fn call(&self, call_id: Uuid) -> Result<CallRecord> {
        self.storage.call(call_id)
    }

    /// All call records still ACTIVE (restart sweep)
    pub fn active_calls(&self) -> Result<Vec<CallRecord>> {
        self.storage.active_calls()
    }

    /// Creator earnings aggregates
    pub fn creator_account(&self, account: &AccountId) -> Result<CreatorAccount> {
        self.storage.creator_account(account)
    }

    /// Sum of a creator's REQUESTED payout amounts
    pub fn pending_payout_milli(&self, creator: &AccountId) -> Result<i64> {
        self.storage.pending_payout_milli(creator)
    }

    /// Get payout request by ID
    pub fn payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        self.storage.payout(request_id)
    }

    /// All payout requests with a given status
    pub fn payouts_with_status(&self, status: PayoutStatus) -> Result<Vec<PayoutRequest>> {
        self.storage.payouts_with_status(status)
    }

    /// Account profile (wallet binding, freeze state)
    pub fn profile(&self, account: &AccountId) -> Result<AccountProfile> {
        self.storage.profile(account)
    }

    /// Check the global inbound-event guard
    pub fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        self.storage.is_event_processed(event_id)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the single writer.
    ///
    /// Reads remain available while the process drains; mutations fail with
    /// a concurrency error afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}
