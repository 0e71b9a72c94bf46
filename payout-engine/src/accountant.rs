//! Creator payout accounting
//!
//! Available balance is `earned − paid_out − Σ(REQUESTED amounts)`. The
//! ledger validates a new request against that figure inside one serialized
//! transaction, so two concurrent requests can never jointly authorize more
//! than is available; this facade handles input validation and exposes the
//! read-only balance breakdown for display.

use crate::{Error, Result};
use credit_ledger::{AccountId, CreditLedger, NewPayout, PayoutMethod, PayoutRequest, PayoutStatus};
use std::sync::Arc;
use uuid::Uuid;

/// Minimum plausible destination length (wallet address or account id)
const MIN_DESTINATION_LEN: usize = 10;

/// Creator balance breakdown, all in milli-credits
#[derive(Debug, Clone, Copy)]
pub struct CreatorBalance {
    /// Total earned from finished calls
    pub earned_milli: i64,
    /// Total already paid out
    pub paid_out_milli: i64,
    /// Reserved by REQUESTED payout requests
    pub pending_milli: i64,
    /// Available for a new request
    pub available_milli: i64,
}

/// Payout accountant over the ledger
pub struct PayoutAccountant {
    ledger: Arc<CreditLedger>,
}

impl PayoutAccountant {
    /// Create a new accountant
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self { ledger }
    }

    /// Current balance breakdown for a creator.
    ///
    /// Read-only snapshot for display; the authoritative check re-runs inside
    /// the request transaction.
    pub fn available_balance(&self, creator: &AccountId) -> Result<CreatorBalance> {
        let account = self.ledger.creator_account(creator)?;
        let pending_milli = self.ledger.pending_payout_milli(creator)?;
        let available_milli =
            (account.earned_milli - account.paid_out_milli - pending_milli).max(0);

        Ok(CreatorBalance {
            earned_milli: account.earned_milli,
            paid_out_milli: account.paid_out_milli,
            pending_milli,
            available_milli,
        })
    }

    /// Request a payout.
    ///
    /// Fails when the amount exceeds the creator's available balance at the
    /// moment the request is authorized.
    pub async fn request_payout(
        &self,
        creator: &AccountId,
        amount_milli: i64,
        destination: &str,
        method: PayoutMethod,
    ) -> Result<PayoutRequest> {
        if amount_milli <= 0 {
            return Err(Error::Validation("payout amount must be positive".into()));
        }

        let destination = match method {
            // wallet addresses compare case-insensitively
            PayoutMethod::Crypto => destination.trim().to_ascii_lowercase(),
            // connected-account ids are case-sensitive
            PayoutMethod::StripeLike => destination.trim().to_string(),
        };
        if destination.len() < MIN_DESTINATION_LEN {
            return Err(Error::Validation("invalid destination".into()));
        }

        let request = self
            .ledger
            .create_payout(NewPayout {
                creator: creator.clone(),
                amount_milli,
                destination,
                method,
            })
            .await?;

        tracing::info!(
            request_id = %request.request_id,
            creator = %creator,
            amount_milli,
            "Payout requested"
        );

        Ok(request)
    }

    /// Fulfil a payout request (operator action, REQUESTED → SENT exactly once)
    pub async fn fulfill_payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        Ok(self.ledger.fulfill_payout(request_id).await?)
    }

    /// Get a payout request by ID
    pub fn payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        Ok(self.ledger.payout(request_id)?)
    }

    /// All requests awaiting an operator
    pub fn requested(&self) -> Result<Vec<PayoutRequest>> {
        Ok(self.ledger.payouts_with_status(PayoutStatus::Requested)?)
    }
}
