//! On-chain stablecoin purchase claims
//!
//! Verify-then-apply: every chain RPC round-trip happens before the ledger
//! write, so a slow node can never hold a balance lock. The verification
//! sequence mirrors what the treasury actually requires:
//!
//! 1. the transaction exists and succeeded on-chain
//! 2. it has at least the configured number of confirmations ("not yet
//!    confirmed" is transient and retryable, distinct from permanent failure)
//! 3. it contains a transfer on the expected token contract, to the treasury,
//!    of at least the expected amount for the claimed USD value
//! 4. when the claiming account has a registered wallet, the transfer must
//!    originate from it
//!
//! The purchase is keyed by the transaction hash, so replaying the same hash
//! returns the current balance with zero credits added.

use crate::config::ChainConfig;
use crate::types::{ChainClaim, ClaimOutcome, TxReceipt};
use crate::{Error, Result};
use async_trait::async_trait;
use credit_ledger::{pricing, CreditLedger, EntryKind, NewEntry};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Token decimals assumed when the contract cannot be queried
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

/// Chain node access
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Fetch a transaction receipt, `None` while the tx is unknown to the node
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;

    /// Latest block number (for confirmation depth)
    async fn latest_block_number(&self) -> Result<u64>;

    /// Decimal precision of a token contract
    async fn token_decimals(&self, token: &str) -> Result<u8>;
}

/// Stablecoin claim processor
pub struct StablecoinClaims<C> {
    rpc: C,
    ledger: Arc<CreditLedger>,
    config: ChainConfig,
}

impl<C: ChainRpc> StablecoinClaims<C> {
    /// Create a new claim processor
    pub fn new(rpc: C, ledger: Arc<CreditLedger>, config: ChainConfig) -> Self {
        Self {
            rpc,
            ledger,
            config,
        }
    }

    /// Verify an on-chain transfer and credit the claiming account.
    ///
    /// Idempotent per transaction hash: a replay reports the current balance
    /// with `added_milli = 0`.
    pub async fn claim(&self, claim: &ChainClaim) -> Result<ClaimOutcome> {
        if self.config.treasury_address.is_empty() {
            return Err(Error::Config("treasury address is not configured".into()));
        }

        let token = normalize_address(
            claim
                .token_address
                .as_deref()
                .unwrap_or(&self.config.token_address),
        );
        let treasury = normalize_address(&self.config.treasury_address);
        let usd_cents = parse_usd_cents(&claim.claimed_usd)?;

        // replay short-circuit: skip the RPC round-trips entirely
        if self.ledger.entry_by_ref(&claim.tx_hash)?.is_some() {
            return Ok(ClaimOutcome {
                balance_milli: self.ledger.balance(&claim.account)?,
                added_milli: 0,
            });
        }

        let receipt = self
            .rpc
            .transaction_receipt(&claim.tx_hash)
            .await?
            .ok_or_else(|| {
                Error::VerificationPending(
                    "transaction not found yet; wait for confirmations and retry".into(),
                )
            })?;
        if !receipt.succeeded {
            return Err(Error::VerificationFailed("transaction failed on-chain".into()));
        }

        if self.config.min_confirmations > 0 {
            let latest = self.rpc.latest_block_number().await?;
            let confirmations = latest.saturating_sub(receipt.block_number) + 1;
            if confirmations < self.config.min_confirmations {
                return Err(Error::VerificationPending(format!(
                    "tx has {} confirmation(s), need {}",
                    confirmations, self.config.min_confirmations
                )));
            }
        }

        // tie the credit to the claiming account's wallet when one is known
        let wallet = self.ledger.profile(&claim.account)?.wallet;

        let decimals = match self.rpc.token_decimals(&token).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "decimals() lookup failed, assuming default");
                DEFAULT_TOKEN_DECIMALS
            }
        };
        let expected_units = expected_token_units(usd_cents, decimals)?;

        let matched = receipt.transfers.iter().any(|transfer| {
            normalize_address(&transfer.token) == token
                && normalize_address(&transfer.to) == treasury
                && wallet
                    .as_deref()
                    .map_or(true, |w| normalize_address(&transfer.from) == w)
                && transfer.value_units >= expected_units
        });
        if !matched {
            return Err(Error::VerificationFailed(
                "no matching stablecoin transfer to the treasury in this transaction".into(),
            ));
        }

        let added = pricing::usd_cents_to_milli(usd_cents);
        if added <= 0 {
            return Err(Error::Validation("amount too small to credit".into()));
        }

        let mut entry = NewEntry::new(
            claim.account.clone(),
            EntryKind::Purchase,
            added,
            Some(usd_cents),
            claim.tx_hash.clone(),
        );
        entry.metadata.insert("source".to_string(), "chain".to_string());
        entry.metadata.insert("token".to_string(), token);

        let applied = self.ledger.apply_entry(entry).await?;

        tracing::info!(
            account = %claim.account,
            tx_hash = %claim.tx_hash,
            usd_cents,
            added_milli = added,
            newly_applied = applied.newly_applied,
            "Stablecoin claim credited"
        );

        Ok(ClaimOutcome {
            balance_milli: applied.balance_after,
            added_milli: if applied.newly_applied { added } else { 0 },
        })
    }
}

/// Lowercase, trimmed address comparison form
fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Parse a human USD amount string ("10", "1.00") into whole cents
fn parse_usd_cents(amount: &str) -> Result<i64> {
    let usd: Decimal = amount
        .trim()
        .parse()
        .map_err(|_| Error::Validation(format!("invalid USD amount: {}", amount)))?;
    if usd <= Decimal::ZERO {
        return Err(Error::Validation("amount must be positive".into()));
    }
    (usd * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| Error::Validation("amount out of range".into()))
}

/// Smallest-unit token amount expected for a USD cent value
fn expected_token_units(usd_cents: i64, decimals: u8) -> Result<u128> {
    let factor = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| Error::Validation("token decimals out of range".into()))?;
    (usd_cents as u128)
        .checked_mul(factor)
        .map(|units| units / 100)
        .ok_or_else(|| Error::Validation("amount out of range".into()))
}
