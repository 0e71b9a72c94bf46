//! Payment-processor event handling
//!
//! Checkout completion and its fallback signal both resolve to the same
//! idempotency ref, derived from the underlying payment identity rather than
//! the event type, so whichever arrives first creates the purchase and the
//! other is absorbed as a duplicate. Refund and dispute clawbacks are bounded
//! debits (balance clamps at zero) keyed per refund/dispute identity.

use crate::config::IngestConfig;
use crate::types::{DisputeOutcome, ProcessorEvent};
use crate::Result;
use credit_ledger::{pricing, AccountId, CreditLedger, EntryKind, NewEntry};
use std::sync::Arc;

/// Applies processor events to the ledger
pub struct ProcessorIngestor {
    ledger: Arc<CreditLedger>,
    config: IngestConfig,
}

impl ProcessorIngestor {
    /// Create a new ingestor
    pub fn new(ledger: Arc<CreditLedger>, config: IngestConfig) -> Self {
        Self { ledger, config }
    }

    /// Apply one event's business action(s) to the ledger
    pub async fn apply(&self, event: &ProcessorEvent) -> Result<()> {
        match event {
            ProcessorEvent::CheckoutCompleted {
                payment_id,
                account,
                amount_cents,
            }
            | ProcessorEvent::PaymentSucceeded {
                payment_id,
                account,
                amount_cents,
            } => self.apply_purchase(payment_id, account, *amount_cents).await,

            ProcessorEvent::ChargeRefunded {
                refund_id,
                account,
                refunded_cents,
            } => self.apply_refund(refund_id, account, *refunded_cents).await,

            ProcessorEvent::DisputeOpened {
                dispute_id,
                account,
                disputed_cents,
            } => {
                self.apply_dispute_opened(dispute_id, account, *disputed_cents)
                    .await
            }

            ProcessorEvent::DisputeClosed {
                dispute_id,
                account,
                outcome,
                amount_cents,
            } => {
                self.apply_dispute_closed(dispute_id, account, *outcome, *amount_cents)
                    .await
            }

            ProcessorEvent::Unrecognized => {
                tracing::debug!("Ignoring unrecognized processor event");
                Ok(())
            }
        }
    }

    async fn apply_purchase(
        &self,
        payment_id: &str,
        account: &AccountId,
        amount_cents: i64,
    ) -> Result<()> {
        if amount_cents <= 0 {
            tracing::warn!(%payment_id, amount_cents, "Skipping purchase with non-positive amount");
            return Ok(());
        }

        let milli = pricing::usd_cents_to_milli(amount_cents);
        // keyed by the underlying payment, shared by checkout and fallback
        let idempotency_ref = format!("purchase:{}", payment_id);

        let applied = self
            .ledger
            .apply_entry(NewEntry::new(
                account.clone(),
                EntryKind::Purchase,
                milli,
                Some(amount_cents),
                idempotency_ref,
            ))
            .await?;

        if applied.newly_applied {
            tracing::info!(%payment_id, account = %account, milli, "Purchase fulfilled");
        } else {
            tracing::debug!(%payment_id, "Purchase already fulfilled, absorbed");
        }
        Ok(())
    }

    async fn apply_refund(
        &self,
        refund_id: &str,
        account: &AccountId,
        refunded_cents: i64,
    ) -> Result<()> {
        if refunded_cents <= 0 {
            return Ok(());
        }

        let milli = pricing::usd_cents_to_milli(refunded_cents);
        let applied = self
            .ledger
            .apply_bounded_debit(NewEntry::new(
                account.clone(),
                EntryKind::Refund,
                -milli,
                Some(refunded_cents),
                format!("refund:{}", refund_id),
            ))
            .await?;

        if applied.newly_applied && self.config.freeze_on_refund {
            self.ledger
                .freeze_account(
                    account.clone(),
                    format!("refund {} clawed back {} cents", refund_id, refunded_cents),
                )
                .await?;
        }
        Ok(())
    }

    async fn apply_dispute_opened(
        &self,
        dispute_id: &str,
        account: &AccountId,
        disputed_cents: i64,
    ) -> Result<()> {
        self.ledger
            .freeze_account(account.clone(), format!("dispute {} opened", dispute_id))
            .await?;

        if disputed_cents > 0 {
            let milli = pricing::usd_cents_to_milli(disputed_cents);
            let mut entry = NewEntry::new(
                account.clone(),
                EntryKind::Refund,
                -milli,
                Some(disputed_cents),
                format!("dispute:{}:open", dispute_id),
            );
            entry
                .metadata
                .insert("dispute_id".to_string(), dispute_id.to_string());
            self.ledger.apply_bounded_debit(entry).await?;
        }
        Ok(())
    }

    async fn apply_dispute_closed(
        &self,
        dispute_id: &str,
        account: &AccountId,
        outcome: DisputeOutcome,
        amount_cents: i64,
    ) -> Result<()> {
        match outcome {
            DisputeOutcome::Won => {
                self.ledger.unfreeze_account(account.clone()).await?;
            }
            DisputeOutcome::Lost => {
                self.ledger
                    .freeze_account(account.clone(), format!("dispute {} lost", dispute_id))
                    .await?;
            }
        }

        // zero-delta audit marker, idempotent per dispute + outcome
        self.ledger
            .apply_entry(NewEntry::new(
                account.clone(),
                EntryKind::Adjust,
                0,
                Some(amount_cents),
                format!("dispute:{}:closed:{}", dispute_id, outcome),
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger::Config;

    async fn test_setup() -> (ProcessorIngestor, Arc<CreditLedger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(CreditLedger::open(config).await.unwrap());
        let ingestor = ProcessorIngestor::new(ledger.clone(), IngestConfig::default());
        (ingestor, ledger, temp_dir)
    }

    fn account() -> AccountId {
        AccountId::new("payer-1")
    }

    #[tokio::test]
    async fn test_checkout_and_fallback_fulfil_once() {
        let (ingestor, ledger, _temp) = test_setup().await;

        let checkout = ProcessorEvent::CheckoutCompleted {
            payment_id: "pay_1".to_string(),
            account: account(),
            amount_cents: 1000,
        };
        let fallback = ProcessorEvent::PaymentSucceeded {
            payment_id: "pay_1".to_string(),
            account: account(),
            amount_cents: 1000,
        };

        ingestor.apply(&checkout).await.unwrap();
        ingestor.apply(&fallback).await.unwrap();

        // $10 = 600,000 milli, credited exactly once
        assert_eq!(ledger.balance(&account()).unwrap(), 600_000);
        assert_eq!(ledger.account_entries(&account()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_first_then_checkout() {
        let (ingestor, ledger, _temp) = test_setup().await;

        ingestor
            .apply(&ProcessorEvent::PaymentSucceeded {
                payment_id: "pay_2".to_string(),
                account: account(),
                amount_cents: 500,
            })
            .await
            .unwrap();
        ingestor
            .apply(&ProcessorEvent::CheckoutCompleted {
                payment_id: "pay_2".to_string(),
                account: account(),
                amount_cents: 500,
            })
            .await
            .unwrap();

        assert_eq!(ledger.balance(&account()).unwrap(), 300_000);
    }

    #[tokio::test]
    async fn test_refund_clamps_and_freezes() {
        let (ingestor, ledger, _temp) = test_setup().await;

        ingestor
            .apply(&ProcessorEvent::CheckoutCompleted {
                payment_id: "pay_3".to_string(),
                account: account(),
                amount_cents: 100,
            })
            .await
            .unwrap();
        assert_eq!(ledger.balance(&account()).unwrap(), 60_000);

        // refund of $10 against a $1 balance clamps at zero
        let refund = ProcessorEvent::ChargeRefunded {
            refund_id: "re_1".to_string(),
            account: account(),
            refunded_cents: 1000,
        };
        ingestor.apply(&refund).await.unwrap();
        assert_eq!(ledger.balance(&account()).unwrap(), 0);
        assert!(ledger.profile(&account()).unwrap().frozen);

        // replaying the refund never subtracts twice
        ingestor.apply(&refund).await.unwrap();
        assert_eq!(ledger.balance(&account()).unwrap(), 0);
        let refunds = ledger
            .account_entries(&account())
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[tokio::test]
    async fn test_dispute_lifecycle() {
        let (ingestor, ledger, _temp) = test_setup().await;

        ingestor
            .apply(&ProcessorEvent::CheckoutCompleted {
                payment_id: "pay_4".to_string(),
                account: account(),
                amount_cents: 1000,
            })
            .await
            .unwrap();

        // dispute opens: freeze + provisional clawback
        ingestor
            .apply(&ProcessorEvent::DisputeOpened {
                dispute_id: "dp_1".to_string(),
                account: account(),
                disputed_cents: 1000,
            })
            .await
            .unwrap();
        assert!(ledger.profile(&account()).unwrap().frozen);
        assert_eq!(ledger.balance(&account()).unwrap(), 0);

        // dispute won: unfreeze, zero-delta marker recorded once
        let closed = ProcessorEvent::DisputeClosed {
            dispute_id: "dp_1".to_string(),
            account: account(),
            outcome: DisputeOutcome::Won,
            amount_cents: 1000,
        };
        ingestor.apply(&closed).await.unwrap();
        ingestor.apply(&closed).await.unwrap();

        assert!(!ledger.profile(&account()).unwrap().frozen);
        let marker = ledger
            .entry_by_ref("dispute:dp_1:closed:won")
            .unwrap()
            .unwrap();
        assert_eq!(marker.delta_milli, 0);
        let markers = ledger
            .account_entries(&account())
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Adjust)
            .count();
        assert_eq!(markers, 1);
    }

    #[tokio::test]
    async fn test_dispute_lost_stays_frozen() {
        let (ingestor, ledger, _temp) = test_setup().await;

        ingestor
            .apply(&ProcessorEvent::DisputeOpened {
                dispute_id: "dp_2".to_string(),
                account: account(),
                disputed_cents: 0,
            })
            .await
            .unwrap();
        ingestor
            .apply(&ProcessorEvent::DisputeClosed {
                dispute_id: "dp_2".to_string(),
                account: account(),
                outcome: DisputeOutcome::Lost,
                amount_cents: 0,
            })
            .await
            .unwrap();

        let profile = ledger.profile(&account()).unwrap();
        assert!(profile.frozen);
        assert_eq!(profile.frozen_reason.as_deref(), Some("dispute dp_2 lost"));
    }

    #[tokio::test]
    async fn test_unrecognized_is_noop() {
        let (ingestor, ledger, _temp) = test_setup().await;
        ingestor.apply(&ProcessorEvent::Unrecognized).await.unwrap();
        assert_eq!(ledger.account_entries(&account()).unwrap().len(), 0);
    }
}
