//! Inbound event and chain verification types

use credit_ledger::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment-processor event, as a closed tagged union.
///
/// Anything the processor sends that we do not model deserializes to
/// `Unrecognized` and is acknowledged without effect; there is no
/// open-ended fallthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorEvent {
    /// Primary fulfilment: hosted checkout completed
    CheckoutCompleted {
        /// Identity of the underlying payment (shared with the fallback)
        payment_id: String,
        /// Purchasing account
        account: AccountId,
        /// Amount paid, in USD cents
        amount_cents: i64,
    },

    /// Fallback fulfilment for the same underlying payment
    PaymentSucceeded {
        /// Identity of the underlying payment (shared with checkout)
        payment_id: String,
        /// Purchasing account
        account: AccountId,
        /// Amount received, in USD cents
        amount_cents: i64,
    },

    /// A charge was refunded (full or partial)
    ChargeRefunded {
        /// Identity of this refund
        refund_id: String,
        /// Account to claw back from
        account: AccountId,
        /// Refunded amount, in USD cents
        refunded_cents: i64,
    },

    /// A chargeback was opened
    DisputeOpened {
        /// Dispute identity
        dispute_id: String,
        /// Disputing account
        account: AccountId,
        /// Disputed amount, in USD cents
        disputed_cents: i64,
    },

    /// A chargeback was resolved
    DisputeClosed {
        /// Dispute identity
        dispute_id: String,
        /// Disputing account
        account: AccountId,
        /// Resolution
        outcome: DisputeOutcome,
        /// Disputed amount, in USD cents
        amount_cents: i64,
    },

    /// Any event kind we do not model; acknowledged and ignored
    #[serde(other)]
    Unrecognized,
}

impl ProcessorEvent {
    /// Short name for logging and the processed-event audit record
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorEvent::CheckoutCompleted { .. } => "checkout_completed",
            ProcessorEvent::PaymentSucceeded { .. } => "payment_succeeded",
            ProcessorEvent::ChargeRefunded { .. } => "charge_refunded",
            ProcessorEvent::DisputeOpened { .. } => "dispute_opened",
            ProcessorEvent::DisputeClosed { .. } => "dispute_closed",
            ProcessorEvent::Unrecognized => "unrecognized",
        }
    }
}

/// How a dispute was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Platform won; the account may be unfrozen
    Won,
    /// Platform lost; the account stays frozen
    Lost,
}

impl fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisputeOutcome::Won => write!(f, "won"),
            DisputeOutcome::Lost => write!(f, "lost"),
        }
    }
}

/// Signed webhook delivery envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    /// Processor-assigned event id (global idempotency guard key)
    pub id: String,

    /// The event itself
    #[serde(flatten)]
    pub event: ProcessorEvent,
}

/// Acknowledgement returned to the webhook sender.
///
/// Deliveries are always acknowledged once authenticated, even when internal
/// processing failed; `processed` tells the embedding layer whether the
/// event id was consumed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ack {
    /// Delivery was received and authenticated
    pub received: bool,
    /// The event's effect is committed and its id consumed
    pub processed: bool,
    /// The event id had already been processed earlier
    pub duplicate: bool,
}

/// A decoded ERC-20 transfer event from a transaction receipt
#[derive(Debug, Clone)]
pub struct TokenTransfer {
    /// Token contract address
    pub token: String,
    /// Sender address
    pub from: String,
    /// Recipient address
    pub to: String,
    /// Transferred value in the token's smallest units
    pub value_units: u128,
}

/// A confirmed-or-not transaction receipt
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// True when the transaction succeeded on-chain
    pub succeeded: bool,
    /// Block the transaction landed in
    pub block_number: u64,
    /// Decoded token transfer events
    pub transfers: Vec<TokenTransfer>,
}

/// An on-chain stablecoin purchase claim
#[derive(Debug, Clone)]
pub struct ChainClaim {
    /// Claiming account
    pub account: AccountId,
    /// Transaction hash (doubles as the purchase idempotency ref)
    pub tx_hash: String,
    /// Human-entered USD amount, e.g. "10" or "1.00"
    pub claimed_usd: String,
    /// Token contract override; config default when absent
    pub token_address: Option<String>,
}

/// Result of a successful (or replayed) claim
#[derive(Debug, Clone, Copy)]
pub struct ClaimOutcome {
    /// Credit balance after the claim
    pub balance_milli: i64,
    /// Milli-credits added by this claim (0 on replay)
    pub added_milli: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parse() {
        let payload = r#"{
            "id": "evt_1",
            "type": "checkout_completed",
            "payment_id": "pay_9",
            "account": "payer-1",
            "amount_cents": 1000
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(payload).unwrap();
        assert_eq!(envelope.id, "evt_1");
        match envelope.event {
            ProcessorEvent::CheckoutCompleted { payment_id, amount_cents, .. } => {
                assert_eq!(payment_id, "pay_9");
                assert_eq!(amount_cents, 1000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_unrecognized() {
        let payload = r#"{"id": "evt_2", "type": "account.updated"}"#;
        let envelope: WebhookEnvelope = serde_json::from_str(payload).unwrap();
        assert!(matches!(envelope.event, ProcessorEvent::Unrecognized));
    }

    #[test]
    fn test_dispute_outcome_parse() {
        let payload = r#"{
            "id": "evt_3",
            "type": "dispute_closed",
            "dispute_id": "dp_1",
            "account": "payer-1",
            "outcome": "won",
            "amount_cents": 500
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(payload).unwrap();
        match envelope.event {
            ProcessorEvent::DisputeClosed { outcome, .. } => {
                assert_eq!(outcome, DisputeOutcome::Won);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
