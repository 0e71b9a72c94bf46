//! Signed webhook ingestion
//!
//! Deliveries arrive as raw payloads with an HMAC-SHA256 signature over the
//! exact bytes. Only an authentication or parse failure is rejected outright;
//! once a delivery is authenticated it is always acknowledged, even when
//! internal processing fails, so the sender never enters a retry storm. The
//! global per-event idempotency guard is consumed strictly after the event's
//! ledger effect commits, so a failed delivery stays retryable.

use crate::config::IngestConfig;
use crate::processor::ProcessorIngestor;
use crate::types::{Ack, WebhookEnvelope};
use crate::{Error, Result};
use credit_ledger::CreditLedger;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Raw-payload signature verification
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    /// Create a verifier over a shared secret
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a hex-encoded HMAC-SHA256 signature over the payload
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> Result<()> {
        if self.secret.is_empty() {
            return Err(Error::Config("webhook secret is not configured".into()));
        }

        let signature = hex::decode(signature_hex.trim())
            .map_err(|_| Error::Signature("signature is not valid hex".into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| Error::Config("invalid webhook secret".into()))?;
        mac.update(payload);
        mac.verify_slice(&signature)
            .map_err(|_| Error::Signature("signature mismatch".into()))
    }

    /// Sign a payload (sender side; used by tests)
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Webhook entry point: authenticate, guard, dispatch, acknowledge
pub struct WebhookIngestor {
    verifier: SignatureVerifier,
    processor: ProcessorIngestor,
    ledger: Arc<CreditLedger>,
}

impl WebhookIngestor {
    /// Create a new ingestor
    pub fn new(ledger: Arc<CreditLedger>, config: IngestConfig) -> Self {
        let verifier = SignatureVerifier::new(config.webhook_secret.clone().into_bytes());
        let processor = ProcessorIngestor::new(ledger.clone(), config);
        Self {
            verifier,
            processor,
            ledger,
        }
    }

    /// Ingest one raw webhook delivery.
    ///
    /// Errors only on authentication or parse failure. Everything after that
    /// acknowledges: duplicates report `duplicate = true`, internal failures
    /// report `processed = false` and leave the event id unconsumed.
    pub async fn ingest(&self, payload: &[u8], signature: &str) -> Result<Ack> {
        self.verifier.verify(payload, signature)?;

        let envelope: WebhookEnvelope = serde_json::from_slice(payload)
            .map_err(|e| Error::Validation(format!("malformed webhook payload: {}", e)))?;

        let already = self
            .ledger
            .is_event_processed(&envelope.id)
            .unwrap_or_else(|e| {
                tracing::warn!(event_id = %envelope.id, error = %e, "Event guard read failed, treating as unprocessed");
                false
            });
        if already {
            tracing::debug!(event_id = %envelope.id, "Event already processed, absorbing");
            return Ok(Ack {
                received: true,
                processed: true,
                duplicate: true,
            });
        }

        let kind = envelope.event.kind();
        match self.processor.apply(&envelope.event).await {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_event_processed(&envelope.id, kind).await {
                    // ledger effect committed; the worst case is one absorbed replay
                    tracing::warn!(event_id = %envelope.id, error = %e, "Failed to mark event processed");
                }
                Ok(Ack {
                    received: true,
                    processed: true,
                    duplicate: false,
                })
            }
            Err(e) => {
                tracing::error!(
                    event_id = %envelope.id,
                    event_kind = kind,
                    error = %e,
                    "Webhook processing failed; acknowledging without consuming the event id"
                );
                Ok(Ack {
                    received: true,
                    processed: false,
                    duplicate: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger::{AccountId, Config};

    const SECRET: &str = "whsec_test_0000000000000000";

    async fn test_ingestor() -> (WebhookIngestor, Arc<CreditLedger>, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let ledger = Arc::new(CreditLedger::open(config).await.unwrap());

        let ingest_config = IngestConfig {
            webhook_secret: SECRET.to_string(),
            ..IngestConfig::default()
        };
        (
            WebhookIngestor::new(ledger.clone(), ingest_config),
            ledger,
            temp_dir,
        )
    }

    fn signed(payload: &str) -> (Vec<u8>, String) {
        let verifier = SignatureVerifier::new(SECRET.as_bytes().to_vec());
        let bytes = payload.as_bytes().to_vec();
        let signature = verifier.sign(&bytes);
        (bytes, signature)
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let verifier = SignatureVerifier::new(SECRET.as_bytes().to_vec());
        let payload = br#"{"id":"evt_1"}"#;
        let signature = verifier.sign(payload);
        verifier.verify(payload, &signature).unwrap();
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let verifier = SignatureVerifier::new(SECRET.as_bytes().to_vec());
        let signature = verifier.sign(br#"{"id":"evt_1"}"#);
        let result = verifier.verify(br#"{"id":"evt_2"}"#, &signature);
        assert!(matches!(result, Err(Error::Signature(_))));
    }

    #[tokio::test]
    async fn test_ingest_fulfils_and_marks() {
        let (ingestor, ledger, _temp) = test_ingestor().await;
        let payload = r#"{
            "id": "evt_1",
            "type": "checkout_completed",
            "payment_id": "pay_1",
            "account": "payer-1",
            "amount_cents": 1000
        }"#;
        let (bytes, signature) = signed(payload);

        let ack = ingestor.ingest(&bytes, &signature).await.unwrap();
        assert!(ack.received && ack.processed && !ack.duplicate);
        assert_eq!(ledger.balance(&AccountId::new("payer-1")).unwrap(), 600_000);
        assert!(ledger.is_event_processed("evt_1").unwrap());

        // exact redelivery is absorbed by the event guard
        let ack = ingestor.ingest(&bytes, &signature).await.unwrap();
        assert!(ack.duplicate);
        assert_eq!(ledger.balance(&AccountId::new("payer-1")).unwrap(), 600_000);
    }

    #[tokio::test]
    async fn test_bad_signature_not_acknowledged() {
        let (ingestor, ledger, _temp) = test_ingestor().await;
        let payload = br#"{"id":"evt_1","type":"checkout_completed","payment_id":"p","account":"payer-1","amount_cents":1000}"#;

        let result = ingestor.ingest(payload, "deadbeef").await;
        assert!(matches!(result, Err(Error::Signature(_))));
        assert_eq!(ledger.balance(&AccountId::new("payer-1")).unwrap(), 0);
        assert!(!ledger.is_event_processed("evt_1").unwrap());
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let (ingestor, _ledger, _temp) = test_ingestor().await;
        let (bytes, signature) = signed("not json at all");
        let result = ingestor.ingest(&bytes, &signature).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unrecognized_event_acknowledged_and_marked() {
        let (ingestor, ledger, _temp) = test_ingestor().await;
        let (bytes, signature) = signed(r#"{"id":"evt_9","type":"account.updated"}"#);

        let ack = ingestor.ingest(&bytes, &signature).await.unwrap();
        assert!(ack.processed);
        assert!(ledger.is_event_processed("evt_9").unwrap());
    }

    #[tokio::test]
    async fn test_internal_failure_leaves_event_unconsumed() {
        let (ingestor, ledger, _temp) = test_ingestor().await;
        let payload = r#"{
            "id": "evt_2",
            "type": "checkout_completed",
            "payment_id": "pay_2",
            "account": "payer-1",
            "amount_cents": 1000
        }"#;

        // stop the writer so the ledger effect cannot commit; reads stay up
        ledger.shutdown().await.unwrap();

        let (bytes, signature) = signed(payload);
        let ack = ingestor.ingest(&bytes, &signature).await.unwrap();
        assert!(ack.received);
        assert!(!ack.processed);
        assert!(!ledger.is_event_processed("evt_2").unwrap());
    }
}
