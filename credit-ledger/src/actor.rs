//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! every balance-moving operation is a message handled by one task, so
//! concurrent billing ticks, purchases, refunds, and payout requests for the
//! same account are serialized without any further in-process locking.
//! Composite operations (bounded debits, payout authorization) read and write
//! inside one message, which is what lets them bound a debit by the balance
//! they just observed.
//!
//! Reads do not go through the actor; `Storage` is safe for concurrent reads.

use crate::types::{
    AccountId, Applied, CallClose, CallRecord, CallStatus, NewCall, NewEntry, NewPayout,
    PayoutRequest, TickOutcome,
};
use crate::{Error, Result, Storage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Apply a ledger entry against the credit balance
    ApplyEntry {
        /// Entry to apply
        entry: NewEntry,
        /// Clamp negative deltas at the current balance
        bounded: bool,
        /// Response channel
        response: oneshot::Sender<Result<Applied>>,
    },

    /// Create a durable call record
    CreateCall {
        /// Call to create
        call: NewCall,
        /// Response channel
        response: oneshot::Sender<Result<CallRecord>>,
    },

    /// Charge a call's payer for whole elapsed seconds
    BillCallSeconds {
        /// Call ID
        call_id: Uuid,
        /// Whole seconds to bill
        seconds: u64,
        /// Response channel
        response: oneshot::Sender<Result<TickOutcome>>,
    },

    /// Finalize a call exactly once
    FinalizeCall {
        /// Call ID
        call_id: Uuid,
        /// Terminal status
        status: CallStatus,
        /// Response channel
        response: oneshot::Sender<Result<CallClose>>,
    },

    /// Create a payout request (validates available balance)
    CreatePayout {
        /// Payout to create
        payout: NewPayout,
        /// Response channel
        response: oneshot::Sender<Result<PayoutRequest>>,
    },

    /// Fulfil a payout request (REQUESTED → SENT)
    FulfillPayout {
        /// Request ID
        request_id: Uuid,
        /// Response channel
        response: oneshot::Sender<Result<PayoutRequest>>,
    },

    /// Register an account's wallet
    SetWallet {
        /// Account
        account: AccountId,
        /// Wallet address
        wallet: String,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Set or clear the frozen flag
    SetFrozen {
        /// Account
        account: AccountId,
        /// New frozen state
        frozen: bool,
        /// Reason (kept while frozen)
        reason: Option<String>,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Record an inbound event id as fully processed
    MarkEventProcessed {
        /// Event ID
        event_id: String,
        /// Event type (for audit)
        event_type: String,
        /// Response channel
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    storage: Arc<Storage>,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(storage: Arc<Storage>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { storage, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }
        tracing::debug!("Ledger actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::ApplyEntry {
                entry,
                bounded,
                response,
            } => {
                let _ = response.send(self.storage.apply_entry(&entry, bounded));
            }

            LedgerMessage::CreateCall { call, response } => {
                let _ = response.send(self.storage.create_call(&call));
            }

            LedgerMessage::BillCallSeconds {
                call_id,
                seconds,
                response,
            } => {
                let _ = response.send(self.storage.bill_call_seconds(call_id, seconds));
            }

            LedgerMessage::FinalizeCall {
                call_id,
                status,
                response,
            } => {
                let _ = response.send(self.storage.finalize_call(call_id, status));
            }

            LedgerMessage::CreatePayout { payout, response } => {
                let _ = response.send(self.storage.create_payout(&payout));
            }

            LedgerMessage::FulfillPayout {
                request_id,
                response,
            } => {
                let _ = response.send(self.storage.fulfill_payout(request_id));
            }

            LedgerMessage::SetWallet {
                account,
                wallet,
                response,
            } => {
                let _ = response.send(self.storage.set_wallet(&account, &wallet));
            }

            LedgerMessage::SetFrozen {
                account,
                frozen,
                reason,
                response,
            } => {
                let _ = response.send(self.storage.set_frozen(&account, frozen, reason));
            }

            LedgerMessage::MarkEventProcessed {
                event_id,
                event_type,
                response,
            } => {
                let _ = response.send(self.storage.mark_event_processed(&event_id, &event_type));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        msg: LedgerMessage,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Apply a ledger entry
    pub async fn apply_entry(&self, entry: NewEntry, bounded: bool) -> Result<Applied> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::ApplyEntry {
                entry,
                bounded,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Create a call record
    pub async fn create_call(&self, call: NewCall) -> Result<CallRecord> {
        let (tx, rx) = oneshot::channel();
        self.request(LedgerMessage::CreateCall { call, response: tx }, rx)
            .await
    }

    /// Bill a call for whole seconds
    pub async fn bill_call_seconds(&self, call_id: Uuid, seconds: u64) -> Result<TickOutcome> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::BillCallSeconds {
                call_id,
                seconds,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Finalize a call
    pub async fn finalize_call(&self, call_id: Uuid, status: CallStatus) -> Result<CallClose> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::FinalizeCall {
                call_id,
                status,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Create a payout request
    pub async fn create_payout(&self, payout: NewPayout) -> Result<PayoutRequest> {
        let (tx, rx) = oneshot::channel();
        self.request(LedgerMessage::CreatePayout { payout, response: tx }, rx)
            .await
    }

    /// Fulfil a payout request
    pub async fn fulfill_payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::FulfillPayout {
                request_id,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Register an account's wallet
    pub async fn set_wallet(&self, account: AccountId, wallet: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::SetWallet {
                account,
                wallet,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Set or clear the frozen flag
    pub async fn set_frozen(
        &self,
        account: AccountId,
        frozen: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::SetFrozen {
                account,
                frozen,
                reason,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Record an inbound event id as processed
    pub async fn mark_event_processed(&self, event_id: String, event_type: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            LedgerMessage::MarkEventProcessed {
                event_id,
                event_type,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(storage: Arc<Storage>) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;
    use crate::Config;

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_ledger_actor(storage);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_apply_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let handle = spawn_ledger_actor(storage.clone());

        let entry = NewEntry::new(
            AccountId::new("payer-1"),
            EntryKind::Purchase,
            60_000,
            Some(100),
            "tx-1",
        );
        let applied = handle.apply_entry(entry, false).await.unwrap();
        assert!(applied.newly_applied);
        assert_eq!(applied.balance_after, 60_000);
        assert_eq!(storage.balance(&AccountId::new("payer-1")).unwrap(), 60_000);

        handle.shutdown().await.unwrap();
    }
}
