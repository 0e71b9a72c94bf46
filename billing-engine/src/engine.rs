//! Server-authoritative per-second call billing
//!
//! Each active call owns exactly one tick task; there is no cross-call shared
//! mutable state except the ledger itself, which serializes every balance
//! mutation. The engine is an explicit service object: construct it once at
//! process start and hand out clones (it is a cheap handle); there is no
//! global registry.
//!
//! A tick computes whole elapsed seconds since the call's checkpoint by floor
//! division, so fractional remainders carry over to the next tick and are
//! never double-counted or lost. The checkpoint advances by exactly the whole
//! seconds consumed. The charge itself is one atomic ledger operation; a tick
//! either applies a whole number of billed seconds or applies none.

use crate::events::{BillingEvent, EventBus};
use crate::{Error, Result};
use chrono::Utc;
use credit_ledger::{CallClose, CallStatus, CreditLedger, TickOutcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Billing engine configuration
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// How often each call session is evaluated
    pub tick_interval: Duration,

    /// Advisory event buffer capacity
    pub event_capacity: usize,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

/// In-memory state for one active call, owned by its tick task
struct CallSession {
    call_id: Uuid,
    room_id: String,
    /// Wall-clock instant up to which the call has been billed (epoch millis)
    last_checkpoint_ms: i64,
}

/// Registry entry for a live session
struct SessionHandle {
    room_id: String,
    stop_tx: watch::Sender<bool>,
}

/// What a single tick decided
enum TickAction {
    Continue,
    Exhausted,
    AlreadyStopped,
}

/// Per-second metered billing engine.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct BillingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    ledger: Arc<CreditLedger>,
    sessions: DashMap<Uuid, SessionHandle>,
    events: EventBus,
    config: BillingConfig,
}

impl BillingEngine {
    /// Create a new engine over the given ledger
    pub fn new(ledger: Arc<CreditLedger>, config: BillingConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                ledger,
                sessions: DashMap::new(),
                events,
                config,
            }),
        }
    }

    /// Check whether a call has a live billing session
    pub fn is_active(&self, call_id: Uuid) -> bool {
        self.inner.sessions.contains_key(&call_id)
    }

    /// Subscribe to advisory billing events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BillingEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to advisory billing events as a stream
    pub fn event_stream(&self) -> BroadcastStream<BillingEvent> {
        self.inner.events.stream()
    }

    /// Start billing a call.
    ///
    /// Idempotent: a second start for the same call is a no-op. The call
    /// record must exist and be ACTIVE; the rate and payer captured there are
    /// authoritative; nothing from the client side can influence the charge.
    pub fn start_session(&self, call_id: Uuid, room_id: impl Into<String>) -> Result<()> {
        if self.inner.sessions.contains_key(&call_id) {
            return Ok(());
        }
        let room_id = room_id.into();

        let record = self.inner.ledger.call(call_id)?;
        if record.status != CallStatus::Active {
            return Err(Error::Session(format!(
                "call {} is not active (status {})",
                call_id, record.status
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        match self.inner.sessions.entry(call_id) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(vacant) => {
                vacant.insert(SessionHandle {
                    room_id: room_id.clone(),
                    stop_tx,
                });
            }
        }

        let session = CallSession {
            call_id,
            room_id: room_id.clone(),
            last_checkpoint_ms: Utc::now().timestamp_millis(),
        };

        tracing::info!(
            call_id = %call_id,
            room_id = %room_id,
            rate_milli_per_second = record.rate_milli_per_second,
            "Billing session started"
        );
        self.inner.events.emit(BillingEvent::Started {
            call_id,
            room_id,
            rate_milli_per_second: record.rate_milli_per_second,
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_session(session, stop_rx).await;
        });

        Ok(())
    }

    /// Stop billing a call and finalize it.
    ///
    /// Safe to invoke concurrently and repeatedly, from the explicit end-call
    /// path, the insufficient-credit auto-stop, or the restart sweep. The
    /// session task is signalled (never aborted mid-commit), and the ledger's
    /// idempotency refs make sure only one caller's finalize-and-earn write
    /// wins.
    pub async fn stop(&self, call_id: Uuid, status: CallStatus) -> Result<CallClose> {
        self.inner.stop(call_id, status).await
    }

    /// Finalize calls left ACTIVE by a previous process (no live session).
    ///
    /// Returns how many orphaned calls were closed.
    pub async fn recover(&self) -> Result<usize> {
        let mut closed = 0;
        for record in self.inner.ledger.active_calls()? {
            if self.inner.sessions.contains_key(&record.call_id) {
                continue;
            }
            tracing::warn!(call_id = %record.call_id, "Closing orphaned call from previous run");
            self.inner
                .ledger
                .finalize_call(record.call_id, CallStatus::Ended)
                .await?;
            closed += 1;
        }
        Ok(closed)
    }
}

impl EngineInner {
    async fn stop(&self, call_id: Uuid, status: CallStatus) -> Result<CallClose> {
        let session = self.sessions.remove(&call_id);
        if let Some((_, handle)) = &session {
            let _ = handle.stop_tx.send(true);
        }

        let close = self.ledger.finalize_call(call_id, status).await?;

        if let Some((_, handle)) = session {
            self.events.emit(BillingEvent::Ended {
                call_id,
                room_id: handle.room_id,
                status: close.record.status,
            });
        }

        Ok(close)
    }

    /// Tick loop for one call session
    async fn run_session(
        self: Arc<Self>,
        mut session: CallSession,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(&mut session).await {
                        Ok(TickAction::Continue) => {}
                        Ok(TickAction::Exhausted) => {
                            tracing::info!(call_id = %session.call_id, "Billing ended: insufficient credits");
                            if let Err(e) = self
                                .stop(session.call_id, CallStatus::KilledInsufficientCredits)
                                .await
                            {
                                tracing::error!(call_id = %session.call_id, error = %e, "Failed to stop exhausted call");
                            }
                            break;
                        }
                        Ok(TickAction::AlreadyStopped) => break,
                        Err(e) => {
                            // A malfunctioning tick loop must not keep a call
                            // running while charges silently fail.
                            tracing::error!(call_id = %session.call_id, error = %e, "Billing tick failed, stopping call");
                            if let Err(e) = self.stop(session.call_id, CallStatus::Ended).await {
                                tracing::error!(call_id = %session.call_id, error = %e, "Failed to stop call after tick error");
                            }
                            break;
                        }
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    }

    /// One billing evaluation for a call
    async fn tick(&self, session: &mut CallSession) -> Result<TickAction> {
        let now_ms = Utc::now().timestamp_millis();
        let elapsed_seconds = (now_ms - session.last_checkpoint_ms) / 1000;
        if elapsed_seconds <= 0 {
            return Ok(TickAction::Continue);
        }
        session.last_checkpoint_ms += elapsed_seconds * 1000;

        let outcome = match self
            .ledger
            .bill_call_seconds(session.call_id, elapsed_seconds as u64)
            .await
        {
            Ok(outcome) => outcome,
            // someone else finalized the call; the committed totals stand
            Err(credit_ledger::Error::CallNotActive(_)) => return Ok(TickAction::AlreadyStopped),
            Err(e) => return Err(e.into()),
        };

        self.emit_tick(session, &outcome);

        if outcome.exhausted {
            return Ok(TickAction::Exhausted);
        }
        Ok(TickAction::Continue)
    }

    fn emit_tick(&self, session: &CallSession, outcome: &TickOutcome) {
        self.events.emit(BillingEvent::Tick {
            call_id: session.call_id,
            room_id: session.room_id.clone(),
            seconds_billed: outcome.call_seconds_billed,
            credits_spent_milli: outcome.call_spent_milli,
            credits_left_milli: outcome.balance_after,
        });
    }
}
