//! End-to-end billing flows against real wall-clock ticks
//!
//! These tests run the actual per-second tick loop, so they take a few
//! seconds each by construction.

use anyhow::Result;
use billing_engine::{BillingConfig, BillingEngine, BillingEvent};
use credit_ledger::{AccountId, CallStatus, Config, CreditLedger, EntryKind, NewCall, NewEntry};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn test_engine() -> Result<(BillingEngine, Arc<CreditLedger>, tempfile::TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    let ledger = Arc::new(CreditLedger::open(config).await?);
    let engine = BillingEngine::new(ledger.clone(), BillingConfig::default());
    Ok((engine, ledger, temp_dir))
}

async fn fund(ledger: &CreditLedger, payer: &str, milli: i64) -> Result<()> {
    ledger
        .apply_entry(NewEntry::new(
            AccountId::new(payer),
            EntryKind::Purchase,
            milli,
            None,
            format!("tx-{}", Uuid::now_v7()),
        ))
        .await?;
    Ok(())
}

async fn start_call(ledger: &CreditLedger, payer: &str, creator: &str, rate: i64) -> Result<Uuid> {
    let record = ledger
        .create_call(NewCall {
            payer: AccountId::new(payer),
            creator: AccountId::new(creator),
            rate_milli_per_second: rate,
        })
        .await?;
    Ok(record.call_id)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_killed_when_credits_run_out() -> Result<()> {
    let (engine, ledger, _temp) = test_engine().await?;
    let payer = AccountId::new("payer-1");
    let creator = AccountId::new("creator-1");

    // 2.5 seconds of credit at 1000 milli/sec
    fund(&ledger, "payer-1", 2500).await?;
    let call_id = start_call(&ledger, "payer-1", "creator-1", 1000).await?;

    let mut events = engine.subscribe();
    engine.start_session(call_id, "room-1")?;

    // wait for the engine to kill the call on its own
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut ended_status = None;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Ok(BillingEvent::Ended { status, .. })) => {
                ended_status = Some(status);
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }

    assert_eq!(ended_status, Some(CallStatus::KilledInsufficientCredits));

    let record = ledger.call(call_id)?;
    assert_eq!(record.status, CallStatus::KilledInsufficientCredits);
    assert_eq!(record.seconds_billed, 2);
    assert_eq!(record.credits_spent_milli, 2500);
    assert_eq!(ledger.balance(&payer)?, 0);

    // exactly one spend audit entry and one earning entry
    let spend = ledger.entry_by_ref(&call_id.to_string())?.unwrap();
    assert_eq!(spend.delta_milli, -2500);
    let earning = ledger.entry_by_ref(&format!("earn:{}", call_id))?.unwrap();
    assert_eq!(earning.delta_milli, 1600);
    assert_eq!(ledger.creator_account(&creator)?.earned_milli, 1600);

    assert!(!engine.is_active(call_id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_stops_write_entries_once() -> Result<()> {
    let (engine, ledger, _temp) = test_engine().await?;
    let payer = AccountId::new("payer-1");
    let creator = AccountId::new("creator-1");

    fund(&ledger, "payer-1", 60_000).await?;
    let call_id = start_call(&ledger, "payer-1", "creator-1", 1000).await?;

    engine.start_session(call_id, "room-1")?;

    // let a couple of ticks land
    tokio::time::sleep(Duration::from_millis(2300)).await;

    let (a, b, c) = tokio::join!(
        engine.stop(call_id, CallStatus::Ended),
        engine.stop(call_id, CallStatus::Ended),
        engine.stop(call_id, CallStatus::Ended),
    );
    a?;
    b?;
    c?;

    let record = ledger.call(call_id)?;
    assert_eq!(record.status, CallStatus::Ended);
    assert!(record.seconds_billed >= 1);

    let spends = ledger
        .account_entries(&payer)?
        .into_iter()
        .filter(|e| e.kind == EntryKind::Spend)
        .count();
    let earnings = ledger
        .account_entries(&creator)?
        .into_iter()
        .filter(|e| e.kind == EntryKind::Earning)
        .count();
    assert_eq!(spends, 1);
    assert_eq!(earnings, 1);

    // debit matches what the record accumulated
    assert_eq!(ledger.balance(&payer)?, 60_000 - record.credits_spent_milli);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tick_progress_events() -> Result<()> {
    let (engine, ledger, _temp) = test_engine().await?;

    fund(&ledger, "payer-1", 60_000).await?;
    let call_id = start_call(&ledger, "payer-1", "creator-1", 1000).await?;

    let mut events = engine.subscribe();
    engine.start_session(call_id, "room-1")?;

    // started event first
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await?? {
        BillingEvent::Started { call_id: id, room_id, .. } => {
            assert_eq!(id, call_id);
            assert_eq!(room_id, "room-1");
        }
        other => panic!("expected Started, got {:?}", other),
    }

    // then at least one tick with consistent accounting
    match tokio::time::timeout(Duration::from_secs(3), events.recv()).await?? {
        BillingEvent::Tick {
            seconds_billed,
            credits_spent_milli,
            credits_left_milli,
            ..
        } => {
            assert!(seconds_billed >= 1);
            assert_eq!(credits_spent_milli, seconds_billed as i64 * 1000);
            assert_eq!(credits_left_milli, 60_000 - credits_spent_milli);
        }
        other => panic!("expected Tick, got {:?}", other),
    }

    engine.stop(call_id, CallStatus::Ended).await?;
    Ok(())
}
