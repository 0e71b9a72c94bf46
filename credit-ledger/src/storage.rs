//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only ledger entries (key: entry_id)
//! - `refs` - Idempotency refs (key: ref, value: entry_id), the uniqueness guard
//! - `balances` - Denormalized credit balances (key: account)
//! - `accounts` - Account profiles: wallet binding, freeze state (key: account)
//! - `creators` - Creator earnings aggregates (key: account)
//! - `calls` - Durable call records (key: call_id)
//! - `payouts` - Payout requests (key: request_id)
//! - `indices` - Secondary indices for fast lookups
//! - `events` - Processed inbound event ids (global ingestion guard)
//!
//! Every composite operation stages all of its row updates in one
//! `WriteBatch`, so an entry insert and the balance it moves commit or fail
//! together. Callers are expected to route all mutations through a single
//! writer (see `actor`); reads are safe from any thread.

use crate::{
    error::{Error, Result},
    pricing,
    types::{
        AccountId, AccountProfile, Applied, CallClose, CallRecord, CallStatus, CreatorAccount,
        EntryKind, LedgerEntry, NewCall, NewEntry, NewPayout, PayoutRequest, PayoutStatus,
        TickOutcome,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_REFS: &str = "refs";
const CF_BALANCES: &str = "balances";
const CF_ACCOUNTS: &str = "accounts";
const CF_CREATORS: &str = "creators";
const CF_CALLS: &str = "calls";
const CF_PAYOUTS: &str = "payouts";
const CF_INDICES: &str = "indices";
const CF_EVENTS: &str = "events";

/// Index key tags (first byte of composite keys in `indices`)
const IDX_ACCOUNT_ENTRY: u8 = b'e';
const IDX_CREATOR_PAYOUT: u8 = b'p';

/// Processed inbound event marker
#[derive(Debug, Serialize, Deserialize)]
struct ProcessedEventRecord {
    event_type: String,
    processed_at: DateTime<Utc>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_cold()),
            ColumnFamilyDescriptor::new(CF_REFS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_CREATORS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_CALLS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_PAYOUTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_cold()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened ledger storage");

        Ok(Self { db })
    }

    fn cf_options_cold() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently read rows, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Index key helpers

    fn index_key_account_entry(account: &AccountId, entry_id: Uuid) -> Vec<u8> {
        let mut key = vec![IDX_ACCOUNT_ENTRY];
        key.extend_from_slice(account.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(entry_id.as_bytes());
        key
    }

    fn index_key_creator_payout(creator: &AccountId, request_id: Uuid) -> Vec<u8> {
        let mut key = vec![IDX_CREATOR_PAYOUT];
        key.extend_from_slice(creator.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(request_id.as_bytes());
        key
    }

    fn index_prefix(tag: u8, account: &AccountId) -> Vec<u8> {
        let mut prefix = vec![tag];
        prefix.extend_from_slice(account.as_str().as_bytes());
        prefix.push(b'|');
        prefix
    }

    // Row helpers

    fn stage_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        let value = bincode::serialize(entry)?;
        batch.put_cf(self.cf_handle(CF_ENTRIES)?, entry.entry_id.as_bytes(), &value);
        batch.put_cf(
            self.cf_handle(CF_REFS)?,
            entry.idempotency_ref.as_bytes(),
            entry.entry_id.as_bytes(),
        );
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            &Self::index_key_account_entry(&entry.account, entry.entry_id),
            &[],
        );
        Ok(())
    }

    fn stage_balance(&self, batch: &mut WriteBatch, account: &AccountId, balance: i64) -> Result<()> {
        batch.put_cf(
            self.cf_handle(CF_BALANCES)?,
            account.as_str().as_bytes(),
            &bincode::serialize(&balance)?,
        );
        Ok(())
    }

    fn stage_call(&self, batch: &mut WriteBatch, record: &CallRecord) -> Result<()> {
        batch.put_cf(
            self.cf_handle(CF_CALLS)?,
            record.call_id.as_bytes(),
            &bincode::serialize(record)?,
        );
        Ok(())
    }

    fn stage_creator(
        &self,
        batch: &mut WriteBatch,
        account: &AccountId,
        creator: &CreatorAccount,
    ) -> Result<()> {
        batch.put_cf(
            self.cf_handle(CF_CREATORS)?,
            account.as_str().as_bytes(),
            &bincode::serialize(creator)?,
        );
        Ok(())
    }

    fn build_entry(new: &NewEntry, delta_milli: i64) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::now_v7(),
            account: new.account.clone(),
            kind: new.kind,
            delta_milli,
            usd_cents: new.usd_cents,
            idempotency_ref: new.idempotency_ref.clone(),
            created_at: Utc::now(),
            metadata: new.metadata.clone(),
        }
    }

    // Composite operations (one WriteBatch each)

    /// Apply a ledger entry against the credit balance.
    ///
    /// Duplicate refs are absorbed: the result reports `newly_applied = false`
    /// and the current balance, and callers must treat that as success.
    /// With `bounded`, a negative delta is clamped so the balance never goes
    /// below zero; without it, an uncovered debit is an error.
    pub fn apply_entry(&self, new: &NewEntry, bounded: bool) -> Result<Applied> {
        if new.idempotency_ref.is_empty() {
            return Err(Error::Validation("idempotency ref must not be empty".into()));
        }
        if new.account.is_empty() {
            return Err(Error::Validation("account id must not be empty".into()));
        }

        if let Some(existing) = self.entry_id_by_ref(&new.idempotency_ref)? {
            tracing::debug!(
                idempotency_ref = %new.idempotency_ref,
                "Entry ref already applied, absorbing"
            );
            return Ok(Applied {
                entry_id: existing,
                newly_applied: false,
                balance_after: self.balance(&new.account)?,
            });
        }

        let balance = self.balance(&new.account)?;
        let delta = if bounded && new.delta_milli < 0 {
            new.delta_milli.max(-balance)
        } else {
            new.delta_milli
        };
        let balance_after = balance + delta;
        if balance_after < 0 {
            return Err(Error::InsufficientBalance);
        }

        let entry = Self::build_entry(new, delta);
        let mut batch = WriteBatch::default();
        self.stage_entry(&mut batch, &entry)?;
        self.stage_balance(&mut batch, &new.account, balance_after)?;
        self.db.write(batch)?;

        tracing::debug!(
            entry_id = %entry.entry_id,
            account = %entry.account,
            kind = %entry.kind,
            delta_milli = entry.delta_milli,
            "Ledger entry applied"
        );

        Ok(Applied {
            entry_id: entry.entry_id,
            newly_applied: true,
            balance_after,
        })
    }

    /// Create a durable call record in ACTIVE status
    pub fn create_call(&self, new: &NewCall) -> Result<CallRecord> {
        if new.rate_milli_per_second <= 0 {
            return Err(Error::Validation("rate must be positive".into()));
        }
        if new.payer.is_empty() || new.creator.is_empty() {
            return Err(Error::Validation("payer and creator must be set".into()));
        }

        let record = CallRecord {
            call_id: Uuid::now_v7(),
            payer: new.payer.clone(),
            creator: new.creator.clone(),
            rate_milli_per_second: new.rate_milli_per_second,
            status: CallStatus::Active,
            start_time: Utc::now(),
            end_time: None,
            seconds_billed: 0,
            credits_spent_milli: 0,
        };

        let mut batch = WriteBatch::default();
        self.stage_call(&mut batch, &record)?;
        self.db.write(batch)?;

        Ok(record)
    }

    /// Charge a call's payer for `seconds` whole seconds, atomically.
    ///
    /// The charge is bounded by the payer balance: `charge = min(balance,
    /// seconds * rate)`, `seconds_billed = floor(charge / rate)`. Balance
    /// debit and call-record accumulation commit in one batch. A terminal
    /// call record is refused, which closes the stop/tick race.
    pub fn bill_call_seconds(&self, call_id: Uuid, seconds: u64) -> Result<TickOutcome> {
        if seconds == 0 {
            return Err(Error::Validation("seconds must be positive".into()));
        }

        let mut record = self.call(call_id)?;
        if record.status != CallStatus::Active {
            return Err(Error::CallNotActive(call_id.to_string()));
        }

        let balance = self.balance(&record.payer)?;
        if balance <= 0 {
            return Ok(TickOutcome {
                charged_milli: 0,
                seconds_billed: 0,
                balance_after: 0,
                call_seconds_billed: record.seconds_billed,
                call_spent_milli: record.credits_spent_milli,
                exhausted: true,
            });
        }

        let rate = record.rate_milli_per_second;
        let needed = seconds as i64 * rate;
        let charge = balance.min(needed);
        let seconds_billed = (charge / rate) as u64;
        let balance_after = balance - charge;

        record.seconds_billed += seconds_billed;
        record.credits_spent_milli += charge;

        let mut batch = WriteBatch::default();
        self.stage_balance(&mut batch, &record.payer, balance_after)?;
        self.stage_call(&mut batch, &record)?;
        self.db.write(batch)?;

        Ok(TickOutcome {
            charged_milli: charge,
            seconds_billed,
            balance_after,
            call_seconds_billed: record.seconds_billed,
            call_spent_milli: record.credits_spent_milli,
            exhausted: charge < needed,
        })
    }

    /// Finalize a call exactly once.
    ///
    /// Sets `end_time`/`status` only while the record is still ACTIVE; later
    /// calls observe the terminal record and report nothing new. When credits
    /// were spent, the spend audit entry (`ref = call_id`, no balance change:
    /// ticks already debited it) and the creator earning entry
    /// (`ref = "earn:" + call_id`) land in the same batch as the status flip.
    /// The earning basis is whole billed seconds; a final partial charge
    /// stays with the platform.
    pub fn finalize_call(&self, call_id: Uuid, status: CallStatus) -> Result<CallClose> {
        if !status.is_terminal() {
            return Err(Error::Validation(
                "finalize requires a terminal status".into(),
            ));
        }

        let mut record = self.call(call_id)?;
        if record.status.is_terminal() {
            return Ok(CallClose {
                record,
                spend_recorded: false,
                earning_recorded: false,
                earned_milli: 0,
            });
        }

        record.status = status;
        record.end_time = Some(Utc::now());

        let mut batch = WriteBatch::default();
        self.stage_call(&mut batch, &record)?;

        let mut spend_recorded = false;
        let mut earning_recorded = false;
        let mut earned_milli = 0i64;

        if record.credits_spent_milli > 0 {
            let spend_ref = call_id.to_string();
            if self.entry_id_by_ref(&spend_ref)?.is_none() {
                let spend = Self::build_entry(
                    &NewEntry::new(
                        record.payer.clone(),
                        EntryKind::Spend,
                        -record.credits_spent_milli,
                        None,
                        spend_ref,
                    ),
                    -record.credits_spent_milli,
                );
                self.stage_entry(&mut batch, &spend)?;
                spend_recorded = true;
            }

            let earn_ref = format!("earn:{}", call_id);
            if self.entry_id_by_ref(&earn_ref)?.is_none() {
                let billed_milli = record.seconds_billed as i64 * record.rate_milli_per_second;
                earned_milli = pricing::creator_share_milli(billed_milli);

                let earning = Self::build_entry(
                    &NewEntry::new(
                        record.creator.clone(),
                        EntryKind::Earning,
                        earned_milli,
                        None,
                        earn_ref,
                    ),
                    earned_milli,
                );
                self.stage_entry(&mut batch, &earning)?;

                let mut creator = self.creator_account(&record.creator)?;
                creator.earned_milli += earned_milli;
                self.stage_creator(&mut batch, &record.creator, &creator)?;
                earning_recorded = true;
            }
        }

        self.db.write(batch)?;

        tracing::info!(
            call_id = %call_id,
            status = %record.status,
            seconds_billed = record.seconds_billed,
            spent_milli = record.credits_spent_milli,
            earned_milli,
            "Call finalized"
        );

        Ok(CallClose {
            record,
            spend_recorded,
            earning_recorded,
            earned_milli,
        })
    }

    /// Create a payout request, validating available balance in-transaction.
    ///
    /// `available = earned − paid_out − Σ(REQUESTED amounts)`; the pending sum
    /// is computed under the same writer that inserts the request, so two
    /// requests can never jointly authorize more than is available.
    pub fn create_payout(&self, new: &NewPayout) -> Result<PayoutRequest> {
        if new.amount_milli <= 0 {
            return Err(Error::Validation("payout amount must be positive".into()));
        }

        let creator = self.creator_account(&new.creator)?;
        let pending = self.pending_payout_milli(&new.creator)?;
        let available = (creator.earned_milli - creator.paid_out_milli - pending).max(0);
        if new.amount_milli > available {
            return Err(Error::InsufficientBalance);
        }

        let request = PayoutRequest {
            request_id: Uuid::now_v7(),
            creator: new.creator.clone(),
            destination: new.destination.clone(),
            method: new.method,
            amount_milli: new.amount_milli,
            status: PayoutStatus::Requested,
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_PAYOUTS)?,
            request.request_id.as_bytes(),
            &bincode::serialize(&request)?,
        );
        batch.put_cf(
            self.cf_handle(CF_INDICES)?,
            &Self::index_key_creator_payout(&new.creator, request.request_id),
            &[],
        );
        self.db.write(batch)?;

        Ok(request)
    }

    /// Transition a payout request REQUESTED → SENT.
    ///
    /// The status guard prevents double-fulfilment under concurrent operator
    /// actions; `paid_out` and the audit entry commit with the flip.
    pub fn fulfill_payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        let mut request = self.payout(request_id)?;
        if request.status != PayoutStatus::Requested {
            return Err(Error::Validation(format!(
                "payout {} is not in REQUESTED status",
                request_id
            )));
        }

        request.status = PayoutStatus::Sent;

        let mut creator = self.creator_account(&request.creator)?;
        creator.paid_out_milli += request.amount_milli;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf_handle(CF_PAYOUTS)?,
            request.request_id.as_bytes(),
            &bincode::serialize(&request)?,
        );
        self.stage_creator(&mut batch, &request.creator, &creator)?;

        let audit_ref = format!("payout:{}:sent", request_id);
        if self.entry_id_by_ref(&audit_ref)?.is_none() {
            let mut new_entry = NewEntry::new(
                request.creator.clone(),
                EntryKind::Adjust,
                -request.amount_milli,
                Some(pricing::milli_to_usd_cents(request.amount_milli)),
                audit_ref,
            );
            new_entry
                .metadata
                .insert("destination".to_string(), request.destination.clone());
            let entry = Self::build_entry(&new_entry, -request.amount_milli);
            self.stage_entry(&mut batch, &entry)?;
        }

        self.db.write(batch)?;

        tracing::info!(
            request_id = %request_id,
            creator = %request.creator,
            amount_milli = request.amount_milli,
            "Payout fulfilled"
        );

        Ok(request)
    }

    /// Register the wallet an account claims on-chain purchases from
    pub fn set_wallet(&self, account: &AccountId, wallet: &str) -> Result<()> {
        let mut profile = self.profile(account)?;
        profile.wallet = Some(wallet.trim().to_ascii_lowercase());
        self.put_profile(account, &profile)
    }

    /// Set or clear the frozen flag on an account profile
    pub fn set_frozen(
        &self,
        account: &AccountId,
        frozen: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let mut profile = self.profile(account)?;
        profile.frozen = frozen;
        profile.frozen_reason = if frozen { reason } else { None };
        self.put_profile(account, &profile)
    }

    fn put_profile(&self, account: &AccountId, profile: &AccountProfile) -> Result<()> {
        self.db.put_cf(
            self.cf_handle(CF_ACCOUNTS)?,
            account.as_str().as_bytes(),
            bincode::serialize(profile)?,
        )?;
        Ok(())
    }

    /// Record that an inbound event id has been fully processed
    pub fn mark_event_processed(&self, event_id: &str, event_type: &str) -> Result<()> {
        let record = ProcessedEventRecord {
            event_type: event_type.to_string(),
            processed_at: Utc::now(),
        };
        self.db.put_cf(
            self.cf_handle(CF_EVENTS)?,
            event_id.as_bytes(),
            bincode::serialize(&record)?,
        )?;
        Ok(())
    }

    /// Check the global inbound-event guard
    pub fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self
            .db
            .get_cf(self.cf_handle(CF_EVENTS)?, event_id.as_bytes())?
            .is_some())
    }

    // Reads

    /// Current credit balance (0 for unknown accounts)
    pub fn balance(&self, account: &AccountId) -> Result<i64> {
        match self
            .db
            .get_cf(self.cf_handle(CF_BALANCES)?, account.as_str().as_bytes())?
        {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(0),
        }
    }

    /// Get ledger entry by ID
    pub fn entry(&self, entry_id: Uuid) -> Result<LedgerEntry> {
        let value = self
            .db
            .get_cf(self.cf_handle(CF_ENTRIES)?, entry_id.as_bytes())?
            .ok_or_else(|| Error::Storage(format!("Entry not found: {}", entry_id)))?;
        Ok(bincode::deserialize(&value)?)
    }

    fn entry_id_by_ref(&self, idempotency_ref: &str) -> Result<Option<Uuid>> {
        match self
            .db
            .get_cf(self.cf_handle(CF_REFS)?, idempotency_ref.as_bytes())?
        {
            Some(value) => {
                let bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed ref index value".into()))?;
                Ok(Some(Uuid::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Get the ledger entry holding a ref, if any
    pub fn entry_by_ref(&self, idempotency_ref: &str) -> Result<Option<LedgerEntry>> {
        match self.entry_id_by_ref(idempotency_ref)? {
            Some(entry_id) => Ok(Some(self.entry(entry_id)?)),
            None => Ok(None),
        }
    }

    /// All ledger entries for an account (via index, time-ordered by UUIDv7)
    pub fn account_entries(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(IDX_ACCOUNT_ENTRY, account);

        let mut entries = Vec::new();
        for item in self.db.prefix_iterator_cf(cf_indices, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed entry index key".into()))?;
            entries.push(self.entry(Uuid::from_bytes(id_bytes))?);
        }

        Ok(entries)
    }

    /// Get call record by ID
    pub fn call(&self, call_id: Uuid) -> Result<CallRecord> {
        let value = self
            .db
            .get_cf(self.cf_handle(CF_CALLS)?, call_id.as_bytes())?
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All call records still in ACTIVE status (restart sweep)
    pub fn active_calls(&self) -> Result<Vec<CallRecord>> {
        let cf = self.cf_handle(CF_CALLS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: CallRecord = bincode::deserialize(&value)?;
            if record.status == CallStatus::Active {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Creator earnings aggregates (zeros for unknown accounts)
    pub fn creator_account(&self, account: &AccountId) -> Result<CreatorAccount> {
        match self
            .db
            .get_cf(self.cf_handle(CF_CREATORS)?, account.as_str().as_bytes())?
        {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(CreatorAccount::default()),
        }
    }

    /// Sum of a creator's REQUESTED payout amounts
    pub fn pending_payout_milli(&self, creator: &AccountId) -> Result<i64> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_prefix(IDX_CREATOR_PAYOUT, creator);

        let mut pending = 0i64;
        for item in self.db.prefix_iterator_cf(cf_indices, &prefix) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed payout index key".into()))?;
            let request = self.payout(Uuid::from_bytes(id_bytes))?;
            if request.status == PayoutStatus::Requested {
                pending += request.amount_milli;
            }
        }

        Ok(pending)
    }

    /// Get payout request by ID
    pub fn payout(&self, request_id: Uuid) -> Result<PayoutRequest> {
        let value = self
            .db
            .get_cf(self.cf_handle(CF_PAYOUTS)?, request_id.as_bytes())?
            .ok_or_else(|| Error::PayoutNotFound(request_id.to_string()))?;
        Ok(bincode::deserialize(&value)?)
    }

    /// All payout requests with a given status
    pub fn payouts_with_status(&self, status: PayoutStatus) -> Result<Vec<PayoutRequest>> {
        let cf = self.cf_handle(CF_PAYOUTS)?;
        let mut requests = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let request: PayoutRequest = bincode::deserialize(&value)?;
            if request.status == status {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    /// Account profile (defaults for unknown accounts)
    pub fn profile(&self, account: &AccountId) -> Result<AccountProfile> {
        match self
            .db
            .get_cf(self.cf_handle(CF_ACCOUNTS)?, account.as_str().as_bytes())?
        {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(AccountProfile::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn purchase(account: &str, milli: i64, idempotency_ref: &str) -> NewEntry {
        NewEntry::new(
            AccountId::new(account),
            EntryKind::Purchase,
            milli,
            Some(pricing::milli_to_usd_cents(milli)),
            idempotency_ref,
        )
    }

    #[test]
    fn test_apply_entry_and_balance() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("payer-1");

        let applied = storage.apply_entry(&purchase("payer-1", 60_000, "tx-1"), false).unwrap();
        assert!(applied.newly_applied);
        assert_eq!(applied.balance_after, 60_000);
        assert_eq!(storage.balance(&account).unwrap(), 60_000);

        let entry = storage.entry_by_ref("tx-1").unwrap().unwrap();
        assert_eq!(entry.delta_milli, 60_000);
        assert_eq!(entry.kind, EntryKind::Purchase);
    }

    #[test]
    fn test_duplicate_ref_absorbed() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("payer-1");

        let first = storage.apply_entry(&purchase("payer-1", 60_000, "tx-1"), false).unwrap();
        let second = storage.apply_entry(&purchase("payer-1", 60_000, "tx-1"), false).unwrap();

        assert!(!second.newly_applied);
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.balance_after, 60_000);
        assert_eq!(storage.balance(&account).unwrap(), 60_000);
        assert_eq!(storage.account_entries(&account).unwrap().len(), 1);
    }

    #[test]
    fn test_bounded_debit_clamps_at_zero() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("payer-1");

        storage.apply_entry(&purchase("payer-1", 1000, "tx-1"), false).unwrap();

        let refund = NewEntry::new(account.clone(), EntryKind::Refund, -5000, Some(8), "refund-1");
        let applied = storage.apply_entry(&refund, true).unwrap();
        assert!(applied.newly_applied);
        assert_eq!(applied.balance_after, 0);

        // the stored entry records the clamped delta
        let entry = storage.entry_by_ref("refund-1").unwrap().unwrap();
        assert_eq!(entry.delta_milli, -1000);
    }

    #[test]
    fn test_unbounded_overdraft_rejected() {
        let (storage, _temp) = test_storage();
        storage.apply_entry(&purchase("payer-1", 1000, "tx-1"), false).unwrap();

        let debit = NewEntry::new(AccountId::new("payer-1"), EntryKind::Adjust, -5000, None, "adj-1");
        let result = storage.apply_entry(&debit, false);
        assert!(matches!(result, Err(Error::InsufficientBalance)));
        assert_eq!(storage.balance(&AccountId::new("payer-1")).unwrap(), 1000);
    }

    #[test]
    fn test_bill_call_seconds_scenario() {
        // rate 1000 milli/sec, balance 2500: two full seconds then a partial
        let (storage, _temp) = test_storage();
        storage.apply_entry(&purchase("payer-1", 2500, "tx-1"), false).unwrap();

        let call = storage
            .create_call(&NewCall {
                payer: AccountId::new("payer-1"),
                creator: AccountId::new("creator-1"),
                rate_milli_per_second: 1000,
            })
            .unwrap();

        let tick1 = storage.bill_call_seconds(call.call_id, 1).unwrap();
        assert_eq!(tick1.charged_milli, 1000);
        assert_eq!(tick1.balance_after, 1500);
        assert_eq!(tick1.call_seconds_billed, 1);
        assert!(!tick1.exhausted);

        let tick2 = storage.bill_call_seconds(call.call_id, 1).unwrap();
        assert_eq!(tick2.balance_after, 500);
        assert_eq!(tick2.call_seconds_billed, 2);
        assert!(!tick2.exhausted);

        let tick3 = storage.bill_call_seconds(call.call_id, 1).unwrap();
        assert_eq!(tick3.charged_milli, 500);
        assert_eq!(tick3.seconds_billed, 0);
        assert_eq!(tick3.balance_after, 0);
        assert_eq!(tick3.call_seconds_billed, 2);
        assert_eq!(tick3.call_spent_milli, 2500);
        assert!(tick3.exhausted);
    }

    #[test]
    fn test_finalize_call_once() {
        let (storage, _temp) = test_storage();
        storage.apply_entry(&purchase("payer-1", 2500, "tx-1"), false).unwrap();

        let call = storage
            .create_call(&NewCall {
                payer: AccountId::new("payer-1"),
                creator: AccountId::new("creator-1"),
                rate_milli_per_second: 1000,
            })
            .unwrap();

        storage.bill_call_seconds(call.call_id, 2).unwrap();
        storage.bill_call_seconds(call.call_id, 1).unwrap();

        let close = storage
            .finalize_call(call.call_id, CallStatus::KilledInsufficientCredits)
            .unwrap();
        assert!(close.spend_recorded);
        assert!(close.earning_recorded);
        // earning basis is whole billed seconds: floor(2000 * 0.8)
        assert_eq!(close.earned_milli, 1600);

        let creator = storage.creator_account(&AccountId::new("creator-1")).unwrap();
        assert_eq!(creator.earned_milli, 1600);

        // spend audit entry does not re-debit the balance
        assert_eq!(storage.balance(&AccountId::new("payer-1")).unwrap(), 0);
        let spend = storage.entry_by_ref(&call.call_id.to_string()).unwrap().unwrap();
        assert_eq!(spend.delta_milli, -2500);

        // repeated finalize reports nothing new and keeps the first status
        let again = storage.finalize_call(call.call_id, CallStatus::Ended).unwrap();
        assert!(!again.spend_recorded);
        assert!(!again.earning_recorded);
        assert_eq!(again.record.status, CallStatus::KilledInsufficientCredits);

        // billing a finalized call is refused
        let result = storage.bill_call_seconds(call.call_id, 1);
        assert!(matches!(result, Err(Error::CallNotActive(_))));
    }

    #[test]
    fn test_payout_lifecycle() {
        let (storage, _temp) = test_storage();
        let creator = AccountId::new("creator-1");

        // seed earnings through a billed call
        storage.apply_entry(&purchase("payer-1", 60_000, "tx-1"), false).unwrap();
        let call = storage
            .create_call(&NewCall {
                payer: AccountId::new("payer-1"),
                creator: creator.clone(),
                rate_milli_per_second: 1000,
            })
            .unwrap();
        storage.bill_call_seconds(call.call_id, 10).unwrap();
        storage.finalize_call(call.call_id, CallStatus::Ended).unwrap();
        // earned = floor(10_000 * 0.8)
        assert_eq!(storage.creator_account(&creator).unwrap().earned_milli, 8000);

        let request = storage
            .create_payout(&NewPayout {
                creator: creator.clone(),
                amount_milli: 5000,
                destination: "0xabc0000000000000".to_string(),
                method: crate::types::PayoutMethod::Crypto,
            })
            .unwrap();
        assert_eq!(request.status, PayoutStatus::Requested);
        assert_eq!(storage.pending_payout_milli(&creator).unwrap(), 5000);

        // a second request cannot exceed what is left after the reservation
        let too_much = storage.create_payout(&NewPayout {
            creator: creator.clone(),
            amount_milli: 4000,
            destination: "0xabc0000000000000".to_string(),
            method: crate::types::PayoutMethod::Crypto,
        });
        assert!(matches!(too_much, Err(Error::InsufficientBalance)));

        let sent = storage.fulfill_payout(request.request_id).unwrap();
        assert_eq!(sent.status, PayoutStatus::Sent);
        let account = storage.creator_account(&creator).unwrap();
        assert_eq!(account.paid_out_milli, 5000);
        assert_eq!(storage.pending_payout_milli(&creator).unwrap(), 0);

        // double fulfilment is refused by the status guard
        let again = storage.fulfill_payout(request.request_id);
        assert!(matches!(again, Err(Error::Validation(_))));
    }

    #[test]
    fn test_event_guard() {
        let (storage, _temp) = test_storage();
        assert!(!storage.is_event_processed("evt-1").unwrap());
        storage.mark_event_processed("evt-1", "checkout_completed").unwrap();
        assert!(storage.is_event_processed("evt-1").unwrap());
    }

    #[test]
    fn test_profile_wallet_and_freeze() {
        let (storage, _temp) = test_storage();
        let account = AccountId::new("payer-1");

        storage.set_wallet(&account, "0xAbCd00000000000000000000000000000000EF12").unwrap();
        let profile = storage.profile(&account).unwrap();
        assert_eq!(
            profile.wallet.as_deref(),
            Some("0xabcd00000000000000000000000000000000ef12")
        );

        storage.set_frozen(&account, true, Some("dispute opened".into())).unwrap();
        assert!(storage.profile(&account).unwrap().frozen);

        storage.set_frozen(&account, false, None).unwrap();
        let profile = storage.profile(&account).unwrap();
        assert!(!profile.frozen);
        assert!(profile.frozen_reason.is_none());
    }
}
