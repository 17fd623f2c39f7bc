//! In-memory implementation of the EventStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use custody_ledger_core::{Blake3Hash, Event, EventId, ShipmentId, GENESIS_HASH};

use crate::error::{Result, StoreError};
use crate::traits::{
    AppendResult, EventFilter, EventPage, EventStore, LedgerCounts, ShipmentSummary,
    VerificationRecord,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Events indexed by id.
    events: HashMap<EventId, Event>,

    /// Transaction hash index: transaction_hash -> event_id.
    transactions: HashMap<Blake3Hash, EventId>,

    /// Per-shipment chains, each kept in chain order.
    chains: BTreeMap<ShipmentId, Vec<EventId>>,

    /// Latest verification per shipment.
    verifications: HashMap<ShipmentId, VerificationRecord>,

    /// Last reserved sequence number.
    last_sequence: u64,
}

impl MemoryStoreInner {
    fn chain(&self, shipment_id: &ShipmentId) -> Vec<Event> {
        self.chains
            .get(shipment_id)
            .map(|ids| ids.iter().filter_map(|id| self.events.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    fn head(&self, shipment_id: &ShipmentId) -> Option<&Event> {
        self.chains
            .get(shipment_id)
            .and_then(|ids| ids.last())
            .and_then(|id| self.events.get(id))
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Overwrite a stored event in place, bypassing every append-only rule.
    ///
    /// Exists for fault injection: integrity tests use it to simulate
    /// tampering with persisted records. Returns false if the id is unknown.
    #[doc(hidden)]
    pub fn overwrite_unchecked(&self, event: Event) -> Result<bool> {
        let mut inner = self.write()?;
        let id = event.id();
        let Some(old) = inner.events.get(&id) else {
            return Ok(false);
        };
        let old_tx = *old.transaction_hash();
        inner.transactions.remove(&old_tx);
        inner.transactions.insert(*event.transaction_hash(), id);
        inner.events.insert(id, event);
        Ok(true)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, event: &Event) -> Result<AppendResult> {
        let mut inner = self.write()?;

        // Idempotent on id
        if inner.events.contains_key(&event.id()) {
            return Ok(AppendResult::AlreadyExists);
        }

        if inner.transactions.contains_key(event.transaction_hash()) {
            return Err(StoreError::InvalidData(format!(
                "duplicate transaction hash {}",
                event.transaction_hash()
            )));
        }

        // Must extend the current head
        let expected_previous = inner
            .head(event.shipment_id())
            .map(|head| *head.data_hash())
            .unwrap_or(GENESIS_HASH);
        if *event.previous_hash() != expected_previous {
            return Ok(AppendResult::Conflict { expected_previous });
        }

        let id = event.id();
        inner.transactions.insert(*event.transaction_hash(), id);
        inner.last_sequence = inner.last_sequence.max(event.sequence());
        inner.events.insert(id, event.clone());

        let MemoryStoreInner { chains, events, .. } = &mut *inner;
        let chain = chains.entry(event.shipment_id().clone()).or_default();
        let pos = chain.partition_point(|existing| {
            events
                .get(existing)
                .map(|e| Event::chain_order(e, event).is_le())
                .unwrap_or(true)
        });
        chain.insert(pos, id);

        Ok(AppendResult::Appended)
    }

    async fn next_sequence(&self) -> Result<u64> {
        let mut inner = self.write()?;
        inner.last_sequence += 1;
        Ok(inner.last_sequence)
    }

    async fn chain_head(&self, shipment_id: &ShipmentId) -> Result<Option<Event>> {
        let inner = self.read()?;
        Ok(inner.head(shipment_id).cloned())
    }

    async fn shipment_events(&self, shipment_id: &ShipmentId) -> Result<Vec<Event>> {
        let inner = self.read()?;
        Ok(inner.chain(shipment_id))
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<Event>> {
        let inner = self.read()?;
        Ok(inner.events.get(id).cloned())
    }

    async fn get_by_transaction_hash(&self, hash: &Blake3Hash) -> Result<Option<Event>> {
        let inner = self.read()?;
        Ok(inner
            .transactions
            .get(hash)
            .and_then(|id| inner.events.get(id))
            .cloned())
    }

    async fn query(&self, filter: &EventFilter, offset: u64, limit: u64) -> Result<EventPage> {
        let inner = self.read()?;

        let mut matched: Vec<&Event> = inner.events.values().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| Event::chain_order(b, a));

        let total = matched.len() as u64;
        let events = matched
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(EventPage { events, total })
    }

    async fn list_shipments(&self) -> Result<Vec<ShipmentSummary>> {
        let inner = self.read()?;

        let summaries = inner
            .chains
            .iter()
            .filter_map(|(shipment_id, ids)| {
                let first = ids.first().and_then(|id| inner.events.get(id))?;
                let last = ids.last().and_then(|id| inner.events.get(id))?;
                Some(ShipmentSummary {
                    shipment_id: shipment_id.clone(),
                    event_count: ids.len() as u64,
                    first_event_at: first.timestamp(),
                    last_event_at: last.timestamp(),
                    head_hash: *last.data_hash(),
                    last_verification: inner.verifications.get(shipment_id).copied(),
                })
            })
            .collect();

        Ok(summaries)
    }

    async fn mark_verified(&self, shipment_id: &ShipmentId, ids: &[EventId]) -> Result<u64> {
        let mut inner = self.write()?;
        let mut changed = 0;
        for id in ids {
            if let Some(event) = inner.events.get_mut(id) {
                if event.shipment_id() == shipment_id && !event.verified {
                    event.verified = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn record_verification(
        &self,
        shipment_id: &ShipmentId,
        record: VerificationRecord,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner.verifications.insert(shipment_id.clone(), record);
        Ok(())
    }

    async fn latest_verification(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<Option<VerificationRecord>> {
        let inner = self.read()?;
        Ok(inner.verifications.get(shipment_id).copied())
    }

    async fn ledger_counts(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<LedgerCounts> {
        let inner = self.read()?;

        let mut counts = LedgerCounts {
            total_events: inner.events.len() as u64,
            total_shipments: inner.chains.len() as u64,
            ..Default::default()
        };

        let window = window_start.timestamp_millis()..window_end.timestamp_millis();
        for event in inner.events.values() {
            if event.verified {
                counts.verified_events += 1;
            }
            if window.contains(&event.content.timestamp_millis()) {
                counts.events_in_window += 1;
            }
            *counts.events_by_type.entry(event.event_type()).or_insert(0) += 1;
        }

        counts.valid_shipments = inner
            .verifications
            .iter()
            .filter(|(shipment_id, record)| record.is_valid && inner.chains.contains_key(*shipment_id))
            .count() as u64;

        Ok(counts)
    }
}
