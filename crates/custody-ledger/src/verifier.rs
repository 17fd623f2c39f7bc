//! ChainVerifier: recomputes hashes and link continuity for a shipment chain.
//!
//! Integrity findings are data, not errors: a tampered chain yields a normal
//! [`ChainVerificationResult`] with `is_valid = false` and the offending ids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use custody_ledger_core::{
    event::rfc3339_millis, Blake3Hash, Event, EventId, ShipmentId, GENESIS_HASH,
};
use custody_ledger_store::{EventStore, VerificationRecord};

use crate::error::{LedgerError, Result};

/// Outcome of walking one shipment chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerificationResult {
    pub shipment_id: ShipmentId,
    pub is_valid: bool,
    pub event_count: u64,
    #[serde(with = "rfc3339_millis::option")]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(with = "rfc3339_millis::option")]
    pub last_event_at: Option<DateTime<Utc>>,
    /// Events whose `previousHash` does not match the prior event's stored `dataHash`.
    pub broken_links: Vec<EventId>,
    /// Events whose recomputed `dataHash` differs from the stored one.
    pub invalid_hashes: Vec<EventId>,
    #[serde(with = "rfc3339_millis")]
    pub verified_at: DateTime<Utc>,
}

/// Cooperative cancellation flag shared between a caller and a running walk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Verifies shipment chains against a store.
pub struct ChainVerifier<'a, S: EventStore + ?Sized> {
    store: &'a S,
    cancel_check_interval: usize,
}

impl<'a, S: EventStore + ?Sized> ChainVerifier<'a, S> {
    pub fn new(store: &'a S, cancel_check_interval: usize) -> Self {
        Self {
            store,
            cancel_check_interval: cancel_check_interval.max(1),
        }
    }

    /// Verify a shipment chain and persist the outcome.
    ///
    /// The chain is read once; that snapshot is what gets checked and, on
    /// success, exactly the snapshot's events are marked verified. Events
    /// appended after the read are left untouched.
    pub async fn verify(
        &self,
        shipment_id: &ShipmentId,
        verified_at: DateTime<Utc>,
        cancel: Option<&CancelToken>,
    ) -> Result<ChainVerificationResult> {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(LedgerError::Cancelled);
        }

        let snapshot = self.store.shipment_events(shipment_id).await?;

        let mut walk = ChainWalk::new();
        for (i, event) in snapshot.iter().enumerate() {
            if i % self.cancel_check_interval == 0 && cancel.is_some_and(CancelToken::is_cancelled) {
                tracing::warn!(shipment_id = %shipment_id, checked = i, "verification cancelled");
                return Err(LedgerError::Cancelled);
            }
            walk.step(event);
        }
        let result = walk.finish(shipment_id, &snapshot, verified_at);

        if result.event_count == 0 {
            return Ok(result);
        }

        if result.is_valid {
            let ids: Vec<EventId> = snapshot.iter().map(Event::id).collect();
            let marked = self.store.mark_verified(shipment_id, &ids).await?;
            tracing::info!(
                shipment_id = %shipment_id,
                event_count = result.event_count,
                newly_verified = marked,
                "chain verified"
            );
        } else {
            tracing::warn!(
                shipment_id = %shipment_id,
                event_count = result.event_count,
                broken_links = result.broken_links.len(),
                invalid_hashes = result.invalid_hashes.len(),
                "chain integrity check failed"
            );
        }

        self.store
            .record_verification(
                shipment_id,
                VerificationRecord {
                    is_valid: result.is_valid,
                    event_count: result.event_count,
                    verified_at,
                },
            )
            .await?;

        Ok(result)
    }

    /// Check events already in chain order. No store access.
    pub fn check(
        shipment_id: &ShipmentId,
        events: &[Event],
        verified_at: DateTime<Utc>,
    ) -> ChainVerificationResult {
        check_chain(shipment_id, events, verified_at)
    }
}

/// Walk events in chain order. Pure.
pub fn check_chain(
    shipment_id: &ShipmentId,
    events: &[Event],
    verified_at: DateTime<Utc>,
) -> ChainVerificationResult {
    let mut walk = ChainWalk::new();
    for event in events {
        walk.step(event);
    }
    walk.finish(shipment_id, events, verified_at)
}

/// Incremental state of a chain walk.
struct ChainWalk {
    expected_previous: Blake3Hash,
    broken_links: Vec<EventId>,
    invalid_hashes: Vec<EventId>,
}

impl ChainWalk {
    fn new() -> Self {
        Self {
            expected_previous: GENESIS_HASH,
            broken_links: Vec::new(),
            invalid_hashes: Vec::new(),
        }
    }

    fn step(&mut self, event: &Event) {
        if event.recompute_data_hash() != *event.data_hash() {
            self.invalid_hashes.push(event.id());
        }
        // Links are checked against the stored hash, not the recomputed one
        if *event.previous_hash() != self.expected_previous {
            self.broken_links.push(event.id());
        }
        self.expected_previous = *event.data_hash();
    }

    fn finish(
        self,
        shipment_id: &ShipmentId,
        events: &[Event],
        verified_at: DateTime<Utc>,
    ) -> ChainVerificationResult {
        ChainVerificationResult {
            shipment_id: shipment_id.clone(),
            is_valid: self.broken_links.is_empty() && self.invalid_hashes.is_empty(),
            event_count: events.len() as u64,
            first_event_at: events.first().map(Event::timestamp),
            last_event_at: events.last().map(Event::timestamp),
            broken_links: self.broken_links,
            invalid_hashes: self.invalid_hashes,
            verified_at,
        }
    }
}
