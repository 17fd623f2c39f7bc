//! HashChainBuilder: links new events onto a shipment's chain.
//!
//! Appends to one shipment are serialized through [`ShipmentLocks`], so two
//! concurrent builds can never read the same head and fork the chain.
//! Different shipments never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

use custody_ledger_core::{
    event::{rfc3339_millis, truncate_to_millis},
    validate_content, Event, EventContent, ShipmentId, ValidationError, GENESIS_HASH,
};
use custody_ledger_store::{AppendResult, EventStore};

use crate::clock::Clock;
use crate::error::{LedgerError, Result};

/// Per-shipment exclusive sections.
///
/// Entries are created on demand and dropped once no task holds or awaits
/// them, so the map only grows with concurrently active shipments.
#[derive(Debug, Default)]
pub struct ShipmentLocks {
    locks: Mutex<HashMap<ShipmentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ShipmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<ShipmentId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to a shipment's chain.
    pub async fn lock(&self, shipment_id: &ShipmentId) -> ShipmentGuard<'_> {
        let mutex = self.map().entry(shipment_id.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        ShipmentGuard {
            locks: self,
            shipment_id: shipment_id.clone(),
            guard: Some(guard),
        }
    }

    /// Number of shipments with a live lock entry.
    pub fn active(&self) -> usize {
        self.map().len()
    }

    fn release(&self, shipment_id: &ShipmentId) {
        let mut map = self.map();
        if map
            .get(shipment_id)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(shipment_id);
        }
    }
}

/// Holds a shipment's exclusive section until dropped.
pub struct ShipmentGuard<'a> {
    locks: &'a ShipmentLocks,
    shipment_id: ShipmentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ShipmentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.shipment_id);
    }
}

/// Builds and appends chained events.
pub struct HashChainBuilder<'a, S: EventStore + ?Sized> {
    store: &'a S,
    locks: &'a ShipmentLocks,
}

impl<'a, S: EventStore + ?Sized> HashChainBuilder<'a, S> {
    pub fn new(store: &'a S, locks: &'a ShipmentLocks) -> Self {
        Self { store, locks }
    }

    /// Validate `content`, link it to its shipment's chain head, and append it.
    ///
    /// The head read, hash computation and append all happen inside the
    /// shipment's exclusive section. A failed append leaves nothing visible.
    pub async fn build(&self, content: EventContent) -> Result<Event> {
        self.append(content, None).await
    }

    /// Like [`build`](Self::build), but stamps the event with `clock` once the
    /// shipment's exclusive section is held, so concurrent writers stamp in
    /// the order they append.
    pub async fn build_stamped(&self, content: EventContent, clock: &dyn Clock) -> Result<Event> {
        self.append(content, Some(clock)).await
    }

    async fn append(&self, mut content: EventContent, clock: Option<&dyn Clock>) -> Result<Event> {
        validate_content(&content)?;

        let shipment_id = content.shipment_id.clone();
        let _section = self.locks.lock(&shipment_id).await;

        if let Some(clock) = clock {
            content.timestamp = truncate_to_millis(clock.now());
        }

        let head = self.store.chain_head(&shipment_id).await.map_err(|e| {
            tracing::error!(shipment_id = %shipment_id, error = %e, "failed to read chain head");
            e
        })?;

        let previous_hash = match &head {
            Some(head) => {
                if content.timestamp < head.timestamp() {
                    return Err(ValidationError::OutOfOrder {
                        head: rfc3339_millis::format(&head.timestamp()),
                        got: rfc3339_millis::format(&content.timestamp),
                    }
                    .into());
                }
                *head.data_hash()
            }
            None => GENESIS_HASH,
        };

        let sequence = self.store.next_sequence().await?;
        let event = Event::link(content, previous_hash, sequence);

        match self.store.append(&event).await {
            Ok(AppendResult::Appended) => {
                tracing::debug!(
                    shipment_id = %shipment_id,
                    event_id = %event.id(),
                    sequence,
                    event_type = %event.event_type(),
                    "appended event"
                );
                Ok(event)
            }
            Ok(AppendResult::AlreadyExists) => {
                tracing::warn!(event_id = %event.id(), "duplicate event id rejected");
                Err(LedgerError::DuplicateEvent(event.id()))
            }
            Ok(AppendResult::Conflict { expected_previous }) => {
                tracing::warn!(
                    shipment_id = %shipment_id,
                    expected_previous = %expected_previous,
                    "append conflicted with chain head"
                );
                Err(LedgerError::ChainConflict {
                    shipment_id,
                    expected_previous,
                })
            }
            Err(e) => {
                tracing::error!(shipment_id = %shipment_id, error = %e, "append failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use custody_ledger_core::{
        Actor, ActorType, Blake3Hash, EventBuilder, EventId, EventType, Location, LocationType,
    };
    use custody_ledger_store::{
        EventFilter, EventPage, LedgerCounts, MemoryStore, ShipmentSummary, StoreError,
        VerificationRecord,
    };

    fn content(shipment: &str, kind: EventType, ms: i64) -> EventContent {
        EventBuilder::new(
            shipment,
            kind,
            Actor::new("u-1", ActorType::User, "Clerk"),
            Location::new("Hub", LocationType::Facility),
        )
        .timestamp_millis(ms)
        .build()
    }

    #[tokio::test]
    async fn test_links_to_genesis_then_head() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        let e1 = builder.build(content("SH-1", EventType::Created, 1_000)).await.unwrap();
        let e2 = builder.build(content("SH-1", EventType::Dispatched, 2_000)).await.unwrap();
        let other = builder.build(content("SH-2", EventType::Created, 1_500)).await.unwrap();

        assert_eq!(*e1.previous_hash(), GENESIS_HASH);
        assert_eq!(*e2.previous_hash(), *e1.data_hash());
        assert_eq!(*other.previous_hash(), GENESIS_HASH);
        assert!(e1.sequence() < e2.sequence());
        assert_ne!(e1.transaction_hash(), e2.transaction_hash());
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_content_distinct_transactions() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        // Identical content on two shipments still yields unique transaction hashes
        let mut a = content("SH-A", EventType::Created, 1_000);
        a.id = EventId::from_u128(1);
        let mut b = a.clone();
        b.id = EventId::from_u128(2);
        b.shipment_id = "SH-B".into();

        let ea = builder.build(a).await.unwrap();
        let eb = builder.build(b).await.unwrap();
        assert_ne!(ea.transaction_hash(), eb.transaction_hash());
    }

    #[tokio::test]
    async fn test_rejects_out_of_order() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        builder.build(content("SH-1", EventType::Created, 5_000)).await.unwrap();
        let err = builder
            .build(content("SH-1", EventType::Dispatched, 4_999))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::OutOfOrder { .. })
        ));

        // Equal timestamps are fine
        builder.build(content("SH-1", EventType::Checkpoint, 5_000)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stamped_build_uses_clock_under_lock() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);
        let clock = crate::clock::FixedClock::at_millis(7_000);

        let event = builder
            .build_stamped(content("SH-1", EventType::Created, 1), &clock)
            .await
            .unwrap();
        assert_eq!(event.content.timestamp_millis(), 7_000);
        assert_eq!(*event.data_hash(), event.recompute_data_hash());
    }

    #[tokio::test]
    async fn test_rejects_invalid_content() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        let err = builder.build(content("", EventType::Created, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Validation(ValidationError::EmptyShipmentId)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_id() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        let c = content("SH-1", EventType::Created, 1_000);
        builder.build(c.clone()).await.unwrap();
        let err = builder.build(c.clone()).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEvent(id) if id == c.id));
    }

    /// A store whose appends always fail.
    struct FailingAppends(MemoryStore);

    #[async_trait]
    impl EventStore for FailingAppends {
        async fn append(&self, _event: &Event) -> custody_ledger_store::Result<AppendResult> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }
        async fn next_sequence(&self) -> custody_ledger_store::Result<u64> {
            self.0.next_sequence().await
        }
        async fn chain_head(&self, s: &ShipmentId) -> custody_ledger_store::Result<Option<Event>> {
            self.0.chain_head(s).await
        }
        async fn shipment_events(&self, s: &ShipmentId) -> custody_ledger_store::Result<Vec<Event>> {
            self.0.shipment_events(s).await
        }
        async fn get_event(&self, id: &EventId) -> custody_ledger_store::Result<Option<Event>> {
            self.0.get_event(id).await
        }
        async fn get_by_transaction_hash(
            &self,
            hash: &Blake3Hash,
        ) -> custody_ledger_store::Result<Option<Event>> {
            self.0.get_by_transaction_hash(hash).await
        }
        async fn query(
            &self,
            filter: &EventFilter,
            offset: u64,
            limit: u64,
        ) -> custody_ledger_store::Result<EventPage> {
            self.0.query(filter, offset, limit).await
        }
        async fn list_shipments(&self) -> custody_ledger_store::Result<Vec<ShipmentSummary>> {
            self.0.list_shipments().await
        }
        async fn mark_verified(
            &self,
            s: &ShipmentId,
            ids: &[EventId],
        ) -> custody_ledger_store::Result<u64> {
            self.0.mark_verified(s, ids).await
        }
        async fn record_verification(
            &self,
            s: &ShipmentId,
            record: VerificationRecord,
        ) -> custody_ledger_store::Result<()> {
            self.0.record_verification(s, record).await
        }
        async fn latest_verification(
            &self,
            s: &ShipmentId,
        ) -> custody_ledger_store::Result<Option<VerificationRecord>> {
            self.0.latest_verification(s).await
        }
        async fn ledger_counts(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> custody_ledger_store::Result<LedgerCounts> {
            self.0.ledger_counts(start, end).await
        }
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_nothing() {
        let store = FailingAppends(MemoryStore::new());
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);

        let err = builder
            .build(content("SH-1", EventType::Created, 1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        assert!(store.shipment_events(&"SH-1".into()).await.unwrap().is_empty());
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_locks_serialize_same_shipment() {
        let locks = ShipmentLocks::new();
        let shipment: ShipmentId = "SH-1".into();

        let first = locks.lock(&shipment).await;
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.lock(&shipment),
        )
        .await;
        assert!(pending.is_err());

        // A different shipment is not blocked
        let _other = locks.lock(&"SH-2".into()).await;

        drop(first);
        let _again = locks.lock(&shipment).await;
    }
}
