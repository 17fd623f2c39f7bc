//! EventStore trait: the abstract interface for event persistence.
//!
//! This trait allows the ledger to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use custody_ledger_core::{
    ActorType, Blake3Hash, Event, EventId, EventType, LocationType, ShipmentId,
};

use crate::error::Result;

/// Result of appending an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Event was appended to its shipment chain.
    Appended,
    /// An event with the same id is already stored. Nothing was written.
    AlreadyExists,
    /// The event does not link to the current chain head. Nothing was written.
    Conflict {
        /// The `dataHash` of the current head (GENESIS for an empty chain).
        expected_previous: Blake3Hash,
    },
}

/// Filters for event search. All set fields must match (AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub shipment_id: Option<ShipmentId>,
    /// Any of these types. Empty means no type filter.
    pub event_types: Vec<EventType>,
    pub actor_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub location_type: Option<LocationType>,
    pub verified: Option<bool>,
    /// Inclusive lower bound on `timestamp`, compared in whole milliseconds.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`, compared in whole milliseconds.
    pub end: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Whether `event` passes every set filter.
    pub fn matches(&self, event: &Event) -> bool {
        let c = &event.content;
        self.shipment_id.as_ref().map_or(true, |s| &c.shipment_id == s)
            && (self.event_types.is_empty() || self.event_types.contains(&c.event_type))
            && self.actor_id.as_ref().map_or(true, |a| &c.actor.id == a)
            && self.actor_type.map_or(true, |t| c.actor.actor_type == t)
            && self.location_type.map_or(true, |t| c.location.location_type == t)
            && self.verified.map_or(true, |v| event.verified == v)
            && self.start_millis().map_or(true, |s| c.timestamp_millis() >= s)
            && self.end_millis().map_or(true, |e| c.timestamp_millis() <= e)
    }

    /// Lower bound floored to Unix milliseconds, the resolution timestamps are stored at.
    pub fn start_millis(&self) -> Option<i64> {
        self.start.map(|t| t.timestamp_millis())
    }

    /// Upper bound floored to Unix milliseconds.
    pub fn end_millis(&self) -> Option<i64> {
        self.end.map(|t| t.timestamp_millis())
    }
}

/// One page of search results plus the unpaged match count.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub total: u64,
}

/// The latest verification outcome recorded for a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationRecord {
    pub is_valid: bool,
    pub event_count: u64,
    pub verified_at: DateTime<Utc>,
}

/// Aggregate counts backing ledger statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub total_events: u64,
    pub total_shipments: u64,
    pub verified_events: u64,
    /// Events whose timestamp falls in the requested window.
    pub events_in_window: u64,
    /// Shipments whose latest verification was valid.
    pub valid_shipments: u64,
    pub events_by_type: BTreeMap<EventType, u64>,
}

/// Per-shipment summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentSummary {
    pub shipment_id: ShipmentId,
    pub event_count: u64,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub head_hash: Blake3Hash,
    pub last_verification: Option<VerificationRecord>,
}

/// The EventStore trait: async interface for append-only event persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Append-only**: events are never updated or deleted, except for the
///   one-way `verified` flag.
/// - **Idempotent ids**: appending an id that is already stored returns
///   `AlreadyExists`.
/// - **Link check**: an event whose `previousHash` is not the current head's
///   `dataHash` returns `Conflict`, so no chain can fork even if a writer
///   bypasses the ledger's per-shipment lock.
/// - **Chain order**: ascending timestamp, ties by ascending sequence.
#[async_trait]
pub trait EventStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Chain Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an event to its shipment chain.
    async fn append(&self, event: &Event) -> Result<AppendResult>;

    /// Reserve the next ledger-wide sequence number.
    ///
    /// Values are strictly increasing across all shipments. Gaps are allowed
    /// (a reserved value whose append fails is never reused).
    async fn next_sequence(&self) -> Result<u64>;

    /// The last event of a shipment chain, in chain order.
    async fn chain_head(&self, shipment_id: &ShipmentId) -> Result<Option<Event>>;

    /// All events of a shipment, in chain order.
    async fn shipment_events(&self, shipment_id: &ShipmentId) -> Result<Vec<Event>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an event by id.
    async fn get_event(&self, id: &EventId) -> Result<Option<Event>>;

    /// Get an event by its transaction hash.
    async fn get_by_transaction_hash(&self, hash: &Blake3Hash) -> Result<Option<Event>>;

    /// Search events. Results are most-recent-first: descending timestamp,
    /// ties by descending sequence.
    async fn query(&self, filter: &EventFilter, offset: u64, limit: u64) -> Result<EventPage>;

    /// List shipments with at least one event, ordered by shipment id.
    async fn list_shipments(&self) -> Result<Vec<ShipmentSummary>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Verification State
    // ─────────────────────────────────────────────────────────────────────────

    /// Set `verified = true` on the given events of one shipment.
    ///
    /// Ids that belong to another shipment or are unknown are ignored.
    /// Returns how many events changed from unverified to verified.
    async fn mark_verified(&self, shipment_id: &ShipmentId, ids: &[EventId]) -> Result<u64>;

    /// Record a shipment's latest verification outcome, replacing any prior one.
    async fn record_verification(
        &self,
        shipment_id: &ShipmentId,
        record: VerificationRecord,
    ) -> Result<()>;

    /// The latest verification outcome for a shipment.
    async fn latest_verification(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<Option<VerificationRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Aggregates
    // ─────────────────────────────────────────────────────────────────────────

    /// Ledger-wide counts. `events_in_window` counts timestamps in
    /// `[window_start, window_end)`.
    async fn ledger_counts(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<LedgerCounts>;
}
