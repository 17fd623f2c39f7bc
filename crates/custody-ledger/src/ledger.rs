//! The Ledger: unified API for shipment custody.
//!
//! The Ledger owns the store, the clock, per-shipment append locks, the
//! statistics cache and the optional attestation key. Nothing is global.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use custody_ledger_core::{
    Actor, Blake3Hash, Event, EventBuilder, EventContent, EventId, EventType, Keypair, Location,
    Metadata, MetadataValue, ShipmentId,
};
use custody_ledger_store::{EventStore, ShipmentSummary};

use crate::chain::{HashChainBuilder, ShipmentLocks};
use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, Result};
use crate::export::{
    AuditTrail, ExportArtifact, ExportEngine, ExportFormat, ReportOptions,
    DEFAULT_CSV_HASH_PREFIX_LEN,
};
use crate::query::{
    EventQuery, PaginatedEvents, QueryEngine, RawEventQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use crate::stats::{ChainStatistics, StatisticsAggregator, StatsCache};
use crate::verifier::{CancelToken, ChainVerificationResult, ChainVerifier};

/// Configuration for the Ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Page size when a query does not name one.
    pub default_page_size: u32,
    /// Largest page size a query may request.
    pub max_page_size: u32,
    /// Serve statistics from a per-day cache, invalidated on append and verify.
    pub cache_stats: bool,
    /// Events checked between cancellation polls during verification.
    pub cancel_check_interval: usize,
    /// Hex chars of `dataHash` in CSV exports.
    pub csv_hash_prefix_len: usize,
    /// PDF options used by [`Ledger::export_audit_trail`].
    pub report: ReportOptions,
    /// Signs export attestations when set.
    pub signing_key: Option<Keypair>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            cache_stats: true,
            cancel_check_interval: 256,
            csv_hash_prefix_len: DEFAULT_CSV_HASH_PREFIX_LEN,
            report: ReportOptions::default(),
            signing_key: None,
        }
    }
}

/// Input for recording one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventInput {
    pub shipment_id: ShipmentId,
    pub event_type: EventType,
    pub actor: Actor,
    pub location: Location,
    #[serde(default)]
    pub metadata: Metadata,
    /// Occurrence time. Defaults to the ledger clock.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Caller-chosen id. Defaults to a fresh UUID v4.
    #[serde(default)]
    pub id: Option<EventId>,
}

impl CreateEventInput {
    pub fn new(
        shipment_id: impl Into<ShipmentId>,
        event_type: EventType,
        actor: Actor,
        location: Location,
    ) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            event_type,
            actor,
            location,
            metadata: Metadata::new(),
            timestamp: None,
            id: None,
        }
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Turn this input into a correction of `target`.
    pub fn correcting(self, target: EventId) -> Self {
        Self {
            event_type: EventType::Correction,
            ..self
        }
        .meta(custody_ledger_core::CORRECTS_KEY, target.to_string())
    }
}

/// Outcome of [`Ledger::verify_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashCheck {
    pub is_valid: bool,
    pub calculated_hash: Blake3Hash,
}

/// Outcome of [`Ledger::verify_transaction_hash`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCheck {
    pub is_valid: bool,
    pub event: Option<Event>,
}

/// The main Ledger struct.
///
/// Provides a unified API for:
/// - Recording events onto shipment chains
/// - Verifying chains
/// - Searching events and computing statistics
/// - Exporting audit trails
pub struct Ledger<S: EventStore> {
    /// The storage backend.
    store: Arc<S>,
    /// Time source for default timestamps and "today".
    clock: Arc<dyn Clock>,
    /// Configuration.
    config: LedgerConfig,
    /// Serializes appends per shipment.
    locks: ShipmentLocks,
    /// Serializes verifications per shipment, apart from appends.
    verify_locks: ShipmentLocks,
    stats_cache: StatsCache,
    export: ExportEngine,
}

impl<S: EventStore> Ledger<S> {
    /// Create a ledger on the system clock.
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create a ledger with an explicit clock.
    pub fn with_clock(store: S, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        let export = ExportEngine::new(config.csv_hash_prefix_len, config.report.clone());
        Self {
            store: Arc::new(store),
            clock,
            config,
            locks: ShipmentLocks::new(),
            verify_locks: ShipmentLocks::new(),
            stats_cache: StatsCache::new(),
            export,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chain Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record one event on its shipment's chain.
    pub async fn record_event(&self, input: CreateEventInput) -> Result<Event> {
        let mut builder = EventBuilder::new(
            input.shipment_id,
            input.event_type,
            input.actor,
            input.location,
        )
        .metadata(input.metadata);
        if let Some(id) = input.id {
            builder = builder.id(id);
        }
        if let Some(ts) = input.timestamp {
            builder = builder.timestamp(ts);
        }
        let content = builder.build();

        if let Some(target) = content.corrects() {
            self.check_correction_target(&content.shipment_id, target).await?;
        }

        let chain = HashChainBuilder::new(&*self.store, &self.locks);
        let event = match input.timestamp {
            Some(_) => chain.build(content).await?,
            // Stamped under the shipment lock
            None => chain.build_stamped(content, &*self.clock).await?,
        };
        self.stats_cache.invalidate();
        Ok(event)
    }

    /// A correction must name an event already on the same shipment's chain.
    async fn check_correction_target(&self, shipment_id: &ShipmentId, target: EventId) -> Result<()> {
        match self.store.get_event(&target).await? {
            Some(event) if event.shipment_id() == shipment_id => Ok(()),
            _ => Err(LedgerError::not_found("event", target)),
        }
    }

    /// The full chain of a shipment, oldest first.
    pub async fn get_shipment_events(&self, shipment_id: &ShipmentId) -> Result<Vec<Event>> {
        let events = self.store.shipment_events(shipment_id).await?;
        if events.is_empty() {
            return Err(LedgerError::not_found("shipment", shipment_id));
        }
        Ok(events)
    }

    /// Get an event by id.
    pub async fn get_event(&self, id: &EventId) -> Result<Event> {
        self.store
            .get_event(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("event", id))
    }

    /// All shipments with at least one event.
    pub async fn list_shipments(&self) -> Result<Vec<ShipmentSummary>> {
        Ok(self.store.list_shipments().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verification
    // ─────────────────────────────────────────────────────────────────────────

    /// Walk a shipment chain, record the outcome and mark it verified if valid.
    pub async fn verify_chain(&self, shipment_id: &ShipmentId) -> Result<ChainVerificationResult> {
        self.run_verification(shipment_id, None).await
    }

    /// [`verify_chain`](Self::verify_chain) that stops early once `cancel` fires.
    pub async fn verify_chain_with_cancel(
        &self,
        shipment_id: &ShipmentId,
        cancel: &CancelToken,
    ) -> Result<ChainVerificationResult> {
        self.run_verification(shipment_id, Some(cancel)).await
    }

    async fn run_verification(
        &self,
        shipment_id: &ShipmentId,
        cancel: Option<&CancelToken>,
    ) -> Result<ChainVerificationResult> {
        // Snapshot through record under one section, so the recorded outcome
        // always belongs to the most recent snapshot.
        let _section = self.verify_locks.lock(shipment_id).await;
        let result = ChainVerifier::new(&*self.store, self.config.cancel_check_interval)
            .verify(shipment_id, self.clock.now(), cancel)
            .await?;
        self.stats_cache.invalidate();
        Ok(result)
    }

    /// Recompute the hash of `content` and compare it with `expected_hex`.
    pub fn verify_hash(&self, content: &EventContent, expected_hex: &str) -> Result<HashCheck> {
        let expected = Blake3Hash::from_hex(expected_hex)?;
        let calculated_hash = content.data_hash();
        Ok(HashCheck {
            is_valid: calculated_hash == expected,
            calculated_hash,
        })
    }

    /// Look up an event by transaction hash and re-derive both of its hashes.
    ///
    /// An unknown hash is not an error: it yields `is_valid = false`.
    pub async fn verify_transaction_hash(&self, hex: &str) -> Result<TransactionCheck> {
        let hash = Blake3Hash::from_hex(hex)?;
        let event = self.store.get_by_transaction_hash(&hash).await?;
        let is_valid = event.as_ref().is_some_and(|e| {
            e.recompute_data_hash() == *e.data_hash() && e.recompute_transaction_hash() == hash
        });
        Ok(TransactionCheck { is_valid, event })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query & Statistics
    // ─────────────────────────────────────────────────────────────────────────

    /// An empty query using the configured default page size.
    pub fn new_query(&self) -> EventQuery {
        EventQuery::new().page_size(self.config.default_page_size)
    }

    /// Search events, most recent first.
    pub async fn query_events(&self, query: &EventQuery) -> Result<PaginatedEvents> {
        QueryEngine::new(&*self.store, self.config.max_page_size)
            .query(query)
            .await
    }

    /// Search with untyped parameters from a request boundary.
    pub async fn query_events_raw(&self, raw: &RawEventQuery) -> Result<PaginatedEvents> {
        let query = raw.parse_with_default(self.config.default_page_size)?;
        self.query_events(&query).await
    }

    /// Ledger-wide statistics as of the ledger clock.
    pub async fn get_chain_stats(&self) -> Result<ChainStatistics> {
        let cache = self.config.cache_stats.then_some(&self.stats_cache);
        StatisticsAggregator::new(&*self.store, cache)
            .stats(self.clock.now())
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Export
    // ─────────────────────────────────────────────────────────────────────────

    async fn audit_trail(&self, shipment_id: &ShipmentId) -> Result<AuditTrail> {
        let events = self.store.shipment_events(shipment_id).await?;
        Ok(AuditTrail::new(
            shipment_id.clone(),
            events,
            self.clock.now(),
            self.config.signing_key.as_ref(),
        )?)
    }

    /// Export a shipment chain. PDF uses the configured report options.
    pub async fn export_audit_trail(
        &self,
        shipment_id: &ShipmentId,
        format: ExportFormat,
    ) -> Result<ExportArtifact> {
        let trail = self.audit_trail(shipment_id).await?;
        Ok(self.export.render(&trail, format)?)
    }

    /// Export a shipment chain as a PDF report with explicit options.
    pub async fn export_audit_report(
        &self,
        shipment_id: &ShipmentId,
        options: &ReportOptions,
    ) -> Result<ExportArtifact> {
        let trail = self.audit_trail(shipment_id).await?;
        Ok(self.export.render_report(&trail, options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{ErrorClass, ExportError};
    use custody_ledger_core::{ActorType, LocationType, ValidationError};
    use custody_ledger_store::MemoryStore;

    const T0: i64 = 1_736_870_400_000;

    fn ledger() -> (Ledger<MemoryStore>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at_millis(T0));
        let ledger = Ledger::with_clock(MemoryStore::new(), clock.clone(), LedgerConfig::default());
        (ledger, clock)
    }

    fn input(shipment: &str, kind: EventType) -> CreateEventInput {
        CreateEventInput::new(
            shipment,
            kind,
            Actor::new("u-1", ActorType::User, "Clerk"),
            Location::new("Hub", LocationType::Facility),
        )
    }

    #[tokio::test]
    async fn test_record_uses_clock_and_links() {
        let (ledger, clock) = ledger();
        let e1 = ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let e2 = ledger.record_event(input("SH-1", EventType::Dispatched)).await.unwrap();

        assert_eq!(e1.content.timestamp_millis(), T0);
        assert_eq!(*e2.previous_hash(), *e1.data_hash());

        let chain = ledger.get_shipment_events(&"SH-1".into()).await.unwrap();
        assert_eq!(chain, vec![e1.clone(), e2]);
        assert_eq!(ledger.get_event(&e1.id()).await.unwrap(), e1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (ledger, _) = ledger();
        let err = ledger.get_shipment_events(&"SH-404".into()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
        let err = ledger.get_event(&EventId::from_u128(7)).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_corrections_must_target_same_shipment() {
        let (ledger, _) = ledger();
        let original = ledger.record_event(input("SH-1", EventType::Checkpoint)).await.unwrap();
        ledger.record_event(input("SH-2", EventType::Created)).await.unwrap();

        let fix = ledger
            .record_event(input("SH-1", EventType::Checkpoint).correcting(original.id()))
            .await
            .unwrap();
        assert_eq!(fix.content.corrects(), Some(original.id()));

        let err = ledger
            .record_event(input("SH-2", EventType::Checkpoint).correcting(original.id()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { kind: "event", .. }));
    }

    #[tokio::test]
    async fn test_correction_without_target_is_invalid() {
        let (ledger, _) = ledger();
        let err = ledger
            .record_event(input("SH-1", EventType::Correction))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::EmptyField(_))));
    }

    #[tokio::test]
    async fn test_verifications_of_one_shipment_are_serialized() {
        let (ledger, clock) = ledger();
        ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();

        let held = ledger.verify_locks.lock(&"SH-1".into()).await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            ledger.verify_chain(&"SH-1".into()),
        )
        .await;
        assert!(blocked.is_err());
        assert!(ledger
            .store()
            .latest_verification(&"SH-1".into())
            .await
            .unwrap()
            .is_none());

        // Appends and other shipments are not held up
        clock.advance(chrono::Duration::seconds(1));
        ledger.record_event(input("SH-1", EventType::Dispatched)).await.unwrap();
        ledger.record_event(input("SH-2", EventType::Created)).await.unwrap();
        assert!(ledger.verify_chain(&"SH-2".into()).await.unwrap().is_valid);

        drop(held);
        let result = ledger.verify_chain(&"SH-1".into()).await.unwrap();
        assert_eq!(result.event_count, 2);
        let record = ledger
            .store()
            .latest_verification(&"SH-1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.event_count, 2);
        assert_eq!(ledger.verify_locks.active(), 0);
    }

    #[tokio::test]
    async fn test_verify_hash_and_transaction() {
        let (ledger, _) = ledger();
        let event = ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();

        let check = ledger
            .verify_hash(&event.content, &event.data_hash().to_hex())
            .unwrap();
        assert!(check.is_valid);
        assert_eq!(check.calculated_hash, *event.data_hash());

        let wrong = ledger.verify_hash(&event.content, &"00".repeat(32)).unwrap();
        assert!(!wrong.is_valid);
        assert!(ledger.verify_hash(&event.content, "zz").is_err());

        let tx = ledger
            .verify_transaction_hash(&event.transaction_hash().to_hex())
            .await
            .unwrap();
        assert!(tx.is_valid);
        assert_eq!(tx.event.unwrap().id(), event.id());

        let unknown = ledger.verify_transaction_hash(&"ab".repeat(32)).await.unwrap();
        assert!(!unknown.is_valid);
        assert!(unknown.event.is_none());

        let err = ledger.verify_transaction_hash("not-hex").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_tampered_transaction_is_invalid() {
        let (ledger, _) = ledger();
        let event = ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();
        let mut tampered = event.clone();
        tampered.content.location.name = "Elsewhere".into();
        ledger.store().overwrite_unchecked(tampered).unwrap();

        let tx = ledger
            .verify_transaction_hash(&event.transaction_hash().to_hex())
            .await
            .unwrap();
        assert!(!tx.is_valid);
        assert!(tx.event.is_some());
    }

    #[tokio::test]
    async fn test_stats_cache_invalidated_on_append_and_verify() {
        let (ledger, _) = ledger();
        ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();
        assert_eq!(ledger.get_chain_stats().await.unwrap().total_events, 1);

        ledger.record_event(input("SH-1", EventType::Delivered)).await.unwrap();
        let stats = ledger.get_chain_stats().await.unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_today, 2);
        assert_eq!(stats.verification_rate, 0.0);

        ledger.verify_chain(&"SH-1".into()).await.unwrap();
        let stats = ledger.get_chain_stats().await.unwrap();
        assert_eq!(stats.verification_rate, 1.0);
        assert_eq!(stats.chain_integrity_percentage, 100.0);
    }

    #[tokio::test]
    async fn test_raw_query_uses_configured_default() {
        let clock = Arc::new(FixedClock::at_millis(T0));
        let config = LedgerConfig {
            default_page_size: 2,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_clock(MemoryStore::new(), clock, config);
        for _ in 0..3 {
            ledger.record_event(input("SH-1", EventType::Checkpoint)).await.unwrap();
        }

        let page = ledger.query_events_raw(&RawEventQuery::default()).await.unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.pagination.total_pages, 2);
        assert_eq!(ledger.new_query().page_size, 2);
    }

    #[tokio::test]
    async fn test_export_requires_events() {
        let (ledger, _) = ledger();
        for format in ExportFormat::ALL {
            let err = ledger
                .export_audit_trail(&"SH-EMPTY".into(), format)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::Export(ExportError::NoEvents(_))));
            assert_eq!(err.class().status_code(), 422);
        }
    }

    #[tokio::test]
    async fn test_signed_export() {
        let clock = Arc::new(FixedClock::at_millis(T0));
        let key = Keypair::from_seed(&[5u8; 32]);
        let config = LedgerConfig {
            signing_key: Some(key.clone()),
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_clock(MemoryStore::new(), clock, config);
        ledger.record_event(input("SH-1", EventType::Created)).await.unwrap();

        let artifact = ledger
            .export_audit_trail(&"SH-1".into(), ExportFormat::Json)
            .await
            .unwrap();
        assert_eq!(artifact.content_type, "application/json");
        let json: serde_json::Value = serde_json::from_slice(&artifact.bytes).unwrap();
        assert_eq!(json["attestation"]["publicKey"], key.public_key().to_hex());

        let report = ledger
            .export_audit_report(&"SH-1".into(), &ReportOptions::default())
            .await
            .unwrap();
        assert!(report.file_name.ends_with(".pdf"));
    }
}
