//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use custody_ledger::{CreateEventInput, FixedClock, Ledger, LedgerConfig};
use custody_ledger_core::{Actor, ActorType, EventType, Location, LocationType};
use custody_ledger_store::{EventStore, MemoryStore};

/// 2025-01-14T16:00:00.000Z
pub const FIXTURE_EPOCH_MS: i64 = 1_736_870_400_000;

/// A ledger on a manually driven clock.
pub struct TestLedger<S: EventStore = MemoryStore> {
    pub ledger: Ledger<S>,
    pub clock: Arc<FixedClock>,
}

impl TestLedger<MemoryStore> {
    /// In-memory ledger at [`FIXTURE_EPOCH_MS`] with default config.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new(), LedgerConfig::default())
    }
}

impl Default for TestLedger<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: EventStore> TestLedger<S> {
    pub fn with_store(store: S, config: LedgerConfig) -> Self {
        let clock = Arc::new(FixedClock::at_millis(FIXTURE_EPOCH_MS));
        Self {
            ledger: Ledger::with_clock(store, clock.clone(), config),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use custody_ledger::Clock;
        self.clock.now()
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn tick(&self, ms: i64) {
        self.clock.advance(Duration::milliseconds(ms));
    }
}

/// A warehouse clerk.
pub fn clerk() -> Actor {
    Actor::new("user-17", ActorType::User, "Dock Clerk")
        .with_role("operator")
        .with_organization("Acme Logistics")
}

/// A temperature probe.
pub fn probe() -> Actor {
    Actor::new("probe-4", ActorType::Sensor, "Reefer Probe").with_device_id("TP-0004")
}

pub fn warehouse() -> Location {
    Location::new("Rotterdam DC", LocationType::Facility)
        .with_coordinates(51.9244, 4.4777)
        .with_country("NL")
}

pub fn truck() -> Location {
    Location::new("Truck 12", LocationType::Vehicle)
}

pub fn destination() -> Location {
    Location::new("Antwerp Store 3", LocationType::Destination).with_country("BE")
}

/// Input for one event at the fixture location for its type.
pub fn input(shipment_id: &str, event_type: EventType) -> CreateEventInput {
    let (actor, location) = match event_type {
        EventType::TemperatureReading | EventType::TemperatureAlert => (probe(), truck()),
        EventType::InTransit | EventType::PickedUp => (clerk(), truck()),
        EventType::Delivered | EventType::ReceiptConfirmed => (clerk(), destination()),
        _ => (clerk(), warehouse()),
    };
    CreateEventInput::new(shipment_id, event_type, actor, location)
}

/// The created → dispatched → delivered journey.
pub fn journey(shipment_id: &str) -> Vec<CreateEventInput> {
    vec![
        input(shipment_id, EventType::Created).meta("pallets", 4i64),
        input(shipment_id, EventType::Dispatched).meta("carrier", "NorthSea Freight"),
        input(shipment_id, EventType::Delivered).meta("signedBy", "J. Peeters"),
    ]
}
