//! # Custody Ledger
//!
//! A tamper-evident ledger of shipment custody events.
//!
//! ## Overview
//!
//! Every shipment owns a hash chain of events. Each event commits to the
//! hash of the event before it, so editing or dropping a recorded event is
//! detectable by re-walking the chain.
//!
//! - **Recording**: validated events are linked onto their shipment's chain
//! - **Verification**: chains are re-hashed and link-checked on demand
//! - **Search**: filtered, paginated queries across every shipment
//! - **Statistics**: ledger-wide counts and integrity rates
//! - **Export**: JSON, CSV and PDF audit trails, optionally signed
//!
//! ## Key Concepts
//!
//! - **dataHash**: blake3 over the canonical encoding of an event's content.
//! - **previousHash**: the prior event's `dataHash`, or GENESIS for the first.
//! - **transactionHash**: unique per append, even for identical content.
//! - **Correction**: a new event naming the event it corrects. Nothing is edited.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use custody_ledger::{CreateEventInput, Ledger, LedgerConfig};
//! use custody_ledger::core::{Actor, ActorType, EventType, Location, LocationType};
//! use custody_ledger::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!     let ledger = Ledger::new(store, LedgerConfig::default());
//!
//!     let event = ledger
//!         .record_event(CreateEventInput::new(
//!             "SH-1001",
//!             EventType::Created,
//!             Actor::new("u-17", ActorType::User, "Dock Clerk"),
//!             Location::new("Rotterdam DC", LocationType::Facility),
//!         ))
//!         .await
//!         .unwrap();
//!
//!     let result = ledger.verify_chain(event.shipment_id()).await.unwrap();
//!     assert!(result.is_valid);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `custody_ledger::core` - Event model, canonical hashing, validation
//! - `custody_ledger::store` - Storage abstraction, SQLite and in-memory stores

pub mod chain;
pub mod clock;
pub mod error;
pub mod export;
pub mod ledger;
pub mod query;
pub mod stats;
pub mod verifier;

// Re-export component crates
pub use custody_ledger_core as core;
pub use custody_ledger_store as store;

// Re-export main types for convenience
pub use chain::{HashChainBuilder, ShipmentLocks};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ErrorClass, ExportError, LedgerError, Result};
pub use export::{
    Attestation, AuditTrail, ExportArtifact, ExportEngine, ExportFormat, ReportOptions,
};
pub use ledger::{CreateEventInput, HashCheck, Ledger, LedgerConfig, TransactionCheck};
pub use query::{EventQuery, PaginatedEvents, Pagination, QueryEngine, RawEventQuery};
pub use stats::{ChainStatistics, StatisticsAggregator, StatsCache};
pub use verifier::{check_chain, CancelToken, ChainVerificationResult, ChainVerifier};

// Re-export commonly used core types
pub use custody_ledger_core::{
    Actor, ActorType, Blake3Hash, Event, EventContent, EventId, EventType, Keypair, Location,
    LocationType, ShipmentId,
};
