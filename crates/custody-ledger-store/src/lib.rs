//! # Custody Ledger Store
//!
//! Storage abstraction for the custody ledger. Provides a trait-based interface
//! for append-only event persistence with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`EventStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AppendResult`] - Result of appending an event
//! - [`EventFilter`] - Search filters shared by both backends
//!
//! ## Usage
//!
//! ```rust,no_run
//! use custody_ledger_store::{EventStore, SqliteStore};
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("ledger.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let head = store.chain_head(&"SH-1".into()).await.unwrap();
//!     assert!(head.is_none());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent appends**: Appending the same event id twice returns `AlreadyExists`
//! - **Fork refusal**: An event that does not extend the chain head returns `Conflict`
//! - **Unique transactions**: `transactionHash` is unique across the whole store

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AppendResult, EventFilter, EventPage, EventStore, LedgerCounts, ShipmentSummary,
    VerificationRecord,
};
