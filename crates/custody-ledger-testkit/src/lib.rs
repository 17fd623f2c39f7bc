//! # Custody Ledger Testkit
//!
//! Testing utilities for the custody ledger.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Fixed contents with known canonical bytes and hashes
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A ledger on a fixed clock and sample journeys
//!
//! Scenario tests covering the whole ledger live in this crate's `tests/`.
//!
//! ## Golden Vectors
//!
//! ```rust
//! use custody_ledger_testkit::vectors::verify_all_vectors;
//!
//! for output in verify_all_vectors() {
//!     println!("{}: {}", output.name, output.data_hash);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use custody_ledger_testkit::generators::event_content;
//!
//! proptest! {
//!     #[test]
//!     fn data_hash_is_deterministic(content in event_content()) {
//!         prop_assert_eq!(content.data_hash(), content.clone().data_hash());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use custody_ledger_testkit::fixtures::{journey, TestLedger};
//!
//! let t = TestLedger::new();
//! for input in journey("SH-1") {
//!     t.ledger.record_event(input).await.unwrap();
//!     t.tick(60_000);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{input, journey, TestLedger, FIXTURE_EPOCH_MS};
pub use generators::event_content;
pub use vectors::{all_vectors, evaluate, verify_all_vectors, GoldenVector, VectorOutput};
