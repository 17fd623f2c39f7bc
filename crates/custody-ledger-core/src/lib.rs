//! # Custody Ledger Core
//!
//! Pure primitives for the custody ledger: events, canonical encoding, and
//! hash-chain links.
//!
//! This crate contains no I/O, no storage, no clocks. It is pure computation
//! over event content and hashes.
//!
//! ## Key Types
//!
//! - [`Event`] - A recorded custody event with its chain link
//! - [`EventContent`] - The hashed part of an event
//! - [`EventId`] / [`ShipmentId`] - Identifiers
//! - [`Blake3Hash`] - `dataHash`, `previousHash` and `transactionHash` values
//!
//! ## Canonicalization
//!
//! Event content is hashed over deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod event;
pub mod metadata;
pub mod types;
pub mod validation;

pub use canonical::{canonical_content_bytes, compute_data_hash, compute_transaction_hash};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use event::{
    Actor, ActorType, ChainLink, Coordinates, Event, EventBuilder, EventContent, EventType,
    Location, LocationType, CORRECTS_KEY,
};
pub use metadata::{Metadata, MetadataValue};
pub use types::{EventId, ShipmentId, GENESIS_HASH};
pub use validation::validate_content;
