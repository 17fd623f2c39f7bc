//! Error types for the custody ledger core.

use thiserror::Error;

/// Core errors that can occur while encoding or parsing ledger primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid event id: {0}")]
    InvalidEventId(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Validation errors for candidate event content.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("shipment id must not be empty")]
    EmptyShipmentId,

    #[error("shipment id exceeds {max} bytes")]
    ShipmentIdTooLong { max: usize },

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{field} is not a finite number")]
    NonFiniteNumber { field: String },

    #[error("coordinates out of range: lat={latitude}, lon={longitude}")]
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },

    #[error("metadata nesting exceeds depth {max}")]
    MetadataTooDeep { max: usize },

    #[error("metadata map exceeds {max} entries")]
    MetadataTooLarge { max: usize },

    #[error("timestamp {got} precedes chain head timestamp {head}")]
    OutOfOrder { head: String, got: String },

    #[error("metadata key {0:?} is reserved for corrections")]
    ReservedKey(String),
}
