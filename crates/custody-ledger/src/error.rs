//! Error types for the ledger.

use custody_ledger_core::{Blake3Hash, CoreError, EventId, ShipmentId, ValidationError};
use custody_ledger_store::StoreError;
use thiserror::Error;

/// Errors that can occur while rendering an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The shipment has no events; nothing to export.
    #[error("no events to export for shipment {0}")]
    NoEvents(ShipmentId),

    /// The requested export format is not supported.
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Writing the artifact failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the artifact failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Serialization(e.to_string())
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Event content failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed identifier or hash text.
    #[error("invalid input: {0}")]
    Core(#[from] CoreError),

    /// Malformed query filters or pagination.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Export error.
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// Unknown shipment, event or transaction.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// An event with this id is already recorded.
    #[error("event already recorded: {0}")]
    DuplicateEvent(EventId),

    /// The store refused an append that does not extend the chain head.
    #[error("chain conflict on shipment {shipment_id}: expected previous hash {expected_previous}")]
    ChainConflict {
        shipment_id: ShipmentId,
        expected_previous: Blake3Hash,
    },

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,
}

/// Boundary classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Storage,
    Export,
    Cancelled,
}

impl ErrorClass {
    /// HTTP-equivalent status code.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::Validation => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Storage => 500,
            ErrorClass::Export => 422,
            ErrorClass::Cancelled => 499,
        }
    }
}

impl LedgerError {
    /// Classify this error for a request boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Validation(_)
            | LedgerError::Core(_)
            | LedgerError::InvalidQuery(_)
            | LedgerError::DuplicateEvent(_) => ErrorClass::Validation,
            LedgerError::NotFound { .. } => ErrorClass::NotFound,
            LedgerError::Store(_) | LedgerError::ChainConflict { .. } => ErrorClass::Storage,
            LedgerError::Export(ExportError::UnsupportedFormat(_)) => ErrorClass::Validation,
            LedgerError::Export(ExportError::NoEvents(_)) => ErrorClass::Export,
            LedgerError::Export(_) => ErrorClass::Storage,
            LedgerError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            LedgerError::InvalidQuery("page".into()).class().status_code(),
            400
        );
        assert_eq!(
            LedgerError::not_found("shipment", "SH-404").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            LedgerError::from(ExportError::NoEvents("SH-1".into())).class(),
            ErrorClass::Export
        );
        assert_eq!(
            LedgerError::from(ExportError::UnsupportedFormat("xml".into())).class(),
            ErrorClass::Validation
        );
        assert_eq!(LedgerError::Cancelled.class().status_code(), 499);
        assert_eq!(
            LedgerError::from(StoreError::Join("boom".into())).class(),
            ErrorClass::Storage
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = LedgerError::not_found("event", "abc");
        assert_eq!(err.to_string(), "event not found: abc");
    }
}
