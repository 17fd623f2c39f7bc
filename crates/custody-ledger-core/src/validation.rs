//! Event content validation: structural checks before an event is chained.

use crate::error::ValidationError;
use crate::event::{EventContent, EventType, CORRECTS_KEY};
use crate::metadata::{Metadata, MetadataValue};

/// Maximum shipment identifier length in bytes.
pub const MAX_SHIPMENT_ID_LEN: usize = 128;

/// Maximum metadata nesting depth (the top-level map is depth 1).
pub const MAX_METADATA_DEPTH: usize = 16;

/// Maximum entries in any single metadata map or array.
pub const MAX_METADATA_ENTRIES: usize = 256;

/// Validate candidate event content.
///
/// This performs:
/// - Shipment id presence and length
/// - Actor and location required fields
/// - Coordinate range and finiteness
/// - Metadata shape (depth, size, finite numbers)
/// - Correction reference presence, and reserved keys on other events
///
/// Chain ordering (timestamp vs. chain head) needs store context and is
/// checked by the chain builder.
pub fn validate_content(content: &EventContent) -> Result<(), ValidationError> {
    // 1. Shipment id
    if content.shipment_id.is_blank() {
        return Err(ValidationError::EmptyShipmentId);
    }
    if content.shipment_id.as_str().len() > MAX_SHIPMENT_ID_LEN {
        return Err(ValidationError::ShipmentIdTooLong {
            max: MAX_SHIPMENT_ID_LEN,
        });
    }

    // 2. Actor
    if content.actor.id.trim().is_empty() {
        return Err(ValidationError::EmptyField("actor.id"));
    }
    if content.actor.name.trim().is_empty() {
        return Err(ValidationError::EmptyField("actor.name"));
    }

    // 3. Location
    if content.location.name.trim().is_empty() {
        return Err(ValidationError::EmptyField("location.name"));
    }
    if let Some(c) = &content.location.coordinates {
        if !c.latitude.is_finite() || !c.longitude.is_finite() {
            return Err(ValidationError::NonFiniteNumber {
                field: "location.coordinates".into(),
            });
        }
        if !(-90.0..=90.0).contains(&c.latitude) || !(-180.0..=180.0).contains(&c.longitude) {
            return Err(ValidationError::CoordinatesOutOfRange {
                latitude: c.latitude,
                longitude: c.longitude,
            });
        }
    }

    // 4. Metadata
    validate_metadata(&content.metadata)?;

    // 5. Corrections must name their target; nothing else may
    if content.event_type == EventType::Correction {
        if content.corrects().is_none() {
            return Err(ValidationError::EmptyField("metadata.corrects"));
        }
    } else if let Some(key) = content.metadata.keys().find(|k| is_reserved_key(k)) {
        return Err(ValidationError::ReservedKey(key.clone()));
    }

    Ok(())
}

/// Validate metadata shape.
pub fn validate_metadata(metadata: &Metadata) -> Result<(), ValidationError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::MetadataTooLarge {
            max: MAX_METADATA_ENTRIES,
        });
    }
    for (key, value) in metadata {
        if 1 + value.depth() > MAX_METADATA_DEPTH {
            return Err(ValidationError::MetadataTooDeep {
                max: MAX_METADATA_DEPTH,
            });
        }
        validate_value(key, value)?;
    }
    Ok(())
}

fn validate_value(path: &str, value: &MetadataValue) -> Result<(), ValidationError> {
    match value {
        MetadataValue::Float(f) if !f.is_finite() => Err(ValidationError::NonFiniteNumber {
            field: format!("metadata.{path}"),
        }),
        MetadataValue::Array(items) => {
            if items.len() > MAX_METADATA_ENTRIES {
                return Err(ValidationError::MetadataTooLarge {
                    max: MAX_METADATA_ENTRIES,
                });
            }
            for (i, item) in items.iter().enumerate() {
                validate_value(&format!("{path}[{i}]"), item)?;
            }
            Ok(())
        }
        MetadataValue::Map(map) => {
            if map.len() > MAX_METADATA_ENTRIES {
                return Err(ValidationError::MetadataTooLarge {
                    max: MAX_METADATA_ENTRIES,
                });
            }
            for (k, v) in map {
                validate_value(&format!("{path}.{k}"), v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Whether `key` is reserved for ledger use in metadata.
pub fn is_reserved_key(key: &str) -> bool {
    key == CORRECTS_KEY
}
