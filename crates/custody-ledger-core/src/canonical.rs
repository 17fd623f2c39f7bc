//! Canonical CBOR encoding for deterministic hashing.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - Floats always encoded as IEEE-754 binary64 (major type 7, 0xfb)
//! - Timestamps are i64 Unix milliseconds
//! - Absent optional fields are encoded as `null`, never omitted
//!
//! The canonical encoding is critical: it ensures that the same event content
//! produces identical bytes (and thus identical `dataHash` values) on every
//! platform and in every conforming implementation.
//!
//! **This encoding is frozen.** Changing it invalidates every stored hash.

use ciborium::value::Value;

use crate::crypto::Blake3Hash;
use crate::event::{Actor, EventContent, Location};
use crate::metadata::MetadataValue;
use crate::types::ShipmentId;

/// Domain separation prefix for `dataHash`.
pub const DATA_DOMAIN: &[u8] = b"custody-ledger/event-data/v1";

/// Domain separation prefix for `transactionHash`.
pub const TRANSACTION_DOMAIN: &[u8] = b"custody-ledger/transaction/v1";

/// Map key names.
mod keys {
    pub const ID: &str = "id";
    pub const SHIPMENT_ID: &str = "shipmentId";
    pub const EVENT_TYPE: &str = "eventType";
    pub const TIMESTAMP: &str = "timestamp";
    pub const ACTOR: &str = "actor";
    pub const LOCATION: &str = "location";
    pub const METADATA: &str = "metadata";

    pub const TYPE: &str = "type";
    pub const NAME: &str = "name";
    pub const ROLE: &str = "role";
    pub const ORGANIZATION: &str = "organization";
    pub const DEVICE_ID: &str = "deviceId";

    pub const COORDINATES: &str = "coordinates";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const ADDRESS: &str = "address";
    pub const COUNTRY: &str = "country";
}

/// Encode event content to canonical CBOR bytes.
pub fn canonical_content_bytes(content: &EventContent) -> Vec<u8> {
    encode_cbor_value_canonical(&content_to_cbor_value(content))
}

/// `dataHash` = Blake3(DATA_DOMAIN || canonical_content_bytes(content)).
pub fn compute_data_hash(content: &EventContent) -> Blake3Hash {
    Blake3Hash::hash_with_domain(DATA_DOMAIN, &canonical_content_bytes(content))
}

/// `transactionHash` = Blake3(TRANSACTION_DOMAIN || dataHash || previousHash ||
/// len(shipmentId) as u64 BE || shipmentId || sequence as u64 BE).
pub fn compute_transaction_hash(
    data_hash: &Blake3Hash,
    previous_hash: &Blake3Hash,
    shipment_id: &ShipmentId,
    sequence: u64,
) -> Blake3Hash {
    let shipment = shipment_id.as_str().as_bytes();
    let mut hasher = blake3::Hasher::new();
    hasher.update(TRANSACTION_DOMAIN);
    hasher.update(data_hash.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(&(shipment.len() as u64).to_be_bytes());
    hasher.update(shipment);
    hasher.update(&sequence.to_be_bytes());
    Blake3Hash(*hasher.finalize().as_bytes())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: &Option<String>) -> Value {
    match s {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

/// Convert content to a CBOR Value (map with text keys).
fn content_to_cbor_value(content: &EventContent) -> Value {
    let metadata = content
        .metadata
        .iter()
        .map(|(k, v)| (text(k), metadata_to_cbor_value(v)))
        .collect();

    Value::Map(vec![
        (text(keys::ID), Value::Bytes(content.id.0.as_bytes().to_vec())),
        (text(keys::SHIPMENT_ID), text(content.shipment_id.as_str())),
        (text(keys::EVENT_TYPE), text(content.event_type.as_str())),
        (
            text(keys::TIMESTAMP),
            Value::Integer(content.timestamp_millis().into()),
        ),
        (text(keys::ACTOR), actor_to_cbor_value(&content.actor)),
        (text(keys::LOCATION), location_to_cbor_value(&content.location)),
        (text(keys::METADATA), Value::Map(metadata)),
    ])
}

fn actor_to_cbor_value(actor: &Actor) -> Value {
    Value::Map(vec![
        (text(keys::ID), text(&actor.id)),
        (text(keys::TYPE), text(actor.actor_type.as_str())),
        (text(keys::NAME), text(&actor.name)),
        (text(keys::ROLE), opt_text(&actor.role)),
        (text(keys::ORGANIZATION), opt_text(&actor.organization)),
        (text(keys::DEVICE_ID), opt_text(&actor.device_id)),
    ])
}

fn location_to_cbor_value(location: &Location) -> Value {
    let coordinates = match &location.coordinates {
        Some(c) => Value::Map(vec![
            (text(keys::LATITUDE), Value::Float(c.latitude)),
            (text(keys::LONGITUDE), Value::Float(c.longitude)),
        ]),
        None => Value::Null,
    };

    Value::Map(vec![
        (text(keys::NAME), text(&location.name)),
        (text(keys::TYPE), text(location.location_type.as_str())),
        (text(keys::COORDINATES), coordinates),
        (text(keys::ADDRESS), opt_text(&location.address)),
        (text(keys::COUNTRY), opt_text(&location.country)),
    ])
}

fn metadata_to_cbor_value(value: &MetadataValue) -> Value {
    match value {
        MetadataValue::Null => Value::Null,
        MetadataValue::Bool(b) => Value::Bool(*b),
        MetadataValue::Integer(i) => Value::Integer((*i).into()),
        MetadataValue::Float(f) => Value::Float(*f),
        MetadataValue::Text(s) => Value::Text(s.clone()),
        MetadataValue::Array(items) => {
            Value::Array(items.iter().map(metadata_to_cbor_value).collect())
        }
        MetadataValue::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (text(k), metadata_to_cbor_value(v)))
                .collect(),
        ),
    }
}

/// Encode a CBOR Value to canonical bytes.
fn encode_cbor_value_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr),
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        // Never produced by the converters above.
        _ => buf.push(0xf7),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);

    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ActorType, EventBuilder, EventType, LocationType};
    use crate::types::{EventId, GENESIS_HASH};

    fn content() -> EventContent {
        EventBuilder::new(
            "SH-1",
            EventType::TemperatureReading,
            Actor::new("probe-7", ActorType::Sensor, "Reefer probe").with_device_id("dev-7"),
            Location::new("Reefer 12", LocationType::Vehicle).with_coordinates(51.9, 4.48),
        )
        .id(EventId::from_u128(7))
        .timestamp_millis(1_736_870_400_000)
        .meta("celsius", -18.5)
        .meta("unit", "C")
        .build()
    }

    #[test]
    fn test_canonical_encoding_deterministic() {
        let c = content();
        assert_eq!(canonical_content_bytes(&c), canonical_content_bytes(&c.clone()));
    }

    #[test]
    fn test_metadata_insertion_order_irrelevant() {
        let a = content();
        let mut b = content();
        b.metadata.clear();
        b.metadata.insert("unit".into(), "C".into());
        b.metadata.insert("celsius".into(), MetadataValue::Float(-18.5));
        assert_eq!(compute_data_hash(&a), compute_data_hash(&b));
    }

    #[test]
    fn test_every_content_field_is_hashed() {
        let base = compute_data_hash(&content());

        let mut c = content();
        c.actor.name.push('!');
        assert_ne!(compute_data_hash(&c), base);

        let mut c = content();
        c.location.coordinates = None;
        assert_ne!(compute_data_hash(&c), base);

        let mut c = content();
        c.timestamp = c.timestamp + chrono::Duration::milliseconds(1);
        assert_ne!(compute_data_hash(&c), base);

        let mut c = content();
        c.metadata.insert("celsius".into(), MetadataValue::Float(-18.4));
        assert_ne!(compute_data_hash(&c), base);
    }

    #[test]
    fn test_none_and_empty_string_differ() {
        let mut a = content();
        a.actor.role = None;
        let mut b = content();
        b.actor.role = Some(String::new());
        assert_ne!(compute_data_hash(&a), compute_data_hash(&b));
    }

    #[test]
    fn test_transaction_hash_inputs() {
        let data = compute_data_hash(&content());
        let base = compute_transaction_hash(&data, &GENESIS_HASH, &"SH-1".into(), 1);

        assert_ne!(base, compute_transaction_hash(&data, &GENESIS_HASH, &"SH-1".into(), 2));
        assert_ne!(base, compute_transaction_hash(&data, &GENESIS_HASH, &"SH-2".into(), 1));
        assert_ne!(base, compute_transaction_hash(&data, &data, &"SH-1".into(), 1));
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_float_always_binary64() {
        let mut buf = Vec::new();
        encode_value_to(&mut buf, &Value::Float(1.5));
        assert_eq!(buf.len(), 9);
        assert_eq!(buf[0], 0xfb);
        assert_eq!(&buf[1..], &1.5f64.to_bits().to_be_bytes());
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (text("zz"), Value::Integer(1.into())),
            (text("b"), Value::Integer(2.into())),
            (text("aa"), Value::Integer(3.into())),
        ];
        encode_map_canonical(&mut buf, &entries);

        // Shorter encoded keys sort first: "b" (0x61 'b') before "aa" and "zz".
        assert_eq!(buf[0], 0xa3);
        assert_eq!(&buf[1..3], &[0x61, b'b']);
        assert_eq!(&buf[4..7], &[0x62, b'a', b'a']);
        assert_eq!(&buf[8..11], &[0x62, b'z', b'z']);
    }
}
