//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;

use custody_ledger_core::{
    Actor, ActorType, Blake3Hash, EventBuilder, EventContent, EventId, EventType, Location,
    LocationType, Metadata, MetadataValue,
};

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate a random EventId.
pub fn event_id() -> impl Strategy<Value = EventId> {
    any::<u128>().prop_map(EventId::from_u128)
}

/// Generate a valid shipment id.
pub fn shipment_id() -> impl Strategy<Value = String> {
    "SH-[A-Z0-9]{1,12}".prop_map(String::from)
}

/// Any event type except corrections, which need a target.
pub fn event_type() -> impl Strategy<Value = EventType> {
    prop::sample::select(
        EventType::ALL
            .iter()
            .copied()
            .filter(|t| *t != EventType::Correction)
            .collect::<Vec<_>>(),
    )
}

pub fn actor_type() -> impl Strategy<Value = ActorType> {
    prop::sample::select(ActorType::ALL.to_vec())
}

pub fn location_type() -> impl Strategy<Value = LocationType> {
    prop::sample::select(LocationType::ALL.to_vec())
}

/// Generate a timestamp between 2000 and 2100, in Unix milliseconds.
pub fn timestamp_millis() -> impl Strategy<Value = i64> {
    946_684_800_000i64..4_102_444_800_000i64
}

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ,.'-]{0,23}".prop_map(String::from)
}

pub fn actor() -> impl Strategy<Value = Actor> {
    (
        "[a-z0-9-]{1,12}",
        actor_type(),
        name(),
        proptest::option::of(name()),
        proptest::option::of(name()),
    )
        .prop_map(|(id, kind, name, role, org)| {
            let mut actor = Actor::new(id, kind, name);
            actor.role = role;
            actor.organization = org;
            actor
        })
}

/// Any finite f64, subnormals and negative zero included.
pub fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite", |f| f.is_finite())
}

/// Coordinates anywhere in range, with full mantissa precision.
pub fn coordinates() -> impl Strategy<Value = (f64, f64)> {
    (-90.0f64..=90.0, -180.0f64..=180.0)
}

pub fn location() -> impl Strategy<Value = Location> {
    (
        name(),
        location_type(),
        proptest::option::of(coordinates()),
        proptest::option::of("[A-Z]{2}"),
    )
        .prop_map(|(name, kind, coords, country)| {
            let mut location = Location::new(name, kind);
            if let Some((lat, lon)) = coords {
                location = location.with_coordinates(lat, lon);
            }
            location.country = country;
            location
        })
}

/// Generate a finite metadata value up to three levels deep.
pub fn metadata_value() -> impl Strategy<Value = MetadataValue> {
    let leaf = prop_oneof![
        Just(MetadataValue::Null),
        any::<bool>().prop_map(MetadataValue::Bool),
        any::<i64>().prop_map(MetadataValue::Integer),
        finite_f64().prop_map(MetadataValue::Float),
        "[ -~]{0,16}".prop_map(MetadataValue::Text),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(MetadataValue::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(MetadataValue::Map),
        ]
    })
}

/// Generate metadata without the reserved correction key.
pub fn metadata() -> impl Strategy<Value = Metadata> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,10}", metadata_value(), 0..6).prop_map(
        |m: BTreeMap<String, MetadataValue>| {
            m.into_iter()
                .filter(|(k, _)| k != custody_ledger_core::CORRECTS_KEY)
                .collect()
        },
    )
}

/// Valid event content for an arbitrary shipment.
pub fn event_content() -> impl Strategy<Value = EventContent> {
    (
        event_id(),
        shipment_id(),
        event_type(),
        timestamp_millis(),
        actor(),
        location(),
        metadata(),
    )
        .prop_map(|(id, shipment, kind, ts, actor, location, metadata)| {
            EventBuilder::new(shipment, kind, actor, location)
                .id(id)
                .timestamp_millis(ts)
                .metadata(metadata)
                .build()
        })
}
