//! Event: the atomic unit of shipment custody.
//!
//! An event is immutable once recorded. Corrections are new events of kind
//! [`EventType::Correction`] that name the corrected event in metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::canonical::{compute_data_hash, compute_transaction_hash};
use crate::crypto::Blake3Hash;
use crate::error::CoreError;
use crate::metadata::{Metadata, MetadataValue};
use crate::types::{EventId, ShipmentId};

/// Metadata key a correction event uses to reference the event it corrects.
pub const CORRECTS_KEY: &str = "corrects";

/// Declares a closed, string-named enum with `as_str`, `FromStr` and `ALL`.
macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stable wire name. Part of the canonical encoding.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
                match normalized.as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(CoreError::UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

named_enum! {
    /// The kind of custody or handling event.
    EventType, "event type" {
        Created => "created",
        Dispatched => "dispatched",
        PickedUp => "picked_up",
        InTransit => "in_transit",
        Checkpoint => "checkpoint",
        CustomsCheck => "customs_check",
        CustomsCleared => "customs_cleared",
        CustomsHold => "customs_hold",
        TemperatureReading => "temperature_reading",
        TemperatureAlert => "temperature_alert",
        Delayed => "delayed",
        Exception => "exception",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        ReceiptConfirmed => "receipt_confirmed",
        Returned => "returned",
        /// Supersedes a prior event; metadata `corrects` holds its id.
        Correction => "correction",
    }
}

named_enum! {
    /// Who or what produced an event.
    ActorType, "actor type" {
        User => "user",
        System => "system",
        Sensor => "sensor",
        Api => "api",
    }
}

named_enum! {
    /// Where an event happened.
    LocationType, "location type" {
        Facility => "facility",
        Checkpoint => "checkpoint",
        Vehicle => "vehicle",
        Port => "port",
        Customs => "customs",
        Destination => "destination",
        Unknown => "unknown",
    }
}

/// The party responsible for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, actor_type: ActorType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            actor_type,
            name: name.into(),
            role: None,
            organization: None,
            device_id: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where an event took place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    #[serde(rename = "type")]
    pub location_type: LocationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, location_type: LocationType) -> Self {
        Self {
            name: name.into(),
            location_type,
            coordinates: None,
            address: None,
            country: None,
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinates = Some(Coordinates {
            latitude,
            longitude,
        });
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// The hashed content of an event: everything except the chain fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContent {
    pub id: EventId,
    pub shipment_id: ShipmentId,
    pub event_type: EventType,
    #[serde(with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub location: Location,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EventContent {
    /// Blake3 hash of the canonical encoding of this content.
    pub fn data_hash(&self) -> Blake3Hash {
        compute_data_hash(self)
    }

    /// Timestamp as Unix milliseconds (the canonical representation).
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// The id of the event this one corrects, for correction events.
    pub fn corrects(&self) -> Option<EventId> {
        if self.event_type != EventType::Correction {
            return None;
        }
        self.metadata
            .get(CORRECTS_KEY)
            .and_then(MetadataValue::as_text)
            .and_then(|s| s.parse().ok())
    }
}

/// Hash-chain fields assigned when an event is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLink {
    /// Ledger-wide monotonic append counter.
    pub sequence: u64,
    pub data_hash: Blake3Hash,
    pub previous_hash: Blake3Hash,
    pub transaction_hash: Blake3Hash,
}

/// A recorded event: content, chain link, and verification flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(flatten)]
    pub content: EventContent,
    #[serde(flatten)]
    pub link: ChainLink,
    pub verified: bool,
}

impl Event {
    /// Link content into a chain after `previous_hash` at ledger position `sequence`.
    pub fn link(content: EventContent, previous_hash: Blake3Hash, sequence: u64) -> Self {
        let data_hash = content.data_hash();
        let transaction_hash =
            compute_transaction_hash(&data_hash, &previous_hash, &content.shipment_id, sequence);
        Self {
            content,
            link: ChainLink {
                sequence,
                data_hash,
                previous_hash,
                transaction_hash,
            },
            verified: false,
        }
    }

    pub fn id(&self) -> EventId {
        self.content.id
    }

    pub fn shipment_id(&self) -> &ShipmentId {
        &self.content.shipment_id
    }

    pub fn event_type(&self) -> EventType {
        self.content.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.content.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.link.sequence
    }

    pub fn data_hash(&self) -> &Blake3Hash {
        &self.link.data_hash
    }

    pub fn previous_hash(&self) -> &Blake3Hash {
        &self.link.previous_hash
    }

    pub fn transaction_hash(&self) -> &Blake3Hash {
        &self.link.transaction_hash
    }

    /// Recompute the content hash from the stored content.
    pub fn recompute_data_hash(&self) -> Blake3Hash {
        self.content.data_hash()
    }

    /// Recompute the transaction hash from the stored chain fields.
    pub fn recompute_transaction_hash(&self) -> Blake3Hash {
        compute_transaction_hash(
            &self.link.data_hash,
            &self.link.previous_hash,
            &self.content.shipment_id,
            self.link.sequence,
        )
    }

    /// Chain order: ascending timestamp, then insertion sequence.
    pub fn chain_order(a: &Event, b: &Event) -> std::cmp::Ordering {
        a.content
            .timestamp
            .cmp(&b.content.timestamp)
            .then(a.link.sequence.cmp(&b.link.sequence))
    }
}

/// Builder for event content.
///
/// Normalises the timestamp to millisecond precision, the resolution the
/// canonical encoding keeps.
pub struct EventBuilder {
    id: EventId,
    shipment_id: ShipmentId,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    actor: Actor,
    location: Location,
    metadata: Metadata,
}

impl EventBuilder {
    /// Start building content for a shipment.
    pub fn new(
        shipment_id: impl Into<ShipmentId>,
        event_type: EventType,
        actor: Actor,
        location: Location,
    ) -> Self {
        Self {
            id: EventId::new_v4(),
            shipment_id: shipment_id.into(),
            event_type,
            timestamp: DateTime::<Utc>::default(),
            actor,
            location,
            metadata: Metadata::new(),
        }
    }

    /// Set the event id.
    pub fn id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    /// Set the occurrence time.
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    /// Set the occurrence time from Unix milliseconds.
    pub fn timestamp_millis(mut self, ms: i64) -> Self {
        if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(ms) {
            self.timestamp = ts;
        }
        self
    }

    /// Add one metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace all metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark this content as a correction of `target`.
    pub fn correcting(mut self, target: EventId) -> Self {
        self.event_type = EventType::Correction;
        self.metadata
            .insert(CORRECTS_KEY.to_string(), MetadataValue::Text(target.to_string()));
        self
    }

    pub fn build(self) -> EventContent {
        EventContent {
            id: self.id,
            shipment_id: self.shipment_id,
            event_type: self.event_type,
            timestamp: truncate_to_millis(self.timestamp),
            actor: self.actor,
            location: self.location,
            metadata: self.metadata,
        }
    }
}

/// Drop sub-millisecond precision.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Serde adapter: RFC 3339 with exactly three fractional digits and `Z`.
pub mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    /// The same format for optional timestamps.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|ts| ts.with_timezone(&Utc))
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}
