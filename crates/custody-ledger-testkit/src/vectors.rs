//! Golden test vectors for deterministic verification.
//!
//! Each vector is fixed event content plus a chain position. Any conforming
//! implementation must produce the same canonical bytes and hashes for it.

use custody_ledger_core::{
    canonical_content_bytes, compute_transaction_hash, Actor, ActorType, Blake3Hash,
    EventBuilder, EventContent, EventId, EventType, Location, LocationType, MetadataValue,
    ShipmentId, GENESIS_HASH,
};

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The content being hashed.
    pub content: EventContent,
    /// Ledger sequence the event is appended at.
    pub sequence: u64,
    /// Expected `dataHash` (hex).
    pub expected_data_hash: &'static str,
    /// Expected `transactionHash` (hex) at `sequence` on a fresh chain.
    pub expected_transaction_hash: &'static str,
}

/// Outputs derived from a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorOutput {
    pub name: String,
    pub canonical_hex: String,
    pub data_hash: Blake3Hash,
    pub transaction_hash: Blake3Hash,
    pub matches: bool,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "minimal creation",
            content: EventBuilder::new(
                "SH-GOLDEN-1",
                EventType::Created,
                Actor::new("u-1", ActorType::User, "Clerk"),
                Location::new("Dock", LocationType::Facility),
            )
            .id(EventId::from_u128(0x0001))
            .timestamp_millis(1_736_870_400_000)
            .build(),
            sequence: 1,
            expected_data_hash: "7eeb6672a4debcba3fee067f68ff8eb8f45f6d5cb2698e88e5ee985c7de1ce1b",
            expected_transaction_hash: "1d2df0ed40572abbd0ea0b5ebe46959489941fc6c282a811c817c3fa66c4bf0b",
        },
        GoldenVector {
            name: "every optional field",
            content: EventBuilder::new(
                "SH-GOLDEN-2",
                EventType::TemperatureReading,
                Actor::new("probe-4", ActorType::Sensor, "Reefer Probe")
                    .with_role("monitor")
                    .with_organization("Acme Cold Chain")
                    .with_device_id("TP-0004"),
                Location::new("Truck 12", LocationType::Vehicle)
                    .with_coordinates(51.9244, 4.4777)
                    .with_address("A15 km 42")
                    .with_country("NL"),
            )
            .id(EventId::from_u128(0x0002))
            .timestamp_millis(1_736_870_401_000)
            .meta("celsius", 3.5)
            .meta("inRange", true)
            .meta("probe", MetadataValue::Null)
            .build(),
            sequence: 2,
            expected_data_hash: "377d318182033254191b4beeaf2293be24beeee6807b55cc15c28ce5b1588db6",
            expected_transaction_hash: "1bb0060fcd15781967197a5dbb30eb8b86e53b24d6f000e904e37aa59db03c5d",
        },
        GoldenVector {
            name: "nested metadata at the epoch",
            content: EventBuilder::new(
                "SH-GOLDEN-3",
                EventType::CustomsHold,
                Actor::new("api-1", ActorType::Api, "Broker API"),
                Location::new("Port of Antwerp", LocationType::Customs),
            )
            .id(EventId::from_u128(0x0003))
            .timestamp_millis(0)
            .meta(
                "documents",
                MetadataValue::Array(vec!["invoice".into(), "packing-list".into()]),
            )
            .meta(
                "hold",
                serde_json::json!({"reason": "inspection", "days": 2}),
            )
            .build(),
            sequence: 3,
            expected_data_hash: "fb175980d54f44965efc2ce17a8922e34fa96e4b7affa06800d9ec3f208721d5",
            expected_transaction_hash: "a4724684979c51160cc0adbd1a6b296402eb71556c56efea88e6678a33c39e13",
        },
        GoldenVector {
            name: "floats that need every bit",
            content: EventBuilder::new(
                "SH-GOLDEN-4",
                EventType::Checkpoint,
                Actor::new("gate-9", ActorType::System, "Gate Reader"),
                Location::new("Gate 3", LocationType::Checkpoint)
                    .with_coordinates(10.938711676632721, -74.80603015422821),
            )
            .id(EventId::from_u128(0x0004))
            .timestamp_millis(1_736_870_402_345)
            .meta("humidity", 0.1)
            .meta("offset", -0.30000000000000004)
            .meta("tiny", 5e-324)
            .meta("mass", 1e300)
            .build(),
            sequence: 4,
            expected_data_hash: "8424344b039260395a236ee1fdceec348e3fc9e84cb314b6ad25e936df5ae638",
            expected_transaction_hash: "48ba9067b610da020410b3cf0cbcaad0d477fd4637851e0ce8d917f9b64f7858",
        },
        GoldenVector {
            name: "deeply nested metadata before the epoch",
            content: EventBuilder::new(
                "SH-GOLDEN-5",
                EventType::Exception,
                Actor::new("u-77", ActorType::User, "Surveyor").with_role("inspector"),
                Location::new("Rotterdam Maasvlakte", LocationType::Port).with_country("NL"),
            )
            .id(EventId::from_u128(0x0005))
            .timestamp_millis(-86_400_000)
            .meta("crew", serde_json::json!(["Ana", null, true]))
            .meta(
                "damage",
                serde_json::json!({
                    "items": [
                        {"sku": "A-1", "count": 3},
                        {"sku": "B-22", "count": -2, "notes": []}
                    ],
                    "reported": {},
                    "severity": 4.25
                }),
            )
            .build(),
            sequence: 1_000_000,
            expected_data_hash: "bfda049000db3edc9bfd7e02560ebfc700a2172898df5b45cc4ce89600c0be44",
            expected_transaction_hash: "5899981195d3aabe69a2724f1abfc25b08a07873482bd80a43268ca5e147f3fb",
        },
    ]
}

/// Derive the outputs of one vector against the genesis hash.
pub fn evaluate(vector: &GoldenVector) -> VectorOutput {
    let data_hash = vector.content.data_hash();
    let transaction_hash = compute_transaction_hash(
        &data_hash,
        &GENESIS_HASH,
        &vector.content.shipment_id,
        vector.sequence,
    );
    VectorOutput {
        name: vector.name.to_string(),
        canonical_hex: hex::encode(canonical_content_bytes(&vector.content)),
        data_hash,
        transaction_hash,
        matches: data_hash.to_hex() == vector.expected_data_hash
            && transaction_hash.to_hex() == vector.expected_transaction_hash,
    }
}

/// Evaluate every vector.
pub fn verify_all_vectors() -> Vec<VectorOutput> {
    all_vectors().iter().map(evaluate).collect()
}
