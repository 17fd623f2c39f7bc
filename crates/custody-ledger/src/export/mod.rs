//! ExportEngine: renders a shipment chain as an audit artifact.
//!
//! Every format is rendered from one [`AuditTrail`]: the chain in ascending
//! order plus the verification result computed over exactly those events.
//! Two exports of the same chain differ only in their generation timestamp.

mod pdf;

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use custody_ledger_core::{
    event::rfc3339_millis, Blake3Hash, CoreError, Ed25519PublicKey, Ed25519Signature, Event,
    Keypair, ShipmentId,
};

use crate::error::ExportError;
use crate::verifier::{check_chain, ChainVerificationResult};

pub use pdf::ReportOptions;

/// Domain separator for attestation digests.
pub const ATTESTATION_DOMAIN: &[u8] = b"custody-ledger/attestation/v1";

/// Default number of hex chars of `dataHash` in CSV rows.
pub const DEFAULT_CSV_HASH_PREFIX_LEN: usize = 16;

const CSV_HEADER: &str =
    "event_id,event_type,timestamp,actor_name,actor_type,location_name,data_hash,verified";

/// Supported audit formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Json, ExportFormat::Csv, ExportFormat::Pdf];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A rendered export, buffered in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub content_type: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub generated_at: DateTime<Utc>,
}

/// A signed statement over a chain's ordered transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    /// Hex Ed25519 public key of the signer.
    pub public_key: String,
    /// Transaction hash of the last event covered.
    pub chain_head: Blake3Hash,
    pub event_count: u64,
    /// Hex Ed25519 signature over [`attestation_digest`].
    pub signature: String,
}

/// Digest a signer commits to: shipment id, event count and every
/// transaction hash in chain order.
pub fn attestation_digest(shipment_id: &ShipmentId, events: &[Event]) -> Blake3Hash {
    let shipment = shipment_id.as_str().as_bytes();
    let mut data = Vec::with_capacity(16 + shipment.len() + 32 * events.len());
    data.extend_from_slice(&(shipment.len() as u64).to_be_bytes());
    data.extend_from_slice(shipment);
    data.extend_from_slice(&(events.len() as u64).to_be_bytes());
    for event in events {
        data.extend_from_slice(event.transaction_hash().as_bytes());
    }
    Blake3Hash::hash_with_domain(ATTESTATION_DOMAIN, &data)
}

impl Attestation {
    /// Sign a non-empty chain.
    pub fn sign(keypair: &Keypair, shipment_id: &ShipmentId, events: &[Event]) -> Option<Self> {
        let head = events.last()?;
        let digest = attestation_digest(shipment_id, events);
        Some(Self {
            public_key: keypair.public_key().to_hex(),
            chain_head: *head.transaction_hash(),
            event_count: events.len() as u64,
            signature: keypair.sign(digest.as_bytes()).to_hex(),
        })
    }

    /// Check this attestation against a chain.
    pub fn verify(&self, shipment_id: &ShipmentId, events: &[Event]) -> Result<(), CoreError> {
        let head_matches = events
            .last()
            .is_some_and(|head| *head.transaction_hash() == self.chain_head);
        if !head_matches || self.event_count != events.len() as u64 {
            return Err(CoreError::InvalidSignature);
        }
        let key =
            Ed25519PublicKey::from_hex(&self.public_key).map_err(|_| CoreError::InvalidPublicKey)?;
        let signature = Ed25519Signature::from_hex(&self.signature)?;
        key.verify(attestation_digest(shipment_id, events).as_bytes(), &signature)
    }
}

/// Everything an export renders.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTrail {
    pub shipment_id: ShipmentId,
    /// Chain order.
    pub events: Vec<Event>,
    pub verification: ChainVerificationResult,
    pub attestation: Option<Attestation>,
    pub generated_at: DateTime<Utc>,
}

impl AuditTrail {
    /// Assemble a trail. An empty chain is rejected.
    pub fn new(
        shipment_id: ShipmentId,
        events: Vec<Event>,
        generated_at: DateTime<Utc>,
        signer: Option<&Keypair>,
    ) -> Result<Self, ExportError> {
        if events.is_empty() {
            return Err(ExportError::NoEvents(shipment_id));
        }
        let verification = check_chain(&shipment_id, &events, generated_at);
        let attestation = signer.and_then(|key| Attestation::sign(key, &shipment_id, &events));
        Ok(Self {
            shipment_id,
            events,
            verification,
            attestation,
            generated_at,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDocument<'a> {
    shipment_id: &'a ShipmentId,
    #[serde(with = "rfc3339_millis")]
    generated_at: DateTime<Utc>,
    verification: &'a ChainVerificationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    attestation: Option<&'a Attestation>,
    events: &'a [Event],
}

/// Quote a CSV field when RFC 4180 requires it.
fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

fn file_stem(shipment_id: &ShipmentId) -> String {
    shipment_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Renders audit trails.
#[derive(Debug, Clone)]
pub struct ExportEngine {
    csv_hash_prefix_len: usize,
    report: ReportOptions,
}

impl Default for ExportEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CSV_HASH_PREFIX_LEN, ReportOptions::default())
    }
}

impl ExportEngine {
    pub fn new(csv_hash_prefix_len: usize, report: ReportOptions) -> Self {
        Self {
            csv_hash_prefix_len,
            report,
        }
    }

    /// Pretty-printed JSON with full-fidelity events.
    pub fn write_json<W: Write>(&self, trail: &AuditTrail, mut w: W) -> Result<(), ExportError> {
        let doc = JsonDocument {
            shipment_id: &trail.shipment_id,
            generated_at: trail.generated_at,
            verification: &trail.verification,
            attestation: trail.attestation.as_ref(),
            events: &trail.events,
        };
        serde_json::to_writer_pretty(&mut w, &doc)?;
        w.write_all(b"\n")?;
        Ok(())
    }

    /// One CRLF-terminated row per event, after a header row.
    pub fn write_csv<W: Write>(&self, trail: &AuditTrail, mut w: W) -> Result<(), ExportError> {
        write!(w, "{}\r\n", CSV_HEADER)?;
        for event in &trail.events {
            let c = &event.content;
            let row = [
                csv_field(&c.id.to_string()).into_owned(),
                csv_field(c.event_type.as_str()).into_owned(),
                rfc3339_millis::format(&c.timestamp),
                csv_field(&c.actor.name).into_owned(),
                csv_field(c.actor.actor_type.as_str()).into_owned(),
                csv_field(&c.location.name).into_owned(),
                event.data_hash().short_hex(self.csv_hash_prefix_len),
                event.verified.to_string(),
            ];
            write!(w, "{}\r\n", row.join(","))?;
        }
        Ok(())
    }

    pub fn write_pdf<W: Write>(
        &self,
        trail: &AuditTrail,
        options: &ReportOptions,
        w: W,
    ) -> Result<(), ExportError> {
        pdf::write_report(trail, options, w)?;
        Ok(())
    }

    /// Render `trail` in `format`. PDF uses the engine's report options.
    pub fn render(&self, trail: &AuditTrail, format: ExportFormat) -> Result<ExportArtifact, ExportError> {
        let mut bytes = Vec::new();
        match format {
            ExportFormat::Json => self.write_json(trail, &mut bytes)?,
            ExportFormat::Csv => self.write_csv(trail, &mut bytes)?,
            ExportFormat::Pdf => self.write_pdf(trail, &self.report, &mut bytes)?,
        }
        Ok(self.artifact(trail, format, bytes))
    }

    /// Render a PDF report with explicit options.
    pub fn render_report(
        &self,
        trail: &AuditTrail,
        options: &ReportOptions,
    ) -> Result<ExportArtifact, ExportError> {
        let mut bytes = Vec::new();
        self.write_pdf(trail, options, &mut bytes)?;
        Ok(self.artifact(trail, ExportFormat::Pdf, bytes))
    }

    fn artifact(&self, trail: &AuditTrail, format: ExportFormat, bytes: Vec<u8>) -> ExportArtifact {
        tracing::info!(
            shipment_id = %trail.shipment_id,
            format = %format,
            event_count = trail.events.len(),
            bytes = bytes.len(),
            "rendered audit export"
        );
        ExportArtifact {
            format,
            content_type: format.content_type(),
            file_name: format!(
                "audit-{}-{}.{}",
                file_stem(&trail.shipment_id),
                trail.generated_at.format("%Y%m%dT%H%M%S%.3fZ"),
                format.extension()
            ),
            bytes,
            generated_at: trail.generated_at,
        }
    }
}
