//! SQLite implementation of the EventStore trait.
//!
//! This is the primary storage backend for the custody ledger. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.
//!
//! Event content is stored as JSON (the source of truth for rehashing);
//! the filterable fields are duplicated into indexed columns.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use custody_ledger_core::{
    Blake3Hash, ChainLink, Event, EventContent, EventId, EventType, ShipmentId, GENESIS_HASH,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AppendResult, EventFilter, EventPage, EventStore, LedgerCounts, ShipmentSummary,
    VerificationRecord,
};

/// Columns read by [`EventRow::read`], in order.
const EVENT_COLUMNS: &str =
    "content, sequence, data_hash, previous_hash, transaction_hash, verified";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,

    /// Last reserved sequence number.
    last_sequence: AtomicU64,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        let last: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM events",
            [],
            |row| row.get(0),
        )?;
        tracing::debug!(last_sequence = last, "opened sqlite event store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            last_sequence: AtomicU64::new(last.max(0) as u64),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    /// Overwrite a stored event row in place, bypassing every append-only rule.
    ///
    /// Exists for fault injection: integrity tests use it to simulate
    /// tampering with persisted records. Returns false if the id is unknown.
    #[doc(hidden)]
    pub async fn overwrite_unchecked(&self, event: Event) -> Result<bool> {
        self.run(move |conn| {
            let content = serde_json::to_string(&event.content)?;
            let c = &event.content;
            let changed = conn.execute(
                "UPDATE events SET
                    shipment_id = ?2, event_type = ?3, timestamp = ?4, actor_id = ?5,
                    actor_type = ?6, location_type = ?7, content = ?8, data_hash = ?9,
                    previous_hash = ?10, transaction_hash = ?11, verified = ?12
                 WHERE event_id = ?1",
                params![
                    c.id.to_hyphenated(),
                    c.shipment_id.as_str(),
                    c.event_type.as_str(),
                    c.timestamp_millis(),
                    c.actor.id,
                    c.actor.actor_type.as_str(),
                    c.location.location_type.as_str(),
                    content,
                    event.data_hash().as_bytes().as_slice(),
                    event.previous_hash().as_bytes().as_slice(),
                    event.transaction_hash().as_bytes().as_slice(),
                    event.verified,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

/// Raw columns of one event row.
struct EventRow {
    content: String,
    sequence: i64,
    data_hash: Vec<u8>,
    previous_hash: Vec<u8>,
    transaction_hash: Vec<u8>,
    verified: bool,
}

impl EventRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            content: row.get(0)?,
            sequence: row.get(1)?,
            data_hash: row.get(2)?,
            previous_hash: row.get(3)?,
            transaction_hash: row.get(4)?,
            verified: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        let content: EventContent = serde_json::from_str(&self.content)?;
        Ok(Event {
            content,
            link: ChainLink {
                sequence: u64::try_from(self.sequence)
                    .map_err(|_| StoreError::InvalidData(format!("negative sequence {}", self.sequence)))?,
                data_hash: hash_column("data_hash", &self.data_hash)?,
                previous_hash: hash_column("previous_hash", &self.previous_hash)?,
                transaction_hash: hash_column("transaction_hash", &self.transaction_hash)?,
            },
            verified: self.verified,
        })
    }
}

fn hash_column(name: &str, bytes: &[u8]) -> Result<Blake3Hash> {
    Blake3Hash::try_from(bytes)
        .map_err(|_| StoreError::InvalidData(format!("{} is {} bytes, expected 32", name, bytes.len())))
}

fn millis_column(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::InvalidData(format!("timestamp {} out of range", ms)))
}

fn collect_events(rows: Vec<EventRow>) -> Result<Vec<Event>> {
    rows.into_iter().map(EventRow::into_event).collect()
}

fn head_data_hash(conn: &Connection, shipment_id: &str) -> Result<Option<Blake3Hash>> {
    let bytes: Option<Vec<u8>> = conn
        .query_row(
            "SELECT data_hash FROM events WHERE shipment_id = ?1
             ORDER BY timestamp DESC, sequence DESC LIMIT 1",
            params![shipment_id],
            |row| row.get(0),
        )
        .optional()?;
    bytes.map(|b| hash_column("data_hash", &b)).transpose()
}

/// Build a WHERE clause and its positional parameters for a filter.
fn filter_clause(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(shipment_id) = &filter.shipment_id {
        clauses.push("shipment_id = ?".into());
        values.push(Value::Text(shipment_id.as_str().to_string()));
    }
    if !filter.event_types.is_empty() {
        let marks = vec!["?"; filter.event_types.len()].join(", ");
        clauses.push(format!("event_type IN ({})", marks));
        values.extend(
            filter
                .event_types
                .iter()
                .map(|t| Value::Text(t.as_str().to_string())),
        );
    }
    if let Some(actor_id) = &filter.actor_id {
        clauses.push("actor_id = ?".into());
        values.push(Value::Text(actor_id.clone()));
    }
    if let Some(actor_type) = filter.actor_type {
        clauses.push("actor_type = ?".into());
        values.push(Value::Text(actor_type.as_str().to_string()));
    }
    if let Some(location_type) = filter.location_type {
        clauses.push("location_type = ?".into());
        values.push(Value::Text(location_type.as_str().to_string()));
    }
    if let Some(verified) = filter.verified {
        clauses.push("verified = ?".into());
        values.push(Value::Integer(verified as i64));
    }
    if let Some(start) = filter.start_millis() {
        clauses.push("timestamp >= ?".into());
        values.push(Value::Integer(start));
    }
    if let Some(end) = filter.end_millis() {
        clauses.push("timestamp <= ?".into());
        values.push(Value::Integer(end));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append(&self, event: &Event) -> Result<AppendResult> {
        let event = event.clone();

        self.run(move |conn| {
            let content = serde_json::to_string(&event.content)?;
            let tx = conn.transaction()?;
            let event_id = event.id().to_hyphenated();

            // Idempotent on id
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM events WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Ok(AppendResult::AlreadyExists);
            }

            // Must extend the current head
            let expected_previous =
                head_data_hash(&tx, event.shipment_id().as_str())?.unwrap_or(GENESIS_HASH);
            if *event.previous_hash() != expected_previous {
                tracing::warn!(
                    shipment_id = %event.shipment_id(),
                    event_id = %event.id(),
                    "append rejected: event does not link to chain head"
                );
                return Ok(AppendResult::Conflict { expected_previous });
            }

            let c = &event.content;
            tx.execute(
                "INSERT INTO events (
                    event_id, shipment_id, sequence, event_type, timestamp, actor_id,
                    actor_type, location_type, content, data_hash, previous_hash,
                    transaction_hash, verified, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    event_id,
                    c.shipment_id.as_str(),
                    event.sequence() as i64,
                    c.event_type.as_str(),
                    c.timestamp_millis(),
                    c.actor.id,
                    c.actor.actor_type.as_str(),
                    c.location.location_type.as_str(),
                    content,
                    event.data_hash().as_bytes().as_slice(),
                    event.previous_hash().as_bytes().as_slice(),
                    event.transaction_hash().as_bytes().as_slice(),
                    event.verified,
                    Utc::now().timestamp_millis(),
                ],
            )?;

            tx.commit()?;
            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn chain_head(&self, shipment_id: &ShipmentId) -> Result<Option<Event>> {
        let shipment_id = shipment_id.clone();

        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM events WHERE shipment_id = ?1
                         ORDER BY timestamp DESC, sequence DESC LIMIT 1",
                        EVENT_COLUMNS
                    ),
                    params![shipment_id.as_str()],
                    EventRow::read,
                )
                .optional()?;
            row.map(EventRow::into_event).transpose()
        })
        .await
    }

    async fn shipment_events(&self, shipment_id: &ShipmentId) -> Result<Vec<Event>> {
        let shipment_id = shipment_id.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM events WHERE shipment_id = ?1
                 ORDER BY timestamp ASC, sequence ASC",
                EVENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![shipment_id.as_str()], EventRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collect_events(rows)
        })
        .await
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<Event>> {
        let id = id.to_hyphenated();

        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM events WHERE event_id = ?1", EVENT_COLUMNS),
                    params![id],
                    EventRow::read,
                )
                .optional()?;
            row.map(EventRow::into_event).transpose()
        })
        .await
    }

    async fn get_by_transaction_hash(&self, hash: &Blake3Hash) -> Result<Option<Event>> {
        let hash = *hash;

        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM events WHERE transaction_hash = ?1",
                        EVENT_COLUMNS
                    ),
                    params![hash.as_bytes().as_slice()],
                    EventRow::read,
                )
                .optional()?;
            row.map(EventRow::into_event).transpose()
        })
        .await
    }

    async fn query(&self, filter: &EventFilter, offset: u64, limit: u64) -> Result<EventPage> {
        let (clause, mut values) = filter_clause(filter);

        self.run(move |conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM events {}", clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM events {}
                 ORDER BY timestamp DESC, sequence DESC LIMIT ? OFFSET ?",
                EVENT_COLUMNS, clause
            ))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), EventRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(EventPage {
                events: collect_events(rows)?,
                total: total.max(0) as u64,
            })
        })
        .await
    }

    async fn list_shipments(&self) -> Result<Vec<ShipmentSummary>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.shipment_id, s.n, s.first_ts, s.last_ts,
                        (SELECT h.data_hash FROM events h WHERE h.shipment_id = s.shipment_id
                         ORDER BY h.timestamp DESC, h.sequence DESC LIMIT 1),
                        v.is_valid, v.event_count, v.verified_at
                 FROM (SELECT shipment_id, COUNT(*) AS n, MIN(timestamp) AS first_ts,
                              MAX(timestamp) AS last_ts
                       FROM events GROUP BY shipment_id) s
                 LEFT JOIN verifications v ON v.shipment_id = s.shipment_id
                 ORDER BY s.shipment_id",
            )?;

            type Row = (String, i64, i64, i64, Vec<u8>, Option<bool>, Option<i64>, Option<i64>);
            let rows: Vec<Row> = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(shipment_id, n, first, last, head, is_valid, count, at)| -> Result<ShipmentSummary> {
                    let last_verification = match (is_valid, count, at) {
                        (Some(is_valid), Some(count), Some(at)) => Some(VerificationRecord {
                            is_valid,
                            event_count: count.max(0) as u64,
                            verified_at: millis_column(at)?,
                        }),
                        _ => None,
                    };
                    Ok(ShipmentSummary {
                        shipment_id: ShipmentId::new(shipment_id),
                        event_count: n.max(0) as u64,
                        first_event_at: millis_column(first)?,
                        last_event_at: millis_column(last)?,
                        head_hash: hash_column("data_hash", &head)?,
                        last_verification,
                    })
                })
                .collect()
        })
        .await
    }

    async fn mark_verified(&self, shipment_id: &ShipmentId, ids: &[EventId]) -> Result<u64> {
        let shipment_id = shipment_id.clone();
        let ids: Vec<String> = ids.iter().map(EventId::to_hyphenated).collect();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut changed = 0u64;
            {
                let mut stmt = tx.prepare(
                    "UPDATE events SET verified = 1
                     WHERE event_id = ?1 AND shipment_id = ?2 AND verified = 0",
                )?;
                for id in &ids {
                    changed += stmt.execute(params![id, shipment_id.as_str()])? as u64;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    async fn record_verification(
        &self,
        shipment_id: &ShipmentId,
        record: VerificationRecord,
    ) -> Result<()> {
        let shipment_id = shipment_id.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO verifications (shipment_id, is_valid, event_count, verified_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    shipment_id.as_str(),
                    record.is_valid,
                    record.event_count as i64,
                    record.verified_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest_verification(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<Option<VerificationRecord>> {
        let shipment_id = shipment_id.clone();

        self.run(move |conn| {
            let row: Option<(bool, i64, i64)> = conn
                .query_row(
                    "SELECT is_valid, event_count, verified_at FROM verifications
                     WHERE shipment_id = ?1",
                    params![shipment_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            row.map(|(is_valid, count, at)| -> Result<VerificationRecord> {
                Ok(VerificationRecord {
                    is_valid,
                    event_count: count.max(0) as u64,
                    verified_at: millis_column(at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn ledger_counts(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<LedgerCounts> {
        let start = window_start.timestamp_millis();
        let end = window_end.timestamp_millis();

        self.run(move |conn| {
            let (total_events, total_shipments, verified_events): (i64, i64, i64) = conn
                .query_row(
                    "SELECT COUNT(*), COUNT(DISTINCT shipment_id), COALESCE(SUM(verified), 0)
                     FROM events",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

            let events_in_window: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE timestamp >= ?1 AND timestamp < ?2",
                params![start, end],
                |row| row.get(0),
            )?;

            let valid_shipments: i64 = conn.query_row(
                "SELECT COUNT(*) FROM verifications v
                 WHERE v.is_valid = 1
                   AND EXISTS (SELECT 1 FROM events e WHERE e.shipment_id = v.shipment_id)",
                [],
                |row| row.get(0),
            )?;

            let mut stmt =
                conn.prepare("SELECT event_type, COUNT(*) FROM events GROUP BY event_type")?;
            let by_type = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut counts = LedgerCounts {
                total_events: total_events.max(0) as u64,
                total_shipments: total_shipments.max(0) as u64,
                verified_events: verified_events.max(0) as u64,
                events_in_window: events_in_window.max(0) as u64,
                valid_shipments: valid_shipments.max(0) as u64,
                ..Default::default()
            };
            for (name, n) in by_type {
                let kind: EventType = name
                    .parse()
                    .map_err(|e| StoreError::InvalidData(format!("{}", e)))?;
                counts.events_by_type.insert(kind, n.max(0) as u64);
            }

            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_ledger_core::{Actor, ActorType, EventBuilder, Location, LocationType};

    fn content(shipment: &str, kind: EventType, ms: i64) -> EventContent {
        EventBuilder::new(
            shipment,
            kind,
            Actor::new("u-1", ActorType::User, "Clerk").with_organization("Acme Freight"),
            Location::new("Hub", LocationType::Facility).with_coordinates(51.92, 4.47),
        )
        .timestamp_millis(ms)
        .meta("pallets", 3i64)
        .meta("temp", -18.25)
        .build()
    }

    async fn append_next(store: &SqliteStore, content: EventContent) -> Event {
        let previous = store
            .chain_head(&content.shipment_id)
            .await
            .unwrap()
            .map(|h| *h.data_hash())
            .unwrap_or(GENESIS_HASH);
        let seq = store.next_sequence().await.unwrap();
        let event = Event::link(content, previous, seq);
        assert_eq!(store.append(&event).await.unwrap(), AppendResult::Appended);
        event
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;
        let e2 = append_next(&store, content("SH-1", EventType::Dispatched, 2_000)).await;

        let chain = store.shipment_events(&"SH-1".into()).await.unwrap();
        assert_eq!(chain, vec![e1.clone(), e2.clone()]);

        // Stored content rehashes to the stored dataHash
        for event in &chain {
            assert_eq!(event.recompute_data_hash(), *event.data_hash());
        }

        let fetched = store.get_event(&e2.id()).await.unwrap().unwrap();
        assert_eq!(fetched, e2);

        let by_tx = store
            .get_by_transaction_hash(e1.transaction_hash())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_tx.id(), e1.id());
    }

    #[tokio::test]
    async fn test_floats_survive_storage_bit_for_bit() {
        // Shortest-form printing of this value reparses one ulp off without
        // exact float parsing.
        let awkward = 10.938711676632721_f64;
        let content = EventBuilder::new(
            "SH-F",
            EventType::TemperatureReading,
            Actor::new("sensor-1", ActorType::Sensor, "Reefer Sensor"),
            Location::new("Reefer", LocationType::Vehicle).with_coordinates(awkward, -awkward),
        )
        .timestamp_millis(1_000)
        .meta("celsius", awkward)
        .meta("tiny", 5e-324)
        .build();
        let store = SqliteStore::open_memory().unwrap();
        let written = append_next(&store, content).await;
        let stored = store.get_event(&written.id()).await.unwrap().unwrap();

        let coords = stored.content.location.coordinates.as_ref().unwrap();
        assert_eq!(coords.latitude.to_bits(), awkward.to_bits());
        assert_eq!(coords.longitude.to_bits(), (-awkward).to_bits());
        assert_eq!(
            stored.content.metadata["celsius"].as_f64().map(f64::to_bits),
            Some(awkward.to_bits())
        );
        assert_eq!(stored.recompute_data_hash(), *written.data_hash());
        assert_eq!(stored.recompute_transaction_hash(), *written.transaction_hash());
    }

    #[tokio::test]
    async fn test_idempotent_append() {
        let store = SqliteStore::open_memory().unwrap();
        let event = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;

        let again = store.append(&event).await.unwrap();
        assert_eq!(again, AppendResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;

        let fork = Event::link(content("SH-1", EventType::Dispatched, 2_000), GENESIS_HASH, 50);
        let result = store.append(&fork).await.unwrap();
        assert!(matches!(
            result,
            AppendResult::Conflict { expected_previous } if expected_previous == *e1.data_hash()
        ));
        assert!(store.get_event(&fork.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_hash_unique() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;

        // Different id, same chain fields: the unique index rejects it
        let mut dup = e1.clone();
        dup.content.id = EventId::from_u128(77);
        dup.content.shipment_id = "SH-2".into();
        dup.link.previous_hash = GENESIS_HASH;
        assert!(store.append(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_query_filters_and_order() {
        let store = SqliteStore::open_memory().unwrap();
        append_next(&store, content("SH-1", EventType::Created, 1_000)).await;
        append_next(&store, content("SH-1", EventType::Dispatched, 2_000)).await;
        append_next(&store, content("SH-2", EventType::Created, 3_000)).await;

        let filter = EventFilter {
            event_types: vec![EventType::Created],
            ..Default::default()
        };
        let page = store.query(&filter, 0, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.events[0].shipment_id().as_str(), "SH-2");
        assert_eq!(page.events[1].shipment_id().as_str(), "SH-1");

        let filter = EventFilter {
            shipment_id: Some("SH-1".into()),
            verified: Some(false),
            ..Default::default()
        };
        let page = store.query(&filter, 1, 10).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].event_type(), EventType::Created);
    }

    #[tokio::test]
    async fn test_sub_millisecond_bounds_agree_with_memory() {
        let sqlite = SqliteStore::open_memory().unwrap();
        let memory = crate::MemoryStore::new();
        for ms in [1_000, 2_000, 3_000] {
            let c = content("SH-1", EventType::Checkpoint, ms);
            let event = append_next(&sqlite, c).await;
            assert_eq!(memory.append(&event).await.unwrap(), AppendResult::Appended);
        }

        let at = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms).unwrap() + chrono::Duration::microseconds(700)
        };
        let filter = EventFilter {
            start: Some(at(1_000)),
            end: Some(at(2_999)),
            ..Default::default()
        };
        let from_sqlite = sqlite.query(&filter, 0, 10).await.unwrap();
        let from_memory = memory.query(&filter, 0, 10).await.unwrap();
        assert_eq!(from_sqlite.total, 2);
        assert_eq!(from_sqlite, from_memory);
    }

    #[tokio::test]
    async fn test_verification_state() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;
        let shipment: ShipmentId = "SH-1".into();

        assert_eq!(store.mark_verified(&shipment, &[e1.id()]).await.unwrap(), 1);
        assert_eq!(store.mark_verified(&shipment, &[e1.id()]).await.unwrap(), 0);

        let record = VerificationRecord {
            is_valid: true,
            event_count: 1,
            verified_at: DateTime::<Utc>::from_timestamp_millis(5_000).unwrap(),
        };
        store.record_verification(&shipment, record).await.unwrap();
        assert_eq!(store.latest_verification(&shipment).await.unwrap(), Some(record));

        let summaries = store.list_shipments().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].event_count, 1);
        assert_eq!(summaries[0].head_hash, *e1.data_hash());
        assert_eq!(summaries[0].last_verification, Some(record));

        let start = DateTime::<Utc>::from_timestamp_millis(0).unwrap();
        let end = DateTime::<Utc>::from_timestamp_millis(86_400_000).unwrap();
        let counts = store.ledger_counts(start, end).await.unwrap();
        assert_eq!(counts.verified_events, 1);
        assert_eq!(counts.valid_shipments, 1);
        assert_eq!(counts.events_in_window, 1);
    }

    #[tokio::test]
    async fn test_empty_counts() {
        let store = SqliteStore::open_memory().unwrap();
        let counts = store
            .ledger_counts(DateTime::<Utc>::default(), DateTime::<Utc>::default())
            .await
            .unwrap();
        assert_eq!(counts, LedgerCounts::default());
    }

    #[tokio::test]
    async fn test_raw_tamper_is_visible_to_rehash() {
        let store = SqliteStore::open_memory().unwrap();
        let event = append_next(&store, content("SH-1", EventType::Created, 1_000)).await;

        {
            let conn = store.conn.lock().unwrap();
            let mut tampered = event.content.clone();
            tampered.actor.name = "Mallory".into();
            conn.execute(
                "UPDATE events SET content = ?1 WHERE event_id = ?2",
                params![
                    serde_json::to_string(&tampered).unwrap(),
                    event.id().to_hyphenated()
                ],
            )
            .unwrap();
        }

        let stored = store.get_event(&event.id()).await.unwrap().unwrap();
        assert_eq!(stored.data_hash(), event.data_hash());
        assert_ne!(stored.recompute_data_hash(), *stored.data_hash());
    }

    #[tokio::test]
    async fn test_reopen_resumes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let last = {
            let store = SqliteStore::open(&path).unwrap();
            append_next(&store, content("SH-1", EventType::Created, 1_000)).await;
            append_next(&store, content("SH-1", EventType::Dispatched, 2_000)).await
        };

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.next_sequence().await.unwrap() > last.sequence());
        let head = store.chain_head(&"SH-1".into()).await.unwrap().unwrap();
        assert_eq!(head.id(), last.id());
    }
}
