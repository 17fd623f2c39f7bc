//! QueryEngine: filtered, paginated search across all events.
//!
//! Search results are most-recent-first (descending timestamp, ties by
//! descending sequence). Chain reads elsewhere are ascending.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use custody_ledger_core::{ActorType, Event, EventType, LocationType, ShipmentId};
use custody_ledger_store::{EventFilter, EventStore};

use crate::error::{LedgerError, Result};

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Largest page size accepted.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A typed search request.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub filter: EventFilter,
    /// 1-based page index.
    pub page: u32,
    pub page_size: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            filter: EventFilter::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shipment(mut self, shipment_id: impl Into<ShipmentId>) -> Self {
        self.filter.shipment_id = Some(shipment_id.into());
        self
    }

    /// Add an accepted event type. Repeated calls mean "any of".
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.filter.event_types.push(event_type);
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.filter.actor_id = Some(actor_id.into());
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.filter.actor_type = Some(actor_type);
        self
    }

    pub fn location_type(mut self, location_type: LocationType) -> Self {
        self.filter.location_type = Some(location_type);
        self
    }

    pub fn verified(mut self, verified: bool) -> Self {
        self.filter.verified = Some(verified);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.filter.start = start;
        self.filter.end = end;
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Check pagination bounds and the date range. Values are never clamped.
    pub fn validate(&self, max_page_size: u32) -> Result<()> {
        if self.page < 1 {
            return Err(LedgerError::InvalidQuery(format!(
                "page must be >= 1, got {}",
                self.page
            )));
        }
        if self.page_size < 1 || self.page_size > max_page_size {
            return Err(LedgerError::InvalidQuery(format!(
                "pageSize must be in [1, {}], got {}",
                max_page_size, self.page_size
            )));
        }
        if let (Some(start), Some(end)) = (self.filter.start, self.filter.end) {
            if start > end {
                return Err(LedgerError::InvalidQuery(
                    "startDate must not be after endDate".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Untyped query parameters as they arrive from a request boundary.
///
/// Blank values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEventQuery {
    pub shipment_id: Option<String>,
    /// One event type or a comma-separated set.
    pub event_type: Option<String>,
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub location_type: Option<String>,
    pub verified: Option<String>,
    /// RFC 3339 instant or `YYYY-MM-DD` (start of that UTC day).
    pub start_date: Option<String>,
    /// RFC 3339 instant or `YYYY-MM-DD` (end of that UTC day, inclusive).
    pub end_date: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn invalid(field: &str, value: &str) -> LedgerError {
    LedgerError::InvalidQuery(format!("invalid {}: {:?}", field, value))
}

fn parse_number(field: &str, value: Option<&str>, default: u32) -> Result<u32> {
    match value {
        None => Ok(default),
        Some(s) => s.parse().map_err(|_| invalid(field, s)),
    }
}

fn parse_date(field: &str, s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid(field, s))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| invalid(field, s))?;
    Ok(Utc.from_utc_datetime(&day.and_time(time)))
}

impl RawEventQuery {
    /// Parse into a typed query. Unknown enum values and unparsable numbers
    /// or dates are errors. Bounds are checked by [`EventQuery::validate`].
    pub fn parse(&self) -> Result<EventQuery> {
        self.parse_with_default(DEFAULT_PAGE_SIZE)
    }

    /// Like [`parse`](Self::parse), with the page size used when none is given.
    pub fn parse_with_default(&self, default_page_size: u32) -> Result<EventQuery> {
        let mut filter = EventFilter {
            shipment_id: present(&self.shipment_id).map(ShipmentId::from),
            actor_id: present(&self.actor_id).map(str::to_string),
            ..Default::default()
        };

        if let Some(types) = present(&self.event_type) {
            for part in types.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let kind: EventType = part.parse().map_err(|_| invalid("eventType", part))?;
                if !filter.event_types.contains(&kind) {
                    filter.event_types.push(kind);
                }
            }
        }
        if let Some(s) = present(&self.actor_type) {
            filter.actor_type = Some(s.parse().map_err(|_| invalid("actorType", s))?);
        }
        if let Some(s) = present(&self.location_type) {
            filter.location_type = Some(s.parse().map_err(|_| invalid("locationType", s))?);
        }
        if let Some(s) = present(&self.verified) {
            filter.verified = Some(match s.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(invalid("verified", s)),
            });
        }
        if let Some(s) = present(&self.start_date) {
            filter.start = Some(parse_date("startDate", s, false)?);
        }
        if let Some(s) = present(&self.end_date) {
            filter.end = Some(parse_date("endDate", s, true)?);
        }

        Ok(EventQuery {
            filter,
            page: parse_number("page", present(&self.page), 1)?,
            page_size: parse_number("pageSize", present(&self.page_size), default_page_size)?,
        })
    }
}

impl TryFrom<&RawEventQuery> for EventQuery {
    type Error = LedgerError;

    fn try_from(raw: &RawEventQuery) -> Result<Self> {
        raw.parse()
    }
}

/// Pagination metadata for a result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedEvents {
    pub events: Vec<Event>,
    pub pagination: Pagination,
}

/// `ceil(total_items / page_size)`; zero when `page_size` is zero.
pub fn total_pages(total_items: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total_items.div_ceil(u64::from(page_size))
}

/// Runs validated searches against a store.
pub struct QueryEngine<'a, S: EventStore + ?Sized> {
    store: &'a S,
    max_page_size: u32,
}

impl<'a, S: EventStore + ?Sized> QueryEngine<'a, S> {
    pub fn new(store: &'a S, max_page_size: u32) -> Self {
        Self {
            store,
            max_page_size,
        }
    }

    /// Run a search. A page past the end returns no events with correct totals.
    pub async fn query(&self, query: &EventQuery) -> Result<PaginatedEvents> {
        query.validate(self.max_page_size)?;

        let offset = u64::from(query.page - 1) * u64::from(query.page_size);
        let page = self
            .store
            .query(&query.filter, offset, u64::from(query.page_size))
            .await?;

        tracing::debug!(
            page = query.page,
            page_size = query.page_size,
            total = page.total,
            returned = page.events.len(),
            "event query"
        );

        Ok(PaginatedEvents {
            events: page.events,
            pagination: Pagination {
                page: query.page,
                page_size: query.page_size,
                total_items: page.total,
                total_pages: total_pages(page.total, query.page_size),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{HashChainBuilder, ShipmentLocks};
    use custody_ledger_core::{Actor, EventBuilder, Location};
    use custody_ledger_store::MemoryStore;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_total_pages_covers_every_item(total in 0u64..100_000, size in 1u32..=MAX_PAGE_SIZE) {
            let pages = total_pages(total, size);
            prop_assert!(pages * u64::from(size) >= total);
            if pages > 0 {
                prop_assert!((pages - 1) * u64::from(size) < total);
            }
        }
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 30), 0);
        assert_eq!(total_pages(1, 30), 1);
        assert_eq!(total_pages(30, 30), 1);
        assert_eq!(total_pages(31, 30), 2);
        assert_eq!(total_pages(100, 1), 100);
    }

    #[test]
    fn test_bounds_rejected_not_clamped() {
        assert!(EventQuery::new().validate(MAX_PAGE_SIZE).is_ok());
        assert!(EventQuery::new().page(0).validate(MAX_PAGE_SIZE).is_err());
        assert!(EventQuery::new().page_size(0).validate(MAX_PAGE_SIZE).is_err());
        assert!(EventQuery::new().page_size(101).validate(MAX_PAGE_SIZE).is_err());
        assert!(EventQuery::new().page_size(100).validate(MAX_PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let later = DateTime::<Utc>::from_timestamp_millis(2_000).unwrap();
        let earlier = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        let q = EventQuery::new().between(Some(later), Some(earlier));
        assert!(matches!(
            q.validate(MAX_PAGE_SIZE),
            Err(LedgerError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_raw_parse() {
        let raw = RawEventQuery {
            shipment_id: Some("SH-1".into()),
            event_type: Some("customs_check, customs-hold".into()),
            actor_type: Some("SENSOR".into()),
            verified: Some("false".into()),
            start_date: Some("2025-01-14".into()),
            end_date: Some("2025-01-14".into()),
            page: Some("2".into()),
            page_size: Some(" ".into()),
            ..Default::default()
        };
        let q = raw.parse().unwrap();

        assert_eq!(q.filter.shipment_id, Some("SH-1".into()));
        assert_eq!(
            q.filter.event_types,
            vec![EventType::CustomsCheck, EventType::CustomsHold]
        );
        assert_eq!(q.filter.actor_type, Some(ActorType::Sensor));
        assert_eq!(q.filter.verified, Some(false));
        assert_eq!(q.page, 2);
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);

        let start = q.filter.start.unwrap();
        let end = q.filter.end.unwrap();
        assert_eq!(start.timestamp_millis(), 1_736_812_800_000);
        assert_eq!(end.timestamp_millis(), 1_736_812_800_000 + 86_400_000 - 1);
    }

    #[test]
    fn test_raw_parse_rejects_garbage() {
        let bad = [
            RawEventQuery {
                event_type: Some("teleported".into()),
                ..Default::default()
            },
            RawEventQuery {
                start_date: Some("last tuesday".into()),
                ..Default::default()
            },
            RawEventQuery {
                page: Some("-1".into()),
                ..Default::default()
            },
            RawEventQuery {
                verified: Some("maybe".into()),
                ..Default::default()
            },
        ];
        for raw in &bad {
            assert!(matches!(raw.parse(), Err(LedgerError::InvalidQuery(_))), "{raw:?}");
        }
    }

    #[test]
    fn test_raw_from_json() {
        let raw: RawEventQuery =
            serde_json::from_str(r#"{"shipmentId":"SH-9","pageSize":"10"}"#).unwrap();
        let q = EventQuery::try_from(&raw).unwrap();
        assert_eq!(q.page_size, 10);
        assert_eq!(q.filter.shipment_id, Some("SH-9".into()));
    }

    #[tokio::test]
    async fn test_query_pages_most_recent_first() {
        let store = MemoryStore::new();
        let locks = ShipmentLocks::new();
        let builder = HashChainBuilder::new(&store, &locks);
        for i in 0..5i64 {
            let content = EventBuilder::new(
                "SH-Q",
                EventType::Checkpoint,
                Actor::new("u-1", ActorType::User, "Clerk"),
                Location::new("Gate", LocationType::Checkpoint),
            )
            .timestamp_millis(1_000 * (i + 1))
            .build();
            builder.build(content).await.unwrap();
        }

        let engine = QueryEngine::new(&store, MAX_PAGE_SIZE);
        let first = engine.query(&EventQuery::new().page_size(2)).await.unwrap();
        assert_eq!(first.pagination.total_items, 5);
        assert_eq!(first.pagination.total_pages, 3);
        assert_eq!(first.events[0].content.timestamp_millis(), 5_000);
        assert_eq!(first.events[1].content.timestamp_millis(), 4_000);

        let last = engine.query(&EventQuery::new().page_size(2).page(3)).await.unwrap();
        assert_eq!(last.events.len(), 1);

        let beyond = engine.query(&EventQuery::new().page_size(2).page(9)).await.unwrap();
        assert!(beyond.events.is_empty());
        assert_eq!(beyond.pagination.total_pages, 3);
    }
}
