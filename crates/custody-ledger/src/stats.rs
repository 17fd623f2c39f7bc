//! StatisticsAggregator: ledger-wide counts and rates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use custody_ledger_core::{event::rfc3339_millis, EventType};
use custody_ledger_store::{EventStore, LedgerCounts};

use crate::error::Result;

/// Ledger-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatistics {
    pub total_events: u64,
    pub total_shipments: u64,
    pub events_today: u64,
    /// Verified events over total events, in `0..=1`.
    pub verification_rate: f64,
    pub average_events_per_shipment: f64,
    /// Shipments whose latest verification passed, in `0..=100`.
    pub chain_integrity_percentage: f64,
    pub events_by_type: BTreeMap<EventType, u64>,
    #[serde(with = "rfc3339_millis")]
    pub generated_at: DateTime<Utc>,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ChainStatistics {
    pub fn from_counts(counts: &LedgerCounts, generated_at: DateTime<Utc>) -> Self {
        Self {
            total_events: counts.total_events,
            total_shipments: counts.total_shipments,
            events_today: counts.events_in_window,
            verification_rate: ratio(counts.verified_events, counts.total_events),
            average_events_per_shipment: ratio(counts.total_events, counts.total_shipments),
            chain_integrity_percentage: ratio(counts.valid_shipments, counts.total_shipments)
                * 100.0,
            events_by_type: counts.events_by_type.clone(),
            generated_at,
        }
    }
}

/// The UTC calendar day containing `now`, as `[start, next day start)`.
pub fn utc_day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN));
    (start, start + Duration::days(1))
}

#[derive(Debug)]
struct CachedStats {
    day: NaiveDate,
    stats: ChainStatistics,
}

/// Last computed statistics for the current UTC day.
///
/// Every invalidation bumps a generation counter; a result computed under an
/// older generation is never stored.
#[derive(Debug, Default)]
pub struct StatsCache {
    generation: AtomicU64,
    entry: Mutex<Option<CachedStats>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cached statistics for `day`, if any.
    pub fn get(&self, day: NaiveDate) -> Option<ChainStatistics> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .filter(|cached| cached.day == day)
            .map(|cached| cached.stats.clone())
    }

    /// Store `stats` unless the cache was invalidated since `generation`.
    pub fn put(&self, day: NaiveDate, generation: u64, stats: ChainStatistics) -> bool {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation() != generation {
            return false;
        }
        *entry = Some(CachedStats { day, stats });
        true
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entry = None;
    }
}

/// Computes [`ChainStatistics`] from store aggregates.
pub struct StatisticsAggregator<'a, S: EventStore + ?Sized> {
    store: &'a S,
    cache: Option<&'a StatsCache>,
}

impl<'a, S: EventStore + ?Sized> StatisticsAggregator<'a, S> {
    pub fn new(store: &'a S, cache: Option<&'a StatsCache>) -> Self {
        Self { store, cache }
    }

    /// Statistics as of `now`. "Today" is `now`'s UTC day.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<ChainStatistics> {
        let day = now.date_naive();
        let generation = match self.cache {
            Some(cache) => {
                if let Some(stats) = cache.get(day) {
                    return Ok(stats);
                }
                cache.generation()
            }
            None => 0,
        };

        let (start, end) = utc_day_bounds(now);
        let counts = self.store.ledger_counts(start, end).await?;
        let stats = ChainStatistics::from_counts(&counts, now);

        if let Some(cache) = self.cache {
            cache.put(day, generation, stats.clone());
        }
        tracing::debug!(
            total_events = stats.total_events,
            total_shipments = stats.total_shipments,
            "computed chain statistics"
        );
        Ok(stats)
    }
}
