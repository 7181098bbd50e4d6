//! Common test utilities

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use urlfrontier::config::FrontierConfig;
use urlfrontier::storage::{MockUrlStore, SharedUrlStore};
use urlfrontier::{Frontier, UrlRecord};

/// Fixed timestamp `n` days into March 2024
pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, n, 12, 0, 0).unwrap()
}

/// Frontier settings tuned for fast tests
pub fn test_config() -> FrontierConfig {
    FrontierConfig {
        poll_interval_ms: 20,
        fill_timeout_secs: 5,
        empty_timeout_secs: 2,
        empty_poll_ms: 20,
        ..FrontierConfig::default()
    }
}

/// Frontier over a mock store seeded with `records`
#[allow(dead_code)]
pub fn mock_frontier(records: Vec<UrlRecord>) -> (Frontier, Arc<MockUrlStore>) {
    mock_frontier_with(records, test_config())
}

/// Frontier over a mock store with explicit settings
#[allow(dead_code)]
pub fn mock_frontier_with(
    records: Vec<UrlRecord>,
    config: FrontierConfig,
) -> (Frontier, Arc<MockUrlStore>) {
    let store = Arc::new(MockUrlStore::with_records(records));
    let frontier = Frontier::new(Arc::clone(&store) as SharedUrlStore, config).unwrap();
    (frontier, store)
}

/// `count` records on `domain`, visited an hour apart in page order
#[allow(dead_code)]
pub fn records_on(domain: &str, count: u32) -> Vec<UrlRecord> {
    (1..=count)
        .map(|i| {
            UrlRecord::new(format!("https://{domain}/page/{i}"))
                .with_last_visited(day(1) + chrono::Duration::hours(i64::from(i)))
        })
        .collect()
}
