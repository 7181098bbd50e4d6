//! SQLite store integration tests
//!
//! Run the frontier end to end over an on-disk SQLite catalog.

mod common;

use std::sync::Arc;

use tempfile::TempDir;
use urlfrontier::config::Config;
use urlfrontier::storage::{FetchQuery, SharedUrlStore, SqliteUrlStore, UrlStore};
use urlfrontier::{Frontier, RuleSet, UrlRecord};

use common::{day, records_on, test_config};

async fn sqlite_frontier(dir: &TempDir) -> (Frontier, SharedUrlStore) {
    let store: SharedUrlStore = Arc::new(SqliteUrlStore::open(dir.path().join("frontier.db")).unwrap());
    let frontier = Frontier::new(Arc::clone(&store), test_config()).unwrap();
    (frontier, store)
}

#[tokio::test]
async fn test_frontier_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let (frontier, store) = sqlite_frontier(&dir).await;

    for record in records_on("a.com", 3).into_iter().chain(records_on("b.com", 2)) {
        frontier.put_url(&record).await.unwrap();
    }
    assert_eq!(store.count().await.unwrap(), 5);

    let rules = RuleSet::blocking(["b.com"]);
    frontier.start_cache_process(&rules).await.unwrap();

    let mut served = Vec::new();
    while let Some(record) = frontier.next_url(&rules).await.unwrap() {
        served.push(record.url);
    }
    assert_eq!(
        served,
        vec![
            "https://a.com/page/1",
            "https://a.com/page/2",
            "https://a.com/page/3"
        ]
    );

    frontier.terminate_cache_process(&rules).await;
    assert_eq!(frontier.active_partitions().await, 0);
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let (frontier, _) = sqlite_frontier(&dir).await;
        frontier
            .put_url(
                &UrlRecord::new("https://a.com/kept")
                    .with_last_visited(day(4))
                    .with_metadata("lang", "en"),
            )
            .await
            .unwrap();
        frontier.shutdown().await;
    }

    let (frontier, _) = sqlite_frontier(&dir).await;
    let record = frontier.next_url(&RuleSet::default()).await.unwrap().unwrap();
    assert_eq!(record.url, "https://a.com/kept");
    assert_eq!(record.last_visited, day(4));
    assert_eq!(record.metadata.get("lang").map(String::as_str), Some("en"));
}

#[tokio::test]
async fn test_upsert_keeps_latest_visit() {
    let dir = TempDir::new().unwrap();
    let store = SqliteUrlStore::open(dir.path().join("urls.db")).unwrap();

    store
        .upsert(&UrlRecord::new("https://a.com/x").with_last_visited(day(9)))
        .await
        .unwrap();
    let merged = store
        .upsert(
            &UrlRecord::new("https://a.com/x")
                .with_last_visited(day(2))
                .with_score(3.5),
        )
        .await
        .unwrap();

    assert_eq!(merged.last_visited, day(9));
    assert_eq!(merged.score, Some(3.5));

    let fetched = store
        .fetch(&FetchQuery::new(10).with_required(&["a.com".to_string()]))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].score, Some(3.5));
}

#[tokio::test]
async fn test_from_config_creates_database() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.sqlite_path = dir.path().join("nested").join("frontier.db");
    config.frontier = test_config();

    let frontier = Frontier::from_config(&config).unwrap();
    frontier
        .put_url(&UrlRecord::new("https://a.com/"))
        .await
        .unwrap();

    assert!(config.storage.sqlite_path.exists());
    assert_eq!(frontier.store().count().await.unwrap(), 1);
}
