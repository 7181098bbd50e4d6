//! URL frontier cache
//!
//! The [`Frontier`] owns one cache partition per rule fingerprint. Each
//! partition is a bounded queue of records pulled from the persistent store
//! by its own refill worker task. Callers ask for the next URL under a rule
//! set; a miss triggers one refill and one retry.
//!
//! ```text
//!  caller ──next_url──▶ Frontier ──pop──▶ Partition queue
//!                          │                   ▲
//!                          └──Fill/Empty──▶ Refill worker ──fetch──▶ UrlStore
//! ```
//!
//! # Lifecycle
//!
//! `start_cache_process` registers a consumer for a rule set and spawns the
//! worker on first use. `terminate_cache_process` releases one consumer; the
//! partition is torn down once none remain. `next_url` provisions a missing
//! partition on its own without registering a consumer.

pub mod partition;
pub mod rules;
pub mod worker;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, FrontierConfig};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::UrlRecord;
use crate::storage::{create_sqlite_store, SharedUrlStore};

pub use partition::{BoundedQueue, Partition, PartitionState, PartitionStats};
pub use rules::{fingerprint, Fingerprint, RuleSet, DEFAULT_SORT_FIELD};
pub use worker::{FillReport, Job};

use worker::run_refill_worker;

/// Registry slot for one fingerprint
struct PartitionEntry {
    partition: Arc<Partition>,
    worker: JoinHandle<()>,
    refcount: i64,
}

struct FrontierInner {
    store: SharedUrlStore,
    config: FrontierConfig,
    registry: Mutex<HashMap<Fingerprint, PartitionEntry>>,
}

impl Drop for FrontierInner {
    fn drop(&mut self) {
        for (_, entry) in self.registry.get_mut().drain() {
            entry.partition.close();
            entry.worker.abort();
        }
    }
}

/// Shared handle to the partition registry
///
/// Cloning is cheap; every clone talks to the same partitions. Must be used
/// from within a tokio runtime.
#[derive(Clone)]
pub struct Frontier {
    inner: Arc<FrontierInner>,
}

impl Frontier {
    /// Create a frontier over an existing store
    pub fn new(store: SharedUrlStore, config: FrontierConfig) -> Result<Self> {
        config.validate()?;
        info!(
            max_size = config.max_size,
            fill_timeout_secs = config.fill_timeout_secs,
            "URL frontier initialized"
        );
        Ok(Self {
            inner: Arc::new(FrontierInner {
                store,
                config,
                registry: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Create a frontier backed by the configured SQLite database
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = create_sqlite_store(&config.storage.sqlite_path)?;
        Self::new(store, config.frontier.clone())
    }

    pub fn config(&self) -> &FrontierConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SharedUrlStore {
        &self.inner.store
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register one consumer of `rules`, creating its partition if needed
    ///
    /// A partition whose worker has died is given a fresh worker.
    pub async fn start_cache_process(&self, rules: &RuleSet) -> Result<()> {
        rules.validate()?;

        let mut registry = self.inner.registry.lock().await;
        let entry = self.ensure_partition(&mut registry, rules)?;
        entry.refcount += 1;

        info!(
            fingerprint = %rules.fingerprint().short(),
            refcount = entry.refcount,
            required = ?rules.required_domains(),
            blocked = ?rules.blocked_domains(),
            sort = %rules.sort_list(),
            "Cache process started"
        );
        metrics::set_active_partitions(registry.len());
        Ok(())
    }

    /// Release one consumer of `rules`
    ///
    /// When no consumers remain the worker is aborted and the partition is
    /// removed. Unknown fingerprints are ignored.
    pub async fn terminate_cache_process(&self, rules: &RuleSet) {
        let fp = rules.fingerprint();
        let mut registry = self.inner.registry.lock().await;

        let Some(entry) = registry.get_mut(fp) else {
            debug!(fingerprint = %fp.short(), "Terminate for unknown partition ignored");
            return;
        };

        entry.refcount -= 1;
        if entry.refcount > 0 {
            info!(
                fingerprint = %fp.short(),
                refcount = entry.refcount,
                "Cache process released"
            );
            return;
        }

        if let Some(entry) = registry.remove(fp) {
            entry.partition.close();
            entry.worker.abort();
            info!(fingerprint = %fp.short(), "Cache process terminated");
        }
        metrics::set_active_partitions(registry.len());
    }

    /// Abort every worker and clear the registry
    pub async fn shutdown(&self) {
        let entries: Vec<PartitionEntry> = {
            let mut registry = self.inner.registry.lock().await;
            registry.drain().map(|(_, entry)| entry).collect()
        };

        let count = entries.len();
        let handles = entries.into_iter().map(|entry| {
            entry.partition.close();
            entry.worker.abort();
            entry.worker
        });
        // Aborted tasks resolve to a cancellation error
        futures::future::join_all(handles).await;

        metrics::set_active_partitions(0);
        info!(partitions = count, "URL frontier shut down");
    }

    fn ensure_partition<'a>(
        &self,
        registry: &'a mut HashMap<Fingerprint, PartitionEntry>,
        rules: &RuleSet,
    ) -> Result<&'a mut PartitionEntry> {
        match registry.entry(rules.fingerprint().clone()) {
            Entry::Occupied(slot) => {
                let entry = slot.into_mut();
                self.revive_worker(entry);
                Ok(entry)
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let partition = Arc::new(Partition::new(
                    rules.clone(),
                    self.inner.config.max_size,
                    tx,
                )?);
                let worker = self.spawn_worker(Arc::clone(&partition), rx);
                Ok(slot.insert(PartitionEntry {
                    partition,
                    worker,
                    refcount: 0,
                }))
            }
        }
    }

    /// Give a partition whose worker has exited a fresh worker and channel
    fn revive_worker(&self, entry: &mut PartitionEntry) {
        if !entry.worker.is_finished() {
            return;
        }
        warn!(
            fingerprint = %entry.partition.fingerprint().short(),
            "Refill worker not running, restarting"
        );
        let (tx, rx) = mpsc::unbounded_channel();
        entry.partition.replace_jobs(tx);
        entry.worker = self.spawn_worker(Arc::clone(&entry.partition), rx);
    }

    fn spawn_worker(
        &self,
        partition: Arc<Partition>,
        jobs: mpsc::UnboundedReceiver<Job>,
    ) -> JoinHandle<()> {
        tokio::spawn(run_refill_worker(
            partition,
            jobs,
            Arc::clone(&self.inner.store),
            self.inner.config.poll_interval(),
        ))
    }

    /// Partition for a read, provisioned without registering a consumer
    async fn partition_for_read(&self, rules: &RuleSet) -> Result<Arc<Partition>> {
        let mut registry = self.inner.registry.lock().await;
        let known = registry.len();
        let entry = self.ensure_partition(&mut registry, rules)?;
        let partition = Arc::clone(&entry.partition);
        if registry.len() != known {
            debug!(fingerprint = %rules.fingerprint().short(), "Partition auto-provisioned");
            metrics::set_active_partitions(registry.len());
        }
        Ok(partition)
    }

    /// Registered partition for `rules` with a live worker; never provisions
    async fn existing_partition(&self, rules: &RuleSet) -> Option<Arc<Partition>> {
        let mut registry = self.inner.registry.lock().await;
        let entry = registry.get_mut(rules.fingerprint())?;
        self.revive_worker(entry);
        Some(Arc::clone(&entry.partition))
    }

    // ------------------------------------------------------------------
    // Consumer operations
    // ------------------------------------------------------------------

    /// Next record to crawl under `rules`
    ///
    /// Serves from the partition queue; on a miss asks the worker for one
    /// fill and retries once. `Ok(None)` means nothing is available right
    /// now, including when the fill did not finish within the fill timeout.
    /// Returns [`Error::PartitionClosed`] if the partition is torn down
    /// while the call waits.
    pub async fn next_url(&self, rules: &RuleSet) -> Result<Option<UrlRecord>> {
        let partition = self.partition_for_read(rules).await?;
        let fp = partition.fingerprint().clone();

        let _serial = partition.next_url_lock.lock().await;
        let _not_emptying = partition.mid_empty.lock().await;

        if let Some(record) = partition.queue().try_pop() {
            metrics::record_cache_hit();
            debug!(fingerprint = %fp.short(), url = %record.url, "Cache hit");
            return Ok(Some(record));
        }

        let (done, filled) = oneshot::channel();
        partition.submit(Job::Fill { done })?;

        match timeout(self.inner.config.fill_timeout(), filled).await {
            Ok(Ok(report)) => {
                debug!(
                    fingerprint = %fp.short(),
                    enqueued = report.enqueued,
                    "Fill completed"
                );
            }
            Ok(Err(_)) => return Err(Error::partition_closed(fp.as_str())),
            Err(_) => {
                warn!(
                    fingerprint = %fp.short(),
                    timeout_secs = self.inner.config.fill_timeout_secs,
                    "Fill did not complete in time"
                );
                metrics::record_cache_miss();
                return Ok(None);
            }
        }

        match partition.queue().try_pop() {
            Some(record) => {
                metrics::record_cache_hit();
                debug!(fingerprint = %fp.short(), url = %record.url, "Served after fill");
                Ok(Some(record))
            }
            None if partition.is_closed() => Err(Error::partition_closed(fp.as_str())),
            None => {
                metrics::record_cache_miss();
                debug!(fingerprint = %fp.short(), "Cache miss, store exhausted");
                Ok(None)
            }
        }
    }

    /// Next record, or a record built from `seed` once the store is dry
    ///
    /// Tries `next_url` up to `attempts` times (at least once). On falling
    /// back, the partition is emptied so the following fill starts over.
    pub async fn next_url_or_seed(
        &self,
        rules: &RuleSet,
        seed: &str,
        attempts: usize,
    ) -> Result<UrlRecord> {
        for attempt in 1..=attempts.max(1) {
            if let Some(record) = self.next_url(rules).await? {
                return Ok(record);
            }
            debug!(
                fingerprint = %rules.fingerprint().short(),
                attempt,
                "No URL available"
            );
        }

        info!(
            fingerprint = %rules.fingerprint().short(),
            seed = %seed,
            "Frontier exhausted, falling back to seed"
        );
        self.empty_cache(rules).await?;
        Ok(UrlRecord::new(seed))
    }

    /// Write a record through to the persistent store
    ///
    /// Partition queues are left untouched.
    pub async fn put_url(&self, record: &UrlRecord) -> Result<UrlRecord> {
        let stored = self.inner.store.upsert(record).await?;
        debug!(url = %stored.url, domain = %stored.domain, "URL stored");
        Ok(stored)
    }

    /// Drain the partition for `rules`
    ///
    /// Submits `Empty` rounds until the queue is seen empty or the empty
    /// timeout runs out, returning whether it emptied. Records drained here
    /// become eligible for the next fill again. A missing partition counts
    /// as empty. Intended for resetting state between test scenarios.
    pub async fn empty_cache(&self, rules: &RuleSet) -> Result<bool> {
        let Some(partition) = self.existing_partition(rules).await else {
            return Ok(true);
        };
        let fp = partition.fingerprint().clone();

        let _emptying = partition.mid_empty.lock().await;
        let deadline = Instant::now() + self.inner.config.empty_timeout();

        loop {
            if partition.queue().is_empty() {
                info!(fingerprint = %fp.short(), "Cache emptied");
                return Ok(true);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    fingerprint = %fp.short(),
                    queued = partition.queue().len(),
                    "Cache did not empty in time"
                );
                return Ok(false);
            }

            let (done, drained) = oneshot::channel();
            partition.submit(Job::Empty { done })?;

            let wait: Duration = remaining.min(self.inner.config.empty_poll());
            match timeout(wait, drained).await {
                Ok(Ok(count)) => debug!(fingerprint = %fp.short(), drained = count, "Empty round"),
                Ok(Err(_)) => return Err(Error::partition_closed(fp.as_str())),
                Err(_) => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Snapshot of the partition for `rules`, if registered
    pub async fn partition_stats(&self, rules: &RuleSet) -> Option<PartitionStats> {
        let registry = self.inner.registry.lock().await;
        registry.get(rules.fingerprint()).map(|entry| PartitionStats {
            fingerprint: entry.partition.fingerprint().clone(),
            refcount: entry.refcount,
            queued: entry.partition.queue().len(),
            capacity: entry.partition.queue().capacity(),
            worker_alive: !entry.worker.is_finished(),
            fills: entry.partition.fills(),
            state: entry.partition.state(),
        })
    }

    /// Number of registered partitions
    pub async fn active_partitions(&self) -> usize {
        self.inner.registry.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockUrlStore;

    fn frontier_with(records: usize, max_size: usize) -> (Frontier, Arc<MockUrlStore>) {
        let store = Arc::new(MockUrlStore::with_records(
            (0..records).map(|i| UrlRecord::new(format!("https://unit.test/{i}"))),
        ));
        let config = FrontierConfig {
            poll_interval_ms: 20,
            empty_poll_ms: 20,
            empty_timeout_secs: 2,
            ..FrontierConfig::default()
        }
        .with_max_size(max_size);
        let frontier = Frontier::new(Arc::clone(&store) as SharedUrlStore, config).unwrap();
        (frontier, store)
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let store: SharedUrlStore = Arc::new(MockUrlStore::new());
        let config = FrontierConfig::default().with_max_size(0);
        assert!(Frontier::new(store, config).is_err());
    }

    #[tokio::test]
    async fn test_start_counts_references() {
        let (frontier, _) = frontier_with(0, 10);
        let rules = RuleSet::default();

        frontier.start_cache_process(&rules).await.unwrap();
        frontier.start_cache_process(&rules).await.unwrap();

        let stats = frontier.partition_stats(&rules).await.unwrap();
        assert_eq!(stats.refcount, 2);
        assert!(stats.worker_alive);
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.state, PartitionState::Active);

        frontier.terminate_cache_process(&rules).await;
        assert!(frontier.partition_stats(&rules).await.is_some());
        frontier.terminate_cache_process(&rules).await;
        assert!(frontier.partition_stats(&rules).await.is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_sort() {
        let (frontier, _) = frontier_with(0, 10);
        let rules = RuleSet::new(Vec::<String>::new(), Vec::<String>::new(), ["colour"]);
        let err = frontier.start_cache_process(&rules).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSortField(_)));
        assert_eq!(frontier.active_partitions().await, 0);
    }

    #[tokio::test]
    async fn test_terminate_unknown_is_noop() {
        let (frontier, _) = frontier_with(0, 10);
        frontier.terminate_cache_process(&RuleSet::default()).await;
        assert_eq!(frontier.active_partitions().await, 0);
    }

    #[tokio::test]
    async fn test_next_url_auto_provisions() {
        let (frontier, _) = frontier_with(2, 10);
        let rules = RuleSet::default();

        assert!(frontier.next_url(&rules).await.unwrap().is_some());
        let stats = frontier.partition_stats(&rules).await.unwrap();
        assert_eq!(stats.refcount, 0);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.fills, 1);
    }

    #[tokio::test]
    async fn test_next_url_or_seed_falls_back() {
        let (frontier, _) = frontier_with(1, 10);
        let rules = RuleSet::default();

        let first = frontier
            .next_url_or_seed(&rules, "https://seed.test/", 2)
            .await
            .unwrap();
        assert_eq!(first.url, "https://unit.test/0");

        let seed = frontier
            .next_url_or_seed(&rules, "https://seed.test/", 2)
            .await
            .unwrap();
        assert_eq!(seed.url, "https://seed.test/");
        assert_eq!(seed.domain, "seed.test");
    }

    #[tokio::test]
    async fn test_put_url_writes_through() {
        let (frontier, store) = frontier_with(0, 10);
        let stored = frontier
            .put_url(&UrlRecord::new("https://new.test/page"))
            .await
            .unwrap();
        assert!(stored.last_updated.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_put_url_store_failure() {
        let (frontier, store) = frontier_with(0, 10);
        store.set_unavailable(true);
        let err = frontier
            .put_url(&UrlRecord::new("https://new.test/page"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_empty_cache_drains() {
        let (frontier, _) = frontier_with(5, 10);
        let rules = RuleSet::default();

        frontier.next_url(&rules).await.unwrap();
        assert_eq!(frontier.partition_stats(&rules).await.unwrap().queued, 4);

        assert!(frontier.empty_cache(&rules).await.unwrap());
        assert_eq!(frontier.partition_stats(&rules).await.unwrap().queued, 0);

        // Unknown partition
        let other = RuleSet::requiring(["other.test"]);
        assert!(frontier.empty_cache(&other).await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_worker_is_restarted() {
        let (frontier, _) = frontier_with(3, 10);
        let rules = RuleSet::default();
        frontier.start_cache_process(&rules).await.unwrap();

        {
            let registry = frontier.inner.registry.lock().await;
            registry[rules.fingerprint()].worker.abort();
        }
        while frontier.partition_stats(&rules).await.unwrap().worker_alive {
            tokio::task::yield_now().await;
        }

        frontier.start_cache_process(&rules).await.unwrap();
        let stats = frontier.partition_stats(&rules).await.unwrap();
        assert!(stats.worker_alive);
        assert_eq!(stats.refcount, 2);
        assert!(frontier.next_url(&rules).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_cache_restarts_dead_worker() {
        let (frontier, _) = frontier_with(5, 10);
        let rules = RuleSet::default();
        frontier.next_url(&rules).await.unwrap();

        {
            let registry = frontier.inner.registry.lock().await;
            registry[rules.fingerprint()].worker.abort();
        }
        while frontier.partition_stats(&rules).await.unwrap().worker_alive {
            tokio::task::yield_now().await;
        }

        assert!(frontier.empty_cache(&rules).await.unwrap());
        let stats = frontier.partition_stats(&rules).await.unwrap();
        assert!(stats.worker_alive);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.refcount, 0);
        assert_eq!(frontier.active_partitions().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let (frontier, _) = frontier_with(0, 10);
        frontier.start_cache_process(&RuleSet::default()).await.unwrap();
        frontier
            .start_cache_process(&RuleSet::requiring(["a.test"]))
            .await
            .unwrap();
        assert_eq!(frontier.active_partitions().await, 2);

        frontier.shutdown().await;
        assert_eq!(frontier.active_partitions().await, 0);
    }
}
