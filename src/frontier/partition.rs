//! Cache partitions
//!
//! A partition is the bounded queue of ready-to-crawl records for one rule
//! fingerprint, plus the guards that serialize access to it. The queue is
//! the only structure shared between consumers (`next_url`) and the
//! partition's refill worker.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::{SortKey, UrlRecord};

use super::rules::{Fingerprint, RuleSet};
use super::worker::Job;

// ============================================================================
// Bounded Queue
// ============================================================================

/// Fixed-capacity FIFO of URL records with non-blocking push and pop
#[derive(Debug)]
pub struct BoundedQueue {
    items: Mutex<VecDeque<UrlRecord>>,
    capacity: usize,
}

impl BoundedQueue {
    /// Create an empty queue holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    // Critical sections never panic, so a poisoned lock still holds a
    // consistent queue.
    fn items(&self) -> MutexGuard<'_, VecDeque<UrlRecord>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record, handing it back if the queue is full
    pub fn try_push(&self, record: UrlRecord) -> std::result::Result<(), UrlRecord> {
        let mut items = self.items();
        if items.len() >= self.capacity {
            return Err(record);
        }
        items.push_back(record);
        Ok(())
    }

    /// Remove the oldest record, if any
    pub fn try_pop(&self) -> Option<UrlRecord> {
        self.items().pop_front()
    }

    /// Remove every queued record
    pub fn drain(&self) -> Vec<UrlRecord> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }
}

// ============================================================================
// Fill State
// ============================================================================

/// Where the refill worker is in its walk over the store
///
/// A pass starts at the head of the partition's ordering and follows the
/// keyset cursor until a short page comes back. Served entries not seen in
/// the current or previous pass no longer match the store and are pruned.
#[derive(Debug, Default)]
struct FillState {
    cursor: Option<UrlRecord>,
    pass: u64,
    /// URL -> (`last_visited` when enqueued, last pass that saw it)
    served: HashMap<String, (DateTime<Utc>, u64)>,
}

// ============================================================================
// Partition
// ============================================================================

/// Lifecycle state of a registered partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionState {
    /// Registered, worker running or restartable
    Active,
    /// Removed from the registry; queue and worker released
    Terminated,
}

/// Per-fingerprint cache state shared by the façade and the refill worker
pub struct Partition {
    rules: RuleSet,
    sort: Vec<SortKey>,
    queue: BoundedQueue,

    /// Job channel of the current worker; replaced when a dead worker is restarted
    jobs: Mutex<mpsc::UnboundedSender<Job>>,

    /// Serializes `next_url` calls for this fingerprint
    pub(crate) next_url_lock: tokio::sync::Mutex<()>,

    /// Keeps `next_url` and `empty_cache` from interleaving
    pub(crate) mid_empty: tokio::sync::Mutex<()>,

    fill_state: Mutex<FillState>,

    fills: AtomicU64,
    closed: AtomicBool,
}

impl Partition {
    /// Build a partition for a validated rule set
    pub(crate) fn new(
        rules: RuleSet,
        capacity: usize,
        jobs: mpsc::UnboundedSender<Job>,
    ) -> Result<Self> {
        let sort = rules.sort_keys()?;
        Ok(Self {
            rules,
            sort,
            queue: BoundedQueue::new(capacity),
            jobs: Mutex::new(jobs),
            next_url_lock: tokio::sync::Mutex::new(()),
            mid_empty: tokio::sync::Mutex::new(()),
            fill_state: Mutex::new(FillState::default()),
            fills: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.rules.fingerprint()
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    pub fn state(&self) -> PartitionState {
        if self.closed.load(Ordering::Acquire) {
            PartitionState::Terminated
        } else {
            PartitionState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PartitionState::Terminated
    }

    /// Number of completed fill cycles
    pub fn fills(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
    }

    pub(crate) fn record_fill(&self) {
        self.fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Hand a command to the refill worker
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        if self.is_closed() {
            return Err(Error::partition_closed(self.fingerprint().as_str()));
        }
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.send(job)
            .map_err(|_| Error::partition_closed(self.fingerprint().as_str()))
    }

    /// Point the partition at a freshly spawned worker's channel
    pub(crate) fn replace_jobs(&self, jobs: mpsc::UnboundedSender<Job>) {
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = jobs;
    }

    fn fill_state(&self) -> MutexGuard<'_, FillState> {
        self.fill_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the partition terminated and drop anything still queued
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.drain();
        *self.fill_state() = FillState::default();
    }

    /// Last record the refill worker walked past
    pub(crate) fn fill_cursor(&self) -> Option<UrlRecord> {
        self.fill_state().cursor.clone()
    }

    pub(crate) fn advance_cursor(&self, record: UrlRecord) {
        self.fill_state().cursor = Some(record);
    }

    /// Claim a fetched record for the queue
    ///
    /// Returns false when the partition already enqueued this record at the
    /// same or a newer visit. A record becomes eligible again once the store
    /// shows a newer visit than the one handed out.
    pub(crate) fn admit(&self, record: &UrlRecord) -> bool {
        let mut state = self.fill_state();
        let pass = state.pass;
        if let Some((visited, seen)) = state.served.get_mut(&record.url) {
            if *visited >= record.last_visited {
                *seen = pass;
                return false;
            }
        }
        state
            .served
            .insert(record.url.clone(), (record.last_visited, pass));
        true
    }

    /// End the current pass: rewind the cursor and prune stale served entries
    pub(crate) fn finish_pass(&self) {
        let mut state = self.fill_state();
        let pass = state.pass;
        state.served.retain(|_, (_, seen)| *seen + 1 >= pass);
        state.pass += 1;
        state.cursor = None;
    }

    /// Start the next fill from the head of the ordering
    pub(crate) fn reset_cursor(&self) {
        self.fill_state().cursor = None;
    }

    /// Forget records that were drained without being handed out
    pub(crate) fn forget_served(&self, records: &[UrlRecord]) {
        let mut state = self.fill_state();
        for record in records {
            state.served.remove(&record.url);
        }
    }

    /// Number of records currently tracked as handed out
    pub fn served_len(&self) -> usize {
        self.fill_state().served.len()
    }
}

/// Point-in-time view of one partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub fingerprint: Fingerprint,
    pub refcount: i64,
    pub queued: usize,
    pub capacity: usize,
    pub worker_alive: bool,
    pub fills: u64,
    pub state: PartitionState,
}
