//! Refill worker
//!
//! One worker task runs per active partition. It is the only producer for
//! the partition queue: commands arrive on the job channel and are serviced
//! strictly in submission order, one at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::storage::{FetchQuery, UrlStore};

use super::partition::Partition;

/// Command carried on a partition's job channel
///
/// Each command owns a one-shot completion channel. If the worker is
/// stopped before answering, the sender is dropped and the waiting caller
/// sees the partition as closed.
#[derive(Debug)]
pub enum Job {
    /// Top the queue up from the persistent store
    Fill { done: oneshot::Sender<FillReport> },
    /// Drain the queue completely; answers with the number of records dropped
    Empty { done: oneshot::Sender<usize> },
}

/// Outcome of one fill cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Records returned by the store, including ones skipped as already served
    pub fetched: usize,
    /// Records actually pushed into the queue
    pub enqueued: usize,
    /// The store query failed; the cycle counted as zero records
    pub store_error: bool,
}

/// Worker main loop
///
/// Blocks on the job channel for at most `poll_interval` at a time and
/// returns once every sender is gone. Termination is otherwise forced from
/// outside by aborting the task.
pub(crate) async fn run_refill_worker(
    partition: Arc<Partition>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    store: Arc<dyn UrlStore>,
    poll_interval: Duration,
) {
    let fingerprint = partition.fingerprint().short().to_string();
    info!(fingerprint = %fingerprint, "Refill worker started");

    loop {
        let job = match tokio::time::timeout(poll_interval, jobs.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => continue,
        };

        match job {
            Job::Fill { done } => {
                info!(fingerprint = %fingerprint, "Filling the cache");
                let report = fill(&partition, store.as_ref()).await;
                let _ = done.send(report);
            }
            Job::Empty { done } => {
                info!(fingerprint = %fingerprint, "Emptying the cache");
                let drained = partition.queue().drain();
                partition.forget_served(&drained);
                partition.reset_cursor();
                let _ = done.send(drained.len());
            }
        }
    }

    info!(fingerprint = %fingerprint, "Refill worker stopped");
}

/// Move matching records from the store into the partition queue
///
/// Resumes from the partition's keyset cursor, so each fill reads only
/// records it has not walked past yet. Pages until the queue is full or a
/// short page ends the pass, skipping records this partition already handed
/// out in their current version. A store failure ends the cycle with
/// whatever was enqueued so far.
pub(crate) async fn fill(partition: &Partition, store: &dyn UrlStore) -> FillReport {
    let started = Instant::now();
    let rules = partition.rules();
    let mut report = FillReport::default();

    loop {
        let needed = partition.queue().remaining();
        if needed == 0 {
            break;
        }

        let query = FetchQuery::new(needed)
            .with_after(partition.fill_cursor())
            .with_required(rules.required_domains())
            .with_blocked(rules.blocked_domains())
            .with_sort(partition.sort_keys().to_vec());

        let page = match store.fetch(&query).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    fingerprint = %partition.fingerprint().short(),
                    error = %format!("{e:#}"),
                    "Store fetch failed, treating fill as empty"
                );
                report.store_error = true;
                break;
            }
        };

        let page_len = page.len();
        report.fetched += page_len;

        for record in page {
            if partition.admit(&record) {
                if let Err(rejected) = partition.queue().try_push(record.clone()) {
                    partition.forget_served(std::slice::from_ref(&rejected));
                    break;
                }
                report.enqueued += 1;
            }
            partition.advance_cursor(record);
        }

        if page_len < needed {
            partition.finish_pass();
            break;
        }
    }

    partition.record_fill();
    metrics::record_fill(
        report.enqueued,
        report.store_error,
        started.elapsed().as_secs_f64(),
    );
    debug!(
        fingerprint = %partition.fingerprint().short(),
        fetched = report.fetched,
        enqueued = report.enqueued,
        queued = partition.queue().len(),
        "Fill cycle complete"
    );

    report
}
