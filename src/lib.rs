//! urlfrontier - partitioned URL cache for crawler workers
//!
//! Crawl jobs describe which URLs they want with a rule set (required
//! domains, blocked domains, sort order). The frontier keeps one bounded
//! in-memory queue per distinct rule set, refilled from a persistent URL
//! catalog by a background worker, so crawlers can pull their next URL
//! without querying the catalog on every request.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`error`] - Unified error type
//! - [`frontier`] - Rule fingerprints, cache partitions, refill workers and the [`Frontier`] façade
//! - [`metrics`] - Prometheus metrics
//! - [`models`] - URL records and sort keys
//! - [`storage`] - Persistent URL catalog (SQLite, in-memory mock)
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use urlfrontier::config::Config;
//! use urlfrontier::{Frontier, RuleSet};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let frontier = Frontier::from_config(&config)?;
//!
//!     let rules = RuleSet::new(["example.com"], Vec::<String>::new(), ["-score"]);
//!     frontier.start_cache_process(&rules).await?;
//!     while let Some(record) = frontier.next_url(&rules).await? {
//!         println!("{}", record.url);
//!     }
//!     frontier.terminate_cache_process(&rules).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, FrontierConfig};
    pub use crate::error::{Error, ErrorCategory, FrontierErrorTrait, Result};
    pub use crate::frontier::{Fingerprint, Frontier, PartitionStats, RuleSet};
    pub use crate::models::{SortKey, UrlRecord};
    pub use crate::storage::{MockUrlStore, SharedUrlStore, SqliteUrlStore, UrlStore};
}

// Direct re-exports for convenience
pub use frontier::{Fingerprint, Frontier, RuleSet};
pub use models::UrlRecord;
