//! Repository pattern for the persistent URL catalog
//!
//! The frontier only needs two things from the catalog: a filtered, sorted
//! fetch and a merging upsert. [`UrlStore`] captures exactly that so the
//! frontier can run against SQLite in production and an in-memory mock in
//! tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Frontier refill workers                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UrlStore trait                          │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                       │
//!                    ▼                       ▼
//!          ┌─────────────────┐     ┌─────────────────┐
//!          │     SQLite      │     │      Mock       │
//!          └─────────────────┘     └─────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::models::{SortField, SortKey, UrlRecord};

// ============================================================================
// Query Types
// ============================================================================

/// Filtered, sorted fetch against the catalog
#[derive(Debug, Clone, Default)]
pub struct FetchQuery {
    /// Maximum number of records to return
    pub limit: usize,

    /// Keyset cursor: only records ordered strictly after this one are returned
    pub after: Option<UrlRecord>,

    /// When non-empty, a record's domain must be one of these
    pub required_domains: Vec<String>,

    /// When non-empty, a record's domain must be none of these
    pub blocked_domains: Vec<String>,

    /// Ordering, first key most significant
    pub sort: Vec<SortKey>,
}

impl FetchQuery {
    /// Create a query returning up to `limit` records
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Resume after the last record of a previous page
    pub fn with_after(mut self, cursor: Option<UrlRecord>) -> Self {
        self.after = cursor;
        self
    }

    pub fn with_required(mut self, domains: &[String]) -> Self {
        self.required_domains = domains.to_vec();
        self
    }

    pub fn with_blocked(mut self, domains: &[String]) -> Self {
        self.blocked_domains = domains.to_vec();
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    /// Whether a record passes the domain filters
    pub fn matches(&self, record: &UrlRecord) -> bool {
        if !self.required_domains.is_empty() && !self.required_domains.contains(&record.domain) {
            return false;
        }
        !self.blocked_domains.contains(&record.domain)
    }

    /// Effective ordering: the sort keys, then URL to break ties
    pub fn ordering(&self) -> Vec<SortKey> {
        let mut keys = self.sort.clone();
        if !keys.iter().any(|k| k.field == SortField::Url) {
            keys.push(SortKey {
                field: SortField::Url,
                descending: false,
            });
        }
        keys
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistent catalog of URL records
#[async_trait]
pub trait UrlStore: Send + Sync {
    /// Fetch up to `query.limit` records matching the domain filters, sorted
    ///
    /// Ties on the sort keys are broken by URL, which makes the order total
    /// and lets `query.after` resume exactly where a previous page ended.
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<UrlRecord>>;

    /// Insert a record or merge it into the existing record with the same URL
    async fn upsert(&self, record: &UrlRecord) -> Result<UrlRecord>;

    /// Get a record by URL
    async fn get(&self, url: &str) -> Result<Option<UrlRecord>>;

    /// Count records in the catalog
    async fn count(&self) -> Result<usize>;
}

/// Thread-safe shared store handle
pub type SharedUrlStore = Arc<dyn UrlStore>;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`UrlStore`]
///
/// The connection sits behind a `Mutex`; every query runs on the blocking
/// pool so refill workers never stall the async runtime.
pub struct SqliteUrlStore {
    conn: Arc<Mutex<Connection>>,
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    // Fixed width so lexical order equals time order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn ts_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| anyhow::anyhow!("SQLite connection mutex poisoned"))
}

const SELECT_COLUMNS: &str =
    "url, domain, last_visited, last_updated, score, update_freq, checksum, metadata";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UrlRecord> {
    let last_visited: String = row.get(2)?;
    let last_updated: Option<String> = row.get(3)?;
    let metadata: Option<String> = row.get(7)?;

    let metadata = match metadata.as_deref() {
        Some(raw) => serde_json::from_str::<BTreeMap<String, String>>(raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        None => BTreeMap::new(),
    };

    Ok(UrlRecord {
        url: row.get(0)?,
        domain: row.get(1)?,
        last_visited: ts_column(2, &last_visited)?,
        last_updated: last_updated.as_deref().map(|raw| ts_column(3, raw)).transpose()?,
        score: row.get(4)?,
        update_freq: row.get(5)?,
        checksum: row.get(6)?,
        metadata,
    })
}

/// Column value of `field` for a record, as bound in keyset comparisons
fn sort_value(field: SortField, record: &UrlRecord) -> Value {
    match field {
        SortField::Url => Value::Text(record.url.clone()),
        SortField::Domain => Value::Text(record.domain.clone()),
        SortField::LastVisited => Value::Text(format_ts(&record.last_visited)),
        SortField::LastUpdated => record
            .last_updated
            .as_ref()
            .map_or(Value::Null, |ts| Value::Text(format_ts(ts))),
        SortField::Score => record.score.map_or(Value::Null, Value::Real),
        SortField::UpdateFreq => record
            .update_freq
            .map_or(Value::Null, |days| Value::Integer(i64::from(days))),
    }
}

/// `WHERE` fragment selecting rows ordered strictly after `cursor`
///
/// SQLite sorts NULL below every value, so a NULL cursor key is compared
/// with `IS [NOT] NULL` instead of a bound parameter.
fn keyset_clause(keys: &[SortKey], cursor: &UrlRecord, args: &mut Vec<Value>) -> String {
    let mut branches = Vec::with_capacity(keys.len());

    for (i, key) in keys.iter().enumerate() {
        let mut terms = Vec::with_capacity(i + 1);
        for prior in &keys[..i] {
            let col = prior.field.as_str();
            terms.push(match sort_value(prior.field, cursor) {
                Value::Null => format!("{col} IS NULL"),
                value => {
                    args.push(value);
                    format!("{col} = ?{}", args.len())
                }
            });
        }

        let col = key.field.as_str();
        terms.push(match (sort_value(key.field, cursor), key.descending) {
            (Value::Null, false) => format!("{col} IS NOT NULL"),
            (Value::Null, true) => "0".to_string(),
            (value, false) => {
                args.push(value);
                format!("{col} > ?{}", args.len())
            }
            (value, true) => {
                args.push(value);
                format!("({col} < ?{} OR {col} IS NULL)", args.len())
            }
        });

        branches.push(format!("({})", terms.join(" AND ")));
    }

    format!("({})", branches.join(" OR "))
}

impl SqliteUrlStore {
    /// Open (or create) a SQLite store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite URL store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS url_metadata (
                    url TEXT PRIMARY KEY,
                    domain TEXT NOT NULL,
                    last_visited TEXT NOT NULL,
                    last_updated TEXT,
                    score REAL,
                    update_freq INTEGER,
                    checksum TEXT,
                    metadata TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_url_metadata_domain
                    ON url_metadata(domain);

                CREATE INDEX IF NOT EXISTS idx_url_metadata_last_visited
                    ON url_metadata(last_visited);
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await
        .context("SQLite task panicked")?
    }

    /// Fetch statement plus its positional arguments
    fn build_fetch_sql(query: &FetchQuery) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM url_metadata");
        let mut clauses = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if !query.required_domains.is_empty() {
            let ph = placeholders(args.len() + 1, query.required_domains.len());
            args.extend(query.required_domains.iter().cloned().map(Value::Text));
            clauses.push(format!("domain IN ({ph})"));
        }
        if !query.blocked_domains.is_empty() {
            let ph = placeholders(args.len() + 1, query.blocked_domains.len());
            args.extend(query.blocked_domains.iter().cloned().map(Value::Text));
            clauses.push(format!("domain NOT IN ({ph})"));
        }

        let keys = query.ordering();
        if let Some(cursor) = &query.after {
            clauses.push(keyset_clause(&keys, cursor, &mut args));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let order: Vec<String> = keys.iter().map(SortKey::to_sql).collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        args.push(Value::Integer(query.limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", args.len()));
        (sql, args)
    }
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl UrlStore for SqliteUrlStore {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<UrlRecord>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let (sql, args) = Self::build_fetch_sql(query);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).context("Failed to prepare fetch query")?;
            let records = stmt
                .query_map(params_from_iter(args), row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read URL records")?;
            Ok(records)
        })
        .await
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<UrlRecord> {
        let incoming = record.clone();

        self.with_conn(move |conn| {
            let existing = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM url_metadata WHERE url = ?1"),
                    params![incoming.url],
                    row_to_record,
                )
                .optional()
                .context("Failed to look up URL")?;

            let mut merged = match existing {
                Some(mut stored) => {
                    stored.merge_from(&incoming);
                    stored
                }
                None => incoming,
            };
            merged.last_updated = Some(Utc::now());

            let metadata = serde_json::to_string(&merged.metadata)?;
            conn.execute(
                r#"
                    INSERT INTO url_metadata
                        (url, domain, last_visited, last_updated, score, update_freq, checksum, metadata)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(url) DO UPDATE SET
                        domain = excluded.domain,
                        last_visited = excluded.last_visited,
                        last_updated = excluded.last_updated,
                        score = excluded.score,
                        update_freq = excluded.update_freq,
                        checksum = excluded.checksum,
                        metadata = excluded.metadata
                    "#,
                params![
                    merged.url,
                    merged.domain,
                    format_ts(&merged.last_visited),
                    merged.last_updated.as_ref().map(format_ts),
                    merged.score,
                    merged.update_freq,
                    merged.checksum,
                    metadata,
                ],
            )
            .context("Failed to upsert URL")?;

            Ok(merged)
        })
        .await
    }

    async fn get(&self, url: &str) -> Result<Option<UrlRecord>> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM url_metadata WHERE url = ?1"),
                    params![url],
                    row_to_record,
                )
                .optional()
                .context("Failed to get URL record")?;
            Ok(record)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM url_metadata", [], |row| row.get(0))?;
            Ok(total as usize)
        })
        .await
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory mock implementation of [`UrlStore`]
///
/// Supports failure injection and an artificial fetch delay so tests can
/// exercise store outages and teardown during a fill.
pub struct MockUrlStore {
    records: RwLock<HashMap<String, UrlRecord>>,
    unavailable: AtomicBool,
    fetch_delay_ms: AtomicU64,
    fetch_calls: AtomicUsize,
}

impl MockUrlStore {
    /// Create a new mock store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            fetch_delay_ms: AtomicU64::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Create a mock store pre-loaded with records
    pub fn with_records(records: impl IntoIterator<Item = UrlRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write().unwrap_or_else(|e| e.into_inner());
            for record in records {
                map.insert(record.url.clone(), record);
            }
        }
        store
    }

    /// Make every subsequent fetch and upsert fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent fetch
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of fetch calls served so far, failed ones included
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Get the number of records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("mock store unavailable");
        }
        Ok(())
    }
}

impl Default for MockUrlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlStore for MockUrlStore {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<UrlRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()?;

        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("mock store lock poisoned"))?;

        let keys = query.ordering();
        let mut matched: Vec<UrlRecord> = records
            .values()
            .filter(|r| query.matches(r))
            .filter(|r| {
                query.after.as_ref().map_or(true, |cursor| {
                    SortKey::compare_all(&keys, r, cursor) == std::cmp::Ordering::Greater
                })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| SortKey::compare_all(&keys, a, b));
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn upsert(&self, record: &UrlRecord) -> Result<UrlRecord> {
        self.check_available()?;

        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("mock store lock poisoned"))?;

        let merged = records
            .entry(record.url.clone())
            .and_modify(|stored| stored.merge_from(record))
            .or_insert_with(|| record.clone());
        merged.last_updated = Some(Utc::now());
        Ok(merged.clone())
    }

    async fn get(&self, url: &str) -> Result<Option<UrlRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("mock store lock poisoned"))?;
        Ok(records.get(url).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.len())
    }
}

// ============================================================================
// Shared Store Constructors
// ============================================================================

/// Create a shared SQLite store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> Result<SharedUrlStore> {
    let store = SqliteUrlStore::open(path)?;
    Ok(Arc::new(store))
}

/// Create a shared mock store
pub fn create_mock_store() -> SharedUrlStore {
    Arc::new(MockUrlStore::new())
}

// ============================================================================
// Tests
// ============================================================================
