//! Persistent URL catalog
//!
//! The frontier cache is never the source of truth: every record it serves
//! comes from, and every write goes to, a [`UrlStore`].

pub mod repository;

pub use repository::{
    create_mock_store, create_sqlite_store, FetchQuery, MockUrlStore, SharedUrlStore,
    SqliteUrlStore, UrlStore,
};
