//! Common utilities and helper functions

use anyhow::{Context, Result};
use url::Url;

/// Extract the host of a URL as its crawl domain
pub fn extract_domain(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context("Invalid URL")?;

    parsed
        .host_str()
        .map(|s| s.to_string())
        .context("No host in URL")
}

/// Normalize a caller-supplied domain for filter matching
///
/// Lowercases and strips surrounding whitespace and a trailing dot, so that
/// `"Example.COM."` and `"example.com"` name the same domain.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}
