//! Rule sets and their partition fingerprints
//!
//! A [`RuleSet`] is the caller's filter/order policy for one logical crawl
//! job. Its [`Fingerprint`] keys the cache partition: equal fingerprints
//! share one partition even when the rule sets are distinct values.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::Result;
use crate::models::SortKey;
use crate::utils::normalize_domain;

/// Sort order used when a rule set does not name one
pub const DEFAULT_SORT_FIELD: &str = "last_visited";

const TAG_REQUIRED: &[u8] = b"req";
const TAG_BLOCKED: &[u8] = b"block";
const TAG_SORT: &[u8] = b"sort";

/// Content hash of a rule set, rendered as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable filter/order policy for one crawl job
///
/// The fingerprint is computed once at construction and cached.
#[derive(Debug, Clone)]
pub struct RuleSet {
    required_domains: Vec<String>,
    blocked_domains: Vec<String>,
    sort_fields: Vec<String>,
    fingerprint: Fingerprint,
}

impl RuleSet {
    /// Create a rule set
    pub fn new<R, B, S>(required_domains: R, blocked_domains: B, sort_fields: S) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        B: IntoIterator,
        B::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let required_domains: Vec<String> = required_domains.into_iter().map(Into::into).collect();
        let blocked_domains: Vec<String> = blocked_domains.into_iter().map(Into::into).collect();
        let sort_fields: Vec<String> = sort_fields.into_iter().map(Into::into).collect();
        let fingerprint = fingerprint(&required_domains, &blocked_domains, &sort_fields);

        Self {
            required_domains,
            blocked_domains,
            sort_fields,
            fingerprint,
        }
    }

    /// Rule set that only requires the given domains
    pub fn requiring<I>(domains: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(domains, Vec::<String>::new(), [DEFAULT_SORT_FIELD])
    }

    /// Rule set that only blocks the given domains
    pub fn blocking<I>(domains: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(Vec::<String>::new(), domains, [DEFAULT_SORT_FIELD])
    }

    /// Copy with both domain lists lowercased, sorted and de-duplicated
    ///
    /// Two rule sets that differ only in domain order or case have different
    /// fingerprints; normalizing both first makes them share a partition.
    /// Sort fields keep their order since it is significant.
    pub fn normalized(&self) -> Self {
        fn canonical(domains: &[String]) -> Vec<String> {
            let mut out: Vec<String> = domains.iter().map(|d| normalize_domain(d)).collect();
            out.sort();
            out.dedup();
            out
        }

        Self::new(
            canonical(&self.required_domains),
            canonical(&self.blocked_domains),
            self.sort_fields.clone(),
        )
    }

    pub fn required_domains(&self) -> &[String] {
        &self.required_domains
    }

    pub fn blocked_domains(&self) -> &[String] {
        &self.blocked_domains
    }

    pub fn sort_fields(&self) -> &[String] {
        &self.sort_fields
    }

    /// Sort fields joined with commas, as shown in logs
    pub fn sort_list(&self) -> String {
        self.sort_fields.join(",")
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Parse the sort fields into store sort keys
    pub fn sort_keys(&self) -> Result<Vec<SortKey>> {
        self.sort_fields.iter().map(|f| f.parse()).collect()
    }

    /// Check that every sort field is one the store understands
    pub fn validate(&self) -> Result<()> {
        self.sort_keys().map(|_| ())
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(Vec::<String>::new(), Vec::<String>::new(), [DEFAULT_SORT_FIELD])
    }
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for RuleSet {}

/// Hash the three rule fields into a fingerprint
///
/// Each element is hashed as `tag || element || 0x00`. The tag keeps a
/// required domain from colliding with an identical blocked domain; the
/// terminator keeps `["ab"]` apart from `["a", "b"]`. Elements are hashed in
/// the order given.
pub fn fingerprint(required: &[String], blocked: &[String], sort: &[String]) -> Fingerprint {
    let mut hasher = Sha256::new();

    for (tag, items) in [(TAG_REQUIRED, required), (TAG_BLOCKED, blocked), (TAG_SORT, sort)] {
        for item in items {
            hasher.update(tag);
            hasher.update(item.as_bytes());
            hasher.update([0u8]);
        }
    }

    Fingerprint(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = RuleSet::new(["a.com"], ["b.com"], ["last_visited"]);
        let b = RuleSet::new(["a.com"], ["b.com"], ["last_visited"]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_categories() {
        let required = RuleSet::new(["x.com"], Vec::<String>::new(), Vec::<String>::new());
        let blocked = RuleSet::new(Vec::<String>::new(), ["x.com"], Vec::<String>::new());
        assert_ne!(required.fingerprint(), blocked.fingerprint());
    }

    #[test]
    fn test_fingerprint_separates_element_boundaries() {
        let one = RuleSet::requiring(["xreqy"]);
        let two = RuleSet::requiring(["x", "y"]);
        assert_ne!(one.fingerprint(), two.fingerprint());
    }

    #[test]
    fn test_empty_rules_hash_to_constant() {
        let empty = RuleSet::new(
            Vec::<String>::new(),
            Vec::<String>::new(),
            Vec::<String>::new(),
        );
        // SHA-256 of the empty input
        assert_eq!(
            empty.fingerprint().as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let ab = RuleSet::blocking(["a.com", "b.com"]);
        let ba = RuleSet::blocking(["b.com", "a.com"]);
        assert_ne!(ab.fingerprint(), ba.fingerprint());
        assert_eq!(ab.normalized().fingerprint(), ba.normalized().fingerprint());
    }

    #[test]
    fn test_normalized_lowercases_and_dedups() {
        let rules = RuleSet::requiring(["B.com", "a.com", "b.com."]).normalized();
        assert_eq!(rules.required_domains(), &["a.com", "b.com"]);
        assert_eq!(rules.sort_fields(), &["last_visited"]);
    }

    #[test]
    fn test_default_rules() {
        let rules = RuleSet::default();
        assert!(rules.required_domains().is_empty());
        assert!(rules.blocked_domains().is_empty());
        assert_eq!(rules.sort_list(), "last_visited");
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_sort() {
        let rules = RuleSet::new(Vec::<String>::new(), Vec::<String>::new(), ["-score", "color"]);
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_short_fingerprint() {
        let rules = RuleSet::default();
        assert_eq!(rules.fingerprint().short().len(), 12);
        assert!(rules.fingerprint().as_str().starts_with(rules.fingerprint().short()));
    }
}
