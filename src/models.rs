// Core data structures for the URL frontier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::utils::extract_domain;

/// A crawl candidate
///
/// Identity in the persistent store is the URL string. Copies held in a
/// partition queue have no identity of their own; the same record may sit
/// in several partitions at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    pub last_visited: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Page-rank style score assigned by the ranking job; unset until ranked
    #[serde(default)]
    pub score: Option<f64>,
    /// Observed change frequency, in days between updates
    #[serde(default)]
    pub update_freq: Option<i32>,
    /// Content checksum of the last fetch
    pub checksum: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl UrlRecord {
    /// Create a never-visited record, deriving the domain from the URL host
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let domain = extract_domain(&url).unwrap_or_default();
        Self {
            url,
            domain,
            last_visited: DateTime::<Utc>::UNIX_EPOCH,
            last_updated: None,
            score: None,
            update_freq: None,
            checksum: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the last visit timestamp
    pub fn with_last_visited(mut self, at: DateTime<Utc>) -> Self {
        self.last_visited = at;
        self
    }

    /// Set the score
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Set the observed update frequency
    pub fn with_update_freq(mut self, days: i32) -> Self {
        self.update_freq = Some(days);
        self
    }

    /// Override the derived domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Fold an incoming write into this stored record
    ///
    /// `last_visited` only moves forward; optional fields are replaced only
    /// when the incoming record carries a value.
    pub fn merge_from(&mut self, incoming: &UrlRecord) {
        if incoming.last_visited > self.last_visited {
            self.last_visited = incoming.last_visited;
        }
        if !incoming.domain.is_empty() {
            self.domain = incoming.domain.clone();
        }
        if incoming.score.is_some() {
            self.score = incoming.score;
        }
        if incoming.update_freq.is_some() {
            self.update_freq = incoming.update_freq;
        }
        if incoming.checksum.is_some() {
            self.checksum = incoming.checksum.clone();
        }
        for (key, value) in &incoming.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Fields a rule set may sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Url,
    Domain,
    LastVisited,
    LastUpdated,
    Score,
    UpdateFreq,
}

impl SortField {
    /// Column name in the persistent store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Domain => "domain",
            Self::LastVisited => "last_visited",
            Self::LastUpdated => "last_updated",
            Self::Score => "score",
            Self::UpdateFreq => "update_freq",
        }
    }

    fn compare(&self, a: &UrlRecord, b: &UrlRecord) -> Ordering {
        match self {
            Self::Url => a.url.cmp(&b.url),
            Self::Domain => a.domain.cmp(&b.domain),
            Self::LastVisited => a.last_visited.cmp(&b.last_visited),
            // Unset values first, as SQLite orders NULLs ascending
            Self::LastUpdated => a.last_updated.cmp(&b.last_updated),
            Self::Score => match (a.score, b.score) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (x, y) => x.is_some().cmp(&y.is_some()),
            },
            Self::UpdateFreq => a.update_freq.cmp(&b.update_freq),
        }
    }
}

/// One sort directive: a field plus direction
///
/// Parsed from strings like `"last_visited"` (ascending) or `"-score"`
/// (descending).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl SortKey {
    /// Compare two records under this key
    pub fn compare(&self, a: &UrlRecord, b: &UrlRecord) -> Ordering {
        let ord = self.field.compare(a, b);
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Compare two records under a list of keys, first difference wins
    pub fn compare_all(keys: &[SortKey], a: &UrlRecord, b: &UrlRecord) -> Ordering {
        keys.iter()
            .map(|k| k.compare(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// `ORDER BY` fragment for SQL stores
    pub fn to_sql(&self) -> String {
        let dir = if self.descending { "DESC" } else { "ASC" };
        format!("{} {dir}", self.field.as_str())
    }
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let field = match name {
            "url" => SortField::Url,
            "domain" => SortField::Domain,
            "last_visited" => SortField::LastVisited,
            "last_updated" => SortField::LastUpdated,
            "score" => SortField::Score,
            "update_freq" => SortField::UpdateFreq,
            _ => return Err(Error::InvalidSortField(s.to_string())),
        };

        Ok(Self { field, descending })
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field.as_str())
        } else {
            f.write_str(self.field.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_derives_domain() {
        let record = UrlRecord::new("https://www.example.org/about?x=1");
        assert_eq!(record.domain, "www.example.org");
        assert_eq!(record.last_visited, DateTime::<Utc>::UNIX_EPOCH);
        assert!(record.last_updated.is_none());
    }

    #[test]
    fn test_unparseable_url_has_empty_domain() {
        let record = UrlRecord::new("not a url");
        assert!(record.domain.is_empty());
    }

    #[test]
    fn test_merge_keeps_newest_visit() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut stored = UrlRecord::new("https://a.com/").with_last_visited(late);
        let incoming = UrlRecord::new("https://a.com/")
            .with_last_visited(early)
            .with_score(0.7)
            .with_metadata("lang", "en");

        stored.merge_from(&incoming);
        assert_eq!(stored.last_visited, late);
        assert_eq!(stored.score, Some(0.7));
        assert_eq!(stored.metadata.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_merge_keeps_ranking_when_absent() {
        let mut stored = UrlRecord::new("https://a.com/").with_score(0.9).with_update_freq(7);
        let visit = UrlRecord::new("https://a.com/")
            .with_last_visited(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        stored.merge_from(&visit);
        assert_eq!(stored.score, Some(0.9));
        assert_eq!(stored.update_freq, Some(7));
    }

    #[test]
    fn test_unscored_sorts_first_ascending() {
        let key: SortKey = "score".parse().unwrap();
        let unscored = UrlRecord::new("https://a.com/");
        let scored = UrlRecord::new("https://b.com/").with_score(-1.0);
        assert_eq!(key.compare(&unscored, &scored), Ordering::Less);
    }

    #[test]
    fn test_merge_keeps_checksum_when_absent() {
        let mut stored = UrlRecord::new("https://a.com/");
        stored.checksum = Some("abc".to_string());
        stored.merge_from(&UrlRecord::new("https://a.com/"));
        assert_eq!(stored.checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_sort_key_parse() {
        let key: SortKey = "last_visited".parse().unwrap();
        assert_eq!(key.field, SortField::LastVisited);
        assert!(!key.descending);

        let key: SortKey = "-score".parse().unwrap();
        assert_eq!(key.field, SortField::Score);
        assert!(key.descending);
        assert_eq!(key.to_sql(), "score DESC");
        assert_eq!(key.to_string(), "-score");
    }

    #[test]
    fn test_sort_key_rejects_unknown_field() {
        let err = "color".parse::<SortKey>().unwrap_err();
        assert!(matches!(err, Error::InvalidSortField(f) if f == "color"));
    }

    #[test]
    fn test_compare_all_uses_tiebreak() {
        let keys: Vec<SortKey> = vec!["-score".parse().unwrap(), "url".parse().unwrap()];
        let a = UrlRecord::new("https://a.com/").with_score(1.0);
        let b = UrlRecord::new("https://b.com/").with_score(1.0);
        let c = UrlRecord::new("https://c.com/").with_score(2.0);

        let mut records = vec![b.clone(), a.clone(), c.clone()];
        records.sort_by(|x, y| SortKey::compare_all(&keys, x, y));
        assert_eq!(records, vec![c, a, b]);
    }
}
