//! Canonical list-query signatures.
//!
//! A [`ListQuery`] collects the paging, sort and filter parameters of a list
//! request. [`ListQuery::signature`] renders them into a [`QuerySignature`]:
//! compact JSON with sorted object keys, sorted filter names and sorted,
//! de-duplicated filter values. Two queries that differ only in the order
//! their parameters were supplied produce byte-identical signatures.
//!
//! A filter present with an empty value list is kept in the signature, so
//! `{"status": []}` and "no status filter" never collide.

use crate::error::{AegisError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_SORT: &str = "created_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Sort Order
// ═══════════════════════════════════════════════════════════════════════════════

/// Sort direction of a list query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(AegisError::invalid_input(format!("invalid sort order: {:?}", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// List Query
// ═══════════════════════════════════════════════════════════════════════════════

/// Parameters of a tenant-scoped list request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort: String,
    pub order: SortOrder,
    /// Extra filters keyed by name. Values have set semantics.
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
            sort: DEFAULT_SORT.to_string(),
            order: SortOrder::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Set a filter to the given values, replacing any earlier values.
    ///
    /// An empty iterator records the filter with an explicitly empty list.
    pub fn filter<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.extra
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Append a single value to a filter.
    pub fn filter_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Build a query from raw request parameters.
    ///
    /// `page`, `pageSize` (or `page_size`), `sort` and `order` are recognised;
    /// every other name becomes a filter. Repeated names accumulate values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::default();
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            match name {
                "page" => query.page = parse_positive(name, value)?,
                "pageSize" | "page_size" => query.page_size = parse_positive(name, value)?,
                "sort" => query.sort = value.to_string(),
                "order" => query.order = value.parse()?,
                _ => query = query.filter_value(name, value),
            }
        }
        Ok(query)
    }

    /// Canonical signature of this query.
    pub fn signature(&self) -> QuerySignature {
        let extra: BTreeMap<&str, Vec<&str>> = self
            .extra
            .iter()
            .map(|(name, values)| {
                let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
                values.sort_unstable();
                values.dedup();
                (name.as_str(), values)
            })
            .collect();

        // Keys are listed in sorted order so the output is identical whether or
        // not serde_json's `preserve_order` feature is enabled.
        let canonical = json!({
            "extra": extra,
            "order": self.order.as_str(),
            "page": self.page,
            "pageSize": self.page_size,
            "sort": self.sort,
        });

        QuerySignature(canonical.to_string())
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AegisError::invalid_input(format!(
            "{} must be a positive integer, got {:?}",
            name, value
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Query Signature
// ═══════════════════════════════════════════════════════════════════════════════

/// Canonical string form of a list query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerySignature(String);

impl QuerySignature {
    /// Wrap a signature produced elsewhere (another service, a log line).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase hex SHA-256 of the signature bytes.
    pub fn digest(&self) -> String {
        sha256_hex(self.0.as_bytes())
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ListQuery> for QuerySignature {
    fn from(query: &ListQuery) -> Self {
        query.signature()
    }
}

/// Unkeyed SHA-256, lowercase hex, no prefix.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_signature() {
        let sig = ListQuery::new().signature();
        assert_eq!(
            sig.as_str(),
            r#"{"extra":{},"order":"desc","page":1,"pageSize":20,"sort":"created_at"}"#
        );
    }

    #[test]
    fn test_filter_order_does_not_matter() {
        let a = ListQuery::new()
            .filter("status", ["open"])
            .filter("owner", ["u1", "u2"]);
        let b = ListQuery::new()
            .filter("owner", ["u2", "u1"])
            .filter("status", ["open"]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_duplicate_values_collapse() {
        let a = ListQuery::new().filter("status", ["open", "open"]);
        let b = ListQuery::new().filter("status", ["open"]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_empty_list_differs_from_absent_filter() {
        let absent = ListQuery::new();
        let empty = ListQuery::new().filter("status", Vec::<String>::new());
        assert_ne!(absent.signature(), empty.signature());
        assert!(empty.signature().as_str().contains(r#""status":[]"#));
    }

    #[test]
    fn test_every_field_participates() {
        let base = ListQuery::new().signature();
        assert_ne!(base, ListQuery::new().page(2).signature());
        assert_ne!(base, ListQuery::new().page_size(50).signature());
        assert_ne!(base, ListQuery::new().sort("updated_at").signature());
        assert_ne!(base, ListQuery::new().order(SortOrder::Asc).signature());
    }

    #[test]
    fn test_values_with_separators_do_not_collide() {
        let a = ListQuery::new().filter("tag", ["a,b"]);
        let b = ListQuery::new().filter("tag", ["a", "b"]);
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn test_from_pairs() {
        let query = ListQuery::from_pairs([
            ("page", "3"),
            ("pageSize", "10"),
            ("sort", "updatedAt"),
            ("order", "ASC"),
            ("status", "open"),
            ("status", "closed"),
        ])
        .unwrap();

        assert_eq!(query.page, 3);
        assert_eq!(query.page_size, 10);
        assert_eq!(query.sort, "updatedAt");
        assert_eq!(query.order, SortOrder::Asc);
        assert_eq!(query.extra["status"], vec!["open", "closed"]);
    }

    #[test]
    fn test_from_pairs_rejects_bad_page() {
        assert!(ListQuery::from_pairs([("page", "0")]).is_err());
        assert!(ListQuery::from_pairs([("pageSize", "many")]).is_err());
        assert!(ListQuery::from_pairs([("order", "sideways")]).is_err());
    }

    #[test]
    fn test_digest_is_lowercase_sha256() {
        let sig = QuerySignature::from_raw("abc");
        assert_eq!(
            sig.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
