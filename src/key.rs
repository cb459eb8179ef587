//! Row-keyed, multi-version key model.
//!
//! A [`Key`] orders by row ascending, then column ascending, then timestamp
//! DESCENDING — within a single row/column run the newest version sorts
//! first. This inversion is load-bearing: every tier (memcache, store file)
//! relies on it to serve "most recent version first" without a separate
//! sort step.

use std::cmp::Ordering;

pub type RowKey = Vec<u8>;
pub type Column = Vec<u8>;
pub type Timestamp = u64;

/// Sentinel meaning "the newest version, whatever its timestamp".
pub const LATEST_TIMESTAMP: Timestamp = Timestamp::MAX;

/// A versioned cell coordinate: (row, family:qualifier, timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Key {
    pub row: RowKey,
    pub column: Column,
    pub timestamp: Timestamp,
}

impl Key {
    pub fn new(row: impl Into<RowKey>, column: impl Into<Column>, timestamp: Timestamp) -> Self {
        Key {
            row: row.into(),
            column: column.into(),
            timestamp,
        }
    }

    /// True iff both keys have the same row.
    pub fn row_equal(&self, other: &Key) -> bool {
        self.row == other.row
    }

    /// True iff both keys have the same row and the same column.
    pub fn row_column_equal(&self, other: &Key) -> bool {
        self.row == other.row && self.column == other.column
    }

    /// True iff `self` and `other` share a row and `other`'s timestamp is at
    /// or before `self`'s — i.e. `other` is a visible version as of `self`.
    pub fn matches_without_column(&self, other: &Key) -> bool {
        self.row == other.row && other.timestamp <= self.timestamp
    }

    /// Split `column` on the first `:` into (family, qualifier). An empty
    /// qualifier means "family only".
    pub fn split_column(column: &[u8]) -> (&[u8], &[u8]) {
        match column.iter().position(|&b| b == b':') {
            Some(idx) => (&column[..idx], &column[idx + 1..]),
            None => (column, &[]),
        }
    }

    pub fn family(&self) -> &[u8] {
        Key::split_column(&self.column).0
    }

    pub fn qualifier(&self) -> &[u8] {
        Key::split_column(&self.column).1
    }
}

/// Row asc, column asc, timestamp DESC.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A cell's value: live bytes, or a tombstone marker at the key's timestamp.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Put(Vec<u8>),
    /// Delete marker (tombstone). Occludes same-(row,column) edits with a
    /// timestamp at or before its own.
    Delete,
}

impl Value {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Delete)
    }

    pub fn as_put(&self) -> Option<&[u8]> {
        match self {
            Value::Put(v) => Some(v),
            Value::Delete => None,
        }
    }
}

/// One versioned write: a key paired with its value or tombstone.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Edit {
    pub key: Key,
    pub value: Value,
}

impl Edit {
    pub fn put(row: impl Into<RowKey>, column: impl Into<Column>, ts: Timestamp, value: Vec<u8>) -> Self {
        Edit {
            key: Key::new(row, column, ts),
            value: Value::Put(value),
        }
    }

    pub fn delete(row: impl Into<RowKey>, column: impl Into<Column>, ts: Timestamp) -> Self {
        Edit {
            key: Key::new(row, column, ts),
            value: Value::Delete,
        }
    }
}

/// A column specification accepted by scanners (§4.1).
#[derive(Debug, Clone)]
pub enum ColumnSpec {
    /// Any qualifier within this family.
    FamilyOnly(Vec<u8>),
    /// family:qualifier pattern where the qualifier is a regex.
    Regex { family: Vec<u8>, pattern: String },
    /// Exact family:qualifier.
    Literal(Column),
}

/// Characters that, if present in a qualifier, mark it as a regex spec
/// rather than a literal one.
const REGEX_META: &[u8] = b"\\+|^&*$[]{}()";

impl ColumnSpec {
    /// Parse a raw `family:qualifier` (or bare `family`) spec into the right
    /// variant, per §4.1.
    pub fn parse(spec: &[u8]) -> Result<ColumnSpec, crate::error::Error> {
        let (family, qualifier) = Key::split_column(spec);
        if qualifier.is_empty() {
            return Ok(ColumnSpec::FamilyOnly(family.to_vec()));
        }
        if qualifier.iter().any(|b| REGEX_META.contains(b)) {
            let pattern = String::from_utf8(qualifier.to_vec())
                .map_err(|e| crate::error::Error::InvalidColumnMatcher(e.to_string()))?;
            // Validate eagerly so malformed patterns are rejected at scanner
            // construction time rather than on first match.
            regex::Regex::new(&pattern).map_err(|e| crate::error::Error::InvalidColumnMatcher(e.to_string()))?;
            Ok(ColumnSpec::Regex {
                family: family.to_vec(),
                pattern,
            })
        } else {
            Ok(ColumnSpec::Literal(spec.to_vec()))
        }
    }
}

/// A compiled matcher built from a [`ColumnSpec`].
pub struct ColumnMatcher {
    family: Vec<u8>,
    qualifier_regex: Option<regex::Regex>,
    literal: Option<Column>,
}

impl ColumnMatcher {
    pub fn new(spec: &ColumnSpec) -> Result<Self, crate::error::Error> {
        match spec {
            ColumnSpec::FamilyOnly(family) => Ok(ColumnMatcher {
                family: family.clone(),
                qualifier_regex: None,
                literal: None,
            }),
            ColumnSpec::Regex { family, pattern } => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| crate::error::Error::InvalidColumnMatcher(e.to_string()))?;
                Ok(ColumnMatcher {
                    family: family.clone(),
                    qualifier_regex: Some(re),
                    literal: None,
                })
            }
            ColumnSpec::Literal(col) => Ok(ColumnMatcher {
                family: Key::split_column(col).0.to_vec(),
                qualifier_regex: None,
                literal: Some(col.clone()),
            }),
        }
    }

    /// True unless this matcher is an exact literal column.
    pub fn is_wildcard(&self) -> bool {
        self.literal.is_none()
    }

    pub fn family(&self) -> &[u8] {
        &self.family
    }

    pub fn matches(&self, column: &[u8]) -> bool {
        if let Some(literal) = &self.literal {
            return column == literal.as_slice();
        }
        let (family, qualifier) = Key::split_column(column);
        if family != self.family.as_slice() {
            return false;
        }
        match &self.qualifier_regex {
            Some(re) => std::str::from_utf8(qualifier).map(|q| re.is_match(q)).unwrap_or(false),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_orders_row_then_column_then_timestamp_desc() {
        let a = Key::new(b"r1".to_vec(), b"cf:a".to_vec(), 100);
        let b = Key::new(b"r1".to_vec(), b"cf:a".to_vec(), 200);
        let c = Key::new(b"r1".to_vec(), b"cf:b".to_vec(), 50);
        let d = Key::new(b"r2".to_vec(), b"cf:a".to_vec(), 50);

        // Newer timestamp sorts first within the same row/column.
        assert!(b < a);
        // Column ordering dominates timestamp ordering.
        assert!(a < c);
        // Row ordering dominates everything else.
        assert!(c < d);
    }

    #[test]
    fn split_column_handles_family_only() {
        assert_eq!(Key::split_column(b"cf"), (&b"cf"[..], &b""[..]));
        assert_eq!(Key::split_column(b"cf:qual"), (&b"cf"[..], &b"qual"[..]));
    }

    #[test]
    fn column_spec_classifies_regex_vs_literal() {
        assert!(matches!(ColumnSpec::parse(b"cf").unwrap(), ColumnSpec::FamilyOnly(_)));
        assert!(matches!(ColumnSpec::parse(b"cf:exact").unwrap(), ColumnSpec::Literal(_)));
        assert!(matches!(
            ColumnSpec::parse(b"cf:a.*").unwrap(),
            ColumnSpec::Regex { .. }
        ));
    }

    #[test]
    fn matcher_wildcard_flag() {
        let m = ColumnMatcher::new(&ColumnSpec::parse(b"cf").unwrap()).unwrap();
        assert!(m.is_wildcard());
        let m = ColumnMatcher::new(&ColumnSpec::parse(b"cf:exact").unwrap()).unwrap();
        assert!(!m.is_wildcard());
        assert!(m.matches(b"cf:exact"));
        assert!(!m.matches(b"cf:other"));
    }

    #[test]
    fn matcher_regex_form() {
        let m = ColumnMatcher::new(&ColumnSpec::parse(b"cf:a.*").unwrap()).unwrap();
        assert!(m.is_wildcard());
        assert!(m.matches(b"cf:abc"));
        assert!(!m.matches(b"cf:xyz"));
        assert!(!m.matches(b"other:abc"));
    }
}
