//! Value-matching predicates pluggable into a region scanner as a
//! [`RowFilter`](crate::scanner::RowFilter). `Filter` itself is a plain value
//! matcher (reused from the teacher essentially unchanged); `ColumnValueFilter`
//! adapts one or more of them to the scan-time contract: a row is discarded
//! if any configured column's filter rejects that column's value.

use regex::Regex as RegexPattern;
use serde::{Deserialize, Serialize};

use crate::scanner::RowFilter;

/// A predicate over a cell's raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Equal(Vec<u8>),
    NotEqual(Vec<u8>),
    GreaterThan(Vec<u8>),
    GreaterThanOrEqual(Vec<u8>),
    LessThan(Vec<u8>),
    LessThanOrEqual(Vec<u8>),
    Contains(Vec<u8>),
    StartsWith(Vec<u8>),
    EndsWith(Vec<u8>),
    /// Matches if the value is valid UTF-8 and matches the pattern. A value
    /// that isn't UTF-8, or a malformed pattern, never matches.
    Regex(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(&self, value: &[u8]) -> bool {
        match self {
            Filter::Equal(target) => value == target.as_slice(),
            Filter::NotEqual(target) => value != target.as_slice(),
            Filter::GreaterThan(target) => value > target.as_slice(),
            Filter::GreaterThanOrEqual(target) => value >= target.as_slice(),
            Filter::LessThan(target) => value < target.as_slice(),
            Filter::LessThanOrEqual(target) => value <= target.as_slice(),
            Filter::Contains(target) => contains_subsequence(value, target),
            Filter::StartsWith(target) => value.starts_with(target),
            Filter::EndsWith(target) => value.ends_with(target),
            Filter::Regex(pattern) => std::str::from_utf8(value)
                .ok()
                .zip(RegexPattern::new(pattern).ok())
                .is_some_and(|(s, re)| re.is_match(s)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(value)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(value)),
            Filter::Not(filter) => !filter.matches(value),
        }
    }
}

fn contains_subsequence(value: &[u8], subsequence: &[u8]) -> bool {
    if subsequence.is_empty() {
        return true;
    }
    if subsequence.len() > value.len() {
        return false;
    }
    value.windows(subsequence.len()).any(|w| w == subsequence)
}

/// One column's filter, keyed by its exact `family:qualifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: Vec<u8>,
    pub filter: Filter,
}

/// A set of per-column filters, usable directly as a scanner's [`RowFilter`]:
/// a row is discarded if any configured column is present with a value its
/// filter rejects. Columns the scanner never surfaces for a row are not
/// evaluated — absence is not rejection. A per-cell timestamp range isn't
/// offered here: the scanner already collapses each column to the single
/// newest value at or before its scan-time cutoff (§4.8), so there's no
/// per-cell timestamp left by the time a `RowFilter` sees the cell.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterSet {
    pub column_filters: Vec<ColumnFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        FilterSet::default()
    }

    pub fn add_column_filter(&mut self, column: Vec<u8>, filter: Filter) -> &mut Self {
        self.column_filters.push(ColumnFilter { column, filter });
        self
    }
}

impl RowFilter for FilterSet {
    fn filter_cell(&mut self, _row: &[u8], column: &[u8], value: &[u8]) -> bool {
        self.column_filters
            .iter()
            .any(|cf| cf.column == column && !cf.filter.matches(value))
    }
}
