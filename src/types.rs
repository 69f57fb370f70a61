//! Core data types used throughout the query engine
//!
//! # Key Types
//!
//! - **`Labels`**: Sorted set of name/value pairs identifying a series or a
//!   remote backend's coverage
//! - **`Matcher`**: A single label predicate (`=`, `!=`, `=~`, `!~`)
//! - **`SeriesId`**: Dense per-query handle of an output series
//! - **`TimeRange`**: Inclusive millisecond time window
//! - **`Point`**: A single (timestamp, value) pair
//!
//! # Example
//!
//! ```rust
//! use stepwise::types::{Labels, Matcher, MatchType};
//!
//! let lset = Labels::from_pairs(&[("__name__", "http_requests_total"), ("job", "web")]);
//! assert_eq!(lset.get("job"), Some("web"));
//!
//! let m = Matcher::new(MatchType::Regexp, "job", "we.*").unwrap();
//! assert!(m.matches("web"));
//! ```

use crate::query::error::{QueryError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Label holding the metric name
pub const METRIC_NAME: &str = "__name__";

/// Label holding the upper bound of a classic histogram bucket
pub const BUCKET_LABEL: &str = "le";

/// Dense identifier of an output series for the duration of one query
///
/// Ids are assigned by the operator tree; a step vector addresses its
/// samples by id rather than by label set.
pub type SeriesId = u64;

// ============================================================================
// Labels
// ============================================================================

/// A single label name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sorted, name-unique set of labels
///
/// Ordering follows the label-by-label comparison used for result sorting:
/// names first, then values, then length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// Create an empty label set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a label set from name/value pairs
    ///
    /// Later pairs win when a name is repeated.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        pairs.iter().map(|(n, v)| (*n, *v)).collect()
    }

    fn from_unsorted(mut labels: Vec<Label>) -> Self {
        // stable sort keeps insertion order among equal names, so the last
        // occurrence is the one retained below
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        let mut out: Vec<Label> = Vec::with_capacity(labels.len());
        for label in labels {
            match out.last_mut() {
                Some(last) if last.name == label.name => *last = label,
                _ => out.push(label),
            }
        }
        Self(out)
    }

    /// Get the value of a label
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    /// Check whether a label name is present
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no labels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate labels in name order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Copy of this set without the given names
    pub fn without(&self, names: &[&str]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| !names.contains(&l.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Copy of this set keeping only the given names
    pub fn only(&self, names: &[&str]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| names.contains(&l.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Copy of this set without the metric name
    pub fn drop_metric_name(&self) -> Labels {
        self.without(&[METRIC_NAME])
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_unsorted(iter.into_iter().map(|(n, v)| Label::new(n, v)).collect())
    }
}

impl Ord for Labels {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for Labels {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", l.name, l.value)?;
        }
        write!(f, "}}")
    }
}

// ============================================================================
// Matchers
// ============================================================================

/// Label matching operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// Exact match: label = value
    Equal,
    /// Not equal: label != value
    NotEqual,
    /// Regex match: label =~ pattern
    Regexp,
    /// Not regex: label !~ pattern
    NotRegexp,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Equal => write!(f, "="),
            MatchType::NotEqual => write!(f, "!="),
            MatchType::Regexp => write!(f, "=~"),
            MatchType::NotRegexp => write!(f, "!~"),
        }
    }
}

/// A label predicate used by vector selectors
#[derive(Debug, Clone)]
pub struct Matcher {
    /// Matching operator
    pub match_type: MatchType,
    /// Label name the matcher applies to
    pub name: String,
    /// Expected value or pattern
    pub value: String,
    /// Compiled, fully anchored pattern for regex matchers
    regex: Option<Regex>,
}

impl Matcher {
    /// Create a matcher, compiling the pattern for regex match types
    pub fn new(match_type: MatchType, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => {
                let anchored = format!("^(?:{})$", value);
                let re = Regex::new(&anchored).map_err(|e| {
                    QueryError::validation(format!("invalid regex matcher {}=~{:?}", name, value))
                        .with_source(e)
                })?;
                Some(re)
            },
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            match_type,
            name,
            value,
            regex,
        })
    }

    /// Equality matcher (never fails)
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            regex: None,
        }
    }

    /// Check whether a label value satisfies this matcher
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => value == self.value,
            MatchType::NotEqual => value != self.value,
            MatchType::Regexp => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRegexp => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Check whether a series label set satisfies this matcher
    ///
    /// An absent label is treated as the empty string.
    pub fn matches_labels(&self, labels: &Labels) -> bool {
        self.matches(labels.get(&self.name).unwrap_or(""))
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.match_type == other.match_type && self.name == other.name && self.value == other.value
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}

// ============================================================================
// Time
// ============================================================================

/// Time window for queries, inclusive on both ends, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(QueryError::validation(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Check if this range intersects `[min_t, max_t]`
    pub fn overlaps(&self, min_t: i64, max_t: i64) -> bool {
        !(self.start > max_t || self.end < min_t)
    }
}

/// A single sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Timestamp in milliseconds
    pub t: i64,
    /// Sample value
    pub v: f64,
}

impl Point {
    /// Create a new point
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}
