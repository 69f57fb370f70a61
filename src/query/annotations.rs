//! Advisory diagnostics attached to a query
//!
//! Annotations never fail a query. The optimizer returns them alongside the
//! rewritten plan and operators add them during execution (for example when
//! histogram buckets had to be repaired).

use serde::{Deserialize, Serialize};

/// Ordered, de-duplicated set of warning messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations(Vec<String>);

impl Annotations {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning, ignoring exact duplicates
    pub fn add(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.0.contains(&message) {
            self.0.push(message);
        }
    }

    /// Merge another set into this one
    pub fn merge(&mut self, other: Annotations) {
        for message in other.0 {
            self.add(message);
        }
    }

    /// Check if there are no warnings
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of warnings
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate warnings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Consume into the list of messages
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_ignored() {
        let mut a = Annotations::new();
        a.add("bucket counts forced monotonic");
        a.add("bucket counts forced monotonic");
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut a = Annotations::new();
        a.add("first");
        let mut b = Annotations::new();
        b.add("second");
        b.add("first");
        a.merge(b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec!["first", "second"]);
    }
}
