//! Type definitions for the yap listener API

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub mod http;
pub mod tasks;

// ----------------
// | Event Filter |
// ----------------

/// The set of event names a job subscribes to on a contract.
///
/// `All` replaces the `"*"` sentinel used at rest in the database: a job that
/// submits an empty filter listens to every event the contract emits, and any
/// `All` subscriber forces the aggregated contract-level filter to `All`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    /// Listen to every event emitted by the contract
    All,
    /// Listen only to the named events
    Named(BTreeSet<String>),
}

/// The sentinel name encoding an all-events filter at rest
pub const ALL_EVENTS_SENTINEL: &str = "*";

impl EventFilter {
    /// Build a filter from a list of event names, treating an empty list as a
    /// subscription to all events
    pub fn from_names(names: &[String]) -> Self {
        if names.is_empty() {
            Self::All
        } else {
            Self::Named(names.iter().cloned().collect())
        }
    }

    /// Whether the filter matches the given event name
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.contains(event_name),
        }
    }

    /// The union of two filters.
    ///
    /// Any `All` operand collapses the union to `All`.
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Named(a), Self::Named(b)) => Self::Named(a.union(b).cloned().collect()),
        }
    }

    /// The union of the filters of a set of subscribers
    pub fn union_all<'a, I: IntoIterator<Item = &'a Self>>(filters: I) -> Self {
        let mut aggregated = Self::Named(BTreeSet::new());
        for filter in filters {
            aggregated = aggregated.union(filter);
        }

        aggregated
    }

    /// The named events in the filter, or `None` for an all-events filter
    pub fn named_events(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::All => None,
            Self::Named(names) => Some(names),
        }
    }

    /// Decode a filter from its at-rest representation, where the `"*"`
    /// sentinel encodes an all-events filter
    pub fn from_stored(names: &[String]) -> Self {
        if names.iter().any(|name| name == ALL_EVENTS_SENTINEL) {
            Self::All
        } else {
            Self::from_names(names)
        }
    }

    /// Encode the filter for storage
    pub fn to_stored(&self) -> Vec<String> {
        match self {
            Self::All => vec![ALL_EVENTS_SENTINEL.to_string()],
            Self::Named(names) => names.iter().cloned().collect(),
        }
    }
}

// ----------
// | Yapper |
// ----------

/// A yapper enrolled in a job, as reported by the off-chain yapper registry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Yapper {
    /// The yapper's registry ID
    pub yapper_id: String,
    /// The yapper's platform user ID
    pub user_id: String,
    /// The job the yapper is enrolled in
    pub job_id: String,
    /// The yapper's social handle
    pub social_username: String,
    /// The yapper's wallet address, hex-encoded
    pub wallet_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a named filter from string literals
    fn named(names: &[&str]) -> EventFilter {
        EventFilter::from_names(&names.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    /// An empty name list collapses to an all-events filter
    #[test]
    fn test_empty_filter_is_all() {
        assert_eq!(EventFilter::from_names(&[]), EventFilter::All);
        assert!(EventFilter::All.matches("anything"));
    }

    /// A named filter matches only its members
    #[test]
    fn test_named_filter_matches() {
        let filter = named(&["Transfer", "Approval"]);
        assert!(filter.matches("Transfer"));
        assert!(!filter.matches("Mint"));
    }

    /// Three subscribers with filters {A}, {} (all), {B, C} aggregate to an
    /// all-events filter; dropping the all-events subscriber narrows the
    /// union to {A, B, C}
    #[test]
    fn test_union_collapse_and_narrow() {
        let a = named(&["A"]);
        let all = EventFilter::All;
        let bc = named(&["B", "C"]);

        let aggregated = EventFilter::union_all([&a, &all, &bc]);
        assert_eq!(aggregated, EventFilter::All);

        let narrowed = EventFilter::union_all([&a, &bc]);
        assert_eq!(narrowed, named(&["A", "B", "C"]));
    }

    /// The `"*"` sentinel round-trips through the at-rest encoding
    #[test]
    fn test_stored_sentinel_roundtrip() {
        assert_eq!(EventFilter::All.to_stored(), vec!["*".to_string()]);
        assert_eq!(EventFilter::from_stored(&["*".to_string()]), EventFilter::All);

        let filter = named(&["A", "B"]);
        assert_eq!(EventFilter::from_stored(&filter.to_stored()), filter);
    }

    /// The union of named filters is order-independent
    #[test]
    fn test_union_commutative() {
        let a = named(&["A", "B"]);
        let b = named(&["B", "C"]);
        assert_eq!(a.union(&b), b.union(&a));
    }
}
