//! Index usage evidence.
//!
//! Scan counters only justify dropping an index when they cover a
//! representative window. Unique indexes are never reported unused: they
//! enforce a constraint whether or not anything scans them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::catalog::{Catalog, IndexDef};

/// Scan count observed for one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexUsage {
    /// Index name.
    pub index: String,
    /// Owning collection.
    pub collection: String,
    /// Index scans since counters were reset.
    pub scans: u64,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexUsage {
    /// Creates a non-unique usage entry.
    pub fn new(index: impl Into<String>, collection: impl Into<String>, scans: u64) -> Self {
        Self {
            index: index.into(),
            collection: collection.into(),
            scans,
            unique: false,
        }
    }

    /// Marks the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Usage counters collected over one observation window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Days since counters were last reset.
    pub window_days: u32,
    /// One entry per index.
    pub usages: Vec<IndexUsage>,
}

impl UsageReport {
    /// An empty report for a window.
    #[must_use]
    pub fn new(window_days: u32) -> Self {
        Self {
            window_days,
            usages: Vec::new(),
        }
    }

    /// Builder-style entry addition.
    #[must_use]
    pub fn with_usage(mut self, usage: IndexUsage) -> Self {
        self.usages.push(usage);
        self
    }

    /// Returns true if the window is long enough to act on.
    #[must_use]
    pub fn is_representative(&self, min_window_days: u32) -> bool {
        self.window_days >= min_window_days
    }

    /// Non-unique indexes with zero scans. Empty when the window is too
    /// short to be representative.
    #[must_use]
    pub fn unused(&self, min_window_days: u32) -> Vec<&IndexUsage> {
        if !self.is_representative(min_window_days) {
            debug!(
                window_days = self.window_days,
                min_window_days, "usage window too short, reporting no unused indexes"
            );
            return Vec::new();
        }
        self.usages
            .iter()
            .filter(|u| u.scans == 0 && !u.unique)
            .collect()
    }
}

/// Columns read by any rule predicate on a collection.
#[must_use]
pub fn rule_columns(catalog: &Catalog, collection: &str) -> BTreeSet<String> {
    catalog
        .collection(collection)
        .into_iter()
        .flat_map(|c| c.rules())
        .flat_map(|r| r.using.iter().chain(r.check.iter()))
        .flat_map(|p| p.referenced_columns())
        .map(str::to_string)
        .collect()
}

/// Returns true if a rule on the index's collection reads one of its
/// columns.
///
/// Predicates never name indexes, so dropping an index cannot change a
/// decision either way. This only flags drops that may slow rule checks.
#[must_use]
pub fn index_is_referenced(index: &IndexDef, catalog: &Catalog) -> bool {
    let columns = rule_columns(catalog, &index.collection);
    index.columns.iter().any(|c| columns.contains(c))
}
