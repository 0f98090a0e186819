//! Policy domain types: operations, scopes, rules and decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::policy::predicate::Predicate;

/// A row-level operation requested against a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Read existing rows.
    Select,
    /// Add new rows.
    Insert,
    /// Modify existing rows.
    Update,
    /// Remove existing rows.
    Delete,
}

impl Operation {
    /// Every operation, in canonical order.
    pub const EVERY: [Operation; 4] = [Self::Select, Self::Insert, Self::Update, Self::Delete];

    /// Returns the SQL keyword for the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses an operation from its SQL keyword (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns true if the operation is gated by `using` predicates.
    #[must_use]
    pub fn reads_existing_row(&self) -> bool {
        !matches!(self, Self::Insert)
    }

    /// Returns true if the operation is gated by `check` predicates.
    #[must_use]
    pub fn writes_new_row(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }

    /// Returns true if a denial surfaces as "no matching row" rather than
    /// a reported failure.
    #[must_use]
    pub fn denies_silently(&self) -> bool {
        matches!(self, Self::Select)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which operations a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationScope {
    /// Matches every operation.
    All,
    /// SELECT only.
    Select,
    /// INSERT only.
    Insert,
    /// UPDATE only.
    Update,
    /// DELETE only.
    Delete,
}

impl OperationScope {
    /// Returns the SQL keyword used in `CREATE POLICY ... FOR <scope>`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parses a scope from its SQL keyword (case-insensitive). `*` is
    /// accepted as an alias for ALL.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ALL" | "*" => Some(Self::All),
            other => Operation::parse(other).map(Self::from),
        }
    }

    /// Returns true if this scope covers the operation.
    #[must_use]
    pub fn matches(&self, operation: Operation) -> bool {
        match self.specific() {
            Some(op) => op == operation,
            None => true,
        }
    }

    /// Returns the single operation this scope names, or `None` for ALL.
    #[must_use]
    pub fn specific(&self) -> Option<Operation> {
        match self {
            Self::All => None,
            Self::Select => Some(Operation::Select),
            Self::Insert => Some(Operation::Insert),
            Self::Update => Some(Operation::Update),
            Self::Delete => Some(Operation::Delete),
        }
    }

    /// Returns true for the ALL scope.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl From<Operation> for OperationScope {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Select => Self::Select,
            Operation::Insert => Self::Insert,
            Operation::Update => Self::Update,
            Operation::Delete => Self::Delete,
        }
    }
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The operation is permitted.
    Allow,
    /// The operation is refused.
    Deny,
}

impl Decision {
    /// Returns true for `Allow`.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allow } else { Self::Deny }
    }
}

/// A named row-level rule attached to a collection.
///
/// Rules are never mutated in place: changing a rule means dropping it and
/// creating a replacement, so every effective rule set is attributable to
/// a change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Name, unique within the collection.
    pub name: String,
    /// Operations the rule applies to.
    pub scope: OperationScope,
    /// Predicate over existing rows (SELECT/UPDATE/DELETE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<Predicate>,
    /// Predicate over new row values (INSERT/UPDATE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Predicate>,
}

impl Rule {
    /// Creates a rule with no predicates.
    pub fn new(name: impl Into<String>, scope: OperationScope) -> Self {
        Self {
            name: name.into(),
            scope,
            using: None,
            check: None,
        }
    }

    /// Sets the `using` predicate.
    #[must_use]
    pub fn with_using(mut self, predicate: Predicate) -> Self {
        self.using = Some(predicate);
        self
    }

    /// Sets the `check` predicate.
    #[must_use]
    pub fn with_check(mut self, predicate: Predicate) -> Self {
        self.check = Some(predicate);
        self
    }

    /// Builds the rule for one operation with the predicate placed where
    /// that operation reads it (both slots for UPDATE).
    pub fn for_operation(name: impl Into<String>, op: Operation, predicate: Predicate) -> Self {
        let rule = Self::new(name, op.into());
        match op {
            Operation::Select | Operation::Delete => rule.with_using(predicate),
            Operation::Insert => rule.with_check(predicate),
            Operation::Update => rule.with_using(predicate.clone()).with_check(predicate),
        }
    }

    /// Returns true if the rule applies to the operation.
    #[must_use]
    pub fn applies_to(&self, op: Operation) -> bool {
        self.scope.matches(op)
    }

    /// Predicate gating existing rows. A rule without one admits nothing.
    #[must_use]
    pub fn effective_using(&self) -> Option<&Predicate> {
        self.using.as_ref()
    }

    /// Predicate gating new row values. Falls back to `using` when no
    /// explicit check is set, matching PostgreSQL policy semantics.
    #[must_use]
    pub fn effective_check(&self) -> Option<&Predicate> {
        self.check.as_ref().or(self.using.as_ref())
    }
}
