//! Policy resolver: decides whether an operation on a collection is
//! permitted for an actor.
//!
//! Rules combine disjunctively within an operation (permissive union). A
//! collection without access control enabled is refused outright, and an
//! ALL-scoped rule overlapping an operation-specific rule is reported as a
//! configuration defect instead of being silently resolved.

use tracing::{debug, error, warn};

use crate::catalog::{Catalog, ResourceCollection};
use crate::policy::error::PolicyError;
use crate::policy::predicate::{ActorContext, Row};
use crate::policy::types::{Decision, Operation, Rule};

/// Row context supplied with an evaluation request.
#[derive(Debug, Clone, Copy)]
pub enum RowRequest<'a> {
    /// No row; predicates see every attribute as NULL.
    Empty,
    /// An existing row (SELECT/DELETE).
    Existing(&'a Row),
    /// A candidate row (INSERT).
    Candidate(&'a Row),
    /// The old and new versions of an updated row.
    Update {
        /// Row as currently stored.
        old: &'a Row,
        /// Row as it would be persisted.
        new: &'a Row,
    },
}

impl<'a> RowRequest<'a> {
    fn existing(&self) -> Option<&'a Row> {
        match *self {
            Self::Existing(row) | Self::Update { old: row, .. } => Some(row),
            Self::Empty | Self::Candidate(_) => None,
        }
    }

    fn candidate(&self) -> Option<&'a Row> {
        match *self {
            Self::Candidate(row) | Self::Update { new: row, .. } => Some(row),
            Self::Empty | Self::Existing(_) => None,
        }
    }
}

/// Stateless resolver for row-level rules.
pub struct PolicyResolver;

impl PolicyResolver {
    /// Evaluates an operation against a collection looked up by name.
    ///
    /// # Errors
    /// * `PolicyError::MissingCollection` if the collection does not exist
    /// * any error from [`PolicyResolver::evaluate`]
    pub fn evaluate_in(
        catalog: &Catalog,
        collection: &str,
        operation: Operation,
        actor: &ActorContext,
        request: RowRequest<'_>,
    ) -> Result<Decision, PolicyError> {
        let coll = catalog
            .collection(collection)
            .ok_or_else(|| PolicyError::MissingCollection(collection.to_string()))?;
        Self::evaluate(coll, operation, actor, request)
    }

    /// Evaluates an operation against a collection.
    ///
    /// # Arguments
    /// * `collection` - The collection whose rules apply
    /// * `operation` - The requested operation
    /// * `actor` - The session the operation runs in
    /// * `request` - Existing and/or candidate row values
    ///
    /// # Returns
    /// * `Ok(Decision::Allow)` if at least one applicable rule admits the row
    /// * `Ok(Decision::Deny)` if none does, including when no rule applies
    /// * `Err(PolicyError::AccessControlDisabled)` if the collection is unprotected
    /// * `Err(PolicyError::AmbiguousRulePair)` on overlapping ALL/specific rules
    pub fn evaluate(
        collection: &ResourceCollection,
        operation: Operation,
        actor: &ActorContext,
        request: RowRequest<'_>,
    ) -> Result<Decision, PolicyError> {
        let rules = Self::applicable_rules(collection, operation)?;
        let empty = Row::new();

        let allowed = match operation {
            Operation::Select | Operation::Delete => {
                let row = request.existing().unwrap_or(&empty);
                Self::any_using(&rules, row, actor)
            }
            Operation::Insert => {
                let row = request.candidate().unwrap_or(&empty);
                Self::any_check(&rules, row, actor)
            }
            Operation::Update => {
                let old = request
                    .existing()
                    .or_else(|| request.candidate())
                    .unwrap_or(&empty);
                let new = request.candidate().unwrap_or(old);
                Self::any_using(&rules, old, actor) && Self::any_check(&rules, new, actor)
            }
        };

        let decision = Decision::from(allowed);
        debug!(
            collection = %collection.name,
            operation = %operation,
            rules = rules.len(),
            ?decision,
            "policy evaluated"
        );
        Ok(decision)
    }

    /// Returns the rules that apply to an operation.
    ///
    /// # Errors
    /// * `PolicyError::AccessControlDisabled` if the collection is unprotected
    /// * `PolicyError::AmbiguousRulePair` if an ALL-scoped and a specific
    ///   rule both cover the operation
    pub fn applicable_rules(
        collection: &ResourceCollection,
        operation: Operation,
    ) -> Result<Vec<&Rule>, PolicyError> {
        if !collection.access_control_enabled {
            warn!(
                collection = %collection.name,
                operation = %operation,
                "evaluation refused: no protection configured"
            );
            return Err(PolicyError::AccessControlDisabled {
                collection: collection.name.clone(),
            });
        }

        let matching: Vec<&Rule> = collection
            .rules()
            .iter()
            .filter(|r| r.applies_to(operation))
            .collect();

        let all_rule = matching.iter().find(|r| r.scope.is_all());
        let specific_rule = matching.iter().find(|r| !r.scope.is_all());
        if let (Some(all_rule), Some(specific_rule)) = (all_rule, specific_rule) {
            error!(
                collection = %collection.name,
                operation = %operation,
                all_rule = %all_rule.name,
                specific_rule = %specific_rule.name,
                "ambiguous rule pair"
            );
            return Err(PolicyError::AmbiguousRulePair {
                collection: collection.name.clone(),
                operation,
                all_rule: all_rule.name.clone(),
                specific_rule: specific_rule.name.clone(),
            });
        }

        Ok(matching)
    }

    /// Filters rows down to those the actor may SELECT. Hidden rows are
    /// indistinguishable from rows that do not exist.
    ///
    /// # Errors
    /// Same configuration errors as [`PolicyResolver::applicable_rules`].
    pub fn visible_rows<'a, I>(
        collection: &ResourceCollection,
        actor: &ActorContext,
        rows: I,
    ) -> Result<Vec<&'a Row>, PolicyError>
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let rules = Self::applicable_rules(collection, Operation::Select)?;
        Ok(rows
            .into_iter()
            .filter(|row| Self::any_using(&rules, row, actor))
            .collect())
    }

    fn any_using(rules: &[&Rule], row: &Row, actor: &ActorContext) -> bool {
        rules
            .iter()
            .any(|r| r.effective_using().is_some_and(|p| p.holds(row, actor)))
    }

    fn any_check(rules: &[&Rule], row: &Row, actor: &ActorContext) -> bool {
        rules
            .iter()
            .any(|r| r.effective_check().is_some_and(|p| p.holds(row, actor)))
    }
}
