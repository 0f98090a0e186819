//! Resource collections and their indexes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::catalog::error::CatalogError;
use crate::policy::types::{Operation, Rule};

/// A named, independently access-controlled set of records.
///
/// Access control is off when a collection is created; turning it on or
/// off afterwards is always an explicit change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCollection {
    /// Unique collection name.
    pub name: String,
    /// Whether row-level rules are enforced.
    #[serde(default)]
    pub access_control_enabled: bool,
    /// Rules in creation order. Names are unique.
    #[serde(default)]
    rules: Vec<Rule>,
    /// Attribute stamped by the audit maintainer, if any.
    #[serde(default)]
    pub audit_attribute: Option<String>,
}

impl ResourceCollection {
    /// Creates an unprotected collection with no rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_control_enabled: false,
            rules: Vec::new(),
            audit_attribute: None,
        }
    }

    /// Builder-style access control toggle.
    #[must_use]
    pub fn with_access_control(mut self, enabled: bool) -> Self {
        self.access_control_enabled = enabled;
        self
    }

    /// Builder-style rule addition. A rule with the same name is replaced.
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.remove_rule(&rule.name);
        self.rules.push(rule);
        self
    }

    /// Builder-style audit attribute.
    #[must_use]
    pub fn with_audit_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.audit_attribute = Some(attribute.into());
        self
    }

    /// Rules in creation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Adds a rule.
    ///
    /// # Errors
    /// Returns `CatalogError::DuplicateRule` if the name is taken.
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), CatalogError> {
        if self.rule(&rule.name).is_some() {
            return Err(CatalogError::DuplicateRule {
                collection: self.name.clone(),
                rule: rule.name,
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Removes a rule by name.
    pub fn remove_rule(&mut self, name: &str) -> Option<Rule> {
        let pos = self.rules.iter().position(|r| r.name == name)?;
        Some(self.rules.remove(pos))
    }

    /// Rules applying to an operation (ALL-scoped included).
    pub fn rules_for(&self, op: Operation) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.applies_to(op))
    }

    /// ALL-scoped rules.
    pub fn all_scoped_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.scope.is_all())
    }

    /// Operations covered by at least one operation-specific rule.
    #[must_use]
    pub fn specifically_covered(&self) -> BTreeSet<Operation> {
        self.rules.iter().filter_map(|r| r.scope.specific()).collect()
    }

    /// Operations where an ALL-scoped rule overlaps a specific one.
    #[must_use]
    pub fn ambiguous_operations(&self) -> Vec<Operation> {
        if self.all_scoped_rules().next().is_none() {
            return Vec::new();
        }
        self.specifically_covered().into_iter().collect()
    }
}

/// A secondary index definition, kept so a dropped index can be recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Owning collection.
    pub collection: String,
    /// Covered columns in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// A non-unique index.
    pub fn new<I, S>(name: impl Into<String>, collection: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            collection: collection.into(),
            columns: columns.into_iter().map(Into::into).collect(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::predicate::Predicate;
    use crate::policy::types::OperationScope;

    #[test]
    fn test_new_collection_is_unprotected() {
        let coll = ResourceCollection::new("app_kv");
        assert!(!coll.access_control_enabled);
        assert!(coll.rules().is_empty());
    }

    #[test]
    fn test_add_rule_rejects_duplicate_name() {
        let mut coll = ResourceCollection::new("items");
        coll.add_rule(Rule::new("r", OperationScope::Select)).unwrap();
        let err = coll
            .add_rule(Rule::new("r", OperationScope::Insert))
            .unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_RULE");
    }

    #[test]
    fn test_with_rule_replaces_same_name() {
        let coll = ResourceCollection::new("items")
            .with_rule(Rule::new("r", OperationScope::Select))
            .with_rule(Rule::new("r", OperationScope::Delete));
        assert_eq!(coll.rules().len(), 1);
        assert_eq!(coll.rules()[0].scope, OperationScope::Delete);
    }

    #[test]
    fn test_ambiguous_operations() {
        let coll = ResourceCollection::new("items")
            .with_rule(Rule::for_operation("s", Operation::Select, Predicate::True))
            .with_rule(Rule::for_operation("d", Operation::Delete, Predicate::True));
        assert!(coll.ambiguous_operations().is_empty());

        let coll = coll.with_rule(Rule::new("all", OperationScope::All).with_using(Predicate::True));
        assert_eq!(
            coll.ambiguous_operations(),
            vec![Operation::Select, Operation::Delete]
        );
    }

    #[test]
    fn test_rules_for_includes_all_scope() {
        let coll = ResourceCollection::new("items")
            .with_rule(Rule::for_operation("s", Operation::Select, Predicate::True))
            .with_rule(Rule::new("all", OperationScope::All));
        assert_eq!(coll.rules_for(Operation::Select).count(), 2);
        assert_eq!(coll.rules_for(Operation::Insert).count(), 1);
    }
}
