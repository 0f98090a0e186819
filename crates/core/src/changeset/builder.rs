//! Change-set builder.
//!
//! Changes accumulate in call order. `build` rejects orderings that would
//! break on a second run or leave a maintainer without its triggers.

use std::collections::{BTreeMap, BTreeSet};

use crate::audit::types::{AuditTrigger, MaintainerFunction};
use crate::catalog::IndexDef;
use crate::changeset::error::ChangeSetError;
use crate::changeset::types::{ChangeSet, SchemaChange};
use crate::policy::types::Rule;

/// Accumulates schema changes into a [`ChangeSet`].
#[derive(Debug, Clone)]
pub struct ChangeSetBuilder {
    id: String,
    description: String,
    changes: Vec<SchemaChange>,
}

impl ChangeSetBuilder {
    /// Starts a change-set.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            changes: Vec::new(),
        }
    }

    /// Appends a raw change.
    #[must_use]
    pub fn push(mut self, change: SchemaChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Drops an index if it exists.
    #[must_use]
    pub fn drop_index_if_exists(self, name: impl Into<String>) -> Self {
        self.push(SchemaChange::DropIndexIfExists { name: name.into() })
    }

    /// Creates an index.
    #[must_use]
    pub fn create_index(self, index: IndexDef) -> Self {
        self.push(SchemaChange::CreateIndex { index })
    }

    /// Drops a rule if it exists.
    #[must_use]
    pub fn drop_rule_if_exists(self, collection: impl Into<String>, name: impl Into<String>) -> Self {
        self.push(SchemaChange::DropRuleIfExists {
            collection: collection.into(),
            name: name.into(),
        })
    }

    /// Turns access control on.
    #[must_use]
    pub fn enable_access_control(self, collection: impl Into<String>) -> Self {
        self.push(SchemaChange::EnableAccessControl {
            collection: collection.into(),
        })
    }

    /// Turns access control off.
    #[must_use]
    pub fn disable_access_control(self, collection: impl Into<String>) -> Self {
        self.push(SchemaChange::DisableAccessControl {
            collection: collection.into(),
        })
    }

    /// Drops any rule with the same name, then creates `rule`.
    #[must_use]
    pub fn replace_rule(self, collection: &str, rule: Rule) -> Self {
        self.drop_rule_if_exists(collection, rule.name.clone())
            .push(SchemaChange::CreateRule {
                collection: collection.to_string(),
                rule,
            })
    }

    /// Drops a function and its triggers.
    #[must_use]
    pub fn drop_function_cascade(self, name: impl Into<String>) -> Self {
        self.push(SchemaChange::DropFunctionCascade { name: name.into() })
    }

    /// Creates or replaces a function.
    #[must_use]
    pub fn create_function(self, function: MaintainerFunction) -> Self {
        self.push(SchemaChange::CreateFunction { function })
    }

    /// Attaches a trigger.
    #[must_use]
    pub fn create_trigger(self, trigger: AuditTrigger) -> Self {
        self.push(SchemaChange::CreateTrigger { trigger })
    }

    /// Drops the maintainer with cascade, recreates it, then recreates
    /// every trigger, as one contiguous unit.
    #[must_use]
    pub fn rebuild_maintainer<I>(self, function: MaintainerFunction, triggers: I) -> Self
    where
        I: IntoIterator<Item = AuditTrigger>,
    {
        let mut builder = self
            .drop_function_cascade(function.name.clone())
            .create_function(function);
        for trigger in triggers {
            builder = builder.create_trigger(trigger);
        }
        builder
    }

    /// Validates the ordering and produces the change-set.
    ///
    /// # Errors
    /// * `ChangeSetError::EmptyId` if no id was given
    /// * `ChangeSetError::UnguardedRuleCreation` if a rule is created
    ///   without a preceding drop-if-exists of the same name
    /// * `ChangeSetError::TriggerBeforeFunction` if a trigger binds a
    ///   function that is dropped, or created only later, at that point
    /// * `ChangeSetError::IncompleteMaintainerRebuild` if a function is
    ///   dropped with cascade and recreated without any trigger
    pub fn build(self) -> Result<ChangeSet, ChangeSetError> {
        if self.id.trim().is_empty() {
            return Err(ChangeSetError::EmptyId);
        }
        validate_order(&self.changes)?;
        Ok(ChangeSet {
            id: self.id,
            description: self.description,
            changes: self.changes,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionState {
    Dropped,
    Recreated,
}

fn validate_order(changes: &[SchemaChange]) -> Result<(), ChangeSetError> {
    let mut guarded: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut functions: BTreeMap<&str, FunctionState> = BTreeMap::new();
    let mut rebuilt_with_triggers: BTreeSet<&str> = BTreeSet::new();

    for (i, change) in changes.iter().enumerate() {
        match change {
            SchemaChange::DropRuleIfExists { collection, name } => {
                guarded.insert((collection.as_str(), name.as_str()));
            }
            SchemaChange::CreateRule { collection, rule } => {
                if !guarded.contains(&(collection.as_str(), rule.name.as_str())) {
                    return Err(ChangeSetError::UnguardedRuleCreation {
                        collection: collection.clone(),
                        rule: rule.name.clone(),
                    });
                }
            }
            SchemaChange::DropFunctionCascade { name } => {
                functions.insert(name.as_str(), FunctionState::Dropped);
                rebuilt_with_triggers.remove(name.as_str());
            }
            SchemaChange::CreateFunction { function } => {
                if functions.contains_key(function.name.as_str()) {
                    functions.insert(function.name.as_str(), FunctionState::Recreated);
                }
            }
            SchemaChange::CreateTrigger { trigger } => {
                let name = trigger.function.as_str();
                let dropped = functions.get(name) == Some(&FunctionState::Dropped);
                let created_later = !functions.contains_key(name)
                    && changes[i + 1..].iter().any(|c| {
                        matches!(c, SchemaChange::CreateFunction { function } if function.name == name)
                    });
                if dropped || created_later {
                    return Err(ChangeSetError::TriggerBeforeFunction {
                        trigger: trigger.name.clone(),
                        function: trigger.function.clone(),
                    });
                }
                if functions.get(name) == Some(&FunctionState::Recreated) {
                    rebuilt_with_triggers.insert(name);
                }
            }
            SchemaChange::DropIndexIfExists { .. }
            | SchemaChange::CreateIndex { .. }
            | SchemaChange::EnableAccessControl { .. }
            | SchemaChange::DisableAccessControl { .. } => {}
        }
    }

    if let Some((name, _)) = functions
        .iter()
        .find(|(name, state)| **state == FunctionState::Recreated && !rebuilt_with_triggers.contains(*name))
    {
        return Err(ChangeSetError::IncompleteMaintainerRebuild {
            function: (*name).to_string(),
        });
    }
    Ok(())
}
