//! Schema change and change-set types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::audit::types::{AuditTrigger, MaintainerFunction};
use crate::catalog::IndexDef;
use crate::changeset::error::ChangeSetError;
use crate::policy::types::Rule;

/// One declarative schema change. Every variant is safe to re-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    /// Drop an index if it exists.
    DropIndexIfExists {
        /// Index name.
        name: String,
    },
    /// Create an index unless an identical one exists.
    CreateIndex {
        /// Index definition.
        index: IndexDef,
    },
    /// Drop a rule if it exists.
    DropRuleIfExists {
        /// Owning collection.
        collection: String,
        /// Rule name.
        name: String,
    },
    /// Turn access control on.
    EnableAccessControl {
        /// Collection.
        collection: String,
    },
    /// Turn access control off. Never implied by any other change.
    DisableAccessControl {
        /// Collection.
        collection: String,
    },
    /// Create a rule unless an identical one exists.
    CreateRule {
        /// Owning collection.
        collection: String,
        /// The rule.
        rule: Rule,
    },
    /// Drop a function and every trigger bound to it.
    DropFunctionCascade {
        /// Function name.
        name: String,
    },
    /// Create or replace a maintainer function.
    CreateFunction {
        /// The function.
        function: MaintainerFunction,
    },
    /// Attach a trigger unless an identical one exists.
    CreateTrigger {
        /// The trigger.
        trigger: AuditTrigger,
    },
}

impl SchemaChange {
    /// One-line human description for logs and failure reports.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::DropIndexIfExists { name } => format!("drop index {name} if exists"),
            Self::CreateIndex { index } => format!(
                "create index {} on {} ({})",
                index.name,
                index.collection,
                index.columns.join(", ")
            ),
            Self::DropRuleIfExists { collection, name } => {
                format!("drop rule \"{name}\" on {collection} if exists")
            }
            Self::EnableAccessControl { collection } => {
                format!("enable access control on {collection}")
            }
            Self::DisableAccessControl { collection } => {
                format!("disable access control on {collection}")
            }
            Self::CreateRule { collection, rule } => {
                format!("create rule \"{}\" on {collection} for {}", rule.name, rule.scope)
            }
            Self::DropFunctionCascade { name } => format!("drop function {name} cascade"),
            Self::CreateFunction { function } => match &function.resolution_path {
                Some(path) => format!(
                    "create function {} with search_path {path}",
                    function.name
                ),
                None => format!("create function {}", function.name),
            },
            Self::CreateTrigger { trigger } => format!(
                "create trigger {} on {} executing {}",
                trigger.name, trigger.collection, trigger.function
            ),
        }
    }

    /// Collection the change targets, if it targets one.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        match self {
            Self::CreateIndex { index } => Some(&index.collection),
            Self::DropRuleIfExists { collection, .. }
            | Self::EnableAccessControl { collection }
            | Self::DisableAccessControl { collection }
            | Self::CreateRule { collection, .. } => Some(collection),
            Self::CreateTrigger { trigger } => Some(&trigger.collection),
            Self::DropIndexIfExists { .. }
            | Self::DropFunctionCascade { .. }
            | Self::CreateFunction { .. } => None,
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// An ordered list of schema changes applied at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Stable identifier recorded in the applied ledger.
    pub id: String,
    /// What the change-set is for.
    pub description: String,
    /// Changes in application order.
    pub changes: Vec<SchemaChange>,
}

impl ChangeSet {
    /// SHA-256 over the JSON encoding, as lowercase hex.
    ///
    /// # Errors
    /// Returns `ChangeSetError::Encode` if serialization fails.
    pub fn checksum(&self) -> Result<String, ChangeSetError> {
        let bytes = serde_json::to_vec(self).map_err(|e| ChangeSetError::Encode(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
