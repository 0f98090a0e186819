//! Policy resolution error types.

use rowguard_shared::AppError;
use thiserror::Error;

use crate::policy::types::Operation;

/// Errors raised while resolving row-level rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The referenced collection does not exist.
    #[error("Collection {0} does not exist")]
    MissingCollection(String),

    /// The collection has no access control configured. Never treated as
    /// allow-all.
    #[error("Access control is disabled on collection {collection}")]
    AccessControlDisabled {
        /// The unprotected collection.
        collection: String,
    },

    /// An ALL-scoped rule and an operation-specific rule both apply.
    #[error(
        "Ambiguous rules on {collection} for {operation}: ALL-scoped rule \"{all_rule}\" overlaps \"{specific_rule}\""
    )]
    AmbiguousRulePair {
        /// The misconfigured collection.
        collection: String,
        /// The operation both rules cover.
        operation: Operation,
        /// Name of the ALL-scoped rule.
        all_rule: String,
        /// Name of the operation-specific rule.
        specific_rule: String,
    },
}

impl PolicyError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCollection(_) => "MISSING_COLLECTION",
            Self::AccessControlDisabled { .. } => "ACCESS_CONTROL_DISABLED",
            Self::AmbiguousRulePair { .. } => "AMBIGUOUS_RULE_PAIR",
        }
    }
}

impl From<PolicyError> for AppError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::MissingCollection(_) => Self::NotFound(err.to_string()),
            PolicyError::AccessControlDisabled { .. } | PolicyError::AmbiguousRulePair { .. } => {
                Self::Configuration(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_rule_pair_message() {
        let err = PolicyError::AmbiguousRulePair {
            collection: "items".to_string(),
            operation: Operation::Select,
            all_rule: "Allow all operations on items".to_string(),
            specific_rule: "Users can view own items".to_string(),
        };
        assert_eq!(err.error_code(), "AMBIGUOUS_RULE_PAIR");
        let msg = err.to_string();
        assert!(msg.contains("items"));
        assert!(msg.contains("SELECT"));
        assert!(msg.contains("Allow all operations on items"));
    }

    #[test]
    fn test_into_app_error() {
        let app: AppError = PolicyError::MissingCollection("ghost".into()).into();
        assert_eq!(app.error_code(), "NOT_FOUND");

        let app: AppError = PolicyError::AccessControlDisabled {
            collection: "app_kv".into(),
        }
        .into();
        assert_eq!(app.error_code(), "CONFIGURATION_ERROR");
        assert!(app.is_fatal());
    }
}
