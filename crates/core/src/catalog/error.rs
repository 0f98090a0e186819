//! Catalog error types.

use rowguard_shared::AppError;
use thiserror::Error;

/// Errors raised by catalog mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The referenced collection does not exist.
    #[error("Collection {0} does not exist")]
    MissingCollection(String),

    /// A collection with this name already exists.
    #[error("Collection {0} already exists")]
    DuplicateCollection(String),

    /// A rule with this name already exists on the collection.
    #[error("Rule \"{rule}\" already exists on {collection}")]
    DuplicateRule {
        /// The collection.
        collection: String,
        /// The rule name.
        rule: String,
    },

    /// An index with this name but a different definition exists.
    #[error("Index {0} already exists with a different definition")]
    DuplicateIndex(String),

    /// The referenced function does not exist.
    #[error("Function {0} does not exist")]
    UnknownFunction(String),

    /// A trigger with this name but a different definition exists.
    #[error("Trigger {trigger} already exists on {collection}")]
    DuplicateTrigger {
        /// The trigger name.
        trigger: String,
        /// The collection.
        collection: String,
    },

    /// A function cannot be dropped without cascade while triggers use it.
    #[error("Function {function} is used by triggers: {}", triggers.join(", "))]
    DependentTriggers {
        /// The function.
        function: String,
        /// Names of dependent triggers.
        triggers: Vec<String>,
    },
}

impl CatalogError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCollection(_) => "MISSING_COLLECTION",
            Self::DuplicateCollection(_) => "DUPLICATE_COLLECTION",
            Self::DuplicateRule { .. } => "DUPLICATE_RULE",
            Self::DuplicateIndex(_) => "DUPLICATE_INDEX",
            Self::UnknownFunction(_) => "UNKNOWN_FUNCTION",
            Self::DuplicateTrigger { .. } => "DUPLICATE_TRIGGER",
            Self::DependentTriggers { .. } => "DEPENDENT_TRIGGERS",
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MissingCollection(_) | CatalogError::UnknownFunction(_) => {
                Self::NotFound(err.to_string())
            }
            CatalogError::DuplicateCollection(_)
            | CatalogError::DuplicateRule { .. }
            | CatalogError::DuplicateIndex(_)
            | CatalogError::DuplicateTrigger { .. }
            | CatalogError::DependentTriggers { .. } => Self::Conflict(err.to_string()),
        }
    }
}
