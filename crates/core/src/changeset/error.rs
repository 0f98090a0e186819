//! Change-set error types.

use rowguard_shared::AppError;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors raised while building or applying a change-set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeSetError {
    /// A change-set must carry an identifier.
    #[error("Change-set id must not be empty")]
    EmptyId,

    /// A rule is created without first dropping any previous version.
    #[error("Rule \"{rule}\" on {collection} is created without a preceding drop-if-exists")]
    UnguardedRuleCreation {
        /// The collection.
        collection: String,
        /// The rule name.
        rule: String,
    },

    /// A trigger is created while its function does not exist yet in
    /// change-set order.
    #[error("Trigger {trigger} is created before function {function}")]
    TriggerBeforeFunction {
        /// The trigger.
        trigger: String,
        /// The function it binds.
        function: String,
    },

    /// A maintainer function is dropped with cascade and recreated without
    /// recreating any trigger.
    #[error("Function {function} is recreated without recreating its triggers")]
    IncompleteMaintainerRebuild {
        /// The function.
        function: String,
    },

    /// A change-set with this id was already applied with different content.
    #[error("Change-set {id} was applied with checksum {recorded}, now {computed}")]
    ChecksumMismatch {
        /// Change-set id.
        id: String,
        /// Checksum in the ledger.
        recorded: String,
        /// Checksum of the change-set offered now.
        computed: String,
    },

    /// A step failed after earlier steps had taken effect. Nothing is
    /// rolled back.
    #[error(
        "Change-set {change_set} partially applied: {applied} step(s) done, step {failed_at} ({step}) failed: {source}"
    )]
    PartialApplication {
        /// Change-set id.
        change_set: String,
        /// Number of steps that took effect.
        applied: usize,
        /// Zero-based index of the failing step.
        failed_at: usize,
        /// Description of the failing step.
        step: String,
        /// Why it failed.
        #[source]
        source: CatalogError,
    },

    /// The change-set could not be encoded for checksumming.
    #[error("Failed to encode change-set: {0}")]
    Encode(String),
}

impl ChangeSetError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyId => "EMPTY_CHANGE_SET_ID",
            Self::UnguardedRuleCreation { .. } => "UNGUARDED_RULE_CREATION",
            Self::TriggerBeforeFunction { .. } => "TRIGGER_BEFORE_FUNCTION",
            Self::IncompleteMaintainerRebuild { .. } => "INCOMPLETE_MAINTAINER_REBUILD",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::PartialApplication { .. } => "PARTIAL_CHANGE_SET_APPLICATION",
            Self::Encode(_) => "ENCODE_ERROR",
        }
    }

    /// Returns true if some steps took effect before the failure.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialApplication { applied, .. } if *applied > 0)
    }
}

impl From<ChangeSetError> for AppError {
    fn from(err: ChangeSetError) -> Self {
        match err {
            ChangeSetError::EmptyId
            | ChangeSetError::UnguardedRuleCreation { .. }
            | ChangeSetError::TriggerBeforeFunction { .. }
            | ChangeSetError::IncompleteMaintainerRebuild { .. } => Self::Validation(err.to_string()),
            ChangeSetError::ChecksumMismatch { .. } => Self::Conflict(err.to_string()),
            ChangeSetError::PartialApplication { .. } | ChangeSetError::Encode(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}
