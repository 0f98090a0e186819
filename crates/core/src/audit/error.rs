//! Audit maintainer error types.

use rowguard_shared::AppError;
use thiserror::Error;

use crate::catalog::CatalogError;

/// Errors raised while registering or running the audit maintainer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// A trigger references a function that no longer exists. Every UPDATE
    /// on the collection fails until the function is recreated.
    #[error("Trigger on {collection} references missing maintainer function {function}")]
    UnresolvedMaintainerFunction {
        /// Collection whose update was attempted.
        collection: String,
        /// The missing function.
        function: String,
    },

    /// A symbol the maintainer calls cannot be resolved.
    #[error("Function {function} cannot resolve {symbol} through search path [{path}]")]
    UnresolvedSymbol {
        /// The maintainer function.
        function: String,
        /// The unresolved symbol.
        symbol: String,
        /// The path that was searched.
        path: String,
    },

    /// A collection is already audited through a different attribute.
    #[error("Collection {collection} is audited via {existing}, cannot register {requested}")]
    AttributeConflict {
        /// The collection.
        collection: String,
        /// Attribute already registered.
        existing: String,
        /// Attribute requested.
        requested: String,
    },

    /// A resolution path must name at least one namespace.
    #[error("Resolution path must not be empty")]
    EmptyResolutionPath,

    /// A namespace cannot appear in a fixed resolution path.
    #[error("Namespace {namespace} is not allowed in a resolution path: {reason}")]
    InvalidNamespace {
        /// The rejected namespace.
        namespace: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Catalog rejected the registration.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl AuditError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnresolvedMaintainerFunction { .. } => "UNRESOLVED_MAINTAINER_FUNCTION",
            Self::UnresolvedSymbol { .. } => "UNRESOLVED_SYMBOL",
            Self::AttributeConflict { .. } => "ATTRIBUTE_CONFLICT",
            Self::EmptyResolutionPath => "EMPTY_RESOLUTION_PATH",
            Self::InvalidNamespace { .. } => "INVALID_NAMESPACE",
            Self::Catalog(inner) => inner.error_code(),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Catalog(inner) => inner.into(),
            AuditError::EmptyResolutionPath | AuditError::InvalidNamespace { .. } => {
                Self::Validation(err.to_string())
            }
            AuditError::UnresolvedMaintainerFunction { .. }
            | AuditError::UnresolvedSymbol { .. }
            | AuditError::AttributeConflict { .. } => Self::Configuration(err.to_string()),
        }
    }
}
