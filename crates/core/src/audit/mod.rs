//! Audit-timestamp maintenance.
//!
//! # Modules
//!
//! - `types` - Resolution paths, maintainer functions and triggers
//! - `maintainer` - Registration and the BEFORE UPDATE hook
//! - `error` - Audit errors

pub mod error;
pub mod maintainer;
pub mod types;

pub use error::AuditError;
pub use maintainer::{AuditMaintainer, Invocation};
pub use types::{
    AuditTrigger, ExecutionIdentity, FiringCondition, MaintainerFunction, QualifiedName,
    ResolutionPath, SymbolTable, SYSTEM_NAMESPACE, TEMP_NAMESPACE,
};
