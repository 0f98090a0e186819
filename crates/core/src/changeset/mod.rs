//! Declarative schema change-sets.
//!
//! # Modules
//!
//! - `types` - Schema changes and checksummed change-sets
//! - `builder` - Ordered accumulation with ordering validation
//! - `applicator` - In-memory application with an applied ledger
//! - `error` - Change-set errors

pub mod applicator;
pub mod builder;
pub mod error;
pub mod types;

pub use applicator::{
    AppliedLedger, AppliedRecord, ApplyOutcome, ChangeSetApplicator, apply_change, apply_changes,
};
pub use builder::ChangeSetBuilder;
pub use error::ChangeSetError;
pub use types::{ChangeSet, SchemaChange};
