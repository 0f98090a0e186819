//! Row-level access-control policy model.
//!
//! # Modules
//!
//! - `types` - Operations, scopes, rules and decisions
//! - `predicate` - Predicate expressions, rows and actor sessions
//! - `resolver` - The allow/deny decision function
//! - `error` - Policy resolution errors

pub mod error;
pub mod predicate;
pub mod resolver;
pub mod types;

#[cfg(test)]
mod resolver_props;

pub use error::PolicyError;
pub use predicate::{ActorContext, Operand, Predicate, Row, Value};
pub use resolver::{PolicyResolver, RowRequest};
pub use types::{Decision, Operation, OperationScope, Rule};
