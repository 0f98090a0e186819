//! Schema hardening: planning, the fixed deployment change-set, and
//! verification of the end state.
//!
//! # Modules
//!
//! - `plan` - Derive a hardening change-set from an observed catalog
//! - `deployment` - The one-time change-set for the `items`/`app_kv` store
//! - `verify` - Post-change checks

pub mod deployment;
pub mod plan;
pub mod verify;

#[cfg(test)]
mod plan_props;

pub use deployment::{
    DEPLOYMENT_CHANGE_SET_ID, DEPLOYMENT_SCHEMA, deployment_baseline, deployment_change_set,
    deployment_dropped_indexes, deployment_rollback_change_set, observed_usage,
};
pub use plan::HardeningPlan;
pub use verify::{Violation, verify};
