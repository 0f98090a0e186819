//! Core domain logic for Rowguard.
//!
//! This crate contains pure logic with ZERO database dependencies. The
//! resource store's schema is modelled as an in-memory [`catalog::Catalog`]
//! that change-sets are applied to and that rules are evaluated against.
//!
//! # Modules
//!
//! - `policy` - Row-level rules and the allow/deny resolver
//! - `audit` - Audit-timestamp maintainer with pinned name resolution
//! - `catalog` - Collections, rules, indexes, functions and triggers
//! - `changeset` - Ordered, idempotent schema change-sets
//! - `telemetry` - Index usage evidence
//! - `hardening` - Hardening plans, the deployment change-set, verification
//! - `engine` - In-memory store routed through resolver and maintainer

pub mod audit;
pub mod catalog;
pub mod changeset;
pub mod engine;
pub mod hardening;
pub mod policy;
pub mod telemetry;
