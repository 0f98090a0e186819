//! Shared errors and configuration for Rowguard.
//!
//! This crate provides common types used across all other crates:
//! - Application-wide error types
//! - Configuration management (database and hardening settings)

pub mod config;
pub mod error;

pub use config::{AppConfig, DatabaseConfig, HardeningConfig};
pub use error::{AppError, AppResult};
