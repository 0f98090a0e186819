//! Database layer for Rowguard.
//!
//! This crate provides:
//! - `PostgreSQL` rendering of core schema changes
//! - The schema hardening migration
//! - Introspection of a live catalog into the core model
//! - Actor-scoped transactions for row-level security

pub mod introspect;
pub mod migration;
pub mod rls;
pub mod sql;

pub use introspect::{CatalogRepository, IntrospectError};
pub use migration::Migrator;
pub use rls::{ActorConnection, ActorExt};
pub use sql::PostgresRenderer;

use rowguard_shared::DatabaseConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Establishes a pooled connection from configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_with(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .sqlx_logging(false);
    Database::connect(options).await
}
