//! Database migrations.
//!
//! Migrations are managed using sea-orm-migration. On `PostgreSQL` each
//! migration runs inside its own transaction, so a failing statement leaves
//! the schema as it was.

pub use sea_orm_migration::prelude::*;

mod m20260301_000001_schema_hardening;

/// Migrator for running database migrations.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20260301_000001_schema_hardening::Migration)]
    }
}
