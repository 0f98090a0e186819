//! Schema hardening for the `items`/`app_kv` deployment.
//!
//! Drops three unused indexes, removes the ALL-scoped rule on `items` that
//! overlapped the owner rules, protects `app_kv`, and rebuilds the audit
//! maintainer as a definer-rights function pinned to
//! `pg_catalog, public`.
//!
//! `down` only recreates the dropped indexes. The security changes are not
//! reversed.
//!
//! The change-set is fixed, so statements always target the
//! `DEPLOYMENT_SCHEMA` (`public`) regardless of `database.schema`. The
//! migrator's `verify` and `plan` commands warn when the configured schema
//! differs.

use rowguard_core::changeset::{ChangeSet, ChangeSetError};
use rowguard_core::hardening::{
    DEPLOYMENT_SCHEMA, deployment_change_set, deployment_rollback_change_set,
};
use rowguard_shared::HardeningConfig;
use sea_orm_migration::prelude::*;
use tracing::info;

use crate::sql::PostgresRenderer;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let change_set = deployment_change_set().map_err(to_db_err)?;
        execute(manager, &change_set).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let change_set = deployment_rollback_change_set().map_err(to_db_err)?;
        execute(manager, &change_set).await
    }
}

async fn execute(manager: &SchemaManager<'_>, change_set: &ChangeSet) -> Result<(), DbErr> {
    let db = manager.get_connection();
    let renderer = renderer();
    let checksum = change_set.checksum().map_err(to_db_err)?;
    info!(change_set = %change_set.id, %checksum, steps = change_set.len(), "Applying change-set");

    for (step, change) in change_set.changes.iter().enumerate() {
        info!(change_set = %change_set.id, step, "{}", change.describe());
        for statement in renderer.render(change) {
            db.execute_unprepared(&statement).await?;
        }
    }

    Ok(())
}

fn renderer() -> PostgresRenderer {
    PostgresRenderer::new(DEPLOYMENT_SCHEMA, HardeningConfig::default().actor_id_expression)
}

fn to_db_err(err: ChangeSetError) -> DbErr {
    DbErr::Custom(format!("{}: {err}", err.error_code()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_target_deployment_schema() {
        let renderer = renderer();
        assert_eq!(renderer.schema(), "public");

        let set = deployment_change_set().unwrap();
        let statements = renderer.render_change_set(&set);
        assert_eq!(
            statements[0],
            "DROP INDEX IF EXISTS \"public\".\"idx_items_created_at\""
        );
        assert!(
            statements
                .iter()
                .filter(|s| s.contains(" ON "))
                .all(|s| s.contains(" ON \"public\"."))
        );
    }
}
