//! Schema hardening migration runner for Rowguard.
//!
//! Usage:
//!   migrator up      - Run all pending migrations
//!   migrator down    - Rollback last migration
//!   migrator status  - Show migration status
//!   migrator verify  - Check the live schema against the hardening settings
//!   migrator plan    - Print the SQL that would harden the live schema

use anyhow::{Context, bail};
use rowguard_core::hardening::{DEPLOYMENT_SCHEMA, HardeningPlan};
use rowguard_db::{CatalogRepository, PostgresRenderer, connect_with, migration::Migrator};
use rowguard_shared::AppConfig;
use sea_orm_migration::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    match std::env::args().nth(1).as_deref() {
        Some("verify") => {
            init_tracing();
            verify().await
        }
        Some("plan") => {
            init_tracing();
            plan().await
        }
        _ => {
            // The migrator CLI sets up its own tracing
            cli::run_cli(Migrator).await;
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rowguard=info,migrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn repository(config: &AppConfig) -> anyhow::Result<CatalogRepository> {
    if config.database.schema != DEPLOYMENT_SCHEMA {
        warn!(
            schema = %config.database.schema,
            migration_schema = DEPLOYMENT_SCHEMA,
            "Configured schema differs from the schema the hardening migration targets"
        );
    }
    let db = connect_with(&config.database)
        .await
        .context("Failed to connect to database")?;
    Ok(CatalogRepository::new(db, config.database.schema.clone()))
}

async fn verify() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let plan = HardeningPlan::from_config(&config.hardening)?;
    let violations = repository(&config).await?.verify(&plan).await?;

    if violations.is_empty() {
        info!(schema = %config.database.schema, "Schema is hardened");
        return Ok(());
    }
    for violation in &violations {
        warn!(code = violation.code(), "{violation}");
    }
    bail!("{} hardening violation(s) found", violations.len());
}

async fn plan() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let plan = HardeningPlan::from_config(&config.hardening)?;
    let change_set = repository(&config)
        .await?
        .plan(&plan, "manual_hardening")
        .await?;

    if change_set.is_empty() {
        info!("Nothing to change");
        return Ok(());
    }
    info!(steps = change_set.len(), checksum = %change_set.checksum()?, "Planned change-set");
    let renderer = PostgresRenderer::from_config(&config.database, &config.hardening);
    for statement in renderer.render_change_set(&change_set) {
        println!("{statement};");
    }
    Ok(())
}
