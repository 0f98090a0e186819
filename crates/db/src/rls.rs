//! Actor context for row-level security.
//!
//! Every query an actor issues runs inside a transaction that has first
//! assumed the actor's role and published the actor's id and settings as
//! transaction-local configuration, so the database's rules see the same
//! context the in-memory resolver does.
//!
//! # Usage
//!
//! ```ignore
//! use rowguard_db::rls::ActorExt;
//!
//! let conn = db.as_actor(&actor, "request.jwt.claim.sub").await?;
//! let rows = conn.transaction().query_all(stmt).await?;
//! conn.commit().await?;
//! ```

use rowguard_core::policy::ActorContext;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, Statement,
    TransactionTrait,
};

use crate::sql::quote_ident;

const SET_CONFIG_SQL: &str = "SELECT set_config($1, $2, true)";

/// A transaction running with an actor's role and settings.
pub struct ActorConnection {
    txn: DatabaseTransaction,
}

impl ActorConnection {
    /// Begins a transaction and applies the actor context to it.
    ///
    /// # Arguments
    ///
    /// * `db` - The database connection pool
    /// * `actor` - The requesting actor
    /// * `actor_id_setting` - Setting the actor id is published under
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or any part of
    /// the context cannot be applied.
    pub async fn begin(
        db: &DatabaseConnection,
        actor: &ActorContext,
        actor_id_setting: &str,
    ) -> Result<Self, DbErr> {
        let txn = db.begin().await?;
        set_actor_context(&txn, actor, actor_id_setting).await?;
        Ok(Self { txn })
    }

    /// Returns the underlying transaction for executing queries.
    #[must_use]
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<(), DbErr> {
        self.txn.commit().await
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

/// Extension trait for `DatabaseConnection` to open actor transactions.
#[async_trait::async_trait]
pub trait ActorExt {
    /// Opens a transaction running as `actor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor context cannot be applied.
    async fn as_actor(
        &self,
        actor: &ActorContext,
        actor_id_setting: &str,
    ) -> Result<ActorConnection, DbErr>;
}

#[async_trait::async_trait]
impl ActorExt for DatabaseConnection {
    async fn as_actor(
        &self,
        actor: &ActorContext,
        actor_id_setting: &str,
    ) -> Result<ActorConnection, DbErr> {
        ActorConnection::begin(self, actor, actor_id_setting).await
    }
}

/// Applies an actor context to an existing transaction.
///
/// All settings are transaction-local.
///
/// # Errors
///
/// Returns an error if a statement fails, e.g. the role does not exist or
/// the session may not assume it.
pub async fn set_actor_context(
    txn: &DatabaseTransaction,
    actor: &ActorContext,
    actor_id_setting: &str,
) -> Result<(), DbErr> {
    txn.execute_unprepared(&set_role_sql(&actor.role)).await?;

    if let Some(id) = actor.actor_id {
        txn.execute(set_config(actor_id_setting, &id.to_string())).await?;
    }

    for (name, value) in &actor.settings {
        txn.execute(set_config(name, value)).await?;
    }

    if !actor.search_path.is_empty() {
        let path = actor
            .search_path
            .iter()
            .map(|ns| quote_ident(ns))
            .collect::<Vec<_>>()
            .join(", ");
        txn.execute(set_config("search_path", &path)).await?;
    }

    Ok(())
}

fn set_role_sql(role: &str) -> String {
    format!("SET LOCAL ROLE {}", quote_ident(role))
}

fn set_config(name: &str, value: &str) -> Statement {
    Statement::from_sql_and_values(DbBackend::Postgres, SET_CONFIG_SQL, [name.into(), value.into()])
}
