//! In-memory resource store guarded by the policy resolver and the audit
//! maintainer.
//!
//! Reads filter denied rows out silently. Writes are checked in full
//! before anything is persisted, so a denied write changes nothing and is
//! reported as `EngineError::Forbidden`. Allowed updates pass through the
//! audit maintainer before the new row version is stored.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use rowguard_shared::AppError;

use crate::audit::error::AuditError;
use crate::audit::maintainer::{AuditMaintainer, Invocation};
use crate::catalog::{Catalog, CatalogError};
use crate::policy::error::PolicyError;
use crate::policy::predicate::{ActorContext, Predicate, Row};
use crate::policy::resolver::{PolicyResolver, RowRequest};
use crate::policy::types::Operation;

/// Errors raised by guarded store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The write was denied by row-level rules.
    #[error("{operation} on {collection} denied by row-level rules")]
    Forbidden {
        /// The collection.
        collection: String,
        /// The denied operation.
        operation: Operation,
    },

    /// Rule configuration prevented evaluation.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The audit maintainer failed; the update is aborted.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The catalog rejected the request.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl EngineError {
    /// Returns the error code for logs and operator reports.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Policy(inner) => inner.error_code(),
            Self::Audit(inner) => inner.error_code(),
            Self::Catalog(inner) => inner.error_code(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Forbidden { .. } => Self::Forbidden(err.to_string()),
            EngineError::Policy(inner) => inner.into(),
            EngineError::Audit(inner) => inner.into(),
            EngineError::Catalog(inner) => inner.into(),
        }
    }
}

/// Rows per collection behind a catalog's rules.
#[derive(Debug, Clone)]
pub struct GuardedStore {
    catalog: Catalog,
    rows: BTreeMap<String, Vec<Row>>,
}

impl GuardedStore {
    /// Wraps a catalog with empty collections.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            rows: BTreeMap::new(),
        }
    }

    /// The catalog the store enforces.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog access for schema changes.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Loads rows as the collection owner, bypassing rules.
    ///
    /// # Errors
    /// Returns `CatalogError::MissingCollection` if the collection is absent.
    pub fn seed<I>(&mut self, collection: &str, rows: I) -> Result<(), CatalogError>
    where
        I: IntoIterator<Item = Row>,
    {
        if self.catalog.collection(collection).is_none() {
            return Err(CatalogError::MissingCollection(collection.to_string()));
        }
        self.rows
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    fn stored(&self, collection: &str) -> Result<&[Row], EngineError> {
        if self.catalog.collection(collection).is_none() {
            return Err(PolicyError::MissingCollection(collection.to_string()).into());
        }
        Ok(self.rows.get(collection).map(Vec::as_slice).unwrap_or_default())
    }

    /// Rows matching `filter` that the actor may see.
    ///
    /// # Errors
    /// Configuration errors from the resolver.
    pub fn select(
        &self,
        collection: &str,
        actor: &ActorContext,
        filter: &Predicate,
    ) -> Result<Vec<Row>, EngineError> {
        let rows = self.stored(collection)?;
        let mut visible = Vec::new();
        for row in rows.iter().filter(|r| filter.holds(r, actor)) {
            let decision = PolicyResolver::evaluate_in(
                &self.catalog,
                collection,
                Operation::Select,
                actor,
                RowRequest::Existing(row),
            )?;
            if decision.is_allowed() {
                visible.push(row.clone());
            }
        }
        Ok(visible)
    }

    /// Inserts a row.
    ///
    /// # Errors
    /// * `EngineError::Forbidden` if no rule admits the row
    /// * configuration errors from the resolver
    pub fn insert(
        &mut self,
        collection: &str,
        actor: &ActorContext,
        row: Row,
    ) -> Result<(), EngineError> {
        self.stored(collection)?;
        let decision = PolicyResolver::evaluate_in(
            &self.catalog,
            collection,
            Operation::Insert,
            actor,
            RowRequest::Candidate(&row),
        )?;
        if !decision.is_allowed() {
            return Err(forbidden(collection, Operation::Insert));
        }
        self.rows.entry(collection.to_string()).or_default().push(row);
        Ok(())
    }

    /// Applies `changes` to every row matching `filter`.
    ///
    /// Every matched row is checked before any is written. The maintainer
    /// stamps each new row version with `txn_time`.
    ///
    /// # Returns
    /// Number of rows updated.
    ///
    /// # Errors
    /// * `EngineError::Forbidden` if any matched row is denied
    /// * `EngineError::Audit` if the maintainer cannot run
    /// * configuration errors from the resolver
    pub fn update(
        &mut self,
        collection: &str,
        actor: &ActorContext,
        filter: &Predicate,
        changes: &Row,
        txn_time: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let invocation = Invocation::new(txn_time, actor.search_path.iter().cloned());
        let mut staged = Vec::new();
        for (i, old) in self.stored(collection)?.iter().enumerate() {
            if !filter.holds(old, actor) {
                continue;
            }
            let new = old.merged(changes);
            let decision = PolicyResolver::evaluate_in(
                &self.catalog,
                collection,
                Operation::Update,
                actor,
                RowRequest::Update { old, new: &new },
            )?;
            if !decision.is_allowed() {
                return Err(forbidden(collection, Operation::Update));
            }
            let stamped = AuditMaintainer::on_before_update(&self.catalog, collection, new, &invocation)?;
            staged.push((i, stamped));
        }

        let updated = staged.len();
        if let Some(rows) = self.rows.get_mut(collection) {
            for (i, row) in staged {
                rows[i] = row;
            }
        }
        debug!(collection, updated, "rows updated");
        Ok(updated)
    }

    /// Deletes every row matching `filter`.
    ///
    /// # Returns
    /// Number of rows deleted.
    ///
    /// # Errors
    /// * `EngineError::Forbidden` if any matched row is denied
    /// * configuration errors from the resolver
    pub fn delete(
        &mut self,
        collection: &str,
        actor: &ActorContext,
        filter: &Predicate,
    ) -> Result<usize, EngineError> {
        let mut doomed = Vec::new();
        for (i, row) in self.stored(collection)?.iter().enumerate() {
            if !filter.holds(row, actor) {
                continue;
            }
            let decision = PolicyResolver::evaluate_in(
                &self.catalog,
                collection,
                Operation::Delete,
                actor,
                RowRequest::Existing(row),
            )?;
            if !decision.is_allowed() {
                return Err(forbidden(collection, Operation::Delete));
            }
            doomed.push(i);
        }

        let deleted = doomed.len();
        if let Some(rows) = self.rows.get_mut(collection) {
            let mut index = 0;
            rows.retain(|_| {
                let keep = !doomed.contains(&index);
                index += 1;
                keep
            });
        }
        debug!(collection, deleted, "rows deleted");
        Ok(deleted)
    }
}

fn forbidden(collection: &str, operation: Operation) -> EngineError {
    warn!(collection, operation = %operation, "write denied by row-level rules");
    EngineError::Forbidden {
        collection: collection.to_string(),
        operation,
    }
}
