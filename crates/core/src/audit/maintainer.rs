//! Audit column maintainer.
//!
//! Registration binds a maintainer function to a collection through a
//! BEFORE UPDATE row trigger. On every update the bound function stamps its
//! attribute with the transaction time of the enclosing operation.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::audit::error::AuditError;
use crate::audit::types::{AuditTrigger, MaintainerFunction, QualifiedName, SYSTEM_NAMESPACE};
use crate::catalog::{Catalog, CatalogError};
use crate::policy::predicate::{Row, Value};

/// The context a maintainer runs in: the enclosing transaction's time and
/// the caller's session resolution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Start time of the enclosing transaction.
    pub txn_time: DateTime<Utc>,
    /// Resolution path of the calling session.
    pub caller_path: Vec<String>,
}

impl Invocation {
    /// Creates an invocation.
    pub fn new<I, S>(txn_time: DateTime<Utc>, caller_path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            txn_time,
            caller_path: caller_path.into_iter().map(Into::into).collect(),
        }
    }

    /// An invocation stamped with the current wall-clock time.
    #[must_use]
    pub fn now(caller_path: &[String]) -> Self {
        Self::new(Utc::now(), caller_path.iter().cloned())
    }
}

/// Stateless audit maintainer over a catalog.
pub struct AuditMaintainer;

impl AuditMaintainer {
    /// Registers `function` as the maintainer of `attribute` on a collection.
    ///
    /// Registering the same attribute twice is a no-op.
    ///
    /// # Arguments
    /// * `catalog` - Catalog to register in
    /// * `collection` - Collection to audit
    /// * `attribute` - Attribute the maintainer stamps
    /// * `function` - Name of an existing maintainer function
    ///
    /// # Returns
    /// `true` if a trigger was attached, `false` if already registered.
    ///
    /// # Errors
    /// * `AuditError::Catalog` if the collection or function is missing
    /// * `AuditError::AttributeConflict` if the collection is already
    ///   audited through another attribute, or the function stamps another
    pub fn register(
        catalog: &mut Catalog,
        collection: &str,
        attribute: &str,
        function: &str,
    ) -> Result<bool, AuditError> {
        let stamps = catalog
            .function(function)
            .map(|f| f.attribute.clone())
            .ok_or_else(|| CatalogError::UnknownFunction(function.to_string()))?;

        let coll = catalog.collection(collection).ok_or_else(|| {
            CatalogError::MissingCollection(collection.to_string())
        })?;
        if let Some(existing) = coll.audit_attribute.as_deref().filter(|a| *a != attribute) {
            return Err(AuditError::AttributeConflict {
                collection: collection.to_string(),
                existing: existing.to_string(),
                requested: attribute.to_string(),
            });
        }
        if stamps != attribute {
            return Err(AuditError::AttributeConflict {
                collection: collection.to_string(),
                existing: stamps,
                requested: attribute.to_string(),
            });
        }

        let attached = catalog.add_trigger(AuditTrigger::for_collection(collection, function))?;
        catalog.collection_mut(collection)?.audit_attribute = Some(attribute.to_string());
        if attached {
            debug!(collection, attribute, function, "audit maintainer registered");
        }
        Ok(attached)
    }

    /// Resolves every symbol the function calls for a given caller path.
    ///
    /// # Errors
    /// Returns `AuditError::UnresolvedSymbol` for the first symbol that
    /// does not resolve.
    pub fn resolve_calls(
        catalog: &Catalog,
        function: &MaintainerFunction,
        caller_path: &[String],
    ) -> Result<Vec<QualifiedName>, AuditError> {
        let namespaces = function.effective_namespaces(caller_path);
        function
            .calls
            .iter()
            .map(|symbol| {
                crate::audit::types::resolve_symbol(namespaces, symbol, catalog.symbols())
                    .ok_or_else(|| AuditError::UnresolvedSymbol {
                        function: function.name.clone(),
                        symbol: symbol.clone(),
                        path: namespaces.join(", "),
                    })
            })
            .collect()
    }

    /// Runs every maintainer bound to the collection's updates.
    ///
    /// The audit attribute is set to the invocation's transaction time
    /// regardless of what the caller supplied. Other attributes pass
    /// through untouched.
    ///
    /// # Errors
    /// * `AuditError::Catalog` if the collection does not exist
    /// * `AuditError::UnresolvedMaintainerFunction` if a trigger's function
    ///   is gone
    /// * `AuditError::UnresolvedSymbol` if the function body cannot resolve
    ///   a symbol it calls
    pub fn on_before_update(
        catalog: &Catalog,
        collection: &str,
        mut row: Row,
        invocation: &Invocation,
    ) -> Result<Row, AuditError> {
        if catalog.collection(collection).is_none() {
            return Err(CatalogError::MissingCollection(collection.to_string()).into());
        }

        for trigger in catalog.update_triggers_for(collection) {
            let function = catalog.function(&trigger.function).ok_or_else(|| {
                AuditError::UnresolvedMaintainerFunction {
                    collection: collection.to_string(),
                    function: trigger.function.clone(),
                }
            })?;

            let resolved = Self::resolve_calls(catalog, function, &invocation.caller_path)?;
            if function.identity.is_elevated() {
                if let Some(foreign) = resolved.iter().find(|q| q.namespace != SYSTEM_NAMESPACE) {
                    warn!(
                        collection,
                        function = %function.name,
                        symbol = %foreign,
                        "elevated maintainer resolved a symbol outside the system namespace"
                    );
                }
            }

            row.set(function.attribute.clone(), Value::Timestamp(invocation.txn_time));
        }
        Ok(row)
    }
}
