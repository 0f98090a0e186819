//! In-memory schema catalog: collections, rules, indexes, maintainer
//! functions and their triggers.
//!
//! The catalog is the state change-sets are applied to and the state the
//! resolver and maintainer read. Mutation goes through `&mut Catalog`, so
//! schema changes always hold exclusive access.

pub mod collection;
pub mod error;

pub use collection::{IndexDef, ResourceCollection};
pub use error::CatalogError;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::audit::types::{AuditTrigger, FiringCondition, MaintainerFunction, SymbolTable};
use crate::policy::types::{Operation, Rule};

/// How dropping a function treats triggers that depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropBehavior {
    /// Refuse while dependent triggers exist.
    Restrict,
    /// Drop dependent triggers as well.
    Cascade,
}

/// Schema state of the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    collections: BTreeMap<String, ResourceCollection>,
    indexes: BTreeMap<String, IndexDef>,
    functions: BTreeMap<String, MaintainerFunction>,
    triggers: Vec<AuditTrigger>,
    symbols: SymbolTable,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat, order-preserving view of a catalog, as read from a live store.
///
/// Snapshots are taken as observed: a trigger may reference a function
/// that no longer exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Collections.
    pub collections: Vec<ResourceCollection>,
    /// Index definitions.
    pub indexes: Vec<IndexDef>,
    /// Maintainer functions.
    pub functions: Vec<MaintainerFunction>,
    /// Maintainer triggers.
    pub triggers: Vec<AuditTrigger>,
}

impl Catalog {
    /// An empty catalog with the built-in symbols defined.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: BTreeMap::new(),
            indexes: BTreeMap::new(),
            functions: BTreeMap::new(),
            triggers: Vec::new(),
            symbols: SymbolTable::with_builtins(),
        }
    }

    /// Rebuilds a catalog from an observed snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut catalog = Self::new();
        for c in snapshot.collections {
            catalog.collections.insert(c.name.clone(), c);
        }
        for i in snapshot.indexes {
            catalog.indexes.insert(i.name.clone(), i);
        }
        for f in snapshot.functions {
            catalog.functions.insert(f.name.clone(), f);
        }
        catalog.triggers = snapshot.triggers;
        catalog
    }

    /// Flattens the catalog into a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            collections: self.collections.values().cloned().collect(),
            indexes: self.indexes.values().cloned().collect(),
            functions: self.functions.values().cloned().collect(),
            triggers: self.triggers.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Collections and rules
    // ---------------------------------------------------------------------

    /// Adds a collection.
    ///
    /// # Errors
    /// Returns `CatalogError::DuplicateCollection` if the name is taken.
    pub fn add_collection(&mut self, collection: ResourceCollection) -> Result<(), CatalogError> {
        if self.collections.contains_key(&collection.name) {
            return Err(CatalogError::DuplicateCollection(collection.name));
        }
        self.collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    /// Builder-style collection addition. Replaces a same-named collection.
    #[must_use]
    pub fn with_collection(mut self, collection: ResourceCollection) -> Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Looks up a collection.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&ResourceCollection> {
        self.collections.get(name)
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> Result<&mut ResourceCollection, CatalogError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| CatalogError::MissingCollection(name.to_string()))
    }

    /// Collections in name order.
    pub fn collections(&self) -> impl Iterator<Item = &ResourceCollection> {
        self.collections.values()
    }

    /// Turns access control on. Returns true if the state changed.
    ///
    /// # Errors
    /// Returns `CatalogError::MissingCollection` if the collection is absent.
    pub fn enable_access_control(&mut self, collection: &str) -> Result<bool, CatalogError> {
        let coll = self.collection_mut(collection)?;
        let changed = !coll.access_control_enabled;
        coll.access_control_enabled = true;
        Ok(changed)
    }

    /// Turns access control off. Returns true if the state changed.
    ///
    /// # Errors
    /// Returns `CatalogError::MissingCollection` if the collection is absent.
    pub fn disable_access_control(&mut self, collection: &str) -> Result<bool, CatalogError> {
        let coll = self.collection_mut(collection)?;
        let changed = coll.access_control_enabled;
        coll.access_control_enabled = false;
        Ok(changed)
    }

    /// Adds a rule to a collection.
    ///
    /// # Errors
    /// * `CatalogError::MissingCollection` if the collection is absent
    /// * `CatalogError::DuplicateRule` if the rule name is taken
    pub fn add_rule(&mut self, collection: &str, rule: Rule) -> Result<(), CatalogError> {
        self.collection_mut(collection)?.add_rule(rule)
    }

    /// Drops a rule if it exists.
    ///
    /// # Errors
    /// Returns `CatalogError::MissingCollection` if the collection is absent.
    pub fn drop_rule(&mut self, collection: &str, name: &str) -> Result<Option<Rule>, CatalogError> {
        Ok(self.collection_mut(collection)?.remove_rule(name))
    }

    // ---------------------------------------------------------------------
    // Indexes
    // ---------------------------------------------------------------------

    /// Adds an index. Re-adding an identical definition is a no-op.
    ///
    /// # Errors
    /// * `CatalogError::MissingCollection` if the owning collection is absent
    /// * `CatalogError::DuplicateIndex` on a conflicting definition
    pub fn add_index(&mut self, index: IndexDef) -> Result<bool, CatalogError> {
        if !self.collections.contains_key(&index.collection) {
            return Err(CatalogError::MissingCollection(index.collection));
        }
        match self.indexes.get(&index.name) {
            Some(existing) if *existing == index => Ok(false),
            Some(_) => Err(CatalogError::DuplicateIndex(index.name)),
            None => {
                self.indexes.insert(index.name.clone(), index);
                Ok(true)
            }
        }
    }

    /// Drops an index if it exists, returning its definition.
    pub fn drop_index(&mut self, name: &str) -> Option<IndexDef> {
        self.indexes.remove(name)
    }

    /// Looks up an index.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.get(name)
    }

    /// Indexes in name order.
    pub fn indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes.values()
    }

    // ---------------------------------------------------------------------
    // Functions and triggers
    // ---------------------------------------------------------------------

    /// Creates or replaces a maintainer function, returning the previous
    /// definition.
    pub fn put_function(&mut self, function: MaintainerFunction) -> Option<MaintainerFunction> {
        self.functions.insert(function.name.clone(), function)
    }

    /// Looks up a function.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&MaintainerFunction> {
        self.functions.get(name)
    }

    /// Functions in name order.
    pub fn functions(&self) -> impl Iterator<Item = &MaintainerFunction> {
        self.functions.values()
    }

    /// Drops a function if it exists. With `Cascade`, dependent triggers
    /// are dropped too and returned.
    ///
    /// # Errors
    /// Returns `CatalogError::DependentTriggers` under `Restrict` when
    /// triggers still use the function.
    pub fn drop_function(
        &mut self,
        name: &str,
        behavior: DropBehavior,
    ) -> Result<Vec<AuditTrigger>, CatalogError> {
        let dependents: Vec<String> = self
            .triggers
            .iter()
            .filter(|t| t.function == name)
            .map(|t| t.name.clone())
            .collect();
        if behavior == DropBehavior::Restrict && !dependents.is_empty() {
            return Err(CatalogError::DependentTriggers {
                function: name.to_string(),
                triggers: dependents,
            });
        }
        self.functions.remove(name);
        let (dropped, kept) = std::mem::take(&mut self.triggers)
            .into_iter()
            .partition(|t| t.function == name);
        self.triggers = kept;
        Ok(dropped)
    }

    /// Attaches a trigger. Returns false if an identical trigger exists.
    ///
    /// # Errors
    /// * `CatalogError::MissingCollection` if the collection is absent
    /// * `CatalogError::UnknownFunction` if the bound function is absent
    /// * `CatalogError::DuplicateTrigger` on a conflicting same-named trigger
    pub fn add_trigger(&mut self, trigger: AuditTrigger) -> Result<bool, CatalogError> {
        if !self.collections.contains_key(&trigger.collection) {
            return Err(CatalogError::MissingCollection(trigger.collection));
        }
        if !self.functions.contains_key(&trigger.function) {
            return Err(CatalogError::UnknownFunction(trigger.function));
        }
        match self
            .triggers
            .iter()
            .find(|t| t.name == trigger.name && t.collection == trigger.collection)
        {
            Some(existing) if *existing == trigger => Ok(false),
            Some(_) => Err(CatalogError::DuplicateTrigger {
                trigger: trigger.name,
                collection: trigger.collection,
            }),
            None => {
                self.triggers.push(trigger);
                Ok(true)
            }
        }
    }

    /// Every trigger, in creation order.
    #[must_use]
    pub fn triggers(&self) -> &[AuditTrigger] {
        &self.triggers
    }

    /// Triggers firing before row updates on a collection.
    pub fn update_triggers_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a AuditTrigger> {
        self.triggers.iter().filter(move |t| {
            t.collection == collection && t.firing == FiringCondition::BeforeUpdateRow
        })
    }

    /// Symbols resolvable by maintainer functions.
    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Mutable symbol table. Actors with create rights on a namespace can
    /// define symbols in it.
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    // ---------------------------------------------------------------------
    // Invariant checks
    // ---------------------------------------------------------------------

    /// (collection, operation) pairs where an ALL-scoped rule overlaps an
    /// operation-specific rule.
    #[must_use]
    pub fn ambiguous_rule_pairs(&self) -> Vec<(String, Operation)> {
        self.collections
            .values()
            .flat_map(|c| {
                c.ambiguous_operations()
                    .into_iter()
                    .map(move |op| (c.name.clone(), op))
            })
            .collect()
    }

    /// Collections named in `protected` that are absent or have access
    /// control disabled.
    #[must_use]
    pub fn unprotected<'a>(&self, protected: &'a [String]) -> Vec<&'a str> {
        protected
            .iter()
            .filter(|name| {
                self.collections
                    .get(name.as_str())
                    .is_none_or(|c| !c.access_control_enabled)
            })
            .map(String::as_str)
            .collect()
    }

    /// The set of (collection, firing condition) pairs with a trigger.
    #[must_use]
    pub fn trigger_signature(&self) -> BTreeSet<(String, FiringCondition)> {
        self.triggers
            .iter()
            .map(|t| (t.collection.clone(), t.firing))
            .collect()
    }

    /// Triggers whose bound function is missing.
    #[must_use]
    pub fn dangling_triggers(&self) -> Vec<&AuditTrigger> {
        self.triggers
            .iter()
            .filter(|t| !self.functions.contains_key(&t.function))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::ResolutionPath;
    use crate::policy::predicate::Predicate;
    use crate::policy::types::OperationScope;

    fn audited_catalog() -> Catalog {
        let mut catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_audit_attribute("updated_at"))
            .with_collection(ResourceCollection::new("app_kv").with_audit_attribute("updated_at"));
        catalog.put_function(MaintainerFunction::hardened(
            "touch",
            "updated_at",
            "postgres",
            ResolutionPath::pinned(),
        ));
        catalog
            .add_trigger(AuditTrigger::for_collection("items", "touch"))
            .unwrap();
        catalog
            .add_trigger(AuditTrigger::for_collection("app_kv", "touch"))
            .unwrap();
        catalog
    }

    #[test]
    fn test_enable_access_control_reports_change() {
        let mut catalog = Catalog::new().with_collection(ResourceCollection::new("app_kv"));
        assert!(catalog.enable_access_control("app_kv").unwrap());
        assert!(!catalog.enable_access_control("app_kv").unwrap());
        assert!(catalog.collection("app_kv").unwrap().access_control_enabled);
        assert_eq!(
            catalog.enable_access_control("ghost").unwrap_err(),
            CatalogError::MissingCollection("ghost".into())
        );
    }

    #[test]
    fn test_drop_rule_if_exists() {
        let mut catalog = Catalog::new().with_collection(
            ResourceCollection::new("items").with_rule(Rule::new("r", OperationScope::All)),
        );
        assert!(catalog.drop_rule("items", "r").unwrap().is_some());
        assert!(catalog.drop_rule("items", "r").unwrap().is_none());
    }

    #[test]
    fn test_drop_function_restrict_refuses_with_dependents() {
        let mut catalog = audited_catalog();
        let err = catalog
            .drop_function("touch", DropBehavior::Restrict)
            .unwrap_err();
        assert_eq!(err.error_code(), "DEPENDENT_TRIGGERS");
        assert!(catalog.function("touch").is_some());
    }

    #[test]
    fn test_drop_function_cascade_drops_triggers() {
        let mut catalog = audited_catalog();
        let dropped = catalog.drop_function("touch", DropBehavior::Cascade).unwrap();
        assert_eq!(dropped.len(), 2);
        assert!(catalog.triggers().is_empty());
        assert!(catalog.function("touch").is_none());
        // Dropping again is a no-op.
        assert!(catalog
            .drop_function("touch", DropBehavior::Cascade)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_add_trigger_requires_function() {
        let mut catalog = Catalog::new().with_collection(ResourceCollection::new("items"));
        let err = catalog
            .add_trigger(AuditTrigger::for_collection("items", "missing"))
            .unwrap_err();
        assert_eq!(err, CatalogError::UnknownFunction("missing".into()));
    }

    #[test]
    fn test_add_trigger_is_idempotent() {
        let mut catalog = audited_catalog();
        assert!(!catalog
            .add_trigger(AuditTrigger::for_collection("items", "touch"))
            .unwrap());
        assert_eq!(catalog.triggers().len(), 2);
    }

    #[test]
    fn test_add_index_conflict() {
        let mut catalog = Catalog::new().with_collection(ResourceCollection::new("items"));
        let idx = IndexDef::new("idx_items_created_at", "items", ["created_at"]);
        assert!(catalog.add_index(idx.clone()).unwrap());
        assert!(!catalog.add_index(idx).unwrap());
        let err = catalog
            .add_index(IndexDef::new("idx_items_created_at", "items", ["name"]))
            .unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_INDEX");
    }

    #[test]
    fn test_invariant_checks() {
        let catalog = Catalog::new()
            .with_collection(
                ResourceCollection::new("items")
                    .with_access_control(true)
                    .with_rule(Rule::new("all", OperationScope::All).with_using(Predicate::True))
                    .with_rule(Rule::for_operation("s", Operation::Select, Predicate::True)),
            )
            .with_collection(ResourceCollection::new("app_kv"));

        assert_eq!(
            catalog.ambiguous_rule_pairs(),
            vec![("items".to_string(), Operation::Select)]
        );
        let protected = vec!["items".to_string(), "app_kv".to_string(), "ghost".to_string()];
        assert_eq!(catalog.unprotected(&protected), vec!["app_kv", "ghost"]);
    }

    #[test]
    fn test_snapshot_round_trip_keeps_dangling_trigger() {
        let snapshot = CatalogSnapshot {
            collections: vec![ResourceCollection::new("items")],
            triggers: vec![AuditTrigger::for_collection("items", "gone")],
            ..CatalogSnapshot::default()
        };
        let catalog = Catalog::from_snapshot(snapshot.clone());
        assert_eq!(catalog.dangling_triggers().len(), 1);
        assert_eq!(catalog.snapshot(), snapshot);
    }
}
