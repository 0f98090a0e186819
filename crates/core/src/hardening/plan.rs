//! Derives a hardening change-set from an observed catalog.

use rowguard_shared::HardeningConfig;
use tracing::{info, warn};

use crate::audit::error::AuditError;
use crate::audit::types::{AuditTrigger, MaintainerFunction, ResolutionPath};
use crate::catalog::{Catalog, ResourceCollection};
use crate::changeset::builder::ChangeSetBuilder;
use crate::changeset::error::ChangeSetError;
use crate::changeset::types::ChangeSet;
use crate::policy::predicate::Predicate;
use crate::policy::types::{Operation, Rule};
use crate::telemetry::UsageReport;

/// Inputs to a hardening run, validated from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardeningPlan {
    /// Collections that must end with access control enabled.
    pub protected_collections: Vec<String>,
    /// Collections the maintainer must keep audited.
    pub audited_collections: Vec<String>,
    /// Maintainer function name.
    pub maintainer_function: String,
    /// Attribute the maintainer stamps.
    pub audit_attribute: String,
    /// Role the maintainer executes as.
    pub function_owner: String,
    /// Path the maintainer is pinned to.
    pub resolution_path: ResolutionPath,
    /// Minimum usage window before zero scans count as unused.
    pub min_usage_window_days: u32,
}

impl HardeningPlan {
    /// Validates configuration into a plan.
    ///
    /// # Errors
    /// Returns an `AuditError` if the configured resolution path is invalid.
    pub fn from_config(config: &HardeningConfig) -> Result<Self, AuditError> {
        Ok(Self {
            protected_collections: config.protected_collections.clone(),
            audited_collections: config.audited_collections.clone(),
            maintainer_function: config.maintainer_function.clone(),
            audit_attribute: config.audit_attribute.clone(),
            function_owner: config.function_owner.clone(),
            resolution_path: ResolutionPath::new(config.resolution_path.iter().cloned())?,
            min_usage_window_days: config.min_usage_window_days,
        })
    }

    /// The maintainer definition the plan converges to.
    #[must_use]
    pub fn target_maintainer(&self) -> MaintainerFunction {
        MaintainerFunction::hardened(
            self.maintainer_function.clone(),
            self.audit_attribute.clone(),
            self.function_owner.clone(),
            self.resolution_path.clone(),
        )
    }

    /// Builds the change-set that hardens `catalog`.
    ///
    /// Steps, in order:
    /// 1. drop indexes with zero scans over a representative window
    /// 2. drop every ALL-scoped rule that overlaps a specific rule, adding
    ///    per-operation copies for operations it alone covered
    /// 3. enable access control on protected collections, adding an
    ///    explicit permissive rule for every uncovered operation
    /// 4. rebuild the maintainer pinned to the configured path, with every
    ///    trigger it had plus one per audited collection lacking one
    ///
    /// A catalog that is already hardened yields an empty change-set.
    ///
    /// # Errors
    /// Returns a `ChangeSetError` if the resulting ordering is invalid.
    pub fn plan(
        &self,
        id: &str,
        catalog: &Catalog,
        usage: &UsageReport,
    ) -> Result<ChangeSet, ChangeSetError> {
        let mut builder = ChangeSetBuilder::new(id, "schema hardening");

        for unused in usage.unused(self.min_usage_window_days) {
            if catalog.index(&unused.index).is_some() {
                info!(index = %unused.index, collection = %unused.collection, "dropping unused index");
                builder = builder.drop_index_if_exists(unused.index.clone());
            }
        }

        for collection in catalog.collections() {
            builder = resolve_ambiguity(builder, collection);
        }

        for name in &self.protected_collections {
            match catalog.collection(name) {
                Some(collection) if !collection.access_control_enabled => {
                    builder = enable_with_explicit_rules(builder, collection);
                }
                Some(_) => {}
                None => warn!(collection = %name, "protected collection not found, skipping"),
            }
        }

        builder = self.rebuild_maintainer(builder, catalog);
        builder.build()
    }

    fn rebuild_maintainer(&self, builder: ChangeSetBuilder, catalog: &Catalog) -> ChangeSetBuilder {
        let target = self.target_maintainer();
        let mut triggers: Vec<AuditTrigger> = catalog
            .triggers()
            .iter()
            .filter(|t| t.function == target.name)
            .cloned()
            .collect();
        for name in &self.audited_collections {
            if catalog.collection(name).is_none() {
                warn!(collection = %name, "audited collection not found, skipping");
                continue;
            }
            if !triggers.iter().any(|t| &t.collection == name) {
                triggers.push(AuditTrigger::for_collection(name, target.name.clone()));
            }
        }

        let current = catalog.function(&target.name);
        let complete = triggers.iter().all(|t| catalog.triggers().contains(t));
        if triggers.is_empty() || (current == Some(&target) && complete) {
            return builder;
        }
        info!(
            function = %target.name,
            triggers = triggers.len(),
            search_path = %self.resolution_path,
            "rebuilding audit maintainer"
        );
        builder.rebuild_maintainer(target, triggers)
    }
}

/// Name of the per-operation copy of an ALL-scoped rule.
#[must_use]
pub fn split_rule_name(all_rule: &str, op: Operation) -> String {
    format!("{all_rule} ({})", op.as_str().to_lowercase())
}

/// Name of the explicit permissive rule added when enabling protection.
#[must_use]
pub fn permissive_rule_name(collection: &str, op: Operation) -> String {
    format!("Allow {} on {collection}", op.as_str().to_lowercase())
}

fn resolve_ambiguity(mut builder: ChangeSetBuilder, collection: &ResourceCollection) -> ChangeSetBuilder {
    if collection.ambiguous_operations().is_empty() {
        return builder;
    }
    let covered = collection.specifically_covered();
    for all_rule in collection.all_scoped_rules() {
        info!(
            collection = %collection.name,
            rule = %all_rule.name,
            "dropping ALL-scoped rule overlapping specific rules"
        );
        builder = builder.drop_rule_if_exists(collection.name.clone(), all_rule.name.clone());
        for op in Operation::EVERY.into_iter().filter(|op| !covered.contains(op)) {
            let mut copy = Rule::new(split_rule_name(&all_rule.name, op), op.into());
            if op.reads_existing_row() {
                copy.using.clone_from(&all_rule.using);
            }
            if op.writes_new_row() {
                copy.check = all_rule.effective_check().cloned();
            }
            builder = builder.replace_rule(&collection.name, copy);
        }
    }
    builder
}

fn enable_with_explicit_rules(
    mut builder: ChangeSetBuilder,
    collection: &ResourceCollection,
) -> ChangeSetBuilder {
    info!(collection = %collection.name, "enabling access control");
    builder = builder.enable_access_control(collection.name.clone());
    let has_all = collection.all_scoped_rules().next().is_some();
    if has_all {
        return builder;
    }
    let covered = collection.specifically_covered();
    for op in Operation::EVERY.into_iter().filter(|op| !covered.contains(op)) {
        builder = builder.replace_rule(
            &collection.name,
            Rule::for_operation(permissive_rule_name(&collection.name, op), op, Predicate::True),
        );
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::applicator::apply_changes;
    use crate::changeset::types::SchemaChange;
    use crate::policy::types::OperationScope;
    use crate::telemetry::IndexUsage;

    fn plan() -> HardeningPlan {
        HardeningPlan::from_config(&HardeningConfig::default()).unwrap()
    }

    #[test]
    fn test_from_config_rejects_caller_path() {
        let config = HardeningConfig {
            resolution_path: vec!["$user".into(), "public".into()],
            ..HardeningConfig::default()
        };
        let err = HardeningPlan::from_config(&config).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_NAMESPACE");
    }

    #[test]
    fn test_all_rule_split_for_uncovered_operations() {
        let catalog = Catalog::new().with_collection(
            ResourceCollection::new("notes")
                .with_access_control(true)
                .with_rule(Rule::new("everything", OperationScope::All).with_using(Predicate::owned_by_actor("user_id")))
                .with_rule(Rule::for_operation("read all", Operation::Select, Predicate::True)),
        );
        let plan = HardeningPlan {
            audited_collections: Vec::new(),
            protected_collections: Vec::new(),
            ..plan()
        };
        let set = plan.plan("cs", &catalog, &UsageReport::default()).unwrap();
        let mut after = catalog.clone();
        apply_changes(&mut after, &set).unwrap();

        let notes = after.collection("notes").unwrap();
        assert!(notes.all_scoped_rules().next().is_none());
        assert!(notes.ambiguous_operations().is_empty());
        let insert = notes.rule("everything (insert)").unwrap();
        assert_eq!(insert.scope, OperationScope::Insert);
        assert!(insert.using.is_none());
        assert_eq!(insert.check, Some(Predicate::owned_by_actor("user_id")));
        assert!(notes.rule("everything (select)").is_none());
    }

    #[test]
    fn test_unused_indexes_dropped_only_if_present() {
        let catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_access_control(true));
        let mut catalog = catalog;
        catalog
            .add_index(crate::catalog::IndexDef::new("idx_a", "items", ["a"]))
            .unwrap();
        let usage = UsageReport::new(30)
            .with_usage(IndexUsage::new("idx_a", "items", 0))
            .with_usage(IndexUsage::new("idx_gone", "items", 0));
        let plan = HardeningPlan {
            audited_collections: Vec::new(),
            protected_collections: Vec::new(),
            ..plan()
        };
        let set = plan.plan("cs", &catalog, &usage).unwrap();
        assert_eq!(
            set.changes,
            vec![SchemaChange::DropIndexIfExists { name: "idx_a".into() }]
        );
    }

    #[test]
    fn test_missing_trigger_is_added_to_rebuild() {
        let mut catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_access_control(true))
            .with_collection(ResourceCollection::new("app_kv").with_access_control(true));
        catalog.put_function(plan().target_maintainer());
        catalog
            .add_trigger(AuditTrigger::before_update(
                "update_items_updated_at",
                "items",
                "update_updated_at_column",
            ))
            .unwrap();

        let set = plan().plan("cs", &catalog, &UsageReport::default()).unwrap();
        apply_changes(&mut catalog, &set).unwrap();
        assert_eq!(catalog.update_triggers_for("app_kv").count(), 1);
        assert_eq!(catalog.update_triggers_for("items").count(), 1);
    }
}
