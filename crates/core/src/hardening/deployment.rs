//! The one-time hardening change-set for the `items`/`app_kv` deployment.
//!
//! The change-set content is fixed: its checksum is what the migration
//! ledger records, so it must not be derived from live state.

use crate::audit::types::{AuditTrigger, ExecutionIdentity, MaintainerFunction, ResolutionPath};
use crate::catalog::{Catalog, CatalogSnapshot, IndexDef, ResourceCollection};
use crate::changeset::builder::ChangeSetBuilder;
use crate::changeset::error::ChangeSetError;
use crate::changeset::types::ChangeSet;
use crate::hardening::plan::permissive_rule_name;
use crate::policy::predicate::Predicate;
use crate::policy::types::{Operation, OperationScope, Rule};
use crate::telemetry::{IndexUsage, UsageReport};

/// Schema the deployment change-set is written for. The pinned
/// resolution path names it too.
pub const DEPLOYMENT_SCHEMA: &str = "public";

/// Ledger id of the deployment change-set.
pub const DEPLOYMENT_CHANGE_SET_ID: &str = "20260301_schema_hardening";

/// Ledger id of the index-only reversal.
pub const DEPLOYMENT_ROLLBACK_ID: &str = "20260301_schema_hardening_rollback";

/// The conflicting ALL-scoped rule on `items`.
pub const ITEMS_ALL_RULE: &str = "Allow all operations on items";

/// Audit maintainer name.
pub const MAINTAINER_FUNCTION: &str = "update_updated_at_column";

/// Stamped attribute.
pub const AUDIT_ATTRIBUTE: &str = "updated_at";

const FUNCTION_OWNER: &str = "postgres";

/// Indexes observed with zero scans, with the definitions needed to
/// recreate them.
#[must_use]
pub fn deployment_dropped_indexes() -> Vec<IndexDef> {
    vec![
        IndexDef::new("idx_items_created_at", "items", ["created_at"]),
        IndexDef::new("idx_items_category", "items", ["category"]),
        IndexDef::new("idx_app_kv_updated_at", "app_kv", ["updated_at"]),
    ]
}

/// The deployment's audit triggers.
#[must_use]
pub fn deployment_triggers() -> Vec<AuditTrigger> {
    ["items", "app_kv"]
        .into_iter()
        .map(|c| {
            AuditTrigger::before_update(
                format!("update_{c}_{AUDIT_ATTRIBUTE}"),
                c,
                MAINTAINER_FUNCTION,
            )
        })
        .collect()
}

/// The hardened maintainer.
#[must_use]
pub fn deployment_maintainer() -> MaintainerFunction {
    MaintainerFunction::hardened(
        MAINTAINER_FUNCTION,
        AUDIT_ATTRIBUTE,
        FUNCTION_OWNER,
        ResolutionPath::pinned(),
    )
}

/// The change-set applied once by the hardening migration.
///
/// # Errors
/// Returns a `ChangeSetError` only if the fixed ordering fails validation.
pub fn deployment_change_set() -> Result<ChangeSet, ChangeSetError> {
    let mut builder = ChangeSetBuilder::new(
        DEPLOYMENT_CHANGE_SET_ID,
        "Drop unused indexes, resolve overlapping rules on items, protect app_kv, pin the audit maintainer",
    );

    for index in deployment_dropped_indexes() {
        builder = builder.drop_index_if_exists(index.name);
    }

    builder = builder
        .drop_rule_if_exists("items", ITEMS_ALL_RULE)
        .enable_access_control("app_kv");
    for op in Operation::EVERY {
        builder = builder.replace_rule(
            "app_kv",
            Rule::for_operation(permissive_rule_name("app_kv", op), op, Predicate::True),
        );
    }

    builder
        .rebuild_maintainer(deployment_maintainer(), deployment_triggers())
        .build()
}

/// Recreates the dropped indexes. Security changes are not reversed.
///
/// # Errors
/// Returns a `ChangeSetError` only if the fixed ordering fails validation.
pub fn deployment_rollback_change_set() -> Result<ChangeSet, ChangeSetError> {
    deployment_dropped_indexes()
        .into_iter()
        .fold(
            ChangeSetBuilder::new(DEPLOYMENT_ROLLBACK_ID, "Recreate indexes dropped by schema hardening"),
            ChangeSetBuilder::create_index,
        )
        .build()
}

/// Usage counters as observed before the migration.
#[must_use]
pub fn observed_usage() -> UsageReport {
    UsageReport::new(30)
        .with_usage(IndexUsage::new("idx_items_created_at", "items", 0))
        .with_usage(IndexUsage::new("idx_items_category", "items", 0))
        .with_usage(IndexUsage::new("idx_app_kv_updated_at", "app_kv", 0))
        .with_usage(IndexUsage::new("idx_items_user_id", "items", 48_213))
        .with_usage(IndexUsage::new("items_pkey", "items", 0).unique())
        .with_usage(IndexUsage::new("app_kv_pkey", "app_kv", 0).unique())
}

/// The catalog as it stood before the migration.
#[must_use]
pub fn deployment_baseline() -> Catalog {
    let owner = Predicate::owned_by_actor("user_id");
    let items = ResourceCollection::new("items")
        .with_access_control(true)
        .with_audit_attribute(AUDIT_ATTRIBUTE)
        .with_rule(
            Rule::new(ITEMS_ALL_RULE, OperationScope::All)
                .with_using(Predicate::True)
                .with_check(Predicate::True),
        )
        .with_rule(Rule::for_operation("Users can view own items", Operation::Select, owner.clone()))
        .with_rule(Rule::for_operation("Users can insert own items", Operation::Insert, owner.clone()))
        .with_rule(Rule::for_operation("Users can update own items", Operation::Update, owner.clone()))
        .with_rule(Rule::for_operation("Users can delete own items", Operation::Delete, owner));
    let app_kv = ResourceCollection::new("app_kv").with_audit_attribute(AUDIT_ATTRIBUTE);

    let mut indexes = deployment_dropped_indexes();
    indexes.push(IndexDef::new("idx_items_user_id", "items", ["user_id"]));

    Catalog::from_snapshot(CatalogSnapshot {
        collections: vec![items, app_kv],
        indexes,
        functions: vec![MaintainerFunction::unpinned(
            MAINTAINER_FUNCTION,
            AUDIT_ATTRIBUTE,
            ExecutionIdentity::Definer {
                owner: FUNCTION_OWNER.to_string(),
            },
        )],
        triggers: deployment_triggers(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::maintainer::{AuditMaintainer, Invocation};
    use crate::changeset::applicator::{ApplyOutcome, ChangeSetApplicator, apply_changes};
    use crate::hardening::plan::HardeningPlan;
    use crate::hardening::verify::verify;
    use crate::policy::predicate::{ActorContext, Row, Value};
    use crate::policy::resolver::{PolicyResolver, RowRequest};
    use crate::policy::types::Decision;
    use crate::telemetry::index_is_referenced;
    use chrono::{TimeZone, Utc};
    use rowguard_shared::HardeningConfig;
    use uuid::Uuid;

    fn hardened() -> Catalog {
        let mut catalog = deployment_baseline();
        apply_changes(&mut catalog, &deployment_change_set().unwrap()).unwrap();
        catalog
    }

    fn plan() -> HardeningPlan {
        HardeningPlan::from_config(&HardeningConfig::default()).unwrap()
    }

    #[test]
    fn test_baseline_fails_verification() {
        let codes: Vec<_> = verify(&deployment_baseline(), &plan())
            .iter()
            .map(|v| v.code())
            .collect();
        assert_eq!(
            codes,
            vec!["UNPROTECTED_COLLECTION", "AMBIGUOUS_RULE_PAIR", "AMBIGUOUS_RULE_PAIR", "AMBIGUOUS_RULE_PAIR", "AMBIGUOUS_RULE_PAIR", "UNPINNED_MAINTAINER"]
        );
    }

    #[test]
    fn test_hardened_catalog_passes_verification() {
        assert_eq!(verify(&hardened(), &plan()), Vec::new());
    }

    #[test]
    fn test_items_select_uses_only_owner_rule() {
        let catalog = hardened();
        let items = catalog.collection("items").unwrap();
        assert!(items.rule(ITEMS_ALL_RULE).is_none());
        assert_eq!(items.rules().len(), 4);

        let me = Uuid::new_v4();
        let mine = Row::new().with("user_id", me);
        let theirs = Row::new().with("user_id", Uuid::new_v4());
        let actor = ActorContext::authenticated(me);
        let eval = |row: &Row| {
            PolicyResolver::evaluate(items, Operation::Select, &actor, RowRequest::Existing(row))
                .unwrap()
        };
        assert_eq!(eval(&mine), Decision::Allow);
        assert_eq!(eval(&theirs), Decision::Deny);
    }

    #[test]
    fn test_app_kv_has_one_permissive_rule_per_operation() {
        let catalog = hardened();
        let app_kv = catalog.collection("app_kv").unwrap();
        assert!(app_kv.access_control_enabled);
        assert_eq!(app_kv.rules().len(), 4);
        for op in Operation::EVERY {
            let rules: Vec<_> = app_kv.rules_for(op).collect();
            assert_eq!(rules.len(), 1, "{op}");
            assert_eq!(rules[0].scope, OperationScope::from(op));
            for predicate in rules[0].using.iter().chain(rules[0].check.iter()) {
                assert_eq!(*predicate, Predicate::True);
            }
        }
    }

    #[test]
    fn test_app_kv_update_stamps_transaction_time() {
        let mut catalog = hardened();
        catalog.symbols_mut().define("public", "now");
        let txn_time = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let row = Row::new()
            .with("key", "theme")
            .with(AUDIT_ATTRIBUTE, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());

        let out = AuditMaintainer::on_before_update(
            &catalog,
            "app_kv",
            row,
            &Invocation::new(txn_time, ["public", "pg_catalog"]),
        )
        .unwrap();
        assert_eq!(out.get(AUDIT_ATTRIBUTE), Some(&Value::Timestamp(txn_time)));

        let function = catalog.function(MAINTAINER_FUNCTION).unwrap();
        let resolved = AuditMaintainer::resolve_calls(
            &catalog,
            function,
            &["public".to_string(), "pg_catalog".to_string()],
        )
        .unwrap();
        assert!(resolved.iter().all(|q| q.namespace == "pg_catalog"));
    }

    #[test]
    fn test_dropping_unused_indexes_changes_no_decision() {
        let before = {
            let mut c = deployment_baseline();
            // Isolate the index drops from the rule changes.
            c.drop_rule("items", ITEMS_ALL_RULE).unwrap();
            c
        };
        for index in deployment_dropped_indexes() {
            assert!(!index_is_referenced(&index, &before), "{}", index.name);
        }

        let mut after = before.clone();
        for index in deployment_dropped_indexes() {
            after.drop_index(&index.name);
        }
        assert!(after.index("idx_items_created_at").is_none());

        let me = Uuid::new_v4();
        let rows = [
            Row::new().with("user_id", me).with("category", "tools"),
            Row::new().with("user_id", Uuid::new_v4()),
            Row::new(),
        ];
        let actor = ActorContext::authenticated(me);
        for op in Operation::EVERY {
            for row in &rows {
                let request = match op {
                    Operation::Insert => RowRequest::Candidate(row),
                    Operation::Update => RowRequest::Update { old: row, new: row },
                    _ => RowRequest::Existing(row),
                };
                assert_eq!(
                    PolicyResolver::evaluate_in(&before, "items", op, &actor, request),
                    PolicyResolver::evaluate_in(&after, "items", op, &actor, request),
                );
            }
        }
    }

    #[test]
    fn test_baseline_is_internally_consistent() {
        let baseline = deployment_baseline();
        assert!(baseline.dangling_triggers().is_empty());
        assert_eq!(baseline.triggers().len(), 2);
        for index in deployment_dropped_indexes() {
            assert!(baseline.collection(&index.collection).is_some(), "{}", index.name);
            assert_eq!(baseline.index(&index.name), Some(&index));
        }
    }

    #[test]
    fn test_trigger_signature_survives_rebuild() {
        assert_eq!(
            deployment_baseline().trigger_signature(),
            hardened().trigger_signature()
        );
    }

    #[test]
    fn test_applying_twice_equals_once() {
        let once = hardened();
        let mut twice = once.clone();
        apply_changes(&mut twice, &deployment_change_set().unwrap()).unwrap();
        assert_eq!(once, twice);

        let mut catalog = deployment_baseline();
        let mut applicator = ChangeSetApplicator::new();
        let set = deployment_change_set().unwrap();
        assert!(matches!(
            applicator.apply(&mut catalog, &set).unwrap(),
            ApplyOutcome::Applied { .. }
        ));
        assert_eq!(
            applicator.apply(&mut catalog, &set).unwrap(),
            ApplyOutcome::AlreadyApplied
        );
    }

    #[test]
    fn test_planned_change_set_matches_deployment() {
        let baseline = deployment_baseline();
        let planned = plan()
            .plan(DEPLOYMENT_CHANGE_SET_ID, &baseline, &observed_usage())
            .unwrap();

        let mut via_plan = baseline.clone();
        apply_changes(&mut via_plan, &planned).unwrap();
        assert_eq!(via_plan, hardened());

        let replanned = plan()
            .plan("again", &via_plan, &observed_usage())
            .unwrap();
        assert!(replanned.is_empty());
    }

    #[test]
    fn test_rollback_recreates_indexes_only() {
        let mut catalog = hardened();
        apply_changes(&mut catalog, &deployment_rollback_change_set().unwrap()).unwrap();
        for index in deployment_dropped_indexes() {
            assert_eq!(catalog.index(&index.name), Some(&index));
        }
        assert!(catalog.collection("app_kv").unwrap().access_control_enabled);
        assert!(catalog.collection("items").unwrap().rule(ITEMS_ALL_RULE).is_none());
    }
}
