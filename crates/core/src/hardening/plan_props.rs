//! Property-based tests for hardening plans.

use proptest::prelude::*;
use rowguard_shared::HardeningConfig;

use crate::audit::types::{AuditTrigger, ExecutionIdentity, MaintainerFunction, ResolutionPath};
use crate::catalog::{Catalog, CatalogSnapshot, ResourceCollection};
use crate::changeset::applicator::apply_changes;
use crate::hardening::plan::HardeningPlan;
use crate::hardening::verify::verify;
use crate::policy::predicate::Predicate;
use crate::policy::types::{Operation, OperationScope, Rule};
use crate::telemetry::UsageReport;

const FUNCTION: &str = "update_updated_at_column";

#[derive(Debug, Clone)]
struct CollectionShape {
    enabled: bool,
    has_all: bool,
    specific: Vec<Operation>,
    has_trigger: bool,
}

fn arb_shape() -> impl Strategy<Value = CollectionShape> {
    (
        any::<bool>(),
        any::<bool>(),
        proptest::sample::subsequence(Operation::EVERY.to_vec(), 0..=4),
        any::<bool>(),
    )
        .prop_map(|(enabled, has_all, specific, has_trigger)| CollectionShape {
            enabled,
            has_all,
            specific,
            has_trigger,
        })
}

#[derive(Debug, Clone, Copy)]
enum MaintainerShape {
    Pinned,
    LegacyDefiner,
    LegacyInvoker,
}

/// `None` leaves the function absent.
fn arb_maintainer() -> impl Strategy<Value = Option<MaintainerShape>> {
    proptest::option::of(prop_oneof![
        Just(MaintainerShape::Pinned),
        Just(MaintainerShape::LegacyDefiner),
        Just(MaintainerShape::LegacyInvoker),
    ])
}

fn build_catalog(
    shapes: &[(&str, CollectionShape)],
    maintainer: Option<MaintainerShape>,
) -> Catalog {
    let mut snapshot = CatalogSnapshot::default();
    for (name, shape) in shapes {
        let mut coll = ResourceCollection::new(*name).with_access_control(shape.enabled);
        if shape.has_all {
            coll = coll.with_rule(Rule::new("everything", OperationScope::All).with_using(Predicate::owned_by_actor("user_id")));
        }
        for op in &shape.specific {
            coll = coll.with_rule(Rule::for_operation(format!("only {op}"), *op, Predicate::True));
        }
        snapshot.collections.push(coll);
        if shape.has_trigger {
            snapshot
                .triggers
                .push(AuditTrigger::for_collection(name, FUNCTION));
        }
    }
    match maintainer {
        Some(MaintainerShape::Pinned) => snapshot.functions.push(MaintainerFunction::hardened(
            FUNCTION,
            "updated_at",
            "postgres",
            ResolutionPath::pinned(),
        )),
        Some(MaintainerShape::LegacyDefiner) => snapshot.functions.push(MaintainerFunction::unpinned(
            FUNCTION,
            "updated_at",
            ExecutionIdentity::Definer {
                owner: "postgres".into(),
            },
        )),
        Some(MaintainerShape::LegacyInvoker) => snapshot.functions.push(MaintainerFunction::unpinned(
            FUNCTION,
            "updated_at",
            ExecutionIdentity::Invoker,
        )),
        None => {}
    }
    Catalog::from_snapshot(snapshot)
}

fn plan() -> HardeningPlan {
    let config = HardeningConfig::default();
    HardeningPlan::from_config(&config).expect("default config is valid")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// After applying the plan, verification finds nothing to report.
    #[test]
    fn prop_plan_reaches_verified_state(
        items in arb_shape(),
        app_kv in arb_shape(),
        maintainer in arb_maintainer(),
    ) {
        let mut catalog = build_catalog(&[("items", items), ("app_kv", app_kv)], maintainer);
        let set = plan().plan("cs", &catalog, &UsageReport::default()).unwrap();
        apply_changes(&mut catalog, &set).unwrap();

        prop_assert_eq!(verify(&catalog, &plan()), Vec::new());
    }

    /// Re-running the planned change-set leaves the catalog unchanged.
    #[test]
    fn prop_plan_is_idempotent(
        items in arb_shape(),
        app_kv in arb_shape(),
        maintainer in arb_maintainer(),
    ) {
        let mut once = build_catalog(&[("items", items), ("app_kv", app_kv)], maintainer);
        let set = plan().plan("cs", &once, &UsageReport::default()).unwrap();
        apply_changes(&mut once, &set).unwrap();

        let mut twice = once.clone();
        apply_changes(&mut twice, &set).unwrap();
        prop_assert_eq!(&once, &twice);

        let replanned = plan().plan("cs-2", &once, &UsageReport::default()).unwrap();
        prop_assert!(replanned.is_empty(), "unexpected changes: {:?}", replanned.changes);
    }

    /// A collection ends with no ALL-scoped rule whenever it has a
    /// specific one, and every operation stays covered if it was before.
    #[test]
    fn prop_ambiguity_resolution_keeps_coverage(
        shape in arb_shape(),
    ) {
        let mut catalog = build_catalog(&[("items", shape.clone())], None);
        let before: Vec<bool> = Operation::EVERY
            .iter()
            .map(|op| catalog.collection("items").unwrap().rules_for(*op).next().is_some())
            .collect();

        let set = plan().plan("cs", &catalog, &UsageReport::default()).unwrap();
        apply_changes(&mut catalog, &set).unwrap();

        let items = catalog.collection("items").unwrap();
        if !items.specifically_covered().is_empty() {
            prop_assert!(items.all_scoped_rules().next().is_none());
        }
        for (op, covered) in Operation::EVERY.iter().zip(before) {
            if covered {
                prop_assert!(items.rules_for(*op).next().is_some(), "{} lost coverage", op);
            }
        }
    }
}
