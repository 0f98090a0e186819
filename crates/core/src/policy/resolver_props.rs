//! Property-based tests for PolicyResolver.

use proptest::prelude::*;
use uuid::Uuid;

use crate::catalog::ResourceCollection;
use crate::policy::predicate::{ActorContext, Operand, Predicate, Row};
use crate::policy::resolver::{PolicyResolver, RowRequest};
use crate::policy::types::{Decision, Operation, Rule};

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        Just(Operation::Select),
        Just(Operation::Insert),
        Just(Operation::Update),
        Just(Operation::Delete),
    ]
}

/// Predicates over a single `flag` column and the actor.
fn arb_predicate() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        Just(Predicate::True),
        Just(Predicate::False),
        Just(Predicate::owned_by_actor("user_id")),
        Just(Predicate::equals(
            Operand::column("flag"),
            Operand::literal(true)
        )),
        Just(Predicate::IsNull(Operand::column("flag"))),
    ]
}

fn arb_rule_set() -> impl Strategy<Value = Vec<(Operation, Predicate)>> {
    prop::collection::vec((arb_operation(), arb_predicate()), 0..6)
}

fn collection_from(rules: &[(Operation, Predicate)]) -> ResourceCollection {
    rules
        .iter()
        .enumerate()
        .fold(
            ResourceCollection::new("things").with_access_control(true),
            |coll, (i, (op, p))| coll.with_rule(Rule::for_operation(format!("r{i}"), *op, p.clone())),
        )
}

fn request_for(op: Operation, row: &Row) -> RowRequest<'_> {
    match op {
        Operation::Insert => RowRequest::Candidate(row),
        Operation::Update => RowRequest::Update { old: row, new: row },
        Operation::Select | Operation::Delete => RowRequest::Existing(row),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The decision for an operation equals the OR of each applicable rule
    /// evaluated on its own.
    #[test]
    fn prop_decision_is_disjunction_of_rules(
        rules in arb_rule_set(),
        op in arb_operation(),
        flag in proptest::option::of(any::<bool>()),
        is_owner in any::<bool>(),
    ) {
        let me = Uuid::new_v4();
        let mut row = Row::new().with("user_id", if is_owner { me } else { Uuid::new_v4() });
        if let Some(flag) = flag {
            row.set("flag", flag);
        }
        let actor = ActorContext::authenticated(me);

        let combined = PolicyResolver::evaluate(&collection_from(&rules), op, &actor, request_for(op, &row)).unwrap();

        let any_single = rules.iter().filter(|(rop, _)| *rop == op).any(|single| {
            let coll = collection_from(std::slice::from_ref(single));
            PolicyResolver::evaluate(&coll, op, &actor, request_for(op, &row)).unwrap().is_allowed()
        });

        prop_assert_eq!(combined, Decision::from(any_single));
    }

    /// Rules scoped to other operations never influence a decision.
    #[test]
    fn prop_other_operation_rules_are_ignored(
        rules in arb_rule_set(),
        op in arb_operation(),
    ) {
        let row = Row::new().with("flag", true);
        let actor = ActorContext::anonymous();
        let only_op: Vec<_> = rules.iter().filter(|(rop, _)| *rop == op).cloned().collect();

        let full = PolicyResolver::evaluate(&collection_from(&rules), op, &actor, request_for(op, &row)).unwrap();
        let narrowed = PolicyResolver::evaluate(&collection_from(&only_op), op, &actor, request_for(op, &row)).unwrap();

        prop_assert_eq!(full, narrowed);
    }

    /// An anonymous actor never passes an owner-only rule set.
    #[test]
    fn prop_owner_rules_deny_anonymous(op in arb_operation()) {
        let rules: Vec<_> = Operation::EVERY
            .iter()
            .map(|o| (*o, Predicate::owned_by_actor("user_id")))
            .collect();
        let row = Row::new().with("user_id", Uuid::new_v4());
        let decision = PolicyResolver::evaluate(
            &collection_from(&rules),
            op,
            &ActorContext::anonymous(),
            request_for(op, &row),
        ).unwrap();
        prop_assert_eq!(decision, Decision::Deny);
    }
}
