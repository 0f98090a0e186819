//! Post-change verification of the hardened state.

use serde::Serialize;
use std::fmt;

use crate::audit::types::{ExecutionIdentity, FiringCondition};
use crate::catalog::Catalog;
use crate::hardening::plan::HardeningPlan;
use crate::policy::types::Operation;

/// A property the hardened catalog fails to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// A protected collection is missing or has access control disabled.
    Unprotected {
        /// The collection.
        collection: String,
    },
    /// An ALL-scoped rule overlaps a specific rule.
    AmbiguousRules {
        /// The collection.
        collection: String,
        /// The overlapped operation.
        operation: Operation,
    },
    /// The maintainer function does not exist.
    MissingMaintainer {
        /// Function name.
        function: String,
    },
    /// The maintainer has no pinned resolution path.
    UnpinnedMaintainer {
        /// Function name.
        function: String,
    },
    /// The maintainer does not run as the configured owner.
    UnexpectedIdentity {
        /// Function name.
        function: String,
        /// Identity found.
        found: String,
    },
    /// The maintainer is pinned to a path other than the configured one.
    UnexpectedResolutionPath {
        /// Function name.
        function: String,
        /// Path found.
        found: String,
    },
    /// An audited collection has no BEFORE UPDATE maintainer trigger.
    MissingTrigger {
        /// The collection.
        collection: String,
        /// Expected bound function.
        function: String,
    },
    /// A trigger references a function that does not exist.
    DanglingTrigger {
        /// Trigger name.
        trigger: String,
        /// The collection.
        collection: String,
        /// Missing function.
        function: String,
    },
}

impl Violation {
    /// Returns the violation code for logs and reports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unprotected { .. } => "UNPROTECTED_COLLECTION",
            Self::AmbiguousRules { .. } => "AMBIGUOUS_RULE_PAIR",
            Self::MissingMaintainer { .. } => "MISSING_MAINTAINER",
            Self::UnpinnedMaintainer { .. } => "UNPINNED_MAINTAINER",
            Self::UnexpectedIdentity { .. } => "UNEXPECTED_IDENTITY",
            Self::UnexpectedResolutionPath { .. } => "UNEXPECTED_RESOLUTION_PATH",
            Self::MissingTrigger { .. } => "MISSING_TRIGGER",
            Self::DanglingTrigger { .. } => "DANGLING_TRIGGER",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprotected { collection } => {
                write!(f, "{collection} has access control disabled")
            }
            Self::AmbiguousRules {
                collection,
                operation,
            } => write!(
                f,
                "{collection} has an ALL-scoped rule overlapping a {operation} rule"
            ),
            Self::MissingMaintainer { function } => write!(f, "function {function} is missing"),
            Self::UnpinnedMaintainer { function } => {
                write!(f, "function {function} has no fixed search_path")
            }
            Self::UnexpectedIdentity { function, found } => {
                write!(f, "function {function} runs as {found}")
            }
            Self::UnexpectedResolutionPath { function, found } => {
                write!(f, "function {function} is pinned to [{found}]")
            }
            Self::MissingTrigger {
                collection,
                function,
            } => write!(f, "{collection} has no BEFORE UPDATE trigger executing {function}"),
            Self::DanglingTrigger {
                trigger,
                collection,
                function,
            } => write!(
                f,
                "trigger {trigger} on {collection} references missing function {function}"
            ),
        }
    }
}

/// Checks the hardened end state.
///
/// # Returns
/// Every violation found, in a stable order. Empty means hardened.
#[must_use]
pub fn verify(catalog: &Catalog, plan: &HardeningPlan) -> Vec<Violation> {
    let mut violations: Vec<Violation> = catalog
        .unprotected(&plan.protected_collections)
        .into_iter()
        .map(|c| Violation::Unprotected {
            collection: c.to_string(),
        })
        .collect();

    violations.extend(
        catalog
            .ambiguous_rule_pairs()
            .into_iter()
            .map(|(collection, operation)| Violation::AmbiguousRules {
                collection,
                operation,
            }),
    );

    let function = &plan.maintainer_function;
    match catalog.function(function) {
        None if !plan.audited_collections.is_empty() => {
            violations.push(Violation::MissingMaintainer {
                function: function.clone(),
            });
        }
        None => {}
        Some(f) => {
            match &f.resolution_path {
                None => violations.push(Violation::UnpinnedMaintainer {
                    function: function.clone(),
                }),
                Some(path) if *path != plan.resolution_path => {
                    violations.push(Violation::UnexpectedResolutionPath {
                        function: function.clone(),
                        found: path.to_search_path(),
                    });
                }
                Some(_) => {}
            }
            let expected = ExecutionIdentity::Definer {
                owner: plan.function_owner.clone(),
            };
            if f.identity != expected {
                violations.push(Violation::UnexpectedIdentity {
                    function: function.clone(),
                    found: f.identity.to_string(),
                });
            }
        }
    }

    let signature = catalog
        .triggers()
        .iter()
        .filter(|t| &t.function == function)
        .map(|t| (t.collection.as_str(), t.firing))
        .collect::<Vec<_>>();
    for collection in &plan.audited_collections {
        if !signature.contains(&(collection.as_str(), FiringCondition::BeforeUpdateRow)) {
            violations.push(Violation::MissingTrigger {
                collection: collection.clone(),
                function: function.clone(),
            });
        }
    }

    violations.extend(catalog.dangling_triggers().into_iter().map(|t| {
        Violation::DanglingTrigger {
            trigger: t.name.clone(),
            collection: t.collection.clone(),
            function: t.function.clone(),
        }
    }));

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{AuditTrigger, MaintainerFunction, ResolutionPath};
    use crate::changeset::applicator::apply_changes;
    use crate::telemetry::UsageReport;
    use crate::catalog::ResourceCollection;
    use rowguard_shared::HardeningConfig;

    fn plan() -> HardeningPlan {
        HardeningPlan::from_config(&HardeningConfig::default()).unwrap()
    }

    #[test]
    fn test_unhardened_catalog_reports_every_violation() {
        let mut catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_access_control(true))
            .with_collection(ResourceCollection::new("app_kv"));
        catalog.put_function(MaintainerFunction::unpinned(
            "update_updated_at_column",
            "updated_at",
            ExecutionIdentity::Definer {
                owner: "postgres".into(),
            },
        ));
        catalog
            .add_trigger(AuditTrigger::for_collection("items", "update_updated_at_column"))
            .unwrap();

        let codes: Vec<_> = verify(&catalog, &plan()).iter().map(Violation::code).collect();
        assert_eq!(
            codes,
            vec!["UNPROTECTED_COLLECTION", "UNPINNED_MAINTAINER", "MISSING_TRIGGER"]
        );
    }

    #[test]
    fn test_wrong_pinned_path_is_reported() {
        let mut catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_access_control(true))
            .with_collection(ResourceCollection::new("app_kv").with_access_control(true));
        catalog.put_function(MaintainerFunction::hardened(
            "update_updated_at_column",
            "updated_at",
            "postgres",
            ResolutionPath::new(["public"]).unwrap(),
        ));
        for c in ["items", "app_kv"] {
            catalog
                .add_trigger(AuditTrigger::for_collection(c, "update_updated_at_column"))
                .unwrap();
        }
        let violations = verify(&catalog, &plan());
        assert_eq!(violations.len(), 1);
        assert_eq!(
            violations[0].to_string(),
            "function update_updated_at_column is pinned to [public]"
        );
    }

    fn hardened_catalog() -> Catalog {
        let mut catalog = Catalog::new()
            .with_collection(ResourceCollection::new("items").with_access_control(true))
            .with_collection(ResourceCollection::new("app_kv").with_access_control(true));
        catalog.put_function(plan().target_maintainer());
        for c in ["items", "app_kv"] {
            catalog
                .add_trigger(AuditTrigger::for_collection(c, "update_updated_at_column"))
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_unpinned_invoker_maintainer_is_reported_and_replanned() {
        let mut catalog = hardened_catalog();
        assert_eq!(verify(&catalog, &plan()), Vec::new());

        catalog.put_function(MaintainerFunction::unpinned(
            "update_updated_at_column",
            "updated_at",
            ExecutionIdentity::Invoker,
        ));
        assert_eq!(
            verify(&catalog, &plan()),
            vec![
                Violation::UnpinnedMaintainer {
                    function: "update_updated_at_column".into()
                },
                Violation::UnexpectedIdentity {
                    function: "update_updated_at_column".into(),
                    found: "invoker".into(),
                },
            ]
        );

        let set = plan().plan("cs", &catalog, &UsageReport::default()).unwrap();
        assert!(!set.is_empty());
        apply_changes(&mut catalog, &set).unwrap();
        assert_eq!(verify(&catalog, &plan()), Vec::new());
    }

    #[test]
    fn test_pinned_maintainer_with_other_owner_is_reported() {
        let mut catalog = hardened_catalog();
        catalog.put_function(MaintainerFunction::hardened(
            "update_updated_at_column",
            "updated_at",
            "app_user",
            ResolutionPath::pinned(),
        ));
        let violations = verify(&catalog, &plan());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code(), "UNEXPECTED_IDENTITY");
        assert_eq!(
            violations[0].to_string(),
            "function update_updated_at_column runs as definer (app_user)"
        );
    }
}
