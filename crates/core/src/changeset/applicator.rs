//! In-memory change-set applicator with an applied-change-set ledger.
//!
//! Application takes `&mut Catalog`, so a change-set always runs with
//! exclusive schema access. Steps run in order; the first failing step
//! stops the run and is reported together with how many steps took effect.
//! Nothing is rolled back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogError, DropBehavior};
use crate::changeset::error::ChangeSetError;
use crate::changeset::types::{ChangeSet, SchemaChange};

/// A change-set recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Change-set id.
    pub id: String,
    /// Checksum at application time.
    pub checksum: String,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
    /// Number of steps that changed the catalog.
    pub changed: usize,
}

/// Record of applied change-sets, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedLedger {
    records: Vec<AppliedRecord>,
}

impl AppliedLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a record by change-set id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AppliedRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Returns true if the change-set id was applied.
    #[must_use]
    pub fn is_applied(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Records in application order.
    #[must_use]
    pub fn records(&self) -> &[AppliedRecord] {
        &self.records
    }

    fn record(&mut self, record: AppliedRecord) {
        self.records.push(record);
    }
}

/// Result of a successful `apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every step ran.
    Applied {
        /// Steps run.
        steps: usize,
        /// Steps that changed the catalog.
        changed: usize,
    },
    /// The ledger already held this change-set; nothing ran.
    AlreadyApplied,
}

/// Applies change-sets to a catalog at most once each.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetApplicator {
    ledger: AppliedLedger,
}

impl ChangeSetApplicator {
    /// An applicator with an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An applicator resuming from an existing ledger.
    #[must_use]
    pub fn with_ledger(ledger: AppliedLedger) -> Self {
        Self { ledger }
    }

    /// The applied ledger.
    #[must_use]
    pub fn ledger(&self) -> &AppliedLedger {
        &self.ledger
    }

    /// Applies a change-set unless the ledger already records it.
    ///
    /// # Arguments
    /// * `catalog` - Catalog to mutate
    /// * `change_set` - Changes to apply in order
    ///
    /// # Returns
    /// `ApplyOutcome::Applied` with step counts, or
    /// `ApplyOutcome::AlreadyApplied` when the id is in the ledger with
    /// the same checksum.
    ///
    /// # Errors
    /// * `ChangeSetError::ChecksumMismatch` if the id was applied with
    ///   different content
    /// * `ChangeSetError::PartialApplication` if a step fails; earlier
    ///   steps stay applied and the change-set is not recorded
    pub fn apply(
        &mut self,
        catalog: &mut Catalog,
        change_set: &ChangeSet,
    ) -> Result<ApplyOutcome, ChangeSetError> {
        let checksum = change_set.checksum()?;

        if let Some(record) = self.ledger.get(&change_set.id) {
            if record.checksum != checksum {
                error!(
                    change_set = %change_set.id,
                    recorded = %record.checksum,
                    computed = %checksum,
                    "applied change-set was modified"
                );
                return Err(ChangeSetError::ChecksumMismatch {
                    id: change_set.id.clone(),
                    recorded: record.checksum.clone(),
                    computed: checksum,
                });
            }
            info!(change_set = %change_set.id, "change-set already applied, skipping");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        info!(
            change_set = %change_set.id,
            steps = change_set.len(),
            "applying change-set"
        );
        let changed = apply_changes(catalog, change_set)?;

        self.ledger.record(AppliedRecord {
            id: change_set.id.clone(),
            checksum,
            applied_at: Utc::now(),
            changed,
        });
        info!(change_set = %change_set.id, changed, "change-set applied");
        Ok(ApplyOutcome::Applied {
            steps: change_set.len(),
            changed,
        })
    }
}

/// Runs every change of a set against the catalog without consulting a
/// ledger. Returns how many steps changed the catalog.
///
/// # Errors
/// Returns `ChangeSetError::PartialApplication` on the first failing step.
pub fn apply_changes(catalog: &mut Catalog, change_set: &ChangeSet) -> Result<usize, ChangeSetError> {
    let mut changed = 0;
    for (step, change) in change_set.changes.iter().enumerate() {
        match apply_change(catalog, change) {
            Ok(true) => {
                changed += 1;
                debug!(change_set = %change_set.id, step, change = %change, "applied");
            }
            Ok(false) => {
                debug!(change_set = %change_set.id, step, change = %change, "already in place");
            }
            Err(source) => {
                if step > 0 {
                    warn!(
                        change_set = %change_set.id,
                        applied = step,
                        "change-set left partially applied"
                    );
                }
                error!(
                    change_set = %change_set.id,
                    step,
                    change = %change,
                    error = %source,
                    "change-set step failed"
                );
                return Err(ChangeSetError::PartialApplication {
                    change_set: change_set.id.clone(),
                    applied: step,
                    failed_at: step,
                    step: change.describe(),
                    source,
                });
            }
        }
    }
    Ok(changed)
}

/// Applies a single change. Returns true if the catalog changed.
///
/// # Errors
/// Returns the catalog's refusal, e.g. a missing collection or a
/// conflicting definition under an existing name.
pub fn apply_change(catalog: &mut Catalog, change: &SchemaChange) -> Result<bool, CatalogError> {
    match change {
        SchemaChange::DropIndexIfExists { name } => Ok(catalog.drop_index(name).is_some()),
        SchemaChange::CreateIndex { index } => catalog.add_index(index.clone()),
        SchemaChange::DropRuleIfExists { collection, name } => {
            Ok(catalog.drop_rule(collection, name)?.is_some())
        }
        SchemaChange::EnableAccessControl { collection } => catalog.enable_access_control(collection),
        SchemaChange::DisableAccessControl { collection } => {
            catalog.disable_access_control(collection)
        }
        SchemaChange::CreateRule { collection, rule } => {
            let existing = catalog
                .collection(collection)
                .ok_or_else(|| CatalogError::MissingCollection(collection.clone()))?
                .rule(&rule.name);
            if existing == Some(rule) {
                return Ok(false);
            }
            catalog.add_rule(collection, rule.clone())?;
            Ok(true)
        }
        SchemaChange::DropFunctionCascade { name } => {
            let existed = catalog.function(name).is_some();
            let dropped = catalog.drop_function(name, DropBehavior::Cascade)?;
            Ok(existed || !dropped.is_empty())
        }
        SchemaChange::CreateFunction { function } => {
            let previous = catalog.put_function(function.clone());
            Ok(previous.as_ref() != Some(function))
        }
        SchemaChange::CreateTrigger { trigger } => catalog.add_trigger(trigger.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::{AuditTrigger, MaintainerFunction, ResolutionPath};
    use crate::catalog::ResourceCollection;
    use crate::changeset::builder::ChangeSetBuilder;
    use crate::policy::predicate::Predicate;
    use crate::policy::types::{Operation, Rule};

    fn catalog() -> Catalog {
        Catalog::new()
            .with_collection(ResourceCollection::new("items"))
            .with_collection(ResourceCollection::new("app_kv"))
    }

    fn change_set() -> ChangeSet {
        ChangeSetBuilder::new("cs-1", "enable app_kv")
            .enable_access_control("app_kv")
            .replace_rule("app_kv", Rule::for_operation("read", Operation::Select, Predicate::True))
            .build()
            .unwrap()
    }

    #[test]
    fn test_apply_records_and_skips_rerun() {
        let mut catalog = catalog();
        let mut applicator = ChangeSetApplicator::new();
        let set = change_set();

        let first = applicator.apply(&mut catalog, &set).unwrap();
        assert_eq!(first, ApplyOutcome::Applied { steps: 3, changed: 2 });
        assert!(applicator.ledger().is_applied("cs-1"));

        let after_first = catalog.clone();
        let second = applicator.apply(&mut catalog, &set).unwrap();
        assert_eq!(second, ApplyOutcome::AlreadyApplied);
        assert_eq!(catalog, after_first);
    }

    #[test]
    fn test_apply_changes_twice_equals_once() {
        let mut once = catalog();
        apply_changes(&mut once, &change_set()).unwrap();
        let mut twice = once.clone();
        let changed = apply_changes(&mut twice, &change_set()).unwrap();
        // The drop+create pair re-runs, everything else is already in place.
        assert_eq!(changed, 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_modified_change_set_is_rejected() {
        let mut catalog = catalog();
        let mut applicator = ChangeSetApplicator::new();
        applicator.apply(&mut catalog, &change_set()).unwrap();

        let mut modified = change_set();
        modified.description = "changed".into();
        let err = applicator.apply(&mut catalog, &modified).unwrap_err();
        assert_eq!(err.error_code(), "CHECKSUM_MISMATCH");
    }

    #[test]
    fn test_failure_reports_partial_application_without_rollback() {
        let mut catalog = catalog();
        let mut applicator = ChangeSetApplicator::new();
        let set = ChangeSetBuilder::new("cs-2", "")
            .enable_access_control("items")
            .enable_access_control("ghost")
            .enable_access_control("app_kv")
            .build()
            .unwrap();

        let err = applicator.apply(&mut catalog, &set).unwrap_err();
        match &err {
            ChangeSetError::PartialApplication {
                applied, failed_at, source, ..
            } => {
                assert_eq!(*applied, 1);
                assert_eq!(*failed_at, 1);
                assert_eq!(*source, CatalogError::MissingCollection("ghost".into()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(catalog.collection("items").unwrap().access_control_enabled);
        assert!(!catalog.collection("app_kv").unwrap().access_control_enabled);
        assert!(!applicator.ledger().is_applied("cs-2"));
    }

    #[test]
    fn test_conflicting_rule_fails_instead_of_overwriting() {
        let mut catalog = catalog();
        catalog
            .add_rule(
                "items",
                Rule::for_operation("read", Operation::Select, Predicate::False),
            )
            .unwrap();
        let change = SchemaChange::CreateRule {
            collection: "items".into(),
            rule: Rule::for_operation("read", Operation::Select, Predicate::True),
        };
        let err = apply_change(&mut catalog, &change).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_RULE");
    }

    #[test]
    fn test_maintainer_rebuild_round_trip() {
        let mut catalog = catalog();
        catalog.put_function(MaintainerFunction::unpinned(
            "touch",
            "updated_at",
            crate::audit::types::ExecutionIdentity::Definer {
                owner: "postgres".into(),
            },
        ));
        for coll in ["items", "app_kv"] {
            catalog
                .add_trigger(AuditTrigger::for_collection(coll, "touch"))
                .unwrap();
        }
        let before = catalog.trigger_signature();

        let set = ChangeSetBuilder::new("cs-3", "")
            .rebuild_maintainer(
                MaintainerFunction::hardened("touch", "updated_at", "postgres", ResolutionPath::pinned()),
                catalog.triggers().to_vec(),
            )
            .build()
            .unwrap();
        apply_changes(&mut catalog, &set).unwrap();

        assert_eq!(catalog.trigger_signature(), before);
        assert!(catalog.function("touch").unwrap().is_pinned());
    }
}
