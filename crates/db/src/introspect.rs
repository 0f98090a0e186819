//! Reads the live `PostgreSQL` catalog into the core model.
//!
//! Collections come from `pg_class.relrowsecurity`, rules from
//! `pg_policies`, maintainer functions from `pg_proc`, audit triggers from
//! `pg_trigger`, and index usage from `pg_stat_user_indexes`.

use rowguard_core::audit::{AuditError, AuditTrigger, ExecutionIdentity, MaintainerFunction, ResolutionPath};
use rowguard_core::catalog::{Catalog, CatalogError, CatalogSnapshot, IndexDef, ResourceCollection};
use rowguard_core::changeset::{ChangeSet, ChangeSetError};
use rowguard_core::hardening::{HardeningPlan, Violation, verify};
use rowguard_core::policy::{OperationScope, Predicate, Rule};
use rowguard_core::telemetry::{IndexUsage, UsageReport};
use rowguard_shared::AppError;
use sea_orm::{DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from catalog introspection.
#[derive(Debug, Error)]
pub enum IntrospectError {
    /// A function's `search_path` setting is not a valid resolution path.
    #[error("Function {function} has an invalid search_path: {source}")]
    InvalidResolutionPath {
        /// Function name.
        function: String,
        /// Validation failure.
        #[source]
        source: AuditError,
    },

    /// A policy command keyword was not recognised.
    #[error("Policy {rule} on {collection} has unknown command {command}")]
    UnknownCommand {
        /// Owning collection.
        collection: String,
        /// Policy name.
        rule: String,
        /// The command keyword.
        command: String,
    },

    /// The loaded rows do not form a consistent catalog.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Planning against the loaded catalog failed.
    #[error("Planning failed: {0}")]
    Plan(#[from] ChangeSetError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl From<IntrospectError> for AppError {
    fn from(err: IntrospectError) -> Self {
        match err {
            IntrospectError::Database(e) => AppError::Database(e.to_string()),
            IntrospectError::Plan(e) => e.into(),
            IntrospectError::Catalog(e) => e.into(),
            e @ (IntrospectError::InvalidResolutionPath { .. } | IntrospectError::UnknownCommand { .. }) => {
                AppError::Configuration(e.to_string())
            }
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct CollectionRow {
    name: String,
    access_control_enabled: bool,
}

#[derive(Debug, FromQueryResult)]
struct PolicyRow {
    collection: String,
    name: String,
    permissive: String,
    command: String,
    using_expr: Option<String>,
    check_expr: Option<String>,
}

#[derive(Debug, FromQueryResult)]
struct IndexRow {
    name: String,
    collection: String,
    is_unique: bool,
    columns: String,
}

#[derive(Debug, FromQueryResult)]
struct FunctionRow {
    name: String,
    owner: String,
    security_definer: bool,
    search_path: Option<String>,
    body: String,
}

#[derive(Debug, FromQueryResult)]
struct TriggerRow {
    name: String,
    collection: String,
    function: String,
    tgtype: i32,
}

#[derive(Debug, FromQueryResult)]
struct UsageRow {
    index_name: String,
    collection: String,
    scans: i64,
    is_unique: bool,
}

#[derive(Debug, FromQueryResult)]
struct WindowRow {
    days: i32,
}

#[derive(Debug, FromQueryResult)]
struct SymbolRow {
    namespace: String,
    symbol: String,
}

const COLLECTIONS_SQL: &str = r"
SELECT c.relname::text AS name, c.relrowsecurity AS access_control_enabled
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
ORDER BY c.relname
";

const POLICIES_SQL: &str = r"
SELECT tablename::text AS collection,
       policyname::text AS name,
       permissive,
       cmd AS command,
       qual AS using_expr,
       with_check AS check_expr
FROM pg_policies
WHERE schemaname = $1
ORDER BY tablename, policyname
";

const INDEXES_SQL: &str = r"
SELECT i.relname::text AS name,
       t.relname::text AS collection,
       ix.indisunique AS is_unique,
       array_to_string(ARRAY(
           SELECT a.attname::text
           FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
           JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
           ORDER BY k.ord
       ), ',') AS columns
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1
ORDER BY i.relname
";

const FUNCTIONS_SQL: &str = r"
SELECT p.proname::text AS name,
       pg_get_userbyid(p.proowner)::text AS owner,
       p.prosecdef AS security_definer,
       (SELECT substr(c, 13) FROM unnest(p.proconfig) AS c WHERE c LIKE 'search_path=%') AS search_path,
       p.prosrc AS body
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = $1 AND p.prorettype = 'pg_catalog.trigger'::regtype
ORDER BY p.proname
";

const TRIGGERS_SQL: &str = r"
SELECT t.tgname::text AS name,
       c.relname::text AS collection,
       p.proname::text AS function,
       t.tgtype::int4 AS tgtype
FROM pg_trigger t
JOIN pg_class c ON c.oid = t.tgrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_proc p ON p.oid = t.tgfoid
WHERE n.nspname = $1 AND NOT t.tgisinternal
ORDER BY c.relname, t.tgname
";

const USAGE_SQL: &str = r"
SELECT s.indexrelname::text AS index_name,
       s.relname::text AS collection,
       s.idx_scan AS scans,
       ix.indisunique AS is_unique
FROM pg_stat_user_indexes s
JOIN pg_index ix ON ix.indexrelid = s.indexrelid
WHERE s.schemaname = $1
ORDER BY s.indexrelname
";

const WINDOW_SQL: &str = r"
SELECT GREATEST(0, floor(EXTRACT(EPOCH FROM now() - COALESCE(d.stats_reset, pg_postmaster_start_time())) / 86400))::int4 AS days
FROM pg_stat_database d
WHERE d.datname = current_database()
";

const SYMBOLS_SQL: &str = r"
SELECT n.nspname::text AS namespace, p.proname::text AS symbol
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
WHERE p.proname = $1
";

const TRIGGER_ROW: i32 = 1 << 0;
const TRIGGER_BEFORE: i32 = 1 << 1;
const TRIGGER_UPDATE: i32 = 1 << 4;

/// Reads one schema of a live database.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    db: DatabaseConnection,
    schema: String,
}

impl CatalogRepository {
    /// Creates a repository for `schema`.
    pub fn new(db: DatabaseConnection, schema: impl Into<String>) -> Self {
        Self {
            db,
            schema: schema.into(),
        }
    }

    fn statement(&self, sql: &str) -> Statement {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, [self.schema.clone().into()])
    }

    /// Loads collections, rules, indexes, maintainer functions and
    /// audit triggers.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails, a policy command is unknown, or a
    /// function carries an invalid `search_path`.
    pub async fn load_snapshot(&self) -> Result<CatalogSnapshot, IntrospectError> {
        let mut collections: Vec<ResourceCollection> =
            CollectionRow::find_by_statement(self.statement(COLLECTIONS_SQL))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|row| ResourceCollection::new(row.name).with_access_control(row.access_control_enabled))
                .collect();

        let policies = PolicyRow::find_by_statement(self.statement(POLICIES_SQL))
            .all(&self.db)
            .await?;
        for row in policies {
            let Some(collection) = collections.iter_mut().find(|c| c.name == row.collection) else {
                debug!(collection = %row.collection, rule = %row.name, "Skipping policy on non-table relation");
                continue;
            };
            if !row.permissive.eq_ignore_ascii_case("PERMISSIVE") {
                warn!(collection = %row.collection, rule = %row.name, "Skipping restrictive policy");
                continue;
            }
            collection.add_rule(policy_rule(row)?)?;
        }

        let indexes = IndexRow::find_by_statement(self.statement(INDEXES_SQL))
            .all(&self.db)
            .await?
            .into_iter()
            .filter(|row| !row.columns.is_empty())
            .map(|row| {
                let index = IndexDef::new(row.name, row.collection, row.columns.split(','));
                if row.is_unique { index.unique() } else { index }
            })
            .collect();

        let functions = FunctionRow::find_by_statement(self.statement(FUNCTIONS_SQL))
            .all(&self.db)
            .await?
            .into_iter()
            .filter_map(|row| maintainer_function(row).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let mut triggers = Vec::new();
        for row in TriggerRow::find_by_statement(self.statement(TRIGGERS_SQL))
            .all(&self.db)
            .await?
        {
            if is_before_update_row(row.tgtype) {
                triggers.push(AuditTrigger::before_update(row.name, row.collection, row.function));
            } else {
                debug!(trigger = %row.name, tgtype = row.tgtype, "Skipping non-audit trigger");
            }
        }

        for collection in &mut collections {
            let attribute = triggers
                .iter()
                .filter(|t| t.collection == collection.name)
                .find_map(|t| functions.iter().find(|f| f.name == t.function))
                .map(|f| f.attribute.clone());
            if attribute.is_some() {
                collection.audit_attribute = attribute;
            }
        }

        Ok(CatalogSnapshot {
            collections,
            indexes,
            functions,
            triggers,
        })
    }

    /// Loads the snapshot and every namespace defining a symbol the
    /// maintainers call.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogRepository::load_snapshot`].
    pub async fn load_catalog(&self) -> Result<Catalog, IntrospectError> {
        let snapshot = self.load_snapshot().await?;
        let mut calls: Vec<String> = snapshot
            .functions
            .iter()
            .flat_map(|f| f.calls.iter().cloned())
            .collect();
        calls.sort();
        calls.dedup();

        let mut catalog = Catalog::from_snapshot(snapshot);
        for symbol in calls {
            let stmt = Statement::from_sql_and_values(DbBackend::Postgres, SYMBOLS_SQL, [symbol.into()]);
            for row in SymbolRow::find_by_statement(stmt).all(&self.db).await? {
                catalog.symbols_mut().define(row.namespace, row.symbol);
            }
        }

        info!(
            schema = %self.schema,
            collections = catalog.collections().count(),
            triggers = catalog.triggers().len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    /// Loads index scan counters and the length of the window they cover.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn load_usage(&self) -> Result<UsageReport, IntrospectError> {
        let stmt = Statement::from_string(DbBackend::Postgres, WINDOW_SQL);
        let window_days = WindowRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map_or(0, |row| u32::try_from(row.days).unwrap_or(0));

        let report = UsageRow::find_by_statement(self.statement(USAGE_SQL))
            .all(&self.db)
            .await?
            .into_iter()
            .fold(UsageReport::new(window_days), |report, row| {
                let usage = IndexUsage::new(
                    row.index_name,
                    row.collection,
                    u64::try_from(row.scans).unwrap_or(0),
                );
                report.with_usage(if row.is_unique { usage.unique() } else { usage })
            });
        Ok(report)
    }

    /// Checks the live catalog against a hardening plan.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogRepository::load_catalog`].
    pub async fn verify(&self, plan: &HardeningPlan) -> Result<Vec<Violation>, IntrospectError> {
        let catalog = self.load_catalog().await?;
        Ok(verify(&catalog, plan))
    }

    /// Derives the change-set that would bring the live catalog to the
    /// plan's end state.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or the derived change-set does not
    /// validate.
    pub async fn plan(&self, plan: &HardeningPlan, id: &str) -> Result<ChangeSet, IntrospectError> {
        let catalog = self.load_catalog().await?;
        let usage = self.load_usage().await?;
        Ok(plan.plan(id, &catalog, &usage)?)
    }
}

fn policy_rule(row: PolicyRow) -> Result<Rule, IntrospectError> {
    let scope = OperationScope::parse(&row.command).ok_or_else(|| IntrospectError::UnknownCommand {
        collection: row.collection.clone(),
        rule: row.name.clone(),
        command: row.command.clone(),
    })?;
    let mut rule = Rule::new(row.name, scope);
    if let Some(using) = row.using_expr {
        rule = rule.with_using(Predicate::from_sql(&using));
    }
    if let Some(check) = row.check_expr {
        rule = rule.with_check(Predicate::from_sql(&check));
    }
    Ok(rule)
}

/// Functions that never assign a `NEW` attribute are not maintainers.
fn maintainer_function(row: FunctionRow) -> Result<Option<MaintainerFunction>, IntrospectError> {
    let Some(attribute) = stamped_attribute(&row.body) else {
        debug!(function = %row.name, "Skipping trigger function that stamps nothing");
        return Ok(None);
    };
    let identity = if row.security_definer {
        ExecutionIdentity::Definer { owner: row.owner }
    } else {
        ExecutionIdentity::Invoker
    };
    let mut function = MaintainerFunction::unpinned(row.name, attribute, identity);
    if let Some(search_path) = row.search_path {
        let path = ResolutionPath::parse(&search_path).map_err(|source| {
            IntrospectError::InvalidResolutionPath {
                function: function.name.clone(),
                source,
            }
        })?;
        function.resolution_path = Some(path);
    }
    Ok(Some(function))
}

/// The attribute a trigger body assigns through `NEW.<attr> =` or
/// `NEW.<attr> :=`.
fn stamped_attribute(body: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let mut offset = 0;
    while let Some(pos) = lower[offset..].find("new.") {
        let start = offset + pos + "new.".len();
        let rest = &body[start..];
        let attribute: String = if let Some(quoted) = rest.strip_prefix('"') {
            quoted.chars().take_while(|c| *c != '"').collect()
        } else {
            rest.chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect()
        };
        let after = rest
            .get(attribute.len() + if rest.starts_with('"') { 2 } else { 0 }..)
            .unwrap_or_default()
            .trim_start();
        if !attribute.is_empty() && (after.starts_with(":=") || after.starts_with('=')) {
            return Some(attribute);
        }
        offset = start;
    }
    None
}

fn is_before_update_row(tgtype: i32) -> bool {
    let mask = TRIGGER_ROW | TRIGGER_BEFORE | TRIGGER_UPDATE;
    tgtype & mask == mask
}
