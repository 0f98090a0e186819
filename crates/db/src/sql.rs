//! Rendering of schema changes and predicates as `PostgreSQL` statements.
//!
//! Every statement is safe to re-run: drops use `IF EXISTS`, indexes use
//! `IF NOT EXISTS`, functions use `CREATE OR REPLACE`, and triggers are
//! dropped before being created.

use rowguard_core::audit::{AuditTrigger, ExecutionIdentity, MaintainerFunction};
use rowguard_core::catalog::IndexDef;
use rowguard_core::changeset::{ChangeSet, SchemaChange};
use rowguard_core::policy::{Operand, OperationScope, Predicate, Rule, Value};
use rowguard_shared::{DatabaseConfig, HardeningConfig};

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
#[must_use]
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Renders core schema changes for one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresRenderer {
    schema: String,
    actor_id_expression: String,
}

impl Default for PostgresRenderer {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            actor_id_expression: "auth.uid()".to_string(),
        }
    }
}

impl PostgresRenderer {
    /// Creates a renderer for `schema`.
    pub fn new(schema: impl Into<String>, actor_id_expression: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            actor_id_expression: actor_id_expression.into(),
        }
    }

    /// Creates a renderer from loaded configuration.
    #[must_use]
    pub fn from_config(database: &DatabaseConfig, hardening: &HardeningConfig) -> Self {
        Self::new(&database.schema, &hardening.actor_id_expression)
    }

    /// Target schema.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(name))
    }

    /// Renders every change of a change-set, in order.
    #[must_use]
    pub fn render_change_set(&self, change_set: &ChangeSet) -> Vec<String> {
        change_set
            .changes
            .iter()
            .flat_map(|change| self.render(change))
            .collect()
    }

    /// Renders one change. Trigger creation expands to two statements.
    #[must_use]
    pub fn render(&self, change: &SchemaChange) -> Vec<String> {
        match change {
            SchemaChange::DropIndexIfExists { name } => {
                vec![format!("DROP INDEX IF EXISTS {}", self.qualified(name))]
            }
            SchemaChange::CreateIndex { index } => vec![self.create_index(index)],
            SchemaChange::DropRuleIfExists { collection, name } => vec![format!(
                "DROP POLICY IF EXISTS {} ON {}",
                quote_ident(name),
                self.qualified(collection)
            )],
            SchemaChange::EnableAccessControl { collection } => vec![format!(
                "ALTER TABLE {} ENABLE ROW LEVEL SECURITY",
                self.qualified(collection)
            )],
            SchemaChange::DisableAccessControl { collection } => vec![format!(
                "ALTER TABLE {} DISABLE ROW LEVEL SECURITY",
                self.qualified(collection)
            )],
            SchemaChange::CreateRule { collection, rule } => {
                vec![self.create_policy(collection, rule)]
            }
            SchemaChange::DropFunctionCascade { name } => vec![format!(
                "DROP FUNCTION IF EXISTS {}() CASCADE",
                self.qualified(name)
            )],
            SchemaChange::CreateFunction { function } => vec![self.create_function(function)],
            SchemaChange::CreateTrigger { trigger } => self.create_trigger(trigger),
        }
    }

    fn create_index(&self, index: &IndexDef) -> String {
        let columns = index
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({columns})",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&index.name),
            self.qualified(&index.collection),
        )
    }

    fn create_policy(&self, collection: &str, rule: &Rule) -> String {
        let mut sql = format!(
            "CREATE POLICY {} ON {} AS PERMISSIVE FOR {}",
            quote_ident(&rule.name),
            self.qualified(collection),
            rule.scope.as_str(),
        );
        // INSERT has no existing row; SELECT and DELETE produce no new one.
        let takes_using = !matches!(rule.scope, OperationScope::Insert);
        let takes_check = !matches!(rule.scope, OperationScope::Select | OperationScope::Delete);
        if takes_using && let Some(using) = &rule.using {
            sql.push_str(&format!(" USING ({})", self.predicate(using)));
        }
        if takes_check && let Some(check) = &rule.check {
            sql.push_str(&format!(" WITH CHECK ({})", self.predicate(check)));
        }
        sql
    }

    fn create_function(&self, function: &MaintainerFunction) -> String {
        let security = match &function.identity {
            ExecutionIdentity::Invoker => "SECURITY INVOKER",
            ExecutionIdentity::Definer { .. } => "SECURITY DEFINER",
        };
        let search_path = function
            .resolution_path
            .as_ref()
            .map(|path| format!("\nSET search_path = {}", path.to_search_path()))
            .unwrap_or_default();
        let clock = function.calls.first().map_or("now", String::as_str);
        format!(
            "CREATE OR REPLACE FUNCTION {}()\nRETURNS trigger\nLANGUAGE plpgsql\n{security}{search_path}\nAS $function$\nBEGIN\n    NEW.{} = {clock}();\n    RETURN NEW;\nEND;\n$function$",
            self.qualified(&function.name),
            quote_ident(&function.attribute),
        )
    }

    fn create_trigger(&self, trigger: &AuditTrigger) -> Vec<String> {
        let table = self.qualified(&trigger.collection);
        vec![
            format!(
                "DROP TRIGGER IF EXISTS {} ON {table}",
                quote_ident(&trigger.name)
            ),
            format!(
                "CREATE TRIGGER {} {} ON {table} FOR EACH ROW EXECUTE FUNCTION {}()",
                quote_ident(&trigger.name),
                trigger.firing.as_sql(),
                self.qualified(&trigger.function),
            ),
        ]
    }

    /// Renders a predicate as a SQL boolean expression.
    #[must_use]
    pub fn predicate(&self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::True => "true".to_string(),
            Predicate::False => "false".to_string(),
            Predicate::Eq(a, b) => format!("({} = {})", self.operand(a), self.operand(b)),
            Predicate::Ne(a, b) => format!("({} <> {})", self.operand(a), self.operand(b)),
            Predicate::IsNull(a) => format!("({} IS NULL)", self.operand(a)),
            Predicate::IsNotNull(a) => format!("({} IS NOT NULL)", self.operand(a)),
            Predicate::And(l, r) => format!("({} AND {})", self.predicate(l), self.predicate(r)),
            Predicate::Or(l, r) => format!("({} OR {})", self.predicate(l), self.predicate(r)),
            Predicate::Not(p) => format!("(NOT {})", self.predicate(p)),
            Predicate::Sql(text) => format!("({text})"),
        }
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Column(name) => quote_ident(name),
            Operand::Literal(value) => literal(value),
            Operand::ActorId => self.actor_id_expression.clone(),
            Operand::ActorRole => "current_user".to_string(),
            Operand::Setting(name) => format!("current_setting({}, true)", quote_literal(name)),
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Text(s) => quote_literal(s),
        Value::Uuid(u) => format!("'{u}'::uuid"),
        Value::Timestamp(t) => format!("'{}'::timestamptz", t.to_rfc3339()),
    }
}
