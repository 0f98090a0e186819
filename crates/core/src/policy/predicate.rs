//! Predicate expressions evaluated by row-level rules.
//!
//! Predicates follow SQL three-valued logic internally; a rule only admits
//! a row when its predicate is definitely true, so NULL collapses to deny.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Text.
    Text(String),
    /// UUID.
    Uuid(Uuid),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Returns true for NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL equality: NULL on either side yields unknown. Text compared to a
    /// UUID is cast, the way `current_setting(..)::uuid` is in policies.
    #[must_use]
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Uuid(u), Self::Text(t)) | (Self::Text(t), Self::Uuid(u)) => {
                Some(Uuid::parse_str(t).is_ok_and(|parsed| parsed == *u))
            }
            (a, b) => Some(a == b),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

/// A record of named attributes. Missing attributes read as NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    attributes: BTreeMap<String, Value>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets an attribute, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.insert(name.into(), value.into())
    }

    /// Returns the attribute value, or `None` if it is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Overlays every attribute of `changes` onto this row.
    #[must_use]
    pub fn merged(&self, changes: &Row) -> Row {
        let mut out = self.clone();
        for (k, v) in &changes.attributes {
            out.attributes.insert(k.clone(), v.clone());
        }
        out
    }

    /// Iterates attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if the row has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// The session an operation runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Authenticated actor, if any.
    pub actor_id: Option<Uuid>,
    /// Role the session runs as.
    pub role: String,
    /// Session settings readable by predicates.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Namespace list the actor's session resolves names through. Actors
    /// may change this freely.
    #[serde(default = "default_search_path")]
    pub search_path: Vec<String>,
}

fn default_search_path() -> Vec<String> {
    vec!["public".to_string()]
}

impl ActorContext {
    /// An unauthenticated session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            actor_id: None,
            role: "anon".to_string(),
            settings: BTreeMap::new(),
            search_path: default_search_path(),
        }
    }

    /// An authenticated session for the given actor.
    #[must_use]
    pub fn authenticated(actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            role: "authenticated".to_string(),
            ..Self::anonymous()
        }
    }

    /// Adds a session setting.
    #[must_use]
    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Replaces the session search path.
    #[must_use]
    pub fn with_search_path<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_path = namespaces.into_iter().map(Into::into).collect();
        self
    }
}

/// A value source inside a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arg", rename_all = "snake_case")]
pub enum Operand {
    /// Attribute of the row under evaluation.
    Column(String),
    /// Constant.
    Literal(Value),
    /// The current actor id (NULL when anonymous).
    ActorId,
    /// The current session role.
    ActorRole,
    /// A session setting, NULL when unset.
    Setting(String),
}

impl Operand {
    /// Shorthand for a column reference.
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// Shorthand for a literal.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    fn resolve(&self, row: &Row, actor: &ActorContext) -> Value {
        match self {
            Self::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
            Self::Literal(v) => v.clone(),
            Self::ActorId => actor.actor_id.map_or(Value::Null, Value::Uuid),
            Self::ActorRole => Value::Text(actor.role.clone()),
            Self::Setting(name) => actor
                .settings
                .get(name)
                .map_or(Value::Null, |v| Value::Text(v.clone())),
        }
    }
}

/// Boolean expression over a row and the actor's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Predicate {
    /// Always true.
    True,
    /// Always false.
    False,
    /// SQL `=`.
    Eq(Operand, Operand),
    /// SQL `<>`.
    Ne(Operand, Operand),
    /// SQL `IS NULL`.
    IsNull(Operand),
    /// SQL `IS NOT NULL`.
    IsNotNull(Operand),
    /// Conjunction.
    And(Box<Predicate>, Box<Predicate>),
    /// Disjunction.
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// SQL text read back from a live catalog. It cannot be evaluated
    /// in-process and always yields unknown.
    Sql(String),
}

impl Predicate {
    /// `lhs = rhs`.
    #[must_use]
    pub fn equals(lhs: Operand, rhs: Operand) -> Self {
        Self::Eq(lhs, rhs)
    }

    /// Owner check: `column = <actor id>`.
    pub fn owned_by_actor(column: impl Into<String>) -> Self {
        Self::Eq(Operand::Column(column.into()), Operand::ActorId)
    }

    /// Conjunction.
    #[must_use]
    pub fn and(self, rhs: Predicate) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }

    /// Disjunction.
    #[must_use]
    pub fn or(self, rhs: Predicate) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Classifies SQL text from a live catalog, recognising the constant
    /// forms.
    pub fn from_sql(text: &str) -> Self {
        match text.trim().trim_matches(|c| c == '(' || c == ')').trim() {
            t if t.eq_ignore_ascii_case("true") => Self::True,
            t if t.eq_ignore_ascii_case("false") => Self::False,
            _ => Self::Sql(text.to_string()),
        }
    }

    /// Three-valued evaluation; `None` is SQL unknown.
    #[must_use]
    pub fn evaluate3(&self, row: &Row, actor: &ActorContext) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Eq(a, b) => a.resolve(row, actor).sql_eq(&b.resolve(row, actor)),
            Self::Ne(a, b) => a
                .resolve(row, actor)
                .sql_eq(&b.resolve(row, actor))
                .map(|eq| !eq),
            Self::IsNull(a) => Some(a.resolve(row, actor).is_null()),
            Self::IsNotNull(a) => Some(!a.resolve(row, actor).is_null()),
            Self::And(l, r) => match (l.evaluate3(row, actor), r.evaluate3(row, actor)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or(l, r) => match (l.evaluate3(row, actor), r.evaluate3(row, actor)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Self::Not(p) => p.evaluate3(row, actor).map(|v| !v),
            Self::Sql(_) => None,
        }
    }

    /// Returns true only when the predicate is definitely true.
    #[must_use]
    pub fn holds(&self, row: &Row, actor: &ActorContext) -> bool {
        self.evaluate3(row, actor) == Some(true)
    }

    /// Columns the predicate reads.
    #[must_use]
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        fn column<'a>(o: &'a Operand, out: &mut BTreeSet<&'a str>) {
            if let Operand::Column(c) = o {
                out.insert(c.as_str());
            }
        }
        match self {
            Self::True | Self::False | Self::Sql(_) => {}
            Self::Eq(a, b) | Self::Ne(a, b) => {
                column(a, out);
                column(b, out);
            }
            Self::IsNull(a) | Self::IsNotNull(a) => column(a, out),
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Self::Not(p) => p.collect_columns(out),
        }
    }
}
