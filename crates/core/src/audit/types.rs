//! Audit maintainer domain types.
//!
//! The maintainer runs with elevated rights, so every symbol it calls is
//! resolved through a resolution path fixed when the function is defined.
//! A caller's session path is only consulted for functions that were never
//! pinned, which is exactly the state the hardening change-set removes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::audit::error::AuditError;

/// Namespace holding built-in functions.
pub const SYSTEM_NAMESPACE: &str = "pg_catalog";

/// Session-local temporary namespace. Anyone can create objects there.
pub const TEMP_NAMESPACE: &str = "pg_temp";

/// An explicit, ordered namespace list fixed at function-definition time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ResolutionPath(Vec<String>);

impl ResolutionPath {
    /// Builds a validated resolution path.
    ///
    /// # Errors
    /// * `AuditError::EmptyResolutionPath` if no namespace is given
    /// * `AuditError::InvalidNamespace` for caller-dependent entries
    ///   (`$user`), malformed identifiers, or `pg_temp` anywhere but last
    pub fn new<I, S>(namespaces: I) -> Result<Self, AuditError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let namespaces: Vec<String> = namespaces.into_iter().map(Into::into).collect();
        if namespaces.is_empty() {
            return Err(AuditError::EmptyResolutionPath);
        }
        let last = namespaces.len() - 1;
        for (i, ns) in namespaces.iter().enumerate() {
            if ns == "$user" {
                return Err(AuditError::InvalidNamespace {
                    namespace: ns.clone(),
                    reason: "depends on the calling role".to_string(),
                });
            }
            if !is_identifier(ns) {
                return Err(AuditError::InvalidNamespace {
                    namespace: ns.clone(),
                    reason: "not a plain identifier".to_string(),
                });
            }
            if ns == TEMP_NAMESPACE && i != last {
                return Err(AuditError::InvalidNamespace {
                    namespace: ns.clone(),
                    reason: "temporary namespace must be searched last".to_string(),
                });
            }
        }
        Ok(Self(namespaces))
    }

    /// The default pinned path: built-ins first, then `public`.
    #[must_use]
    pub fn pinned() -> Self {
        Self(vec![SYSTEM_NAMESPACE.to_string(), "public".to_string()])
    }

    /// Namespaces in search order.
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.0
    }

    /// Resolves a symbol through this path.
    #[must_use]
    pub fn resolve(&self, symbol: &str, symbols: &SymbolTable) -> Option<QualifiedName> {
        resolve_symbol(&self.0, symbol, symbols)
    }

    /// Renders the path as a `search_path` value.
    #[must_use]
    pub fn to_search_path(&self) -> String {
        self.0.join(", ")
    }

    /// Parses a `search_path` value, e.g. `pg_catalog, public`.
    ///
    /// # Errors
    /// Same validation as [`ResolutionPath::new`].
    pub fn parse(search_path: &str) -> Result<Self, AuditError> {
        Self::new(
            search_path
                .split(',')
                .map(|s| s.trim().trim_matches('"'))
                .filter(|s| !s.is_empty()),
        )
    }
}

impl TryFrom<Vec<String>> for ResolutionPath {
    type Error = AuditError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResolutionPath> for Vec<String> {
    fn from(path: ResolutionPath) -> Self {
        path.0
    }
}

impl fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_search_path())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Resolves `symbol` through `namespaces` in order. Qualified symbols
/// (`ns.name`) bypass the path.
#[must_use]
pub fn resolve_symbol(
    namespaces: &[String],
    symbol: &str,
    symbols: &SymbolTable,
) -> Option<QualifiedName> {
    if let Some((ns, name)) = symbol.split_once('.') {
        return symbols
            .contains(ns, name)
            .then(|| QualifiedName::new(ns, name));
    }
    namespaces
        .iter()
        .find(|ns| symbols.contains(ns, symbol))
        .map(|ns| QualifiedName::new(ns, symbol))
}

/// A namespace-qualified symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Owning namespace.
    pub namespace: String,
    /// Symbol name.
    pub symbol: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.symbol)
    }
}

/// Symbols defined per namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    namespaces: BTreeMap<String, BTreeSet<String>>,
}

impl SymbolTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the built-in time functions.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        for f in [
            "now",
            "transaction_timestamp",
            "statement_timestamp",
            "clock_timestamp",
        ] {
            table.define(SYSTEM_NAMESPACE, f);
        }
        table
    }

    /// Defines a symbol. Returns false if it already existed.
    pub fn define(&mut self, namespace: impl Into<String>, symbol: impl Into<String>) -> bool {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(symbol.into())
    }

    /// Returns true if the namespace defines the symbol.
    #[must_use]
    pub fn contains(&self, namespace: &str, symbol: &str) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|s| s.contains(symbol))
    }
}

/// Identity a function executes with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionIdentity {
    /// Runs with the calling actor's rights.
    Invoker,
    /// Runs with the rights of the owning role.
    Definer {
        /// Owning role.
        owner: String,
    },
}

impl ExecutionIdentity {
    /// Returns true for definer-rights execution.
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Definer { .. })
    }
}

impl fmt::Display for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoker => f.write_str("invoker"),
            Self::Definer { owner } => write!(f, "definer ({owner})"),
        }
    }
}

/// When a maintainer trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringCondition {
    /// Before each row UPDATE is persisted.
    BeforeUpdateRow,
}

impl FiringCondition {
    /// SQL clause for the condition.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::BeforeUpdateRow => "BEFORE UPDATE",
        }
    }
}

impl fmt::Display for FiringCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeUpdateRow => write!(f, "before update (row)"),
        }
    }
}

/// The function that stamps the audit attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerFunction {
    /// Function name.
    pub name: String,
    /// Attribute stamped with the transaction time.
    pub attribute: String,
    /// Execution identity.
    pub identity: ExecutionIdentity,
    /// Fixed resolution path. `None` means the caller's path is inherited.
    #[serde(default)]
    pub resolution_path: Option<ResolutionPath>,
    /// Unqualified symbols the body calls.
    #[serde(default = "default_calls")]
    pub calls: Vec<String>,
}

fn default_calls() -> Vec<String> {
    vec!["now".to_string()]
}

impl MaintainerFunction {
    /// A definer-rights maintainer pinned to an explicit path.
    pub fn hardened(
        name: impl Into<String>,
        attribute: impl Into<String>,
        owner: impl Into<String>,
        path: ResolutionPath,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            identity: ExecutionIdentity::Definer {
                owner: owner.into(),
            },
            resolution_path: Some(path),
            calls: default_calls(),
        }
    }

    /// A maintainer that inherits the caller's resolution path.
    pub fn unpinned(
        name: impl Into<String>,
        attribute: impl Into<String>,
        identity: ExecutionIdentity,
    ) -> Self {
        Self {
            name: name.into(),
            attribute: attribute.into(),
            identity,
            resolution_path: None,
            calls: default_calls(),
        }
    }

    /// Returns true if the function resolves names only through its own
    /// fixed path.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.resolution_path.is_some()
    }

    /// Returns true if the function runs with definer rights and resolves
    /// names only through its own fixed path.
    #[must_use]
    pub fn is_hardened(&self) -> bool {
        self.is_pinned() && self.identity.is_elevated()
    }

    /// Namespaces the function resolves through for a given caller path.
    #[must_use]
    pub fn effective_namespaces<'a>(&'a self, caller_path: &'a [String]) -> &'a [String] {
        match &self.resolution_path {
            Some(path) => path.namespaces(),
            None => caller_path,
        }
    }
}

/// Binding of a maintainer function to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditTrigger {
    /// Trigger name.
    pub name: String,
    /// Collection the trigger is attached to.
    pub collection: String,
    /// Bound function name.
    pub function: String,
    /// When it fires.
    pub firing: FiringCondition,
}

impl AuditTrigger {
    /// A BEFORE UPDATE row trigger.
    pub fn before_update(
        name: impl Into<String>,
        collection: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            function: function.into(),
            firing: FiringCondition::BeforeUpdateRow,
        }
    }

    /// Trigger with the conventional name for a collection.
    pub fn for_collection(collection: &str, function: impl Into<String>) -> Self {
        Self::before_update(format!("trg_{collection}_audit"), collection, function)
    }
}
