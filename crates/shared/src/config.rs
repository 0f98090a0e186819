//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Schema hardening configuration.
    #[serde(default)]
    pub hardening: HardeningConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Schema that holds the hardened collections.
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_schema() -> String {
    "public".to_string()
}

/// Settings that drive hardening plans and post-migration verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HardeningConfig {
    /// Collections holding access-sensitive data. Each must end up with
    /// access control enabled.
    pub protected_collections: Vec<String>,
    /// Collections whose audit attribute the maintainer keeps current.
    pub audited_collections: Vec<String>,
    /// Fixed namespace list the audit maintainer resolves symbols through.
    pub resolution_path: Vec<String>,
    /// Name of the audit maintainer function.
    pub maintainer_function: String,
    /// Attribute the maintainer stamps on every update.
    pub audit_attribute: String,
    /// Role the maintainer executes as.
    pub function_owner: String,
    /// Minimum usage window (days) before an index with zero scans counts
    /// as unused.
    pub min_usage_window_days: u32,
    /// SQL expression yielding the current actor id inside policies.
    pub actor_id_expression: String,
    /// Session setting carrying the actor id for database-side policies.
    pub actor_id_setting: String,
}

impl Default for HardeningConfig {
    fn default() -> Self {
        Self {
            protected_collections: vec!["items".to_string(), "app_kv".to_string()],
            audited_collections: vec!["items".to_string(), "app_kv".to_string()],
            resolution_path: vec!["pg_catalog".to_string(), "public".to_string()],
            maintainer_function: "update_updated_at_column".to_string(),
            audit_attribute: "updated_at".to_string(),
            function_owner: "postgres".to_string(),
            min_usage_window_days: 7,
            actor_id_expression: "auth.uid()".to_string(),
            actor_id_setting: "request.jwt.claim.sub".to_string(),
        }
    }
}

impl HardeningConfig {
    /// Returns true if the collection holds access-sensitive data.
    #[must_use]
    pub fn is_protected(&self, collection: &str) -> bool {
        self.protected_collections.iter().any(|c| c == collection)
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("ROWGUARD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("hardening.protected_collections")
                    .with_list_parse_key("hardening.audited_collections")
                    .with_list_parse_key("hardening.resolution_path")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Loads `.env` (if present) and then the layered configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load_with_dotenv() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_toml(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied_when_hardening_missing() {
        let cfg = from_toml(
            r#"
            [database]
            url = "postgres://localhost/app"
            "#,
        );
        assert_eq!(cfg.database.max_connections, 5);
        assert_eq!(cfg.database.schema, "public");
        assert_eq!(cfg.hardening, HardeningConfig::default());
        assert_eq!(cfg.hardening.resolution_path, vec!["pg_catalog", "public"]);
    }

    #[test]
    fn test_partial_hardening_section_keeps_other_defaults() {
        let cfg = from_toml(
            r#"
            [database]
            url = "postgres://localhost/app"

            [hardening]
            protected_collections = ["notes"]
            min_usage_window_days = 30
            "#,
        );
        assert_eq!(cfg.hardening.protected_collections, vec!["notes"]);
        assert_eq!(cfg.hardening.min_usage_window_days, 30);
        assert_eq!(cfg.hardening.audit_attribute, "updated_at");
    }

    #[test]
    fn test_is_protected() {
        let cfg = HardeningConfig::default();
        assert!(cfg.is_protected("app_kv"));
        assert!(!cfg.is_protected("audit_log"));
    }
}
