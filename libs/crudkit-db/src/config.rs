//! Service configuration.
//!
//! Sources are layered: field defaults, then an optional YAML file, then
//! `CRUDKIT__`-prefixed environment variables (`__` separates nesting, e.g.
//! `CRUDKIT__DATABASE__DSN`).

use std::path::Path;

use crudkit_security::RolesConfig;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::error::CrudError;

pub const ENV_PREFIX: &str = "CRUDKIT__";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrudConfig {
    #[serde(default)]
    pub database: DbConfig,
    /// Limit applied to plans parsed by [`crate::Crud::parse_query`];
    /// `null` means unlimited.
    #[serde(default = "default_limit")]
    pub default_limit: Option<u64>,
    #[serde(default)]
    pub roles: RolesConfig,
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            database: DbConfig::default(),
            default_limit: default_limit(),
            roles: RolesConfig::default(),
        }
    }
}

impl CrudConfig {
    /// Load from `path` (a missing file is skipped) and the environment.
    ///
    /// # Errors
    /// Returns [`CrudError::Config`] on malformed YAML, unknown keys or
    /// mistyped values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CrudError> {
        let config = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Environment only.
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn from_env() -> Result<Self, CrudError> {
        Ok(Figment::new()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }
}

/// Connection settings for the sea-orm pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConfig {
    /// `sqlite:`, `postgres:`/`postgresql:` or `mysql:` URL.
    #[serde(default = "default_dsn")]
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            sqlx_logging: false,
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_limit() -> Option<u64> {
    Some(crudkit_query::DEFAULT_LIMIT)
}

fn default_dsn() -> String {
    "sqlite::memory:".to_owned()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        temp_env::with_vars_unset(["CRUDKIT__DATABASE__DSN", "CRUDKIT__DEFAULT_LIMIT"], || {
            let cfg = CrudConfig::load("/nonexistent/crudkit.yaml").unwrap();
            assert_eq!(cfg.database.dsn, "sqlite::memory:");
            assert_eq!(cfg.database.max_connections, 10);
            assert_eq!(cfg.default_limit, Some(20));
            assert!(cfg.roles.roles.is_empty());
        });
    }

    #[test]
    fn yaml_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database:\n  dsn: sqlite://app.db\n  max_connections: 4\ndefault_limit: 50\nroles:\n  visitor:\n    entities: {{}}\n"
        )
        .unwrap();

        temp_env::with_var("CRUDKIT__DATABASE__DSN", Some("postgres://db/app"), || {
            let cfg = CrudConfig::load(file.path()).unwrap();
            assert_eq!(cfg.database.dsn, "postgres://db/app");
            assert_eq!(cfg.database.max_connections, 4);
            assert_eq!(cfg.default_limit, Some(50));
            assert!(cfg.roles.roles.contains_key("visitor"));
        });
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database:\n  dns: sqlite::memory:\n").unwrap();
        let err = CrudConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, CrudError::Config(_)));
    }
}
