//! API configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BRANCHPOS_BIND` - listen address (default: 0.0.0.0:8080)
//! - `BRANCHPOS_ENV` - `dev` (default) or anything else for a deployed run
//! - `JWT_SECRET` - HS256 signing secret; required unless `BRANCHPOS_ENV=dev`
//! - `DATABASE_URL` - Postgres connection string
//! - `USE_PERSISTENT_STORES` - `true` to keep events in Postgres (needs `DATABASE_URL`)
//! - `BASE_CURRENCY` - settlement currency (default: TZS)
//! - `LOG_FORMAT` - `json` (default) or `pretty`

use std::net::SocketAddr;

use thiserror::Error;

use branchpos_core::{BASE_CURRENCY, CurrencyCode};
use branchpos_observability::LogFormat;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("invalid environment variable {0}: {1}")]
    InvalidEnvVar(&'static str, String),
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub base_currency: CurrencyCode,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"[REDACTED]")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("use_persistent_stores", &self.use_persistent_stores)
            .field("base_currency", &self.base_currency)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for Config {
    /// Dev settings: in-memory stores and the insecure dev secret.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            use_persistent_stores: false,
            base_currency: BASE_CURRENCY,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process environment
    /// in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = var("BRANCHPOS_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("BRANCHPOS_BIND", e.to_string()))?;

        let is_dev = var("BRANCHPOS_ENV").is_none_or(|env| env.eq_ignore_ascii_case("dev"));
        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None if is_dev => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
            None => return Err(ConfigError::MissingEnvVar("JWT_SECRET")),
        };

        let database_url = var("DATABASE_URL");
        let use_persistent_stores = match var("USE_PERSISTENT_STORES") {
            Some(v) => v
                .parse::<bool>()
                .map_err(|e| ConfigError::InvalidEnvVar("USE_PERSISTENT_STORES", e.to_string()))?,
            None => false,
        };
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DATABASE_URL"));
        }

        let base_currency = match var("BASE_CURRENCY") {
            Some(code) => code
                .parse::<CurrencyCode>()
                .map_err(|e| ConfigError::InvalidEnvVar("BASE_CURRENCY", e.to_string()))?,
            None => BASE_CURRENCY,
        };
        // Ledgers and purchase-order payments settle in a single compiled-in currency.
        if base_currency != BASE_CURRENCY {
            return Err(ConfigError::InvalidEnvVar(
                "BASE_CURRENCY",
                format!("only {BASE_CURRENCY} is supported, got {base_currency}"),
            ));
        }

        let log_format = match var("LOG_FORMAT") {
            Some(v) => v
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::InvalidEnvVar("LOG_FORMAT", e.to_string()))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url,
            use_persistent_stores,
            base_currency,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_dev_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert!(!cfg.use_persistent_stores);
        assert_eq!(cfg.base_currency, BASE_CURRENCY);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn jwt_secret_is_required_outside_dev() {
        let err = load(&[("BRANCHPOS_ENV", "production")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("JWT_SECRET")));

        let cfg = load(&[("BRANCHPOS_ENV", "production"), ("JWT_SECRET", "k3y")]).unwrap();
        assert_eq!(cfg.jwt_secret, "k3y");
    }

    #[test]
    fn persistent_stores_need_a_database() {
        let err = load(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("DATABASE_URL")));

        let cfg = load(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://pos@localhost/pos"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
        assert!(!format!("{cfg:?}").contains("postgres://"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("BRANCHPOS_BIND", "nowhere")]),
            Err(ConfigError::InvalidEnvVar("BRANCHPOS_BIND", _))
        ));
        assert!(matches!(
            load(&[("BASE_CURRENCY", "KES")]),
            Err(ConfigError::InvalidEnvVar("BASE_CURRENCY", _))
        ));
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::InvalidEnvVar("LOG_FORMAT", _))
        ));
        assert_eq!(load(&[("LOG_FORMAT", "pretty")]).unwrap().log_format, LogFormat::Pretty);
    }
}
