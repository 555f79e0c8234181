//! Server configuration for `orgsecrets`.
//!
//! Loads configuration from environment variables with defaults. Every
//! setting except the signing secret can be left unset. The configuration
//! is immutable once the server starts.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Minimum length of the token signing secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{name} must be set")]
    Missing { name: &'static str },

    /// A variable is set but unusable.
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// PostgreSQL connection string. In-memory registries when unset.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    pub database_max_connections: u32,
    /// HS256 signing secret for access and refresh tokens.
    pub jwt_secret: String,
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime.
    pub refresh_ttl: Duration,
    /// Secret limit for organizations without an active subscription.
    pub free_tier_limit: i64,
    /// Deadline applied to each secret request's store calls.
    pub request_timeout: Duration,
    /// Budget for each compensating action after a failed write.
    pub compensation_timeout: Duration,
    /// Where secret values are kept.
    pub value_store: ValueStoreBackend,
    /// Seconds between maintenance runs.
    pub maintenance_interval_secs: u64,
    /// Whether the maintenance sweep repairs drift or only reports it.
    pub reconcile_repair: bool,
}

/// Supported value store backends.
#[derive(Clone, PartialEq, Eq)]
pub enum ValueStoreBackend {
    /// In-memory (development only, values lost on restart).
    Memory,
    /// `RocksDB` on local disk.
    RocksDb { path: String },
    /// HashiCorp Vault KV version 2 over HTTP.
    Vault {
        address: String,
        token: String,
        mount: String,
        namespace: Option<String>,
    },
}

impl fmt::Debug for ValueStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::RocksDb { path } => f.debug_struct("RocksDb").field("path", path).finish(),
            Self::Vault {
                address,
                mount,
                namespace,
                ..
            } => f
                .debug_struct("Vault")
                .field("address", address)
                .field("token", &"[redacted]")
                .field("mount", mount)
                .field("namespace", namespace)
                .finish(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &self.database_url.as_ref().map(|_| "[redacted]"))
            .field("database_max_connections", &self.database_max_connections)
            .field("jwt_secret", &"[redacted]")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("free_tier_limit", &self.free_tier_limit)
            .field("request_timeout", &self.request_timeout)
            .field("compensation_timeout", &self.compensation_timeout)
            .field("value_store", &self.value_store)
            .field("maintenance_interval_secs", &self.maintenance_interval_secs)
            .field("reconcile_repair", &self.reconcile_repair)
            .finish()
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn flag(value: Option<String>, default: bool) -> bool {
    value.map_or(default, |v| v == "true" || v == "1")
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `ORGSECRETS_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8080`)
    /// - `ORGSECRETS_LOG_LEVEL`: log filter (default: `info`)
    /// - `DATABASE_URL`: PostgreSQL connection string (in-memory registries when unset)
    /// - `ORGSECRETS_DB_MAX_CONNECTIONS`: pool size (default: `10`)
    /// - `ORGSECRETS_JWT_SECRET`: token signing secret, required, at least 32 bytes
    /// - `ORGSECRETS_ACCESS_TTL_SECS`: access token lifetime (default: `86400`)
    /// - `ORGSECRETS_REFRESH_TTL_SECS`: refresh token lifetime (default: `604800`)
    /// - `ORGSECRETS_FREE_TIER_LIMIT`: secrets without a subscription (default: `5`)
    /// - `ORGSECRETS_REQUEST_TIMEOUT_MS`: store deadline per request (default: `5000`)
    /// - `ORGSECRETS_COMPENSATION_TIMEOUT_MS`: budget per compensating action (default: `5000`)
    /// - `ORGSECRETS_VALUE_STORE`: `memory`, `rocksdb`, or `vault` (default: `memory`)
    /// - `ORGSECRETS_VALUE_STORE_PATH`: `RocksDB` directory (default: `./data`)
    /// - `VAULT_ADDR`, `VAULT_TOKEN`, `VAULT_NAMESPACE`: Vault connection
    /// - `ORGSECRETS_VAULT_MOUNT`: KV v2 mount (default: `secret`)
    /// - `ORGSECRETS_MAINTENANCE_INTERVAL`: seconds between maintenance runs (default: `300`)
    /// - `ORGSECRETS_RECONCILE_REPAIR`: repair drift during maintenance (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing secret is missing or too
    /// short, or if Vault is selected without a token.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Priority: ORGSECRETS_BIND_ADDR > PORT > default 127.0.0.1:8080
        let bind_addr = if let Some(addr) = lookup("ORGSECRETS_BIND_ADDR") {
            addr.parse().map_err(|e| ConfigError::Invalid {
                name: "ORGSECRETS_BIND_ADDR",
                reason: format!("{e}"),
            })?
        } else if let Some(port) = lookup("PORT") {
            SocketAddr::from(([0, 0, 0, 0], parse_or(Some(port), 8080)))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8080))
        };

        let jwt_secret = lookup("ORGSECRETS_JWT_SECRET").ok_or(ConfigError::Missing {
            name: "ORGSECRETS_JWT_SECRET",
        })?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "ORGSECRETS_JWT_SECRET",
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }

        let value_store = match lookup("ORGSECRETS_VALUE_STORE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "rocksdb" => ValueStoreBackend::RocksDb {
                path: lookup("ORGSECRETS_VALUE_STORE_PATH").unwrap_or_else(|| "./data".to_owned()),
            },
            "vault" => ValueStoreBackend::Vault {
                address: lookup("VAULT_ADDR")
                    .unwrap_or_else(|| "http://127.0.0.1:8200".to_owned()),
                token: lookup("VAULT_TOKEN").ok_or(ConfigError::Missing {
                    name: "VAULT_TOKEN",
                })?,
                mount: lookup("ORGSECRETS_VAULT_MOUNT").unwrap_or_else(|| "secret".to_owned()),
                namespace: lookup("VAULT_NAMESPACE"),
            },
            _ => ValueStoreBackend::Memory,
        };

        Ok(Self {
            bind_addr,
            log_level: lookup("ORGSECRETS_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            database_url: lookup("DATABASE_URL"),
            database_max_connections: parse_or(lookup("ORGSECRETS_DB_MAX_CONNECTIONS"), 10),
            jwt_secret,
            access_ttl: Duration::from_secs(parse_or(lookup("ORGSECRETS_ACCESS_TTL_SECS"), 86_400)),
            refresh_ttl: Duration::from_secs(parse_or(
                lookup("ORGSECRETS_REFRESH_TTL_SECS"),
                604_800,
            )),
            free_tier_limit: parse_or(
                lookup("ORGSECRETS_FREE_TIER_LIMIT"),
                orgsecrets_core::quota::DEFAULT_FREE_TIER_LIMIT,
            ),
            request_timeout: Duration::from_millis(parse_or(
                lookup("ORGSECRETS_REQUEST_TIMEOUT_MS"),
                5_000,
            )),
            compensation_timeout: Duration::from_millis(parse_or(
                lookup("ORGSECRETS_COMPENSATION_TIMEOUT_MS"),
                5_000,
            )),
            value_store,
            maintenance_interval_secs: parse_or(lookup("ORGSECRETS_MAINTENANCE_INTERVAL"), 300),
            reconcile_repair: flag(lookup("ORGSECRETS_RECONCILE_REPAIR"), false),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("ORGSECRETS_JWT_SECRET", SECRET)]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.free_tier_limit, 5);
        assert_eq!(config.value_store, ValueStoreBackend::Memory);
        assert_eq!(config.access_ttl, Duration::from_secs(86_400));
        assert!(config.database_url.is_none());
        assert!(!config.reconcile_repair);
    }

    #[test]
    fn secret_is_required_and_long_enough() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing { .. })));
        assert!(matches!(
            load(&[("ORGSECRETS_JWT_SECRET", "short")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn bind_addr_beats_port() {
        let config = load(&[
            ("ORGSECRETS_JWT_SECRET", SECRET),
            ("PORT", "9000"),
            ("ORGSECRETS_BIND_ADDR", "127.0.0.1:7000"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 7000);

        let config = load(&[("ORGSECRETS_JWT_SECRET", SECRET), ("PORT", "9000")]).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));
    }

    #[test]
    fn vault_needs_token_and_redacts_it() {
        assert!(matches!(
            load(&[("ORGSECRETS_JWT_SECRET", SECRET), ("ORGSECRETS_VALUE_STORE", "vault")]),
            Err(ConfigError::Missing { name: "VAULT_TOKEN" })
        ));

        let config = load(&[
            ("ORGSECRETS_JWT_SECRET", SECRET),
            ("ORGSECRETS_VALUE_STORE", "vault"),
            ("VAULT_TOKEN", "hvs.very-secret"),
        ])
        .unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("hvs.very-secret"));
        assert!(!printed.contains(SECRET));
    }
}
