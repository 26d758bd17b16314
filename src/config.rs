//! Environment-driven runtime configuration.

use secrecy::SecretString;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::app::WorkerConfig;
use crate::domain::ConfigError;
use crate::infra::{PostgresConfig, RpcClientConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                key: "LOG_FORMAT".to_string(),
                message: format!("expected 'pretty' or 'json', got '{other}'"),
            }),
        }
    }
}

/// Which pass lease guards the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaseKind {
    #[default]
    Local,
    Postgres,
}

impl FromStr for LeaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(LeaseKind::Local),
            "postgres" | "advisory" => Ok(LeaseKind::Postgres),
            other => Err(ConfigError::InvalidValue {
                key: "RECONCILE_LEASE".to_string(),
                message: format!("expected 'local' or 'postgres', got '{other}'"),
            }),
        }
    }
}

/// Everything `main` needs to wire the service.
#[derive(Debug)]
pub struct AppConfig {
    pub database_url: SecretString,
    pub redis_url: SecretString,
    pub rpc_url: SecretString,
    pub server_addr: SocketAddr,
    pub log_format: LogFormat,
    pub lease: LeaseKind,
    pub run_migrations: bool,
    pub worker: WorkerConfig,
    pub postgres: PostgresConfig,
    pub rpc: RpcClientConfig,
}

impl AppConfig {
    /// Reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for missing required settings or unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database_url = match env.get("DATABASE_URL") {
            Some(url) => url,
            None => compose_postgres_url(&env)?,
        };
        let redis_url = match env.get("REDIS_URL") {
            Some(url) => url,
            None => compose_redis_url(&env)?,
        };
        let rpc_url = env.require("RPC_URL")?;

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            interval: Duration::from_secs(
                env.parse_or("RECONCILE_INTERVAL_SECS", worker_defaults.interval.as_secs())?,
            ),
            enabled: env.parse_bool_or("RECONCILER_ENABLED", worker_defaults.enabled)?,
        };
        if worker.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "RECONCILE_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let postgres = PostgresConfig {
            max_connections: env.parse_or(
                "DATABASE_MAX_CONNECTIONS",
                PostgresConfig::default().max_connections,
            )?,
            ..PostgresConfig::default()
        };

        let rpc_defaults = RpcClientConfig::default();
        let rpc = RpcClientConfig {
            timeout: Duration::from_secs(
                env.parse_or("RPC_TIMEOUT_SECS", rpc_defaults.timeout.as_secs())?,
            ),
            max_retries: env.parse_or("RPC_MAX_RETRIES", rpc_defaults.max_retries)?,
            ..rpc_defaults
        };

        Ok(Self {
            database_url: SecretString::from(database_url),
            redis_url: SecretString::from(redis_url),
            rpc_url: SecretString::from(rpc_url),
            server_addr: env.parse_or(
                "SERVER_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 3000)),
            )?,
            log_format: env.parse_or("LOG_FORMAT", LogFormat::default())?,
            lease: env.parse_or("RECONCILE_LEASE", LeaseKind::default())?,
            run_migrations: env.parse_bool_or("RUN_MIGRATIONS", true)?,
            worker,
            postgres,
            rpc,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank values both count as absent.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn parse_bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected a boolean, got '{v}'"),
                }),
            },
        }
    }
}

fn compose_postgres_url<F>(env: &Env<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = env.get("POSTGRES_HOST").ok_or_else(|| {
        ConfigError::MissingEnvVar("DATABASE_URL or POSTGRES_HOST".to_string())
    })?;
    let port: u16 = env.parse_or("POSTGRES_PORT", 5432)?;
    let user = env.require("POSTGRES_USERNAME")?;
    let password = env.get_or("POSTGRES_PASSWORD", "");
    let database = env.require("POSTGRES_DB")?;
    let ssl_mode = env.get_or("POSTGRES_SSL_MODE", "disable");

    Ok(format!(
        "postgresql://{user}:{password}@{host}:{port}/{database}?sslmode={ssl_mode}"
    ))
}

fn compose_redis_url<F>(env: &Env<F>) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = env
        .get("REDIS_HOST")
        .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;
    let port: u16 = env.parse_or("REDIS_PORT", 6379)?;
    let db: u32 = env.parse_or("REDIS_DB", 0)?;

    Ok(match env.get("REDIS_PASSWORD") {
        Some(password) => format!("redis://:{password}@{host}:{port}/{db}"),
        None => format!("redis://{host}:{port}/{db}"),
    })
}
