//! Runtime configuration loaded from `HUBBLE_*` environment variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::defaults;
use crate::error::{Error, Result};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(Error::Config(format!("unknown environment: {other}"))),
        }
    }
}

/// Backing driver for the key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvDriver {
    Postgres,
    Redis,
    Memory,
}

impl FromStr for KvDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(KvDriver::Postgres),
            "redis" => Ok(KvDriver::Redis),
            "memory" => Ok(KvDriver::Memory),
            other => Err(Error::Config(format!("unknown kv driver: {other}"))),
        }
    }
}

/// How semantic search results are cut off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Score,
    Threshold,
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "score" => Ok(SearchMode::Score),
            "threshold" => Ok(SearchMode::Threshold),
            other => Err(Error::Config(format!("unknown search mode: {other}"))),
        }
    }
}

/// A versioned TOTP encryption key, written as `v<version>_<secret>`.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpKey {
    pub version: i16,
    pub secret: String,
}

impl fmt::Debug for TotpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpKey")
            .field("version", &self.version)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Parse one `v<positive-int>_<secret>` TOTP key.
pub fn parse_totp_key(raw: &str) -> Result<TotpKey> {
    let raw = raw.trim();
    let format_err =
        || Error::Config("TOTP secret key is not in the correct format, expected 'v1_xxxxx'".into());

    let (version, secret) = raw.split_once('_').ok_or_else(format_err)?;
    let digits = version.strip_prefix('v').ok_or_else(format_err)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Config(
            "failed to parse TOTP secret version, expected a valid integer".into(),
        ));
    }
    let version: i16 = digits.parse().map_err(|_| {
        Error::Config("failed to parse TOTP secret version, expected a valid integer".into())
    })?;
    if version <= 0 {
        return Err(Error::Config(
            "TOTP secret version must be a positive integer".into(),
        ));
    }
    if secret.chars().count() < defaults::TOTP_SECRET_MIN_LEN {
        return Err(Error::Config(format!(
            "TOTP secret key is too short, expected at least {} characters",
            defaults::TOTP_SECRET_MIN_LEN
        )));
    }

    Ok(TotpKey {
        version,
        secret: secret.to_string(),
    })
}

/// Parse a comma-separated TOTP key list, rejecting empty items and
/// duplicate versions.
pub fn parse_totp_keys(raw: &str) -> Result<BTreeMap<i16, TotpKey>> {
    if raw.trim().is_empty() {
        return Err(Error::Config(
            "TOTP secrets are not set, set HUBBLE_KEY_TOTP_SECRETS (e.g. 'v1_xxxx,v2_xxxx')"
                .into(),
        ));
    }

    let mut keys = BTreeMap::new();
    for item in raw.split(',') {
        if item.trim().is_empty() {
            return Err(Error::Config("empty TOTP secret key in list".into()));
        }
        let key = parse_totp_key(item)?;
        if keys.contains_key(&key.version) {
            return Err(Error::Config(format!(
                "TOTP secret key for version {} is already set",
                key.version
            )));
        }
        keys.insert(key.version, key);
    }
    Ok(keys)
}

#[derive(Clone, Default)]
pub struct KeyConfig {
    pub cookie_secret: String,
    pub totp_secrets: String,
}

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(defaults::DB_CONNECT_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Default)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
}

#[derive(Clone, Default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub mode: SearchMode,
    pub threshold: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub debug: bool,
    pub open_telemetry: bool,
    pub email_services: bool,
}

/// Process configuration.
#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub postgres_dsn: String,
    pub database: DatabaseConfig,
    pub kv_driver: KvDriver,
    pub redis_url: String,
    pub keys: KeyConfig,
    pub minio: MinioConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub plugins_dir: PathBuf,
    pub flags: Flags,
    totp_keys: BTreeMap<i16, TotpKey>,
}

impl Config {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("HUBBLE_{name}")).unwrap_or_default();
        let var_or = |name: &str, default: &str| {
            lookup(&format!("HUBBLE_{name}"))
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let flag = |name: &str| matches!(var(name).to_ascii_lowercase().as_str(), "1" | "true" | "yes");

        let port = var_or("PORT", &defaults::SERVER_PORT.to_string())
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("invalid HUBBLE_PORT: {e}")))?;
        let threshold = var_or("SEARCH_THRESHOLD", &defaults::SEARCH_THRESHOLD.to_string())
            .parse::<i64>()
            .map_err(|e| Error::Config(format!("invalid HUBBLE_SEARCH_THRESHOLD: {e}")))?;
        if !(0..=100).contains(&threshold) {
            return Err(Error::Config(format!(
                "search threshold must be between 0 and 100, got {threshold}"
            )));
        }

        let max_connections = var_or("DB_MAX_CONNECTIONS", &defaults::DB_MAX_CONNECTIONS.to_string())
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                Error::Config("HUBBLE_DB_MAX_CONNECTIONS must be a positive integer".into())
            })?;
        let connect_timeout_secs =
            var_or("DB_CONNECT_TIMEOUT_SECS", &defaults::DB_CONNECT_TIMEOUT_SECS.to_string())
                .parse::<u64>()
                .map_err(|e| Error::Config(format!("invalid HUBBLE_DB_CONNECT_TIMEOUT_SECS: {e}")))?;

        let mut config = Config {
            environment: var_or("ENVIRONMENT", "development").parse()?,
            port,
            postgres_dsn: var("POSTGRES_DSN"),
            database: DatabaseConfig {
                max_connections,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
            },
            kv_driver: var_or("DRIVER_KV", "postgres").parse()?,
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            keys: KeyConfig {
                cookie_secret: var("KEY_COOKIE_SECRET"),
                totp_secrets: var("KEY_TOTP_SECRETS"),
            },
            minio: MinioConfig {
                endpoint: var("MINIO_ENDPOINT"),
                access_key: var("MINIO_ACCESS_KEY"),
                secret_key: var("MINIO_SECRET_KEY"),
                use_ssl: flag("MINIO_USE_SSL"),
                region: var_or("MINIO_REGION", "us-east-1"),
            },
            llm: LlmConfig {
                base_url: var("LLM_BASE_URL"),
                api_key: var("LLM_API_KEY"),
                embedding_model: var("LLM_EMBEDDING_MODEL"),
            },
            search: SearchConfig {
                mode: var_or("SEARCH_MODE", "threshold").parse()?,
                threshold: threshold as u8,
            },
            plugins_dir: PathBuf::from(var_or("PLUGINS_DIR", defaults::PLUGINS_DIR)),
            flags: Flags {
                debug: flag("FLAGS_DEBUG"),
                open_telemetry: flag("FLAGS_OPEN_TELEMETRY"),
                email_services: flag("FLAGS_EMAIL_SERVICES"),
            },
            totp_keys: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check required keys and parse the TOTP key list.
    pub fn validate(&mut self) -> Result<()> {
        if self.keys.cookie_secret.trim().is_empty() {
            return Err(Error::Config(
                "cookie secret key is not set, set this as HUBBLE_KEY_COOKIE_SECRET".into(),
            ));
        }
        self.totp_keys = parse_totp_keys(&self.keys.totp_secrets)?;
        Ok(())
    }

    /// Embeddings run only when both the LLM base URL and model are set.
    pub fn embeddings_enabled(&self) -> bool {
        !self.llm.base_url.trim().is_empty() && !self.llm.embedding_model.trim().is_empty()
    }

    pub fn totp_keys(&self) -> impl Iterator<Item = &TotpKey> {
        self.totp_keys.values()
    }

    pub fn totp_key(&self, version: i16) -> Option<&TotpKey> {
        self.totp_keys.get(&version)
    }

    /// The highest-versioned key; every new secret is sealed with it.
    pub fn latest_totp_key(&self) -> Option<&TotpKey> {
        self.totp_keys.values().next_back()
    }

    pub fn in_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("kv_driver", &self.kv_driver)
            .field("minio_endpoint", &self.minio.endpoint)
            .field("llm_base_url", &self.llm.base_url)
            .field("llm_embedding_model", &self.llm.embedding_model)
            .field("search", &self.search)
            .field("plugins_dir", &self.plugins_dir)
            .field("flags", &self.flags)
            .field("totp_versions", &self.totp_keys.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
