//! Runtime configuration from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TIDYOPS_BIND_ADDR` | `0.0.0.0:8080` |
//! | `JWT_SECRET` | insecure dev secret (warns) |
//! | `DATABASE_URL` | unset: in-memory backend |
//! | `ROLE_CACHE_TTL_SECS` | `300` |
//! | `TENANT_CACHE_TTL_SECS` | `300` |
//! | `SESSION_TTL_SECS` | `3600` |
//! | `LOG_FORMAT` | `json` |
//! | `TIDYOPS_OWNER_EMAIL` / `TIDYOPS_OWNER_PASSWORD` | unset: no platform owner bootstrap |

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

use tidyops_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

/// Platform owner account ensured at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerBootstrap {
    pub email: String,
    pub password: String,
}

impl core::fmt::Debug for OwnerBootstrap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OwnerBootstrap")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub role_cache_ttl: Duration,
    pub tenant_cache_ttl: Duration,
    pub session_ttl: chrono::Duration,
    pub log_format: LogFormat,
    pub owner: Option<OwnerBootstrap>,
}

impl core::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("role_cache_ttl", &self.role_cache_ttl)
            .field("tenant_cache_ttl", &self.tenant_cache_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("log_format", &self.log_format)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("TIDYOPS_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("TIDYOPS_BIND_ADDR must be host:port")?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string());

        let log_format = match get("LOG_FORMAT") {
            Some(v) => v.parse::<LogFormat>().context("LOG_FORMAT")?,
            None => LogFormat::default(),
        };

        let owner = match (get("TIDYOPS_OWNER_EMAIL"), get("TIDYOPS_OWNER_PASSWORD")) {
            (Some(email), Some(password)) => Some(OwnerBootstrap { email, password }),
            (None, None) => None,
            _ => anyhow::bail!("TIDYOPS_OWNER_EMAIL and TIDYOPS_OWNER_PASSWORD must be set together"),
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url: get("DATABASE_URL"),
            role_cache_ttl: Duration::from_secs(secs(&get, "ROLE_CACHE_TTL_SECS", 300)?),
            tenant_cache_ttl: Duration::from_secs(secs(&get, "TENANT_CACHE_TTL_SECS", 300)?),
            session_ttl: chrono::Duration::seconds(secs(&get, "SESSION_TTL_SECS", 3600)? as i64),
            log_format,
            owner,
        })
    }

    /// True when tokens are signed with the built-in dev secret. Checked by the
    /// binary once logging is up.
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    /// In-memory configuration for tests and local tooling.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.into(),
            database_url: None,
            role_cache_ttl: Duration::from_secs(300),
            tenant_cache_ttl: Duration::from_secs(300),
            session_ttl: chrono::Duration::hours(1),
            log_format: LogFormat::Pretty,
            owner: None,
        }
    }

    pub fn with_owner(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.owner = Some(OwnerBootstrap {
            email: email.into(),
            password: password.into(),
        });
        self
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> anyhow::Result<u64> {
    match get(key) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds")),
        None => Ok(default),
    }
}
