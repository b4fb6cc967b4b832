//! Proxy configuration loaded from TOML.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! health_listen = "0.0.0.0:8081"
//!
//! [sticky]
//! cookie_name = "sticky"
//! http_only = true
//! same_site = "lax"
//!
//! [[backends]]
//! url = "http://10.0.0.1:8080"
//! weight = 2
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

use crate::affinity::{AffinityError, CookieOptions, SameSite, StickySession};
use crate::proxy::HealthTracker;
use crate::store::{Backend, BackendPool};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid backend url '{url}': {source}")]
    BackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot resolve backend '{url}': {source}")]
    BackendAddress {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid sticky.expires '{value}': {source}")]
    Expires {
        value: String,
        #[source]
        source: time::error::Parse,
    },

    #[error(transparent)]
    Sticky(#[from] AffinityError),
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    pub listen: String,
    /// Address of the health probe server.
    pub health_listen: SocketAddr,
    /// Consecutive connect failures before a backend is skipped.
    pub failure_threshold: u32,
    pub sticky: StickyConfig,
    pub backends: Vec<BackendConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            health_listen: SocketAddr::from(([0, 0, 0, 0], 8081)),
            failure_threshold: 3,
            sticky: StickyConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Returns the configured backends in order.
    ///
    /// Hostnames are resolved here, once, so the request path never waits on
    /// DNS.
    pub fn backends(&self) -> Result<Vec<Backend>, ConfigError> {
        self.backends.iter().map(BackendConfig::to_backend).collect()
    }

    /// Builds the sticky session described by the `[sticky]` section.
    pub fn sticky_session(&self) -> Result<StickySession, ConfigError> {
        let options = self.sticky.to_options()?;
        Ok(StickySession::with_options(
            self.sticky.cookie_name.clone(),
            options,
        )?)
    }
}

/// SameSite policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// The `[sticky]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StickyConfig {
    pub cookie_name: String,
    pub http_only: bool,
    pub secure: bool,
    pub path: Option<String>,
    pub domain: Option<String>,
    /// RFC 3339 timestamp.
    pub expires: Option<String>,
    pub max_age: i64,
    pub same_site: Option<SameSitePolicy>,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sticky".to_string(),
            http_only: false,
            secure: false,
            path: None,
            domain: None,
            expires: None,
            max_age: 0,
            same_site: None,
        }
    }
}

impl StickyConfig {
    /// Converts the section into cookie attributes.
    pub fn to_options(&self) -> Result<CookieOptions, ConfigError> {
        let expires = self
            .expires
            .as_deref()
            .map(|value| {
                OffsetDateTime::parse(value, &Rfc3339).map_err(|source| ConfigError::Expires {
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()?;

        Ok(CookieOptions {
            http_only: self.http_only,
            secure: self.secure,
            path: self.path.clone(),
            domain: self.domain.clone(),
            expires,
            max_age: self.max_age,
            same_site: self.same_site.map(SameSite::from),
        })
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    pub fn to_backend(&self) -> Result<Backend, ConfigError> {
        let url = Url::parse(&self.url).map_err(|source| ConfigError::BackendUrl {
            url: self.url.clone(),
            source,
        })?;
        Backend::resolve(url, self.weight).map_err(|source| ConfigError::BackendAddress {
            url: self.url.clone(),
            source,
        })
    }
}

/// Re-reads `[[backends]]` from `path` and applies it to the pool.
///
/// Backends that left the pool are forgotten by the health tracker. On error
/// the pool is left unchanged. Returns the pool version afterwards.
pub fn reload_backends(
    path: &Path,
    pool: &BackendPool,
    health: &HealthTracker,
) -> Result<u64, ConfigError> {
    let backends = ProxyConfig::load(path)?.backends()?;
    for stale in pool.sync(backends) {
        health.reset(&stale.url);
    }
    Ok(pool.version())
}
