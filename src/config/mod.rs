//! Configuration types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::Origin;

/// Names of the three caches kept in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    /// Live resource cache.
    pub content: String,
    /// Holding area filled during install.
    pub temp: String,
    /// Cache holding the last activated manifest.
    pub manifest: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            content: "app-cache".to_string(),
            temp: "app-temp-cache".to_string(),
            manifest: "app-manifest".to_string(),
        }
    }
}

/// Configuration for the cache manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Origin that resource keys are relative to.
    pub origin: String,
    /// Resource keys fetched during install.
    pub core_shell: Vec<String>,
    /// Whether install activates immediately instead of waiting.
    pub skip_waiting: bool,
    /// Cache names.
    pub names: CacheNames,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".to_string(),
            core_shell: [
                "main.dart.js",
                "index.html",
                "flutter_bootstrap.js",
                "assets/AssetManifest.bin.json",
                "assets/FontManifest.json",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            skip_waiting: true,
            names: CacheNames::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the core shell keys.
    #[must_use]
    pub fn with_core_shell<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core_shell = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether install activates immediately.
    #[must_use]
    pub const fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    /// Parses the configured origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not an absolute http(s) URL.
    pub fn origin(&self) -> Result<Origin> {
        Origin::parse(&self.origin)
    }
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Idle connection timeout in seconds.
    pub pool_idle_timeout_secs: u64,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_idle_timeout_secs: 60,
            pool_max_idle_per_host: 8,
            user_agent: concat!("shellcache/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory of the on-disk cache store.
    pub store_dir: PathBuf,
    /// Manifest JSON produced by the build step.
    pub manifest: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            store_dir: data_dir.join("shellcache").join("store"),
            manifest: PathBuf::from("manifest.json"),
        }
    }
}

/// HTTP host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9724,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache manager configuration.
    pub cache: CacheConfig,
    /// HTTP client configuration.
    pub fetch: FetchConfig,
    /// Path configuration.
    pub paths: PathConfig,
    /// HTTP host configuration.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shellcache")
            .join("config.toml")
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("Loaded config from {}", path.display());
                Self::from_toml(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
