use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::workflows::preload::CHROMIUM_PRELOAD_LIST_URL;

const DEFAULT_DATABASE_PATH: &str = "hstspreload.sqlite3";
const DEFAULT_CACHE_SECONDS: u64 = 60;
const DEFAULT_SERVICE_URL: &str = "https://hstspreload.org/api/v2";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the registry service and the list tool.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub tool: ToolConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_path = env::var("PRELOAD_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH));

        let cache_duration = match env::var("PRELOAD_CACHE_SECONDS") {
            Ok(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidCacheDuration { value })?,
            Err(_) => Duration::from_secs(DEFAULT_CACHE_SECONDS),
        };

        let preload_list_url = env::var("PRELOAD_LIST_URL")
            .unwrap_or_else(|_| CHROMIUM_PRELOAD_LIST_URL.to_string());

        let debug_endpoints = match env::var("PRELOAD_DEBUG_ENDPOINTS") {
            Ok(value) => parse_flag("PRELOAD_DEBUG_ENDPOINTS", &value)?,
            Err(_) => false,
        };

        let service_url = env::var("PRELOAD_SERVICE_URL")
            .unwrap_or_else(|_| DEFAULT_SERVICE_URL.to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            store: StoreConfig {
                database_path,
                in_memory: false,
            },
            registry: RegistryConfig {
                cache_duration,
                preload_list_url,
                debug_endpoints,
            },
            tool: ToolConfig { service_url },
        })
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where domain states are persisted.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Keep everything in a throwaway in-memory database.
    pub in_memory: bool,
}

/// Behavior of the registry core.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Zero disables read caching entirely.
    pub cache_duration: Duration,
    pub preload_list_url: String,
    pub debug_endpoints: bool,
}

/// Settings for the offline pending-changes tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub service_url: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidCacheDuration { value: String },
    InvalidFlag { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidCacheDuration { value } => write!(
                f,
                "PRELOAD_CACHE_SECONDS must be a whole number of seconds, got '{value}'"
            ),
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be a boolean flag, got '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidCacheDuration { .. }
            | ConfigError::InvalidFlag { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "PRELOAD_DATABASE_PATH",
            "PRELOAD_CACHE_SECONDS",
            "PRELOAD_LIST_URL",
            "PRELOAD_DEBUG_ENDPOINTS",
            "PRELOAD_SERVICE_URL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(
            config.store.database_path,
            PathBuf::from("hstspreload.sqlite3")
        );
        assert!(!config.store.in_memory);
        assert_eq!(config.registry.cache_duration, Duration::from_secs(60));
        assert_eq!(config.registry.preload_list_url, CHROMIUM_PRELOAD_LIST_URL);
        assert!(!config.registry.debug_endpoints);
        assert_eq!(config.tool.service_url, "https://hstspreload.org/api/v2");
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 8080));
    }

    #[test]
    fn zero_cache_seconds_disables_caching() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PRELOAD_CACHE_SECONDS", "0");
        env::set_var("PRELOAD_DEBUG_ENDPOINTS", "true");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.registry.cache_duration, Duration::ZERO);
        assert!(config.registry.debug_endpoints);
        reset_env();
    }

    #[test]
    fn rejects_malformed_cache_duration() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PRELOAD_CACHE_SECONDS", "soon");
        match AppConfig::load() {
            Err(ConfigError::InvalidCacheDuration { value }) => assert_eq!(value, "soon"),
            other => panic!("expected cache duration error, got {other:?}"),
        }
        reset_env();
    }

    #[test]
    fn rejects_unknown_flag_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("PRELOAD_DEBUG_ENDPOINTS", "sometimes");
        match AppConfig::load() {
            Err(ConfigError::InvalidFlag { name, .. }) => {
                assert_eq!(name, "PRELOAD_DEBUG_ENDPOINTS")
            }
            other => panic!("expected flag error, got {other:?}"),
        }
        reset_env();
    }
}
