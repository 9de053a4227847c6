use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::pipeline::analytics::DEFAULT_MIN_BOTTLENECK_SCORE;
use crate::pipeline::permission::UnassignedStagePolicy;

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

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let fallback_policy = match env::var("APP_STAGE_FALLBACK_POLICY") {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "open" => UnassignedStagePolicy::OpenToCompany,
                "deny" => UnassignedStagePolicy::Deny,
                _ => return Err(ConfigError::InvalidStagePolicy { value: raw }),
            },
            Err(_) => UnassignedStagePolicy::default(),
        };

        let min_bottleneck_score = match env::var("APP_MIN_BOTTLENECK_SCORE") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|score| (0.0..=100.0).contains(score))
                .ok_or(ConfigError::InvalidBottleneckScore { value: raw })?,
            Err(_) => DEFAULT_MIN_BOTTLENECK_SCORE,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            pipeline: PipelineConfig {
                unassigned_stage_policy: fallback_policy,
                min_bottleneck_score,
            },
        })
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

/// Engine policy knobs surfaced through the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub unassigned_stage_policy: UnassignedStagePolicy,
    pub min_bottleneck_score: f64,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidStagePolicy { value: String },
    InvalidBottleneckScore { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidStagePolicy { value } => {
                write!(
                    f,
                    "APP_STAGE_FALLBACK_POLICY must be 'open' or 'deny', got '{value}'"
                )
            }
            ConfigError::InvalidBottleneckScore { value } => {
                write!(
                    f,
                    "APP_MIN_BOTTLENECK_SCORE must be a number in 0..=100, got '{value}'"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
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
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("APP_STAGE_FALLBACK_POLICY");
        env::remove_var("APP_MIN_BOTTLENECK_SCORE");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(
            config.pipeline.unassigned_stage_policy,
            UnassignedStagePolicy::OpenToCompany
        );
        assert_eq!(
            config.pipeline.min_bottleneck_score,
            DEFAULT_MIN_BOTTLENECK_SCORE
        );
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn parses_deny_stage_policy() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_STAGE_FALLBACK_POLICY", "deny");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.pipeline.unassigned_stage_policy,
            UnassignedStagePolicy::Deny
        );
    }

    #[test]
    fn rejects_unknown_stage_policy() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_STAGE_FALLBACK_POLICY", "whatever");
        match AppConfig::load() {
            Err(ConfigError::InvalidStagePolicy { value }) => assert_eq!(value, "whatever"),
            other => panic!("expected invalid stage policy error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_bottleneck_score() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_MIN_BOTTLENECK_SCORE", "140");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidBottleneckScore { .. })
        ));
    }
}
