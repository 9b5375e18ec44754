use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, layered from defaults, an optional TOML file,
/// then environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub scoring: ScoringThresholds,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_http_port() -> u16 {
    8080
}

fn default_health_port() -> u16 {
    8081
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            health_port: default_health_port(),
        }
    }
}

/// Clock-skew tolerance for `occurred_at`: events reported too far in the
/// past or future are rejected rather than trusted verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_skew_past_days")]
    pub clock_skew_past_days: i64,
    #[serde(default = "default_skew_future_minutes")]
    pub clock_skew_future_minutes: i64,
}

fn default_skew_past_days() -> i64 {
    7
}

fn default_skew_future_minutes() -> i64 {
    60
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            clock_skew_past_days: default_skew_past_days(),
            clock_skew_future_minutes: default_skew_future_minutes(),
        }
    }
}

/// Routing thresholds: minimum score/intent confidence a lead must clear
/// before the routing worker assigns it to a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_route_min_score")]
    pub route_min_score: i32,
    #[serde(default = "default_route_min_intent")]
    pub route_min_intent: i32,
    #[serde(default = "default_conflict_margin")]
    pub conflict_margin: i32,
    /// Per-intent pipeline slug mapping, overridable.
    #[serde(default = "default_pipeline_map")]
    pub pipeline_by_intent: std::collections::HashMap<String, String>,
}

fn default_route_min_score() -> i32 {
    40
}

fn default_route_min_intent() -> i32 {
    60
}

fn default_conflict_margin() -> i32 {
    10
}

fn default_pipeline_map() -> std::collections::HashMap<String, String> {
    std::collections::HashMap::from([
        ("research".to_string(), "research-lab".to_string()),
        ("b2b".to_string(), "b2b-lab-enablement".to_string()),
        ("co_creation".to_string(), "panel-co-creation".to_string()),
    ])
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_min_score: default_route_min_score(),
            route_min_intent: default_route_min_intent(),
            conflict_margin: default_conflict_margin(),
            pipeline_by_intent: default_pipeline_map(),
        }
    }
}

/// Score-tier cutoffs used for threshold-crossing notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringThresholds {
    #[serde(default = "default_warm")]
    pub warm: i32,
    #[serde(default = "default_hot")]
    pub hot: i32,
    #[serde(default = "default_very_hot")]
    pub very_hot: i32,
}

fn default_warm() -> i32 {
    20
}
fn default_hot() -> i32 {
    50
}
fn default_very_hot() -> i32 {
    80
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            warm: default_warm(),
            hot: default_hot(),
            very_hot: default_very_hot(),
        }
    }
}

/// Per-queue concurrency, rate limit, and retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub events: QueueWorkerConfig,
    #[serde(default = "routing_defaults")]
    pub routing: QueueWorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn routing_defaults() -> QueueWorkerConfig {
    QueueWorkerConfig {
        concurrency: 3,
        rate_limit_max: 50,
        rate_limit_duration_secs: 1,
        job_timeout_secs: 120,
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            events: QueueWorkerConfig::default(),
            routing: routing_defaults(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueWorkerConfig {
    #[serde(default = "default_event_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_duration")]
    pub rate_limit_duration_secs: u64,
    #[serde(default = "default_event_timeout")]
    pub job_timeout_secs: u64,
}

fn default_event_concurrency() -> usize {
    10
}
fn default_rate_limit_max() -> u32 {
    100
}
fn default_rate_limit_duration() -> u64 {
    1
}
fn default_event_timeout() -> u64 {
    60
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_event_concurrency(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_duration_secs: default_rate_limit_duration(),
            job_timeout_secs: default_event_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

fn default_max_attempts() -> i32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    1
}
fn default_backoff_cap_secs() -> u64 {
    300
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-source HMAC secrets and API keys.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub hmac_secrets: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub api_keys: std::collections::HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from files and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load from either a config directory or a single TOML file, then
    /// layer environment variables on top (`LEADFLOW_DATABASE__URL`, etc).
    /// Precedence, lowest to highest: built-in defaults, file, environment.
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_path = config_dir.as_ref();

        let mut builder = Config::builder()
            .set_default("database.max_connections", 5)?
            .set_default("server.http_port", 8080)?
            .set_default("server.health_port", 8081)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::from(config_path.join("default.toml")).required(false))
                .add_source(
                    File::from(config_path.join(
                        std::env::var("LEADFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                    ))
                    .required(false),
                );
        }

        builder = builder.add_source(
            Environment::with_prefix("LEADFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_defaults_match_documented_values() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.route_min_score, 40);
        assert_eq!(routing.route_min_intent, 60);
        assert_eq!(routing.conflict_margin, 10);
        assert_eq!(
            routing.pipeline_by_intent.get("b2b").map(String::as_str),
            Some("b2b-lab-enablement")
        );
    }

    #[test]
    fn retry_policy_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff_base_secs, 1);
        assert_eq!(retry.backoff_cap_secs, 300);
    }
}
