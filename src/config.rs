use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::ProviderKind;
use crate::providers::health::CircuitBreakerConfig;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.host") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Answer chat and embedding calls with fixed fallback content instead
    /// of contacting any provider. Skips credit checks and usage records.
    #[serde(default)]
    pub low_cost_mode: bool,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Connection settings for one backend. A section that is absent means the
/// backend is not configured.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEndpoint {
    /// Base URL including the API version prefix (e.g. `.../v1`). Falls back
    /// to the adapter's public default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_provider_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl ProviderEndpoint {
    /// The API key, unless it is unset, blank or an obvious placeholder.
    pub fn usable_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !is_placeholder_key(k))
    }
}

/// Whether `key` is a template value rather than a real credential.
pub fn is_placeholder_key(key: &str) -> bool {
    let k = key.trim().to_ascii_lowercase();
    k.is_empty()
        || matches!(
            k.as_str(),
            "changeme" | "change-me" | "your-api-key" | "your_api_key" | "none" | "null"
        )
        || is_masked(&k)
        || k.ends_with("...")
        || (k.starts_with('<') && k.ends_with('>'))
}

/// `xxxx`, `sk-xxxx`, `sk-proj-xxxx`: the last segment is nothing but x's.
fn is_masked(key: &str) -> bool {
    let tail = key.rsplit(['-', '_']).next().unwrap_or(key);
    tail.len() >= 3 && tail.bytes().all(|b| b == b'x')
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<ProviderEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<ProviderEndpoint>,
    /// Provider that embedding requests try first.
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: ProviderKind,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            relay: None,
            direct: None,
            budget: None,
            local: None,
            embedding_provider: default_embedding_provider(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: &CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig {
            failure_threshold: s.failure_threshold.max(1),
            cooldown: Duration::from_secs(s.cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsageConfig {
    /// Records kept in memory for `/admin/usage`.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Retry a failed non-streaming call on the next eligible provider.
    #[serde(default)]
    pub failover: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_port() -> u16 {
    8400
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("aigate.db")
}
const fn default_provider_timeout() -> u64 {
    120
}
const fn default_max_tokens() -> u32 {
    1024
}
const fn default_temperature() -> f32 {
    0.7
}
const fn default_embedding_provider() -> ProviderKind {
    ProviderKind::Direct
}
const fn default_failure_threshold() -> u32 {
    3
}
const fn default_cooldown_secs() -> u64 {
    60
}
const fn default_ring_capacity() -> usize {
    1000
}
const fn default_batch_size() -> usize {
    100
}
const fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `AIGATE_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.usage.flush_interval_ms.max(1))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Every supported setting has a corresponding `AIGATE_*` env var. Setting
    /// a provider's base URL or key creates that provider's section when the
    /// file has none.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.trim().parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- Top level --
        env_bool!("low_cost_mode", "AIGATE_LOW_COST_MODE", self.low_cost_mode);

        // -- Server --
        env_str!("server.host", "AIGATE_SERVER_HOST", self.server.host);
        env_parse!("server.port", "AIGATE_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("AIGATE_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "AIGATE_SERVER_CORS_ORIGINS");
        }

        // -- Database --
        if let Ok(val) = std::env::var("AIGATE_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
            ov.record("database.path", "AIGATE_DATABASE_PATH");
        }

        // -- Providers --
        let providers = &mut self.providers;
        for (name, slot) in [
            ("relay", &mut providers.relay),
            ("direct", &mut providers.direct),
            ("budget", &mut providers.budget),
            ("local", &mut providers.local),
        ] {
            let upper = name.to_ascii_uppercase();
            for (field, var) in [
                ("base_url", format!("AIGATE_{upper}_BASE_URL")),
                ("api_key", format!("AIGATE_{upper}_API_KEY")),
            ] {
                let Ok(val) = std::env::var(&var) else {
                    continue;
                };
                let val = Some(val).filter(|v| !v.trim().is_empty());
                let endpoint = slot.get_or_insert_with(ProviderEndpoint::default);
                if field == "base_url" {
                    endpoint.base_url = val;
                } else {
                    endpoint.api_key = val;
                }
                ov.record(&format!("providers.{name}.{field}"), &var);
            }
        }
        env_parse!(
            "providers.embedding_provider",
            "AIGATE_EMBEDDING_PROVIDER",
            self.providers.embedding_provider
        );

        // -- Circuit breaker --
        env_parse!(
            "circuit_breaker.failure_threshold",
            "AIGATE_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
            self.circuit_breaker.failure_threshold
        );
        env_parse!(
            "circuit_breaker.cooldown_secs",
            "AIGATE_CIRCUIT_BREAKER_COOLDOWN_SECS",
            self.circuit_breaker.cooldown_secs
        );

        // -- Usage --
        env_parse!("usage.ring_capacity", "AIGATE_USAGE_RING_CAPACITY", self.usage.ring_capacity);
        env_parse!("usage.batch_size", "AIGATE_USAGE_BATCH_SIZE", self.usage.batch_size);
        env_parse!(
            "usage.flush_interval_ms",
            "AIGATE_USAGE_FLUSH_INTERVAL_MS",
            self.usage.flush_interval_ms
        );

        // -- Routing --
        env_bool!("routing.failover", "AIGATE_ROUTING_FAILOVER", self.routing.failover);

        // -- Logging --
        env_str!("logging.level", "AIGATE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "AIGATE_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
