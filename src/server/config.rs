//! Configuration loading for munind.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.munin/config.toml` (user)
//! 3. `/etc/munin/config.toml` (system)
//! 4. built-in defaults (the service is fully usable from env vars alone)
//!
//! Environment variables override file values:
//! `MAX_ARTICLE_LENGTH`, `MAX_TOKENS_PER_REQUEST`,
//! `API_RATE_LIMIT_MAX_REQUESTS`, `API_RATE_LIMIT_WINDOW_MS`,
//! `API_CACHE_TTL` (seconds), `ENABLE_USAGE_ANALYTICS`, and `MUNIN_ENV`
//! (`production` | `development`, selects the prompt-registry profile).
//!
//! The API key is a secret, loaded separately with permission checks:
//! 1. `~/.munin/secrets.toml` (user, must be 0600)
//! 2. `/etc/munin/secrets.toml` (system, must be 0600)
//! 3. `ANTHROPIC_API_KEY` environment variable

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::RepairPolicy;
use crate::prompts::Profile;
use crate::{MuninError, Result};

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub analytics: AnalyticsSection,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8787).
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8787".to_string()
}

/// Analysis behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Model id requests are sent to.
    #[serde(default = "default_model")]
    pub model: String,
    /// Maximum accepted article length in characters (default: 30,000).
    #[serde(default = "default_max_article_length")]
    pub max_article_length: usize,
    /// Hard cap on the output-token budget (default: 8192).
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: u32,
    /// Output repair policy (default: lenient).
    #[serde(default)]
    pub repair_policy: RepairPolicy,
    /// Registry profile (default: production; `MUNIN_ENV` overrides).
    #[serde(default, deserialize_with = "deserialize_profile")]
    pub profile: Profile,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_article_length: default_max_article_length(),
            max_tokens_per_request: default_max_tokens(),
            repair_policy: RepairPolicy::default(),
            profile: Profile::default(),
        }
    }
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_max_article_length() -> usize {
    30_000
}

fn default_max_tokens() -> u32 {
    8192
}

fn deserialize_profile<'de, D>(deserializer: D) -> std::result::Result<Profile, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

/// Rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    /// Requests allowed per window (default: 10).
    #[serde(default = "default_rate_limit_max")]
    pub max_requests: u32,
    /// Window length in milliseconds (default: 60,000).
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max(),
            window_ms: default_rate_limit_window_ms(),
        }
    }
}

fn default_rate_limit_max() -> u32 {
    10
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

/// Response cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Entry TTL in seconds (default: 3600).
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum entries (default: 10,000).
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> u64 {
    10_000
}

/// Request deduplication.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupSection {
    /// Dedup window in seconds (default: 30).
    #[serde(default = "default_dedup_window_secs")]
    pub window_secs: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            window_secs: default_dedup_window_secs(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    30
}

/// Usage analytics.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsSection {
    /// Record usage events (default: true).
    #[serde(default = "default_analytics_enabled")]
    pub enabled: bool,
}

impl Default for AnalyticsSection {
    fn default() -> Self {
        Self {
            enabled: default_analytics_enabled(),
        }
    }
}

fn default_analytics_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard locations, then apply
    /// environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    MuninError::Configuration(format!("Failed to read config file {path:?}: {e}"))
                })?;
                toml::from_str(&content).map_err(|e| {
                    MuninError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
                })?
            }
            None => Config::default(),
        };
        config.apply_env_from(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Resolve the config file path. `None` means "use defaults".
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MuninError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".munin").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/munin/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply environment overrides through a lookup function.
    ///
    /// Factored out of [`load`](Self::load) so tests can drive it
    /// without touching process environment.
    pub fn apply_env_from(
        &mut self,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(v) = get("MAX_ARTICLE_LENGTH") {
            self.analysis.max_article_length = parse_env("MAX_ARTICLE_LENGTH", &v)?;
        }
        if let Some(v) = get("MAX_TOKENS_PER_REQUEST") {
            self.analysis.max_tokens_per_request = parse_env("MAX_TOKENS_PER_REQUEST", &v)?;
        }
        if let Some(v) = get("API_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_env("API_RATE_LIMIT_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = get("API_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = parse_env("API_RATE_LIMIT_WINDOW_MS", &v)?;
        }
        if let Some(v) = get("API_CACHE_TTL") {
            self.cache.ttl_secs = parse_env("API_CACHE_TTL", &v)?;
        }
        if let Some(v) = get("ENABLE_USAGE_ANALYTICS") {
            self.analytics.enabled = match v.as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(MuninError::Configuration(format!(
                        "ENABLE_USAGE_ANALYTICS must be true or false, got '{other}'"
                    )));
                }
            };
        }
        if let Some(v) = get("MUNIN_ENV") {
            self.analysis.profile = v.parse()?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        MuninError::Configuration(format!("{name} has invalid value '{value}'"))
    })
}

/// Secrets configuration (API key).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub anthropic: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the provider may use
    /// the `ANTHROPIC_API_KEY` env var).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".munin").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/munin/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MuninError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            MuninError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(MuninError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// The Anthropic API key, falling back to `ANTHROPIC_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.anthropic
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:8787");
        assert_eq!(config.analysis.max_article_length, 30_000);
        assert_eq!(config.analysis.max_tokens_per_request, 8192);
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.dedup.window_secs, 30);
        assert!(config.analytics.enabled);
        assert_eq!(config.analysis.profile, Profile::Production);
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [server]
            address = "0.0.0.0:8787"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:8787");
        // Defaults preserved
        assert_eq!(config.rate_limit.max_requests, 10);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [server]
            address = "127.0.0.1:9000"

            [analysis]
            model = "claude-3-5-haiku-20241022"
            max_article_length = 20000
            max_tokens_per_request = 4000
            repair_policy = "strict"
            profile = "development"

            [rate_limit]
            max_requests = 5
            window_ms = 30000

            [cache]
            ttl_secs = 7200
            max_entries = 500

            [dedup]
            window_secs = 10

            [analytics]
            enabled = false
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.analysis.model, "claude-3-5-haiku-20241022");
        assert_eq!(config.analysis.max_article_length, 20_000);
        assert_eq!(config.analysis.repair_policy, RepairPolicy::Strict);
        assert_eq!(config.analysis.profile, Profile::Development);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.cache.ttl_secs, 7200);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.dedup.window_secs, 10);
        assert!(!config.analytics.enabled);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MAX_ARTICLE_LENGTH", "12345"),
            ("MAX_TOKENS_PER_REQUEST", "2048"),
            ("API_RATE_LIMIT_MAX_REQUESTS", "5"),
            ("API_RATE_LIMIT_WINDOW_MS", "1000"),
            ("API_CACHE_TTL", "60"),
            ("ENABLE_USAGE_ANALYTICS", "false"),
            ("MUNIN_ENV", "development"),
        ]);
        let mut config = Config::default();
        config
            .apply_env_from(|name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.analysis.max_article_length, 12_345);
        assert_eq!(config.analysis.max_tokens_per_request, 2048);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, 1000);
        assert_eq!(config.cache.ttl_secs, 60);
        assert!(!config.analytics.enabled);
        assert_eq!(config.analysis.profile, Profile::Development);
    }

    #[test]
    fn invalid_env_value_is_a_configuration_error() {
        let mut config = Config::default();
        let result = config.apply_env_from(|name| {
            (name == "MAX_ARTICLE_LENGTH").then(|| "not-a-number".to_string())
        });
        assert!(matches!(result, Err(MuninError::Configuration(_))));
    }

    #[test]
    fn parse_secrets() {
        let toml = r#"
            [anthropic]
            api_key = "sk-ant-test-key"
        "#;
        let secrets: Secrets = toml::from_str(toml).unwrap();
        assert_eq!(secrets.anthropic.unwrap().api_key, "sk-ant-test-key");
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn explicit_config_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[rate_limit]\nmax_requests = 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.rate_limit.max_requests, 3);
    }
}
