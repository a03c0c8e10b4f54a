//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.skald/config.toml` (user)
//! 3. `/etc/skald/config.toml` (system)
//!
//! Every key has a default, so running without any file is valid.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.skald/secrets.toml` (user, must be 0600)
//! 2. `/etc/skald/secrets.toml` (system, must be 0600)
//!
//! falling back to `ELEVENLABS_API_KEY`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backends::RetryConfig;
use crate::cache::CacheConfig;
use crate::gateway::{Skald, SkaldBuilder};
use crate::health::HealthConfig;
use crate::limiter::RateLimitConfig;
use crate::types::SynthesisSettings;
use crate::{Result, SkaldError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub health: HealthSection,
    /// Absent means no same-backend retries.
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub backends: BackendsConfig,
}

/// Request defaults and dispatch limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    /// Voice used when none is given on the command line.
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub settings: SynthesisSettings,
    /// Per-call timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Stream chunks buffered between backend and consumer (default: 64).
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    /// Longest quota wait before settling for silence (default: 0).
    #[serde(default)]
    pub max_quota_wait_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: None,
            settings: SynthesisSettings::default(),
            timeout_secs: default_timeout(),
            stream_buffer: default_stream_buffer(),
            max_quota_wait_secs: 0,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_stream_buffer() -> usize {
    crate::backends::DEFAULT_STREAM_BUFFER
}

/// Audio cache limits.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Byte budget (default: 50 MiB).
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: usize,
    /// Entry lifetime in seconds (default: 86400).
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Background sweep period in seconds; absent disables the sweeper.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_bytes: default_cache_bytes(),
            ttl_secs: default_ttl(),
            sweep_interval_secs: None,
        }
    }
}

fn default_cache_bytes() -> usize {
    CacheConfig::default().max_bytes
}

fn default_ttl() -> u64 {
    CacheConfig::default().ttl.as_secs()
}

/// Demotion policy.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    300
}

/// Same-backend retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    RetryConfig::default().max_attempts
}

fn default_initial_delay() -> u64 {
    RetryConfig::default().initial_delay.as_millis() as u64
}

fn default_max_delay() -> u64 {
    RetryConfig::default().max_delay.as_millis() as u64
}

/// Sliding-window quota for one backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    RateLimitConfig::default().max_requests
}

fn default_max_characters() -> usize {
    RateLimitConfig::default().max_characters
}

fn default_window() -> u64 {
    RateLimitConfig::default().window.as_secs()
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(section: &RateLimitSection) -> Self {
        RateLimitConfig::new()
            .max_requests(section.max_requests)
            .max_characters(section.max_characters)
            .window(Duration::from_secs(section.window_secs))
    }
}

/// Backend table. ElevenLabs (when enabled and keyed) comes first, then
/// local engines in file order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub local: Vec<LocalEngineConfig>,
}

/// ElevenLabs configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ElevenLabsConfig {
    /// Use ElevenLabs when an API key is available (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSection>,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            base_url: None,
            rate_limit: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A local engine run as a subprocess.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalEngineConfig {
    pub name: String,
    pub program: String,
    /// Argument template; `{text}`, `{voice}` and `{speed}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSection>,
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub elevenlabs: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Backend name → environment variable name mapping.
const BACKEND_ENV_VARS: &[(&str, &str)] = &[("elevenlabs", "ELEVENLABS_API_KEY")];

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first of
    /// `~/.skald/config.toml` and `/etc/skald/config.toml` is used, or the
    /// defaults if neither exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse one config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SkaldError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(SkaldError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".skald").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/skald/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Translate into a builder. Call [`SkaldBuilder::build`] to finish.
    pub fn into_builder(self, secrets: &Secrets) -> Result<SkaldBuilder> {
        let synthesis = &self.synthesis;
        let mut builder = Skald::builder()
            .cache(
                CacheConfig::new()
                    .max_bytes(self.cache.max_bytes)
                    .ttl(Duration::from_secs(self.cache.ttl_secs)),
            )
            .health(
                HealthConfig::new()
                    .failure_threshold(self.health.failure_threshold)
                    .cooldown(Duration::from_secs(self.health.cooldown_secs)),
            )
            .timeout(Duration::from_secs(synthesis.timeout_secs))
            .stream_buffer_size(synthesis.stream_buffer)
            .max_quota_wait(Duration::from_secs(synthesis.max_quota_wait_secs));

        if let Some(retry) = &self.retry {
            builder = builder.retry(
                RetryConfig::new()
                    .max_attempts(retry.max_attempts)
                    .initial_delay(Duration::from_millis(retry.initial_delay_ms))
                    .max_delay(Duration::from_millis(retry.max_delay_ms)),
            );
        }

        let elevenlabs = &self.backends.elevenlabs;
        if elevenlabs.enabled {
            match secrets.api_key("elevenlabs") {
                Some(key) => builder = Self::with_elevenlabs(builder, key, elevenlabs)?,
                None => tracing::warn!("elevenlabs enabled but no API key found; skipping"),
            }
        }

        for engine in &self.backends.local {
            if engine.name.trim().is_empty() {
                return Err(SkaldError::Configuration(format!(
                    "local engine '{}' needs a name",
                    engine.program
                )));
            }
            builder = builder.local_command(&engine.name, &engine.program, engine.args.clone());
            if let Some(limit) = &engine.rate_limit {
                builder = builder.rate_limit(&engine.name, limit.into());
            }
        }

        Ok(builder)
    }

    #[cfg(feature = "elevenlabs")]
    fn with_elevenlabs(
        mut builder: SkaldBuilder,
        key: String,
        config: &ElevenLabsConfig,
    ) -> Result<SkaldBuilder> {
        builder = builder.elevenlabs(key);
        if let Some(model) = &config.model {
            builder = builder.elevenlabs_model(model);
        }
        if let Some(url) = &config.base_url {
            builder = builder.elevenlabs_base_url(url);
        }
        if let Some(limit) = &config.rate_limit {
            builder = builder.rate_limit(crate::backends::ELEVENLABS_BACKEND, limit.into());
        }
        Ok(builder)
    }

    #[cfg(not(feature = "elevenlabs"))]
    fn with_elevenlabs(
        _builder: SkaldBuilder,
        _key: String,
        _config: &ElevenLabsConfig,
    ) -> Result<SkaldBuilder> {
        Err(SkaldError::Configuration(
            "elevenlabs configured but the `elevenlabs` feature is disabled".to_string(),
        ))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.skald/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/skald/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        // Try user secrets first
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".skald").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        // Try system secrets
        let system_secrets = PathBuf::from("/etc/skald/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Parse one secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SkaldError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            SkaldError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(SkaldError::Configuration(format!(
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

    /// Get the API key for a backend, falling back to its environment variable.
    pub fn api_key(&self, backend: &str) -> Option<String> {
        let from_file = match backend {
            "elevenlabs" => self.elevenlabs.as_ref(),
            _ => None,
        }
        .map(|s| s.api_key.clone());

        from_file.or_else(|| {
            BACKEND_ENV_VARS
                .iter()
                .find(|(name, _)| *name == backend)
                .and_then(|(_, env_var)| std::env::var(env_var).ok())
                .filter(|key| !key.trim().is_empty())
        })
    }
}
