//! Configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file,
//! environment variables, then CLI flags (applied by `main`).

pub mod schema;

pub use schema::{
    AudioConfig, AudioSource, BehaviorConfig, ChatMethod, Config, GatewayConfig, RobotConfig,
    SttBackend, SttConfig, TtsConfig,
};

use anyhow::{Context, Result};
use directories::UserDirs;
use std::path::{Path, PathBuf};

/// Directory under the home directory holding config and caches.
pub const CONFIG_DIR_NAME: &str = ".reachyclaw";

const SECRET_MASK: &str = "***";

/// `~/.reachyclaw/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME).join("config.toml"))
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

impl Config {
    /// Load from `path` (which must exist) or from the default location
    /// (which may be missing), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let path = expand_path(&path.to_string_lossy());
                Self::from_file(&path)?
            }
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "No config file, using defaults");
                    Self {
                        config_path: path,
                        ..Self::default()
                    }
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = get("OPENCLAW_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("OPENCLAW_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid OPENCLAW_PORT"),
            }
        }
        if let Some(token) = get("OPENCLAW_TOKEN") {
            self.gateway.token = Some(token);
        }
        if let Some(key) = get("OPENAI_API_KEY").or_else(|| get("OPENCLAW_OPENAI_TOKEN")) {
            self.stt.openai_api_key = Some(key);
        }
        if let Some(backend) = get("STT_BACKEND") {
            match backend.parse() {
                Ok(backend) => self.stt.backend = backend,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid STT_BACKEND"),
            }
        }
        if let Some(model) = get("WHISPER_MODEL") {
            self.stt.whisper_model = model;
        }
        if let Some(wake_word) = get("WAKE_WORD") {
            self.behavior.wake_word = Some(wake_word);
        }
    }

    /// Reject settings that cannot work, before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be positive");
        }
        if self.audio.silence_threshold.is_nan() || self.audio.silence_threshold < 0.0 {
            anyhow::bail!("audio.silence_threshold must be a non-negative number");
        }
        if self.audio.max_recording_duration <= 0.0 {
            anyhow::bail!("audio.max_recording_duration must be positive");
        }
        if self.stt.backend == SttBackend::Openai
            && self.stt.openai_api_key.as_deref().unwrap_or_default().is_empty()
        {
            anyhow::bail!(
                "OpenAI speech-to-text needs an API key. Set OPENAI_API_KEY or stt.openai_api_key."
            );
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.behavior.cache_dir)
    }

    pub fn capture_dir(&self) -> PathBuf {
        expand_path(&self.robot.capture_dir)
    }

    /// Create cache and capture directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.cache_dir(), self.capture_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Copy with secrets replaced, for `config show`.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        if masked.gateway.token.is_some() {
            masked.gateway.token = Some(SECRET_MASK.into());
        }
        if masked.stt.openai_api_key.is_some() {
            masked.stt.openai_api_key = Some(SECRET_MASK.into());
        }
        masked
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// JSON schema of the config file.
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }
}
