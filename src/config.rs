use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::transcription::TranscriptionConfig;

/// How a `sona` worker is launched and supervised
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Port passed to `serve --port`; 0 lets the worker pick one
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Unbounded when unset
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,

    #[serde(default = "default_forward_output")]
    pub forward_output: bool,
}

fn default_binary() -> String {
    "sona".to_string()
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_forward_output() -> bool {
    true
}

fn default_model() -> String {
    "whisper-1".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            port: 0,
            extra_args: Vec::new(),
            stop_timeout_secs: default_stop_timeout(),
            ready_timeout_secs: None,
            forward_output: default_forward_output(),
        }
    }
}

impl RunnerConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Option<Duration> {
        self.ready_timeout_secs.map(Duration::from_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.binary.is_empty() {
            return Err(anyhow::anyhow!("binary cannot be empty"));
        }

        if self.stop_timeout_secs == 0 {
            return Err(anyhow::anyhow!("stop_timeout_secs must be greater than 0"));
        }

        if self.ready_timeout_secs == Some(0) {
            return Err(anyhow::anyhow!(
                "ready_timeout_secs must be greater than 0 when set"
            ));
        }

        Ok(())
    }
}

/// Settings file for the `sona-runner` binary
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(flatten)]
    pub runner: RunnerConfig,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            model: default_model(),
            language: None,
            prompt: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/sona-runner/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(config_dir.join("sona-runner").join("config.json"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.runner.validate()?;

        if self.model.is_empty() {
            return Err(anyhow::anyhow!("model cannot be empty"));
        }

        Ok(())
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        TranscriptionConfig {
            model: self.model.clone(),
            prompt: self.prompt.clone().unwrap_or_default(),
            language: self.language.clone().unwrap_or_default(),
        }
    }
}
