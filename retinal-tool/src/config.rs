use std::path::{Path, PathBuf};
use std::time::Duration;

use retinal_openai::{
    DEFAULT_BASE_URL, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_MODEL, DEFAULT_TIMEOUT, DetailLevel,
    InputPolicy, VisionClient,
};
use serde::Deserialize;
use tracing::warn;

use crate::error::ToolError;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub detail: Option<DetailLevel>,
    pub allowed_root: Option<PathBuf>,
    pub max_image_bytes: Option<u64>,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("retinal").join("config.toml"))
}

pub fn parse_config(content: &str) -> Result<Config, ToolError> {
    Ok(toml::from_str(content)?)
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => Config::default(),
    }
}

/// Reads `path`, falling back to defaults if it is missing or malformed.
pub fn load_config_from(path: &Path) -> Config {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };

    parse_config(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), "Ignoring unreadable config: {}", e);
        Config::default()
    })
}

/// Settings given on the command line, which win over everything else.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub detail: Option<DetailLevel>,
    pub root: Option<PathBuf>,
}

/// Fully resolved client settings.
#[derive(Debug)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Unset means the command's own default applies.
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    pub detail: DetailLevel,
    pub policy: InputPolicy,
}

impl Settings {
    /// Merges command line, environment and config file, in that order of
    /// precedence. `env` looks up environment variables.
    pub fn resolve(
        overrides: Overrides,
        config: Config,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ToolError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let api_key = non_empty(env(API_KEY_ENV)).or(non_empty(config.api_key));

        let base_url = non_empty(overrides.base_url)
            .or(non_empty(env(BASE_URL_ENV)))
            .or(non_empty(config.base_url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ToolError::InvalidSetting {
                key: "base_url",
                message: format!("expected an http(s) URL, got {base_url}"),
            });
        }

        let model = non_empty(overrides.model)
            .or(non_empty(config.model))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_tokens = overrides.max_tokens.or(config.max_tokens);
        if max_tokens == Some(0) {
            return Err(ToolError::InvalidSetting {
                key: "max_tokens",
                message: "must be greater than zero".to_string(),
            });
        }

        let timeout = match overrides.timeout_secs.or(config.timeout_secs) {
            Some(0) => {
                return Err(ToolError::InvalidSetting {
                    key: "timeout_secs",
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let root = overrides
            .root
            .or(config.allowed_root)
            .unwrap_or_else(|| PathBuf::from("."));
        let policy = InputPolicy::default()
            .with_root(root)
            .with_max_bytes(config.max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES));

        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
            timeout,
            detail: overrides.detail.or(config.detail).unwrap_or_default(),
            policy,
        })
    }

    pub fn client(&self) -> VisionClient {
        VisionClient::new(self.api_key.clone())
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .with_timeout(self.timeout)
            .with_policy(self.policy.clone())
    }
}
