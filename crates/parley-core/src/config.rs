use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// How sign-in is resolved.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Credentials are checked by the backend, which issues a token.
    #[default]
    Backend,
    /// Any credentials are accepted; the role is inferred locally.
    Static,
}

impl AuthMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "backend" => Some(AuthMode::Backend),
            "static" => Some(AuthMode::Static),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Forces the signed-in role to admin (`true`) or user (`false`).
    pub admin_override: Option<bool>,
    pub data_dir: Option<PathBuf>,
    pub default_model: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        let mut config = if config_path.exists() {
            let config_content = fs::read_to_string(&config_path)?;
            serde_json::from_str(&config_content)?
        } else {
            Self::new()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    /// Environment variables win over the file. `lookup` is injected so tests
    /// don't have to touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("PARLEY_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(key) = non_empty("PARLEY_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(token) = non_empty("PARLEY_BEARER_TOKEN") {
            self.bearer_token = Some(token);
        }
        if let Some(mode) = non_empty("PARLEY_AUTH_MODE").and_then(|m| AuthMode::from_str(&m)) {
            self.auth_mode = mode;
        }
        if let Some(flag) = non_empty("PARLEY_ADMIN_OVERRIDE") {
            self.admin_override = match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "admin" => Some(true),
                "0" | "false" | "no" | "user" => Some(false),
                _ => self.admin_override,
            };
        }
        if let Some(dir) = non_empty("PARLEY_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| ParleyError::Config("Could not determine data directory".into()))?;
        Ok(data_dir.join("parley"))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ParleyError::Config("Could not determine config directory".into()))?;

        Ok(config_dir.join("parley").join("config.json"))
    }
}
