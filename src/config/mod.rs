//! Configuration (layered: defaults < TOML file < environment).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SandrunError;
use crate::provider::openai::DEFAULT_BASE_URL;
use crate::provider::OpenAiProvider;
use crate::sandbox::SandboxConfig;
use crate::session::{ClientConfig, StaticTokenVerifier};
use crate::util::backoff::ReconnectPolicy;

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8787";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a network reconnaissance assistant operating a sandboxed toolkit. \
Use the provided tools to investigate targets the user is authorized to assess. \
Run one step at a time, read each tool result, and decide the next step from it. \
Stop calling tools once you can answer the user.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// `token:user_id[:tier]` entries, comma-separated.
    pub tokens: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.into(),
            system_prompt: None,
        }
    }
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub token: Option<String>,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_attempts: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            token: None,
            reconnect_base_ms: policy.base_delay.as_millis() as u64,
            reconnect_max_ms: policy.max_delay.as_millis() as u64,
            reconnect_attempts: policy.max_attempts,
        }
    }
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| ".."))
            .field("reconnect_base_ms", &self.reconnect_base_ms)
            .field("reconnect_max_ms", &self.reconnect_max_ms)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish()
    }
}

/// Everything the server, the agent client, and the CLI need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandrunConfig {
    pub server: ServerSettings,
    pub sandbox: SandboxConfig,
    pub auth: AuthSettings,
    pub model: ModelSettings,
    pub client: ClientSettings,
}

impl SandrunConfig {
    /// Defaults, then the TOML file if one exists, then the environment
    /// (after loading `.env`).
    pub fn load() -> Result<Self, SandrunError> {
        let _ = dotenvy::dotenv();
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::from_toml_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self, SandrunError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `$SANDRUN_CONFIG`, else `config.toml` in the platform config dir.
    pub fn config_file_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SANDRUN_CONFIG") {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "", "sandrun").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, SandrunError> {
        debug!(path = %path.display(), "loading config file");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SandrunError::Configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SandrunError> {
        toml::from_str(raw).map_err(|e| SandrunError::Configuration(format!("invalid config file: {e}")))
    }

    /// Overlay environment values. `lookup` stands in for `std::env::var`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), SandrunError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SANDRUN_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("SANDRUN_RUNTIME") {
            self.sandbox.runtime = v;
        }
        if let Some(v) = get("SANDRUN_SANDBOX_NAME") {
            self.sandbox.sandbox_name = v;
        }
        if let Some(v) = get("SANDRUN_SANDBOX_USER") {
            self.sandbox.user = v;
        }
        if let Some(v) = get("SANDRUN_EXEC_TIMEOUT_SECS") {
            self.sandbox.timeout = Duration::from_secs(parse_number("SANDRUN_EXEC_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SANDRUN_AUTH_TOKENS") {
            self.auth.tokens = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.model.base_url = Some(v);
        }
        if let Some(v) = get("SANDRUN_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = get("SANDRUN_SYSTEM_PROMPT") {
            self.model.system_prompt = Some(v);
        }
        if let Some(v) = get("SANDRUN_SERVER_URL") {
            self.client.server_url = v;
        }
        if let Some(v) = get("SANDRUN_TOKEN") {
            self.client.token = Some(v);
        }
        if let Some(v) = get("SANDRUN_RECONNECT_BASE_MS") {
            self.client.reconnect_base_ms = parse_number("SANDRUN_RECONNECT_BASE_MS", &v)?;
        }
        if let Some(v) = get("SANDRUN_RECONNECT_MAX_MS") {
            self.client.reconnect_max_ms = parse_number("SANDRUN_RECONNECT_MAX_MS", &v)?;
        }
        if let Some(v) = get("SANDRUN_RECONNECT_ATTEMPTS") {
            self.client.reconnect_attempts = parse_number("SANDRUN_RECONNECT_ATTEMPTS", &v)? as usize;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SandrunError> {
        let required = [
            ("sandbox.runtime", &self.sandbox.runtime),
            ("sandbox.sandbox_name", &self.sandbox.sandbox_name),
            ("sandbox.user", &self.sandbox.user),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(SandrunError::Configuration(format!("{key} must not be empty")));
            }
        }
        if self.sandbox.timeout.is_zero() {
            return Err(SandrunError::Configuration("sandbox.timeout must be positive".into()));
        }
        if self.client.reconnect_base_ms > self.client.reconnect_max_ms {
            return Err(SandrunError::Configuration(
                "client.reconnect_base_ms exceeds client.reconnect_max_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.client.reconnect_attempts,
            base_delay: Duration::from_millis(self.client.reconnect_base_ms),
            max_delay: Duration::from_millis(self.client.reconnect_max_ms),
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.model.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn client_config(&self) -> Result<ClientConfig, SandrunError> {
        let token = self
            .client
            .token
            .clone()
            .ok_or_else(|| SandrunError::Configuration("SANDRUN_TOKEN is not set".into()))?;
        Ok(ClientConfig::new(&self.client.server_url, token).with_reconnect(self.reconnect_policy()))
    }

    pub fn token_verifier(&self) -> Result<StaticTokenVerifier, SandrunError> {
        match &self.auth.tokens {
            Some(spec) => StaticTokenVerifier::parse(spec),
            None => Ok(StaticTokenVerifier::new()),
        }
    }

    pub fn provider(&self) -> Result<OpenAiProvider, SandrunError> {
        let api_key = self
            .model
            .api_key
            .clone()
            .ok_or_else(|| SandrunError::Authentication("Missing OPENAI_API_KEY".into()))?;
        let base_url = self.model.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.into());
        Ok(OpenAiProvider::new(&self.model.model, api_key, Some(base_url)))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, SandrunError> {
    value
        .trim()
        .parse()
        .map_err(|_| SandrunError::Configuration(format!("{key} must be a non-negative integer, got {value:?}")))
}
