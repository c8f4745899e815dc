use crate::provider::Endpoints;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CODEGEN_API_KEY_ENV: &str = "PLAYGROUND_CODEGEN_API_KEY";

/// Overrides the directory holding `config.toml`.
pub const HOME_ENV: &str = "PLAYGROUND_HOME";

/// `$PLAYGROUND_HOME/config.toml`, else `playground/config.toml` under the
/// platform config dir. `None` when neither can be determined.
pub fn default_path() -> Option<PathBuf> {
    match std::env::var_os(HOME_ENV) {
        Some(home) => Some(PathBuf::from(home).join("config.toml")),
        None => dirs::config_dir().map(|dir| dir.join("playground").join("config.toml")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default model (optional)
    pub model: Option<String>,

    /// Request deadline in seconds (default 60).
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub codegen: CodegenConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub fast_llm: String,
    pub inference: String,
    pub codegen: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            fast_llm: "http://localhost:3000/api/groq".to_string(),
            inference: "http://localhost:3000/api/huggingface".to_string(),
            codegen: "https://api.together.xyz/v1/chat/completions".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct CodegenConfig {
    pub api_key: Option<String>,
}

// Keep the key out of debug logs.
impl std::fmt::Debug for CodegenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodegenConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Read the config at `path`. A missing file means all defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("cannot read config {}", path.display()))
            }
        };
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::provider::dispatch::DEFAULT_TIMEOUT)
    }

    /// Endpoints with the environment's API key taking precedence.
    pub fn endpoints(&self) -> Endpoints {
        let codegen_api_key = std::env::var(CODEGEN_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.codegen.api_key.clone());
        Endpoints {
            fast_llm: self.endpoints.fast_llm.clone(),
            inference: self.endpoints.inference.clone(),
            codegen: self.endpoints.codegen.clone(),
            codegen_api_key,
        }
    }
}
