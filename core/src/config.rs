//! Process configuration boundary.
//!
//! Everything environment- or file-driven is resolved here, once, at factory
//! time. Providers only ever see the resolved structs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::providers::gemini::DEFAULT_GEMINI_BASE_URL;
use crate::providers::{GeminiConfig, OpenAiCompatConfig};
use crate::runtime_config::{ChatRuntimeConfig, DEFAULT_MAX_OUTPUT_CHARS, DEFAULT_PERSONA};
use crate::tools::weather::WEATHER_TOOL_NAME;
use crate::{ParleyError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "parley.toml";

const OPENAI_HEALTH_TIMEOUT_MS: u64 = 800;
const GEMINI_HEALTH_TIMEOUT_MS: u64 = 1_500;

/// Which backend the factory should build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    GeminiNative,
    /// OpenAI-compatible server that needs no API key
    Local,
    /// Hosted OpenAI-compatible API; an API key is mandatory
    External,
    #[default]
    Stub,
}

impl ProviderKind {
    /// Unknown or empty values select the stub.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini_native" => ProviderKind::GeminiNative,
            "local" => ProviderKind::Local,
            "external" => ProviderKind::External,
            _ => ProviderKind::Stub,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GeminiNative => "gemini_native",
            ProviderKind::Local => "local",
            ProviderKind::External => "external",
            ProviderKind::Stub => "stub",
        }
    }
}

/// Fully resolved provider settings
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: String,
    pub chat_timeout_ms: u64,
    pub inner_task_timeout_ms: u64,
    /// `None` picks the backend's own default
    pub health_timeout_ms: Option<u64>,
    pub tool_timeout_ms: u64,
    pub max_output_chars: usize,
    pub max_output_tokens: Option<u32>,
    pub tool_allowlist: Vec<String>,
    pub persona_config_path: Option<PathBuf>,
    pub persona_text: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Stub,
            base_url: None,
            model: None,
            api_key: None,
            gemini_api_key: None,
            gemini_model: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            chat_timeout_ms: 12_000,
            inner_task_timeout_ms: 4_000,
            health_timeout_ms: None,
            tool_timeout_ms: 2_000,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_output_tokens: None,
            tool_allowlist: vec![WEATHER_TOOL_NAME.to_string()],
            persona_config_path: None,
            persona_text: None,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("chat_timeout_ms", &self.chat_timeout_ms)
            .field("inner_task_timeout_ms", &self.inner_task_timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("tool_timeout_ms", &self.tool_timeout_ms)
            .field("max_output_chars", &self.max_output_chars)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("tool_allowlist", &self.tool_allowlist)
            .field("persona_config_path", &self.persona_config_path)
            .field("persona_text", &self.persona_text.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl ProviderSettings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let num = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());
        let d = Self::default();

        let api_key = get("LLM_API_KEY");
        let model = get("LLM_MODEL");
        Self {
            kind: get("LLM_PROVIDER")
                .map(|v| ProviderKind::parse(&v))
                .unwrap_or_default(),
            base_url: get("LLM_BASE_URL"),
            gemini_api_key: get("GEMINI_API_KEY")
                .or_else(|| get("GOOGLE_API_KEY"))
                .or_else(|| api_key.clone()),
            gemini_model: get("GEMINI_MODEL").or_else(|| model.clone()),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(d.gemini_base_url),
            model,
            api_key,
            chat_timeout_ms: num("LLM_CHAT_TIMEOUT_MS").unwrap_or(d.chat_timeout_ms),
            inner_task_timeout_ms: num("LLM_INNER_TASK_TIMEOUT_MS")
                .unwrap_or(d.inner_task_timeout_ms),
            health_timeout_ms: num("LLM_HEALTH_TIMEOUT_MS"),
            tool_timeout_ms: num("LLM_TOOL_TIMEOUT_MS").unwrap_or(d.tool_timeout_ms),
            max_output_chars: get("LLM_MAX_OUTPUT_CHARS")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(d.max_output_chars),
            max_output_tokens: get("LLM_MAX_OUTPUT_TOKENS").and_then(|v| v.parse::<u32>().ok()),
            tool_allowlist: get("LLM_TOOL_ALLOWLIST")
                .map(|v| parse_list(&v))
                .unwrap_or(d.tool_allowlist),
            persona_config_path: get("PERSONA_CONFIG_PATH").map(PathBuf::from),
            persona_text: get("PERSONA_TEXT"),
        }
    }

    /// Environment settings overlaid by the TOML file named in `PARLEY_CONFIG`
    /// (default `./parley.toml`). A missing or broken file keeps the env values.
    pub fn load() -> Self {
        let base = Self::from_env();
        let path = std::env::var("PARLEY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        base.overlay_file(Path::new(&path))
    }

    pub fn overlay_file(self, path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(target: "provider_factory", path = %path.display(), "No TOML config found; using env/defaults");
            return self;
        }
        match fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<SettingsToml>(&s) {
                Ok(t) => t.overlay(self),
                Err(e) => {
                    tracing::warn!(target: "provider_factory", error = %e, "Failed to parse TOML; using env/defaults");
                    self
                }
            },
            Err(e) => {
                tracing::warn!(target: "provider_factory", error = %e, "Failed to read TOML; using env/defaults");
                self
            }
        }
    }

    /// Settings for the OpenAI-compatible backend, or why they are incomplete.
    pub fn openai_config(&self) -> Result<OpenAiCompatConfig> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| ParleyError::NotConfigured("LLM_BASE_URL is not set".into()))?;
        let model = self
            .model
            .clone()
            .ok_or_else(|| ParleyError::NotConfigured("LLM_MODEL is not set".into()))?;
        let mut config = OpenAiCompatConfig::new(base_url, model);
        config.api_key = self.api_key.clone();
        config.chat_timeout_ms = self.chat_timeout_ms;
        config.inner_task_timeout_ms = self.inner_task_timeout_ms;
        config.health_timeout_ms = self.health_timeout_ms.unwrap_or(OPENAI_HEALTH_TIMEOUT_MS);
        config.tool_timeout_ms = self.tool_timeout_ms;
        Ok(config)
    }

    /// Settings for the Gemini backend, or why they are incomplete.
    pub fn gemini_config(&self) -> Result<GeminiConfig> {
        let api_key = self
            .gemini_api_key
            .clone()
            .ok_or_else(|| ParleyError::NotConfigured("GEMINI_API_KEY is not set".into()))?;
        let model = self
            .gemini_model
            .clone()
            .ok_or_else(|| ParleyError::NotConfigured("GEMINI_MODEL is not set".into()))?;
        let mut config = GeminiConfig::new(model, api_key)
            .with_base_url(self.gemini_base_url.clone())
            .with_allowlist(self.tool_allowlist.clone());
        config.chat_timeout_ms = self.chat_timeout_ms;
        config.inner_task_timeout_ms = self.inner_task_timeout_ms;
        config.health_timeout_ms = self.health_timeout_ms.unwrap_or(GEMINI_HEALTH_TIMEOUT_MS);
        config.tool_timeout_ms = self.tool_timeout_ms;
        Ok(config)
    }

    /// Runtime values used when no persona file overrides them
    pub fn runtime_defaults(&self) -> ChatRuntimeConfig {
        ChatRuntimeConfig {
            persona_text: self
                .persona_text
                .clone()
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            max_output_chars: self.max_output_chars,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =========================
// TOML overlay definitions
// =========================

/// API keys are deliberately absent; they only come from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
struct SettingsToml {
    provider: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    gemini: Option<GeminiToml>,
    timeouts: Option<TimeoutsToml>,
    output: Option<OutputToml>,
    tools: Option<ToolsToml>,
    persona: Option<PersonaToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GeminiToml {
    model: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TimeoutsToml {
    chat_ms: Option<u64>,
    inner_task_ms: Option<u64>,
    health_ms: Option<u64>,
    tool_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OutputToml {
    max_chars: Option<usize>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToolsToml {
    allowlist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PersonaToml {
    config_path: Option<PathBuf>,
    text: Option<String>,
}

impl SettingsToml {
    fn overlay(self, mut base: ProviderSettings) -> ProviderSettings {
        if let Some(p) = self.provider {
            base.kind = ProviderKind::parse(&p);
        }
        if let Some(u) = self.base_url {
            base.base_url = Some(u);
        }
        if let Some(m) = self.model {
            base.model = Some(m);
        }
        if let Some(g) = self.gemini {
            if let Some(m) = g.model {
                base.gemini_model = Some(m);
            }
            if let Some(u) = g.base_url {
                base.gemini_base_url = u;
            }
        }
        if let Some(t) = self.timeouts {
            if let Some(v) = t.chat_ms {
                base.chat_timeout_ms = v;
            }
            if let Some(v) = t.inner_task_ms {
                base.inner_task_timeout_ms = v;
            }
            if let Some(v) = t.health_ms {
                base.health_timeout_ms = Some(v);
            }
            if let Some(v) = t.tool_ms {
                base.tool_timeout_ms = v;
            }
        }
        if let Some(o) = self.output {
            if let Some(v) = o.max_chars {
                base.max_output_chars = v;
            }
            if let Some(v) = o.max_tokens {
                base.max_output_tokens = Some(v);
            }
        }
        if let Some(list) = self.tools.and_then(|t| t.allowlist) {
            base.tool_allowlist = list;
        }
        if let Some(p) = self.persona {
            if let Some(path) = p.config_path {
                base.persona_config_path = Some(path);
            }
            if let Some(text) = p.text {
                base.persona_text = Some(text);
            }
        }
        base
    }
}
