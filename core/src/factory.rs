use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ProviderKind, ProviderSettings};
use crate::pii::{PiiMasker, RegexPiiMasker};
use crate::providers::{
    GeminiNativeProvider, LlmProvider, OpenAiCompatProvider, ProviderDeps, StubProvider,
    UnconfiguredProvider,
};
use crate::runtime_config::{
    LazyRuntimeConfig, RuntimeConfigSource, StaticRuntimeConfig, TomlRuntimeConfig,
};
use crate::tools::{ToolExecutor, WeatherToolExecutor};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::{ParleyError, Result};

/// Builds the configured provider.
///
/// Collaborators default to the reqwest transport, the Open-Meteo weather
/// executor, the regex PII masker and a runtime source derived from the
/// settings; each can be replaced before `build`.
pub struct ProviderFactory {
    settings: ProviderSettings,
    transport: Option<Arc<dyn HttpTransport>>,
    tool_executor: Option<Arc<dyn ToolExecutor>>,
    masker: Option<Arc<dyn PiiMasker>>,
    runtime_source: Option<Arc<dyn RuntimeConfigSource>>,
}

impl ProviderFactory {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            transport: None,
            tool_executor: None,
            masker: None,
            runtime_source: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new(ProviderSettings::from_env())
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tool_executor = Some(executor);
        self
    }

    pub fn with_masker(mut self, masker: Arc<dyn PiiMasker>) -> Self {
        self.masker = Some(masker);
        self
    }

    /// Replace the settings-derived runtime source. It is still wrapped lazily
    /// and closed at most once.
    pub fn with_runtime_source(mut self, source: Arc<dyn RuntimeConfigSource>) -> Self {
        self.runtime_source = Some(source);
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Construct the provider.
    ///
    /// Only an `external` provider without an API key is an error; any other
    /// missing setting yields a provider that rejects every call.
    pub fn build(&self) -> Result<Arc<dyn LlmProvider>> {
        let kind = self.settings.kind;
        let provider: Arc<dyn LlmProvider> = match kind {
            ProviderKind::Stub => Arc::new(StubProvider::new()),
            ProviderKind::External if self.settings.api_key.is_none() => {
                return Err(ParleyError::Config(
                    "external provider requires LLM_API_KEY".into(),
                ));
            }
            ProviderKind::Local | ProviderKind::External => match self.settings.openai_config() {
                Ok(config) => Arc::new(OpenAiCompatProvider::new(config, self.deps())),
                Err(e) => self.unconfigured(kind, e),
            },
            ProviderKind::GeminiNative => match self.settings.gemini_config() {
                Ok(config) => Arc::new(GeminiNativeProvider::new(config, self.deps())),
                Err(e) => self.unconfigured(kind, e),
            },
        };
        info!(target: "provider_factory", kind = kind.as_str(), provider = provider.name(), "Provider ready");
        Ok(provider)
    }

    fn unconfigured(&self, kind: ProviderKind, err: ParleyError) -> Arc<dyn LlmProvider> {
        let reason = match err {
            ParleyError::NotConfigured(reason) => reason,
            other => other.to_string(),
        };
        warn!(target: "provider_factory", kind = kind.as_str(), reason = %reason, "Provider is not configured");
        Arc::new(UnconfiguredProvider::new(kind.as_str(), reason))
    }

    fn deps(&self) -> ProviderDeps {
        let transport = self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(ReqwestTransport::default()));
        let tool_executor = self
            .tool_executor
            .clone()
            .unwrap_or_else(|| Arc::new(WeatherToolExecutor::new()));
        let masker = self
            .masker
            .clone()
            .unwrap_or_else(|| Arc::new(RegexPiiMasker::new()));
        ProviderDeps {
            transport,
            tool_executor,
            runtime: Arc::new(self.lazy_runtime()),
            masker,
        }
    }

    fn lazy_runtime(&self) -> LazyRuntimeConfig {
        let injected = self.runtime_source.clone();
        let path = self.settings.persona_config_path.clone();
        let defaults = self.settings.runtime_defaults();
        LazyRuntimeConfig::new(move || -> Arc<dyn RuntimeConfigSource> {
            if let Some(source) = &injected {
                return Arc::clone(source);
            }
            match &path {
                Some(path) => Arc::new(TomlRuntimeConfig::new(path.clone(), defaults.clone())),
                None => Arc::new(StaticRuntimeConfig::new(defaults.clone())),
            }
        })
    }
}
