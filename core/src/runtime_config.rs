//! Hot-reloadable persona and output limits.
//!
//! Providers call [`RuntimeConfigSource::load`] on every chat invocation and
//! never cache the result, so edits to the persona file apply to the next turn.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ParleyError, Result};

pub const DEFAULT_PERSONA: &str =
    "あなたは受付で来訪者と話す、明るく丁寧なアシスタントです。短く、やさしい日本語で答えてください。";
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 240;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRuntimeConfig {
    pub persona_text: String,
    pub max_output_chars: usize,
    pub max_output_tokens: Option<u32>,
}

impl Default for ChatRuntimeConfig {
    fn default() -> Self {
        Self {
            persona_text: DEFAULT_PERSONA.to_string(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            max_output_tokens: None,
        }
    }
}

#[async_trait]
pub trait RuntimeConfigSource: Send + Sync {
    async fn load(&self) -> Result<ChatRuntimeConfig>;

    /// Release any resource held by the source.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Fixed configuration, for tests and env-only deployments
#[derive(Debug, Clone, Default)]
pub struct StaticRuntimeConfig {
    config: ChatRuntimeConfig,
}

impl StaticRuntimeConfig {
    pub fn new(config: ChatRuntimeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RuntimeConfigSource for StaticRuntimeConfig {
    async fn load(&self) -> Result<ChatRuntimeConfig> {
        Ok(self.config.clone())
    }
}

/// Persona file overlay; re-read on every load.
///
/// A missing or malformed file falls back to the defaults with a warning.
#[derive(Debug, Clone)]
pub struct TomlRuntimeConfig {
    path: PathBuf,
    defaults: ChatRuntimeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RuntimeToml {
    persona_text: Option<String>,
    max_output_chars: Option<usize>,
    max_output_tokens: Option<u32>,
}

impl RuntimeToml {
    fn apply(self, c: &mut ChatRuntimeConfig) {
        if let Some(x) = self.persona_text {
            c.persona_text = x;
        }
        if let Some(x) = self.max_output_chars {
            c.max_output_chars = x;
        }
        if let Some(x) = self.max_output_tokens {
            c.max_output_tokens = Some(x);
        }
    }
}

impl TomlRuntimeConfig {
    pub fn new(path: impl Into<PathBuf>, defaults: ChatRuntimeConfig) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }
}

#[async_trait]
impl RuntimeConfigSource for TomlRuntimeConfig {
    async fn load(&self) -> Result<ChatRuntimeConfig> {
        let mut config = self.defaults.clone();
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => match toml::from_str::<RuntimeToml>(&s) {
                Ok(t) => t.apply(&mut config),
                Err(e) => {
                    warn!(target: "runtime_config", path = %self.path.display(), error = %e, "Failed to parse persona TOML; using defaults")
                }
            },
            Err(e) => {
                warn!(target: "runtime_config", path = %self.path.display(), error = %e, "Failed to read persona TOML; using defaults")
            }
        }
        Ok(config)
    }
}

type SourceInit = Box<dyn Fn() -> Arc<dyn RuntimeConfigSource> + Send + Sync>;

/// Constructs its source on first use and closes it at most once.
pub struct LazyRuntimeConfig {
    init: SourceInit,
    source: OnceLock<Arc<dyn RuntimeConfigSource>>,
    closed: AtomicBool,
}

impl LazyRuntimeConfig {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Arc<dyn RuntimeConfigSource> + Send + Sync + 'static,
    {
        Self {
            init: Box::new(init),
            source: OnceLock::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.source.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeConfigSource for LazyRuntimeConfig {
    async fn load(&self) -> Result<ChatRuntimeConfig> {
        if self.is_closed() {
            return Err(ParleyError::Config("runtime config reader is closed".into()));
        }
        let source = self.source.get_or_init(|| {
            debug!(target: "runtime_config", "Initialising runtime config reader");
            (self.init)()
        });
        source.load().await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.source.get() {
            Some(source) => source.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RuntimeConfigSource for CountingSource {
        async fn load(&self) -> Result<ChatRuntimeConfig> {
            Ok(ChatRuntimeConfig::default())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn lazy_source_closes_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let inits = Arc::new(AtomicUsize::new(0));
        let lazy = {
            let closes = Arc::clone(&closes);
            let inits = Arc::clone(&inits);
            LazyRuntimeConfig::new(move || {
                inits.fetch_add(1, Ordering::SeqCst);
                Arc::new(CountingSource {
                    closes: Arc::clone(&closes),
                })
            })
        };
        assert!(!lazy.is_initialized());
        lazy.load().await.unwrap();
        lazy.load().await.unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        lazy.close().await.unwrap();
        lazy.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(lazy.load().await.is_err());
    }

    #[tokio::test]
    async fn close_before_use_never_initialises() {
        let lazy = LazyRuntimeConfig::new(|| Arc::new(StaticRuntimeConfig::default()));
        lazy.close().await.unwrap();
        assert!(!lazy.is_initialized());
    }
}
