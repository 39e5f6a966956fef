//! # LLM Provider Abstraction
//!
//! Every provider sits behind one seam: `generate(prompt, opts) -> text`.
//! The client bounds concurrent in-flight requests per provider with a
//! semaphore; excess requests queue with a deadline and time out rather
//! than pile up.
//!
//! Real provider transports live outside this crate. The scripted backend
//! here serves tests, dry runs, and any deployment that stubs the LLM out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{HiveError, HiveResult};

/// Options for a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Optional system context prepended by the transport.
    pub system: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            system: None,
        }
    }
}

impl GenerateOptions {
    /// Low-temperature options for deterministic repair work.
    pub fn precise() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 2000,
            system: None,
        }
    }
}

/// The single seam every provider implements.
#[async_trait]
pub trait LlmBackend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> HiveResult<String>;
}

/// Bounded-concurrency client over a backend.
#[derive(Debug, Clone)]
pub struct LlmClient {
    backend: Arc<dyn LlmBackend>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn LlmBackend>, config: &LlmConfig) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            request_timeout: Duration::from_secs(config.request_timeout_s),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Generate text. Waits for a concurrency permit and for the backend,
    /// both under the configured request deadline.
    pub async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> HiveResult<String> {
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| HiveError::Internal("llm semaphore closed".to_string()))?;
            debug!(provider = self.backend.name(), "llm request dispatched");
            self.backend.generate(prompt, opts).await
        };

        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| HiveError::Timeout(self.request_timeout))?
    }
}

/// Scripted backend: pops pre-loaded responses in order, then repeats the
/// fallback. Records every prompt it sees.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<Vec<String>>,
    fallback: String,
    prompts_seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<String>, fallback: impl Into<String>) -> Self {
        let mut ordered = responses;
        ordered.reverse(); // pop from the back in call order
        Self {
            responses: Mutex::new(ordered),
            fallback: fallback.into(),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts_seen(&self) -> Vec<String> {
        self.prompts_seen.lock().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _opts: &GenerateOptions) -> HiveResult<String> {
        self.prompts_seen.lock().push(prompt.to_string());
        Ok(self
            .responses
            .lock()
            .pop()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
