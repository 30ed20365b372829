//! Reasoning oracle client
//!
//! Wraps an [`LlmBackend`] with the call policy every reasoning request gets:
//! - cold timeout until the first successful call, warm timeout afterwards
//! - at most one retry, and only for transient failures
//! - prompt cancellation through a [`CancellationToken`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use triage_config::OracleSettings;
use triage_core::{OracleError, OracleRequest, ReasoningOracle};

use crate::backend::{FinishReason, LlmBackend};
use crate::prompt::PromptBuilder;

/// Call policy for the oracle client
#[derive(Debug, Clone)]
pub struct OracleClientConfig {
    pub cold_timeout: Duration,
    pub warm_timeout: Duration,
    pub retry_backoff: Duration,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
}

impl Default for OracleClientConfig {
    fn default() -> Self {
        Self {
            cold_timeout: Duration::from_secs(30),
            warm_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_millis(250),
            max_retries: 1,
        }
    }
}

impl From<&OracleSettings> for OracleClientConfig {
    fn from(settings: &OracleSettings) -> Self {
        Self {
            cold_timeout: settings.cold_timeout(),
            warm_timeout: settings.warm_timeout(),
            retry_backoff: settings.retry_backoff(),
            max_retries: 1,
        }
    }
}

/// [`ReasoningOracle`] backed by an LLM server
pub struct OracleClient {
    backend: Arc<dyn LlmBackend>,
    config: OracleClientConfig,
    warm: AtomicBool,
}

impl OracleClient {
    pub fn new(backend: Arc<dyn LlmBackend>, config: OracleClientConfig) -> Self {
        Self {
            backend,
            config,
            warm: AtomicBool::new(false),
        }
    }

    /// Whether a call has succeeded yet
    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Relaxed)
    }

    fn current_timeout(&self) -> Duration {
        if self.is_warm() {
            self.config.warm_timeout
        } else {
            self.config.cold_timeout
        }
    }
}

#[async_trait]
impl ReasoningOracle for OracleClient {
    async fn invoke(
        &self,
        request: &OracleRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, OracleError> {
        let messages = PromptBuilder::for_request(request);
        let stage = request.stage.as_str();
        let mut attempt = 0u32;

        loop {
            let timeout = self.current_timeout();
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(OracleError::Cancelled),
                outcome = tokio::time::timeout(timeout, self.backend.generate(&messages)) => {
                    match outcome {
                        Ok(Ok(generation)) => Ok(generation),
                        Ok(Err(e)) => Err(OracleError::from(e)),
                        Err(_) => Err(OracleError::Timeout(timeout)),
                    }
                }
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            metrics::histogram!("triage_oracle_latency_ms", "stage" => stage)
                .record(elapsed_ms as f64);

            match result {
                Ok(generation) => {
                    // The server answered, so the model is loaded even if the body is empty
                    self.warm.store(true, Ordering::Relaxed);

                    if generation.text.trim().is_empty() {
                        metrics::counter!("triage_oracle_calls_total", "stage" => stage, "result" => "malformed")
                            .increment(1);
                        return Err(OracleError::Malformed("empty response".to_string()));
                    }

                    metrics::counter!("triage_oracle_calls_total", "stage" => stage, "result" => "ok")
                        .increment(1);
                    if generation.finish_reason == FinishReason::Length {
                        // Validation decides whether the partial reply is usable
                        tracing::warn!(
                            stage,
                            model = self.backend.model_name(),
                            tokens = generation.tokens,
                            "Oracle reply hit the token limit and may be truncated"
                        );
                    }
                    tracing::debug!(
                        stage,
                        model = self.backend.model_name(),
                        elapsed_ms,
                        tokens = generation.tokens,
                        "Oracle call succeeded"
                    );
                    return Ok(generation.text);
                }
                Err(e) => {
                    metrics::counter!("triage_oracle_calls_total", "stage" => stage, "result" => e.kind())
                        .increment(1);

                    if e.is_transient() && attempt < self.config.max_retries {
                        attempt += 1;
                        tracing::warn!(
                            stage,
                            error = %e,
                            attempt,
                            backoff_ms = self.config.retry_backoff.as_millis() as u64,
                            "Oracle call failed, retrying"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(OracleError::Cancelled),
                            _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        }
                        continue;
                    }

                    tracing::warn!(stage, error = %e, elapsed_ms, "Oracle call failed");
                    return Err(e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.backend.model_name()
    }
}
