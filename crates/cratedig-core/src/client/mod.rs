//! StructuredCallClient: one logical "get a schema-valid answer for this
//! prompt" operation against the remote service.
//!
//! The attempt loop is an explicit state machine over [`retry::AttemptOutcome`]
//! values: classify the raw outcome, wait if retryable, repair malformed JSON
//! once per decode failure, and validate everything (repaired output included)
//! against the target schema before accepting it.

mod prompt;
pub mod retry;
#[cfg(test)]
mod tests;

use crate::cache::CacheCoordinator;
use crate::config::ApiConfig;
use crate::errors::ApiError;
use crate::model::{CallParams, CallStats};
use crate::provider::{CompletionClient, CompletionRequest, ServiceError};
use crate::schema::{clean_json_text, sanitize_for_transport, Decoded, SchemaValidator};
use retry::{AttemptOutcome, RetryPolicy};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Everything about the client that is not the service or the caches.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub policy: RetryPolicy,
    pub call_timeout: Duration,
    pub repair_timeout: Duration,
    /// Cheaper model for the repair pass; `None` reuses the primary model.
    pub repair_model: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            repair_timeout: Duration::from_secs(15),
            repair_model: None,
        }
    }
}

impl ClientOptions {
    pub fn from_api_config(cfg: &ApiConfig) -> Self {
        Self {
            policy: RetryPolicy {
                max_retries: cfg.max_retries,
                base_delay: Duration::from_secs_f64(cfg.base_delay_seconds),
                max_delay: Duration::from_secs_f64(cfg.max_delay_seconds),
                jitter_fraction: 0.25,
                rate_limit_fallback: Duration::from_secs(cfg.rate_limit_fallback_seconds),
            },
            call_timeout: Duration::from_secs_f64(cfg.timeout_seconds),
            repair_timeout: Duration::from_secs(15),
            repair_model: Some(cfg.repair_model.clone()),
        }
    }
}

/// Instance-owned counters so independent pipelines in one process never
/// interfere. `retried` counts re-attempts, not requests-that-retried.
#[derive(Debug, Default)]
struct CallCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

impl CallCounters {
    fn snapshot(&self) -> CallStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        CallStats {
            total_calls: total,
            successful_calls: successful,
            failed_calls: self.failed.load(Ordering::Relaxed),
            retried_calls: self.retried.load(Ordering::Relaxed),
            success_rate_percent: if total > 0 {
                (successful as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            },
        }
    }
}

pub struct StructuredCallClient {
    service: Arc<dyn CompletionClient>,
    caches: Arc<CacheCoordinator>,
    options: ClientOptions,
    counters: CallCounters,
}

impl StructuredCallClient {
    pub fn new(
        service: Arc<dyn CompletionClient>,
        caches: Arc<CacheCoordinator>,
        options: ClientOptions,
    ) -> Self {
        Self {
            service,
            caches,
            options,
            counters: CallCounters::default(),
        }
    }

    pub fn statistics(&self) -> CallStats {
        self.counters.snapshot()
    }

    /// Get a payload conforming to `schema`, retrying transient failures and
    /// attempting one JSON repair per decode failure. A cached answer for the
    /// identical request shape returns immediately with no remote call and no
    /// retry accounting.
    pub async fn get_structured(
        &self,
        prompt: &str,
        model: &str,
        schema: &SchemaValidator,
        params: CallParams,
    ) -> Result<Value, ApiError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let enhanced = prompt::build_structured_prompt(prompt, schema.schema());
        let enhanced = sanitize_for_transport(&enhanced);

        if let Some(hit) = self.caches.response(model, &enhanced, &params) {
            tracing::debug!(model, schema = schema.name(), "response cache hit");
            self.counters.successful.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let req = CompletionRequest {
            model: model.to_string(),
            prompt: enhanced.clone(),
            params,
            timeout: self.options.call_timeout,
        };

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(
                model,
                attempt = attempt + 1,
                attempts = self.options.policy.max_retries + 1,
                "issuing structured call"
            );

            match self.attempt_once(&req, schema, attempt).await {
                AttemptOutcome::Validated(payload) => {
                    self.caches
                        .store_response(model, &enhanced, &params, payload.clone());
                    self.counters.successful.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        tracing::debug!(model, attempt = attempt + 1, "succeeded after retries");
                    }
                    return Ok(payload);
                }
                AttemptOutcome::Terminal(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
                AttemptOutcome::Retry {
                    wait,
                    on_exhaustion,
                } => {
                    if attempt >= self.options.policy.max_retries {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(on_exhaustion);
                    }
                    tracing::debug!(wait_secs = wait.as_secs_f64(), "waiting before retry");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_once(
        &self,
        req: &CompletionRequest,
        schema: &SchemaValidator,
        attempt: u32,
    ) -> AttemptOutcome {
        let raw = match self.service.complete(req).await {
            Ok(raw) => raw,
            Err(err) => return self.classify_service_error(err, attempt),
        };

        if raw.text.trim().is_empty() {
            if raw.truncated_by_length() {
                // Retrying with the same ceiling cannot help.
                return AttemptOutcome::Terminal(ApiError::Schema {
                    schema: schema.name().to_string(),
                    detail: format!(
                        "response truncated by token ceiling ({} tokens)",
                        req.params.max_tokens
                    ),
                });
            }
            tracing::warn!(finish_reason = ?raw.finish_reason, "empty response content");
            return AttemptOutcome::Retry {
                wait: self.options.policy.backoff_delay(attempt),
                on_exhaustion: ApiError::Schema {
                    schema: schema.name().to_string(),
                    detail: format!("empty response content (finish_reason: {:?})", raw.finish_reason),
                },
            };
        }

        match schema.decode_and_validate(&clean_json_text(&raw.text)) {
            Decoded::Valid(payload) => AttemptOutcome::Validated(payload),
            Decoded::Invalid { detail } => {
                // The repair pass is JSON-shape-only; shape-valid but
                // schema-invalid output is retried as a fresh call.
                tracing::warn!(schema = schema.name(), %detail, "schema validation failed");
                AttemptOutcome::Retry {
                    wait: self.options.policy.backoff_delay(attempt),
                    on_exhaustion: ApiError::Schema {
                        schema: schema.name().to_string(),
                        detail,
                    },
                }
            }
            Decoded::Malformed { detail } => {
                tracing::warn!(%detail, "JSON parse error, attempting repair");
                self.repair_pass(&raw.text, &detail, req, schema, attempt).await
            }
        }
    }

    fn classify_service_error(&self, err: ServiceError, attempt: u32) -> AttemptOutcome {
        match err {
            ServiceError::RateLimited { retry_after } => {
                let wait = retry_after.unwrap_or(self.options.policy.rate_limit_fallback);
                tracing::warn!(wait_secs = wait.as_secs(), "rate limited");
                AttemptOutcome::Retry {
                    wait,
                    on_exhaustion: ApiError::RateLimit {
                        retry_after_secs: wait.as_secs(),
                    },
                }
            }
            ServiceError::Timeout => AttemptOutcome::Retry {
                wait: self.options.policy.backoff_delay(attempt),
                on_exhaustion: ApiError::Timeout {
                    bound_secs: self.options.call_timeout.as_secs_f64(),
                },
            },
            ServiceError::Server { status, message } => AttemptOutcome::Retry {
                wait: self.options.policy.backoff_delay(attempt),
                on_exhaustion: ApiError::Communication {
                    message,
                    status: Some(status),
                },
            },
            ServiceError::Network(message) => AttemptOutcome::Retry {
                wait: self.options.policy.backoff_delay(attempt),
                on_exhaustion: ApiError::Communication {
                    message,
                    status: None,
                },
            },
            // 4xx other than 429: the request itself is wrong, retrying cannot help.
            ServiceError::Client { status, message } => {
                AttemptOutcome::Terminal(ApiError::Communication {
                    message,
                    status: Some(status),
                })
            }
        }
    }

    /// Exactly one repair call per decode failure. The repaired output must
    /// pass the same schema validation as a first-attempt response; anything
    /// less falls back to the outer retry loop with a parse error queued for
    /// exhaustion.
    async fn repair_pass(
        &self,
        malformed: &str,
        parse_error: &str,
        req: &CompletionRequest,
        schema: &SchemaValidator,
        attempt: u32,
    ) -> AttemptOutcome {
        let fall_back = || AttemptOutcome::Retry {
            wait: self.options.policy.backoff_delay(attempt),
            on_exhaustion: ApiError::Parse {
                raw: malformed.to_string(),
                detail: parse_error.to_string(),
            },
        };

        let repair_req = CompletionRequest {
            model: self
                .options
                .repair_model
                .clone()
                .unwrap_or_else(|| req.model.clone()),
            prompt: prompt::build_repair_prompt(malformed, parse_error),
            params: CallParams {
                temperature: 0.0,
                max_tokens: (malformed.len().min(8_000) as u32).saturating_add(100),
            },
            timeout: self.options.repair_timeout,
        };

        let fixed = match self.service.complete(&repair_req).await {
            Ok(fixed) => fixed,
            Err(e) => {
                tracing::warn!(error = %e, "repair call failed");
                return fall_back();
            }
        };

        match schema.decode_and_validate(&clean_json_text(&fixed.text)) {
            Decoded::Valid(payload) => {
                tracing::info!(
                    model = %repair_req.model,
                    "successfully repaired and validated JSON response"
                );
                AttemptOutcome::Validated(payload)
            }
            Decoded::Malformed { detail } => {
                tracing::warn!(%detail, "repaired output still malformed");
                fall_back()
            }
            Decoded::Invalid { detail } => {
                tracing::warn!(%detail, "repaired output failed schema validation");
                fall_back()
            }
        }
    }
}
