use super::*;
use crate::cache::records::ExecutionRecordStore;
use crate::cache::response::ResponseCache;
use crate::provider::RawCompletion;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Pops one scripted outcome per `complete()` call and records every request
/// it saw, so tests can assert call counts, models, and prompts.
struct ScriptedService {
    script: Mutex<VecDeque<Result<RawCompletion, ServiceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    fn new(script: Vec<Result<RawCompletion, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, idx: usize) -> CompletionRequest {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedService {
    async fn complete(&self, req: &CompletionRequest) -> Result<RawCompletion, ServiceError> {
        self.requests.lock().unwrap().push(req.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::Network("script exhausted".into())))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

fn ok(text: &str) -> Result<RawCompletion, ServiceError> {
    Ok(RawCompletion {
        text: text.to_string(),
        finish_reason: Some("stop".to_string()),
        model: "scripted-model".to_string(),
    })
}

fn server_error() -> Result<RawCompletion, ServiceError> {
    Err(ServiceError::Server {
        status: 503,
        message: "service unavailable".into(),
    })
}

fn validator() -> SchemaValidator {
    SchemaValidator::new(
        "AlbumAnswer",
        json!({
            "type": "object",
            "properties": { "artist": { "type": "string" } },
            "required": ["artist"],
        }),
    )
    .unwrap()
}

fn caches() -> Arc<CacheCoordinator> {
    Arc::new(CacheCoordinator::new(
        ExecutionRecordStore::memory().unwrap(),
        ResponseCache::in_memory(Duration::from_secs(30 * 24 * 3600)),
    ))
}

fn fast_options() -> ClientOptions {
    ClientOptions {
        policy: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.25,
            rate_limit_fallback: Duration::from_secs(60),
        },
        call_timeout: Duration::from_secs(30),
        repair_timeout: Duration::from_secs(15),
        repair_model: Some("repair-mini".to_string()),
    }
}

const VALID: &str = r#"{"artist": "Brian Eno"}"#;
const MALFORMED: &str = r#"{"artist": "Brian Eno""#;
const WRONG_SHAPE: &str = r#"{"year": 1975}"#;

#[tokio::test(start_paused = true)]
async fn second_identical_call_hits_cache_with_zero_remote_calls() {
    let service = ScriptedService::new(vec![ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());
    let schema = validator();

    let first = client
        .get_structured("classify", "gpt-4o-mini", &schema, CallParams::default())
        .await
        .unwrap();
    let second = client
        .get_structured("classify", "gpt-4o-mini", &schema, CallParams::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(service.calls(), 1, "second call must not reach the service");

    let stats = client.statistics();
    assert_eq!(stats.total_calls, 2);
    assert_eq!(stats.successful_calls, 2);
    assert_eq!(stats.retried_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn different_decision_params_miss_the_cache() {
    let service = ScriptedService::new(vec![ok(VALID), ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());
    let schema = validator();

    client
        .get_structured("classify", "gpt-4o-mini", &schema, CallParams::default())
        .await
        .unwrap();
    client
        .get_structured(
            "classify",
            "gpt-4o-mini",
            &schema,
            CallParams {
                temperature: 0.7,
                max_tokens: 1000,
            },
        )
        .await
        .unwrap();

    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn server_errors_then_success_retries_exactly_k_times() {
    let k = 2;
    let service = ScriptedService::new(vec![server_error(), server_error(), ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let payload = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();

    assert_eq!(payload["artist"], "Brian Eno");
    assert_eq!(service.calls(), k + 1);
    let stats = client.statistics();
    assert_eq!(stats.retried_calls, k as u64);
    assert_eq!(stats.successful_calls, 1);
    assert_eq!(stats.failed_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_server_errors_surface_communication_error() {
    let service = ScriptedService::new(vec![
        server_error(),
        server_error(),
        server_error(),
        server_error(),
    ]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApiError::Communication {
            status: Some(503),
            ..
        }
    ));
    assert_eq!(service.calls(), 4); // max_retries = 3 → 4 attempts
    let stats = client.statistics();
    assert_eq!(stats.retried_calls, 3);
    assert_eq!(stats.failed_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_at_least_the_advised_interval() {
    let advised = Duration::from_secs(30);
    let service = ScriptedService::new(vec![
        Err(ServiceError::RateLimited {
            retry_after: Some(advised),
        }),
        ok(VALID),
    ]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let started = tokio::time::Instant::now();
    client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();

    assert!(
        started.elapsed() >= advised,
        "waited {:?}, advised {:?}",
        started.elapsed(),
        advised
    );
    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_rate_limit_carries_last_advised_interval() {
    let limited = || {
        Err(ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        })
    };
    let service = ScriptedService::new(vec![limited(), limited(), limited(), limited()]);
    let client = StructuredCallClient::new(service, caches(), fast_options());

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::RateLimit { retry_after_secs: 7 }));
}

#[tokio::test(start_paused = true)]
async fn client_error_is_terminal_without_retry() {
    let service = ScriptedService::new(vec![Err(ServiceError::Client {
        status: 400,
        message: "invalid request".into(),
    })]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApiError::Communication {
            status: Some(400),
            ..
        }
    ));
    assert_eq!(service.calls(), 1);
    assert_eq!(client.statistics().retried_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn truncation_by_length_is_a_terminal_schema_error_naming_the_limit() {
    let service = ScriptedService::new(vec![Ok(RawCompletion {
        text: String::new(),
        finish_reason: Some("length".to_string()),
        model: "scripted-model".to_string(),
    })]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let err = client
        .get_structured(
            "classify",
            "gpt-4o-mini",
            &validator(),
            CallParams {
                temperature: 0.0,
                max_tokens: 256,
            },
        )
        .await
        .unwrap_err();

    match err {
        ApiError::Schema { detail, .. } => assert!(detail.contains("256")),
        other => panic!("expected Schema error, got {:?}", other),
    }
    assert_eq!(service.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_output_is_repaired_on_the_cheaper_model() {
    let service = ScriptedService::new(vec![ok(MALFORMED), ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let payload = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();

    assert_eq!(payload["artist"], "Brian Eno");
    assert_eq!(service.calls(), 2);
    let repair = service.request(1);
    assert_eq!(repair.model, "repair-mini");
    assert!(repair.prompt.contains(MALFORMED));
    // a repair is part of the same attempt, not a retry
    assert_eq!(client.statistics().retried_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn repaired_output_must_pass_schema_validation() {
    // Repair returns shape-valid JSON that violates the schema: not accepted,
    // the outer loop retries, and the second attempt succeeds.
    let service = ScriptedService::new(vec![ok(MALFORMED), ok(WRONG_SHAPE), ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let payload = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();

    assert_eq!(payload["artist"], "Brian Eno");
    assert_eq!(service.calls(), 3);
    assert_eq!(client.statistics().retried_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_repairs_exhaust_into_parse_error_with_raw_text() {
    let options = ClientOptions {
        policy: RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.25,
            rate_limit_fallback: Duration::from_secs(60),
        },
        ..fast_options()
    };
    // attempt 1: malformed + failed repair; attempt 2: same again → exhausted
    let service = ScriptedService::new(vec![
        ok(MALFORMED),
        ok(MALFORMED),
        ok(MALFORMED),
        ok(MALFORMED),
    ]);
    let client = StructuredCallClient::new(service.clone(), caches(), options);

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    match err {
        ApiError::Parse { raw, .. } => assert_eq!(raw, MALFORMED),
        other => panic!("expected Parse error, got {:?}", other),
    }
    assert_eq!(service.calls(), 4); // 2 attempts, each with one repair call
    assert_eq!(client.statistics().retried_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn schema_invalid_output_retries_fresh_without_repair() {
    let service = ScriptedService::new(vec![ok(WRONG_SHAPE), ok(VALID)]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let payload = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();

    assert_eq!(payload["artist"], "Brian Eno");
    // both calls went to the primary model; no repair call in between
    assert_eq!(service.calls(), 2);
    assert_eq!(service.request(0).model, "gpt-4o-mini");
    assert_eq!(service.request(1).model, "gpt-4o-mini");
    assert_eq!(client.statistics().retried_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_schema_violations_surface_schema_error() {
    let service = ScriptedService::new(vec![
        ok(WRONG_SHAPE),
        ok(WRONG_SHAPE),
        ok(WRONG_SHAPE),
        ok(WRONG_SHAPE),
    ]);
    let client = StructuredCallClient::new(service, caches(), fast_options());

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    match err {
        ApiError::Schema { schema, .. } => assert_eq!(schema, "AlbumAnswer"),
        other => panic!("expected Schema error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn markdown_fenced_json_is_accepted() {
    let fenced = format!("```json\n{VALID}\n```");
    let service = ScriptedService::new(vec![ok(&fenced)]);
    let client = StructuredCallClient::new(service, caches(), fast_options());

    let payload = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap();
    assert_eq!(payload["artist"], "Brian Eno");
}

#[tokio::test(start_paused = true)]
async fn timeout_is_retried_then_surfaced_with_bound() {
    let service = ScriptedService::new(vec![
        Err(ServiceError::Timeout),
        Err(ServiceError::Timeout),
        Err(ServiceError::Timeout),
        Err(ServiceError::Timeout),
    ]);
    let client = StructuredCallClient::new(service.clone(), caches(), fast_options());

    let err = client
        .get_structured("classify", "gpt-4o-mini", &validator(), CallParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout { bound_secs } if bound_secs == 30.0));
    assert_eq!(service.calls(), 4);
}
