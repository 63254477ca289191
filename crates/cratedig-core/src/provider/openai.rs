//! OpenAI chat-completions transport.

use super::{CompletionClient, CompletionRequest, RawCompletion, ServiceError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiClient {
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn classify_reqwest(e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Network(e.to_string())
        }
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<RawCompletion, ServiceError> {
        let body = json!({
            "model": req.model,
            "messages": [{ "role": "user", "content": req.prompt }],
            "temperature": req.params.temperature,
            "max_tokens": req.params.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let send = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        // The bound covers the whole exchange, headers and body both.
        let resp = match tokio::time::timeout(req.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(Self::classify_reqwest(e)),
            Err(_) => return Err(ServiceError::Timeout),
        };

        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            if code == 429 {
                return Err(ServiceError::RateLimited {
                    retry_after: parse_retry_after(resp.headers()),
                });
            }
            let message = resp.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ServiceError::Server {
                    status: code,
                    message,
                });
            }
            return Err(ServiceError::Client {
                status: code,
                message,
            });
        }

        let payload: serde_json::Value = match tokio::time::timeout(req.timeout, resp.json()).await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(Self::classify_reqwest(e)),
            Err(_) => return Err(ServiceError::Timeout),
        };

        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason = payload
            .pointer("/choices/0/finish_reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let model = payload
            .pointer("/model")
            .and_then(|v| v.as_str())
            .unwrap_or(&req.model)
            .to_string();

        Ok(RawCompletion {
            text,
            finish_reason,
            model,
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn retry_after_parses_integer_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("42"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(42)));
    }

    #[test]
    fn retry_after_absent_or_http_date_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
