//! HTTP client for the answer service.
//!
//! `POST {base}/ask` with `{question, guest_type}`, expecting `{answer}`.
//! Retryable failures are retried with exponential backoff before the caller
//! ever sees them; the caller decides what to tell the guest when all
//! attempts are exhausted.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stayflow_schema::GuestType;

use crate::{AnswerService, ServiceError, ServiceErrorKind};

const SERVICE: &str = "answer-service";
const BASE_BACKOFF_MS: u64 = 250;

pub struct HttpAnswerService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_attempts: u32,
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
    guest_type: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    answer: String,
}

impl HttpAnswerService {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn ask_once(&self, question: &str, guest_type: GuestType) -> Result<String, ServiceError> {
        let url = format!("{}/ask", self.base_url);
        let mut req = self.client.post(&url).json(&AskRequest {
            question,
            guest_type: guest_type.as_str(),
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return Err(ServiceError::new(SERVICE, ServiceErrorKind::Timeout, e.to_string()))
            }
            Err(e) if e.is_connect() => {
                return Err(ServiceError::new(
                    SERVICE,
                    ServiceErrorKind::ServerError,
                    format!("connection failed: {e}"),
                ))
            }
            Err(e) => {
                return Err(ServiceError::new(SERVICE, ServiceErrorKind::Unknown, e.to_string()))
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::new(
                SERVICE,
                ServiceErrorKind::from_status(status),
                format!("status {status}: {}", truncate(&body, 200)),
            ));
        }

        let parsed: AskResponse = resp.json().await.map_err(|e| {
            ServiceError::new(
                SERVICE,
                ServiceErrorKind::Unknown,
                format!("invalid response body: {e}"),
            )
        })?;
        Ok(parsed.answer)
    }
}

#[async_trait]
impl AnswerService for HttpAnswerService {
    async fn ask(&self, question: &str, guest_type: GuestType) -> Result<String, ServiceError> {
        let mut attempt = 0u32;
        loop {
            match self.ask_once(question, guest_type).await {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay_ms = BASE_BACKOFF_MS * (1 << attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms,
                        "answer service request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
