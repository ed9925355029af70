//! HTTP client for the payment processor.
//!
//! `POST {base}/checkout/sessions` with a [`CheckoutRequest`], expecting
//! `{checkout_url}`. Deliberately retry-free: a repeated call creates a
//! second checkout session, so failures surface immediately and idempotence
//! is handled one level up, by the booking ledger.

use std::time::Duration;

use async_trait::async_trait;

use crate::{CheckoutRequest, CheckoutSession, PaymentProcessor, ServiceError, ServiceErrorKind};

const SERVICE: &str = "payment-processor";

pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn create_checkout(&self, req: CheckoutRequest) -> Result<CheckoutSession, ServiceError> {
        let url = format!("{}/checkout/sessions", self.base_url);
        let mut http_req = self.client.post(&url).json(&req);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = match http_req.send().await {
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
                format!("status {status}: {body}"),
            ));
        }

        resp.json::<CheckoutSession>().await.map_err(|e| {
            ServiceError::new(
                SERVICE,
                ServiceErrorKind::Unknown,
                format!("invalid response body: {e}"),
            )
        })
    }
}
