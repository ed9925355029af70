//! In-process stand-ins for both external services.
//!
//! Used by tests and by `serve --offline`, where the concierge should come up
//! with no network dependencies and still walk the whole booking flow.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use stayflow_schema::GuestType;

use crate::{
    AnswerService, CheckoutRequest, CheckoutSession, PaymentProcessor, ServiceError,
    ServiceErrorKind,
};

/// Canned answer service. Optionally fails the first N calls with a
/// retryable error to exercise retry and fallback paths.
pub struct StubAnswerService {
    reply: String,
    failures_left: AtomicU32,
}

impl StubAnswerService {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            failures_left: AtomicU32::new(0),
        }
    }

    pub fn failing_first(reply: impl Into<String>, failures: u32) -> Self {
        Self {
            reply: reply.into(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl AnswerService for StubAnswerService {
    async fn ask(&self, _question: &str, _guest_type: GuestType) -> Result<String, ServiceError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ServiceError::new(
                "answer-service",
                ServiceErrorKind::ServerError,
                "stub failure",
            ));
        }
        Ok(self.reply.clone())
    }
}

/// Deterministic payment processor. Mints sequential checkout URLs and
/// records every request so tests can assert on amounts and metadata.
pub struct StubPaymentProcessor {
    base_url: String,
    counter: AtomicU64,
    failures_left: AtomicU32,
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl StubPaymentProcessor {
    pub fn new() -> Self {
        Self {
            base_url: "https://pay.stayflow.test/checkout".to_string(),
            counter: AtomicU64::new(0),
            failures_left: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `n` calls fail with a retryable error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }

    pub fn call_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for StubPaymentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProcessor for StubPaymentProcessor {
    async fn create_checkout(&self, req: CheckoutRequest) -> Result<CheckoutSession, ServiceError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ServiceError::new(
                "payment-processor",
                ServiceErrorKind::ServerError,
                "stub failure",
            ));
        }
        self.requests.lock().expect("requests lock poisoned").push(req);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CheckoutSession {
            checkout_url: format!("{}/{}", self.base_url, n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn answer_stub_fails_then_recovers() {
        let stub = StubAnswerService::failing_first("hello", 2);
        assert!(stub.ask("q", GuestType::Guest).await.is_err());
        assert!(stub.ask("q", GuestType::Guest).await.is_err());
        assert_eq!(stub.ask("q", GuestType::Guest).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn payment_stub_mints_sequential_links() {
        let stub = StubPaymentProcessor::new();
        let req = CheckoutRequest {
            description: "test".into(),
            amount: 100,
            currency: "inr".into(),
            metadata: HashMap::new(),
        };
        let first = stub.create_checkout(req.clone()).await.unwrap();
        let second = stub.create_checkout(req).await.unwrap();
        assert_ne!(first.checkout_url, second.checkout_url);
        assert_eq!(stub.requests().len(), 2);
    }
}
