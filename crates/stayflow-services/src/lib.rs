//! External service clients: the Q&A answer service and the payment
//! processor. Both are behind traits so the gateway and booking ledger can
//! run against in-process stubs in tests and in offline mode.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stayflow_schema::GuestType;
use thiserror::Error;

pub mod answer;
pub mod payments;
pub mod stub;

pub use answer::HttpAnswerService;
pub use payments::HttpPaymentProcessor;
pub use stub::{StubAnswerService, StubPaymentProcessor};

/// Failure classification shared by both clients. Drives retry decisions:
/// only rate limits, server errors and timeouts are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ServiceErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ServiceErrorKind::RateLimit,
            401 | 403 => ServiceErrorKind::AuthError,
            400 | 422 => ServiceErrorKind::InvalidRequest,
            500..=599 => ServiceErrorKind::ServerError,
            _ => ServiceErrorKind::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceErrorKind::RateLimit | ServiceErrorKind::ServerError | ServiceErrorKind::Timeout
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{service} request failed ({kind:?}): {message}")]
pub struct ServiceError {
    pub service: &'static str,
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: &'static str, kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            service,
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Conversational Q&A backend. Answers free-form guest questions; never
/// involved in booking state.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn ask(&self, question: &str, guest_type: GuestType) -> Result<String, ServiceError>;
}

/// Checkout link factory. One call per payable transaction; callers must not
/// retry blindly since a second call mints a second charge.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout(&self, req: CheckoutRequest) -> Result<CheckoutSession, ServiceError>;
}

/// One payable transaction.
///
/// `amount` is in minor currency units (paise for INR); catalog prices are
/// whole units and get converted exactly once, at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub description: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ServiceErrorKind::from_status(429), ServiceErrorKind::RateLimit);
        assert_eq!(ServiceErrorKind::from_status(401), ServiceErrorKind::AuthError);
        assert_eq!(ServiceErrorKind::from_status(403), ServiceErrorKind::AuthError);
        assert_eq!(ServiceErrorKind::from_status(400), ServiceErrorKind::InvalidRequest);
        assert_eq!(ServiceErrorKind::from_status(422), ServiceErrorKind::InvalidRequest);
        assert_eq!(ServiceErrorKind::from_status(500), ServiceErrorKind::ServerError);
        assert_eq!(ServiceErrorKind::from_status(503), ServiceErrorKind::ServerError);
        assert_eq!(ServiceErrorKind::from_status(302), ServiceErrorKind::Unknown);
    }

    #[test]
    fn retryable_kinds() {
        assert!(ServiceErrorKind::RateLimit.is_retryable());
        assert!(ServiceErrorKind::ServerError.is_retryable());
        assert!(ServiceErrorKind::Timeout.is_retryable());
        assert!(!ServiceErrorKind::AuthError.is_retryable());
        assert!(!ServiceErrorKind::InvalidRequest.is_retryable());
        assert!(!ServiceErrorKind::Unknown.is_retryable());
    }
}
