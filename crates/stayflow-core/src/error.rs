//! Failure taxonomy for booking and conversation operations.

use stayflow_schema::BookingStatus;
use stayflow_services::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Input failed validation; the caller reprompts without changing state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A booking was staged or confirmed with required fields still missing.
    #[error("draft booking is missing {0}")]
    IncompleteDraft(&'static str),

    #[error("booking not found: {0}")]
    NotFound(String),

    /// The booking already reached a terminal state that forbids this
    /// transition. Idempotent repeats (confirm on confirmed, cancel on
    /// cancelled) succeed before this is ever raised.
    #[error("booking {booking_id} is already {}", .status.as_str())]
    AlreadyFinalized {
        booking_id: String,
        status: BookingStatus,
    },

    /// An external dependency failed after any internal retries; session
    /// stage and booking status were left untouched.
    #[error("{service} unavailable: {detail}")]
    ExternalServiceFailure {
        service: &'static str,
        detail: String,
    },

    /// Session state moved underneath an in-flight step. Indicates a bug in
    /// per-guest serialization; the caller resets the session.
    #[error("session state changed mid-step for guest {guest_id}: {detail}")]
    ConcurrencyViolation { guest_id: String, detail: String },
}

impl From<ServiceError> for CoreError {
    fn from(e: ServiceError) -> Self {
        CoreError::ExternalServiceFailure {
            service: e.service,
            detail: e.message,
        }
    }
}
