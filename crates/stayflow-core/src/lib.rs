//! Core concierge logic: configuration, the room and add-on catalog, session
//! state, intent routing, the conversation engine, and the booking ledger.
//!
//! Everything here is transport-agnostic. The gateway crate wires these
//! pieces to channels, external services and the event bus.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod router;
pub mod session;
pub mod session_lock;

pub use catalog::Catalog;
pub use config::{load_config, StayflowConfig};
pub use engine::{ConversationEngine, Effect, EngineOutput};
pub use error::CoreError;
pub use ledger::{AddonReceipt, Booking, BookingLedger, ConfirmPatch, ConfirmReceipt};
pub use router::{Classified, IntentRouter};
pub use session::{Session, SessionResult, SessionStore};
pub use session_lock::{SessionGuard, SessionLocks};
