//! Per-guest session state and the in-memory store.
//!
//! A session is keyed by guest id and carries the conversation stage, the
//! identified guest type and the booking draft. Lookup always succeeds:
//! unknown or expired guests get a fresh session at the `identify` stage.
//! Expiry replaces state in place and eviction removes entries entirely;
//! both happen only when no step is in flight for that guest.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stayflow_schema::{Channel, DraftBooking, GuestType, Stage};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::session_lock::SessionLocks;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub guest_id: String,
    pub channel: Channel,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_type: Option<GuestType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftBooking>,
    /// Set once a booking is staged for this session; cleared on reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(guest_id: &str, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            guest_id: guest_id.to_string(),
            channel,
            stage: Stage::Identify,
            guest_type: None,
            draft: None,
            booking_id: None,
            created_at: now,
            last_active: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_expired(&self, ttl_minutes: i64) -> bool {
        Utc::now() - self.last_active > chrono::Duration::minutes(ttl_minutes)
    }

    /// Back to a clean cycle: fresh stage, no identity, no draft.
    pub fn reset(&mut self) {
        self.stage = Stage::Identify;
        self.guest_type = None;
        self.draft = None;
        self.booking_id = None;
        self.touch();
    }

    /// The draft, created empty if absent.
    pub fn draft_mut(&mut self) -> &mut DraftBooking {
        self.draft.get_or_insert_with(DraftBooking::default)
    }
}

pub struct SessionResult {
    pub session: Session,
    /// True when an expired session was replaced by this lookup.
    pub expired_previous: bool,
}

pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl_minutes: i64,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl_minutes,
        }
    }

    /// Fetch the guest's session, creating or recycling as needed.
    pub async fn get_or_create(&self, guest_id: &str, channel: Channel) -> SessionResult {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(guest_id) {
            Some(existing) if existing.is_expired(self.ttl_minutes) => {
                let fresh = Session::new(guest_id, channel);
                *existing = fresh.clone();
                SessionResult {
                    session: fresh,
                    expired_previous: true,
                }
            }
            Some(existing) => {
                existing.touch();
                SessionResult {
                    session: existing.clone(),
                    expired_previous: false,
                }
            }
            None => {
                let fresh = Session::new(guest_id, channel);
                sessions.insert(guest_id.to_string(), fresh.clone());
                SessionResult {
                    session: fresh,
                    expired_previous: false,
                }
            }
        }
    }

    /// Read-only lookup; no touch, no create.
    pub async fn get(&self, guest_id: &str) -> Option<Session> {
        self.sessions.read().await.get(guest_id).cloned()
    }

    /// Write back the session produced by an engine step. The stored entry
    /// must still be at the stage the step read; anything else means the
    /// per-guest serialization invariant broke.
    pub async fn commit(
        &self,
        expected_stage: Stage,
        session: Session,
    ) -> Result<Session, CoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(current) = sessions.get_mut(&session.guest_id) else {
            return Err(CoreError::ConcurrencyViolation {
                guest_id: session.guest_id.clone(),
                detail: "session evicted mid-step".to_string(),
            });
        };
        if current.stage != expected_stage {
            return Err(CoreError::ConcurrencyViolation {
                guest_id: session.guest_id.clone(),
                detail: format!(
                    "stage moved from {} to {} mid-step",
                    expected_stage.as_str(),
                    current.stage.as_str()
                ),
            });
        }
        *current = session;
        current.touch();
        Ok(current.clone())
    }

    /// Targeted mutation of an existing session. Returns the updated copy,
    /// or `None` for unknown guests.
    pub async fn update<F>(&self, guest_id: &str, mutate: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(guest_id)?;
        mutate(session);
        session.touch();
        Some(session.clone())
    }

    /// Reset the guest's session in place, keeping the entry.
    pub async fn reset(&self, guest_id: &str) -> Option<Session> {
        self.update(guest_id, |s| s.reset()).await
    }

    /// Remove expired sessions, skipping any guest with an in-flight step.
    /// Returns how many entries were evicted.
    pub async fn evict_idle(&self, locks: &SessionLocks) -> usize {
        let candidates: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| s.is_expired(self.ttl_minutes))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut evicted = 0;
        for guest_id in candidates {
            // A busy guest keeps its session; the sweep will see it again.
            let Some(_guard) = locks.try_acquire(&guest_id).await else {
                continue;
            };
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get(&guest_id) {
                if session.is_expired(self.ttl_minutes) {
                    sessions.remove(&guest_id);
                    evicted += 1;
                }
            }
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
