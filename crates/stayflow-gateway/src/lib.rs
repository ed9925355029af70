//! The gateway sits between the channel adapters and everything else: it
//! rate-limits, serializes the conversational step under the guest lock,
//! runs the slow effects (answer service, payment processor) after the lock
//! is released, and publishes the resulting events on the per-guest bus.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use stayflow_bus::BusPublisher;
use stayflow_core::catalog::CartLine;
use stayflow_core::config::RateLimitConfig;
use stayflow_core::{
    AddonReceipt, Booking, BookingLedger, Catalog, ConfirmPatch, ConfirmReceipt,
    ConversationEngine, CoreError, Effect, IntentRouter, Session, SessionLocks, SessionStore,
};
use stayflow_schema::{
    BookingStatus, BusMessage, CancelBookingRequest, CancelBookingResponse, Channel,
    ConfirmBookingRequest, ConfirmBookingResponse, DraftBooking, GuestType, InboundMessage,
    Intent, PaymentMode, PurchaseAddonsRequest, PurchaseAddonsResponse, ReplyMessage, Stage,
    StageBookingRequest, StageBookingResponse,
};
use stayflow_services::AnswerService;
use tokio::sync::Mutex;
use uuid::Uuid;

const ANSWER_FALLBACK: &str = "I'm having trouble processing that right now. Please try again.";
const PAYMENT_RETRY: &str = "Sorry, I couldn't reach the payment desk just now. Your booking is \
                             saved; reply 'yes' again in a moment.";

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: chrono::DateTime<Utc>,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            max_tokens: config.burst as f64,
            refill_rate: config.requests_per_minute as f64 / 60.0,
            last_refill: Utc::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-guest token bucket. Buckets are created on first sight and refill
/// continuously at `requests_per_minute`.
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(&self.config));
        bucket.try_consume()
    }
}

pub struct Gateway {
    catalog: Arc<Catalog>,
    store: Arc<SessionStore>,
    locks: Arc<SessionLocks>,
    router: IntentRouter,
    engine: ConversationEngine,
    ledger: Arc<BookingLedger>,
    answers: Arc<dyn AnswerService>,
    bus: BusPublisher,
    rate_limiter: RateLimiter,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        property: impl Into<String>,
        store: Arc<SessionStore>,
        locks: Arc<SessionLocks>,
        ledger: Arc<BookingLedger>,
        answers: Arc<dyn AnswerService>,
        bus: BusPublisher,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            router: IntentRouter::new(catalog.clone()),
            engine: ConversationEngine::new(catalog.clone(), property),
            catalog,
            store,
            locks,
            ledger,
            answers,
            bus,
            rate_limiter,
        }
    }

    /// Run one inbound message through classify, step, commit and effects.
    ///
    /// The guest lock covers only the in-memory part (session lookup, the
    /// engine step, staging, commit). External calls run after the lock is
    /// dropped, so a slow service never blocks the guest's other traffic or
    /// the eviction sweep. Errors from those calls are folded into the reply
    /// text; the returned `Err` is reserved for refusing the message
    /// outright (rate limiting).
    pub async fn handle_inbound(&self, inbound: InboundMessage) -> Result<ReplyMessage> {
        if !self.rate_limiter.check(&inbound.guest_id).await {
            return Err(anyhow::anyhow!("rate limited: too many requests"));
        }

        let guard = self.locks.acquire(&inbound.guest_id).await;

        let looked_up = self
            .store
            .get_or_create(&inbound.guest_id, inbound.channel)
            .await;
        if looked_up.expired_previous {
            tracing::info!(
                guest = %guest_tag(&inbound.guest_id),
                "recycled an expired session"
            );
        }
        let mut session = looked_up.session;

        if session.guest_type.is_none() {
            if let Some(hint) = inbound.guest_type_hint {
                session = self
                    .store
                    .update(&inbound.guest_id, |s| {
                        s.guest_type = Some(hint);
                        if s.stage == Stage::Identify {
                            s.stage = Stage::Start;
                        }
                    })
                    .await
                    .unwrap_or(session);
            }
        }

        let classified = self.router.classify(&inbound.text, session.stage);
        let mut output = self.engine.step(&session, &classified, &inbound.text);

        // Staging is pure bookkeeping, so it happens here while the lock
        // still protects the session's booking_id.
        let mut staged: Option<Result<(Booking, bool), CoreError>> = None;
        if output.effects.contains(&Effect::FinalizeBooking) {
            staged = Some(self.ensure_staged(&inbound, &mut output.session).await);
        }

        if let Err(err) = self
            .store
            .commit(output.expected_stage, output.session.clone())
            .await
        {
            tracing::error!(
                guest = %guest_tag(&inbound.guest_id),
                error = %err,
                "session diverged mid-step; resetting"
            );
            self.store.reset(&inbound.guest_id).await;
            drop(guard);
            let reply = ReplyMessage::from_parts(
                inbound.trace_id,
                &inbound.guest_id,
                inbound.channel,
                output.intent,
                vec![user_message(&err)],
            );
            let _ = self
                .bus
                .publish(BusMessage::MessageReady {
                    reply: reply.clone(),
                })
                .await;
            return Ok(reply);
        }
        drop(guard);

        let mut parts = output.parts.clone();
        let mut actions = output.actions.clone();

        for effect in &output.effects {
            match effect {
                Effect::AskConcierge {
                    question,
                    guest_type,
                } => {
                    let answer = match self.answers.ask(question, *guest_type).await {
                        Ok(answer) => answer,
                        Err(err) => {
                            tracing::warn!(
                                guest = %guest_tag(&inbound.guest_id),
                                error = %err,
                                "answer service unavailable; using fallback"
                            );
                            ANSWER_FALLBACK.to_string()
                        }
                    };
                    parts.insert(0, answer);
                }
                Effect::FinalizeBooking => match staged.take() {
                    Some(Ok((booking, newly_staged))) => {
                        if newly_staged {
                            let _ = self
                                .bus
                                .publish(BusMessage::BookingStaged {
                                    guest_id: inbound.guest_id.clone(),
                                    booking_id: booking.booking_id.clone(),
                                    at: Utc::now(),
                                })
                                .await;
                        }
                        match self
                            .ledger
                            .confirm(&booking.booking_id, ConfirmPatch::default())
                            .await
                        {
                            Ok(receipt) => {
                                if receipt.newly_confirmed {
                                    let _ = self
                                        .bus
                                        .publish(BusMessage::BookingConfirmed {
                                            guest_id: inbound.guest_id.clone(),
                                            booking_id: receipt.booking.booking_id.clone(),
                                            payment_link: receipt.payment_link.clone(),
                                            total_price: receipt.total_price,
                                            at: Utc::now(),
                                        })
                                        .await;
                                }
                                self.store.reset(&inbound.guest_id).await;
                                actions.payment_link = Some(receipt.payment_link.clone());
                                parts.push(self.confirmation_text(&receipt));
                            }
                            Err(err) => {
                                tracing::error!(
                                    guest = %guest_tag(&inbound.guest_id),
                                    booking_id = %booking.booking_id,
                                    error = %err,
                                    "confirmation failed; booking stays staged"
                                );
                                let text = if matches!(
                                    err,
                                    CoreError::ExternalServiceFailure { .. }
                                ) {
                                    PAYMENT_RETRY.to_string()
                                } else {
                                    user_message(&err)
                                };
                                parts.push(text);
                            }
                        }
                    }
                    Some(Err(err)) => {
                        tracing::error!(
                            guest = %guest_tag(&inbound.guest_id),
                            error = %err,
                            "staging failed"
                        );
                        parts.push(user_message(&err));
                    }
                    None => {}
                },
                Effect::PurchaseAddons { extras } => {
                    match self.ledger.purchase_addons(&inbound.guest_id, extras).await {
                        Ok(receipt) => {
                            if let Some(link) = &receipt.payment_link {
                                actions.payment_link = Some(link.clone());
                                // Mid-flow purchases leave the booking
                                // conversation where it was; otherwise the
                                // finished transaction closes the cycle.
                                if !mid_flow(output.session.stage) {
                                    self.store.reset(&inbound.guest_id).await;
                                }
                            }
                            parts.push(self.addon_text(&receipt));
                        }
                        Err(err) => {
                            tracing::error!(
                                guest = %guest_tag(&inbound.guest_id),
                                error = %err,
                                "add-on purchase failed"
                            );
                            let text = if matches!(err, CoreError::ExternalServiceFailure { .. }) {
                                "Sorry, I couldn't set up that payment just now. Please try \
                                 again in a moment."
                                    .to_string()
                            } else {
                                user_message(&err)
                            };
                            parts.push(text);
                        }
                    }
                }
                Effect::CancelBooking { booking_id } => {
                    match self.ledger.cancel(booking_id).await {
                        Ok((booking, newly_cancelled)) => {
                            if newly_cancelled {
                                let _ = self
                                    .bus
                                    .publish(BusMessage::BookingCancelled {
                                        guest_id: inbound.guest_id.clone(),
                                        booking_id: booking.booking_id.clone(),
                                        at: Utc::now(),
                                    })
                                    .await;
                            }
                            self.store.reset(&inbound.guest_id).await;
                            parts.push(format!(
                                "Booking {} is cancelled. Send a message whenever you'd like \
                                 to start again.",
                                booking.booking_id
                            ));
                        }
                        Err(err) => {
                            tracing::error!(
                                guest = %guest_tag(&inbound.guest_id),
                                booking_id = %booking_id,
                                error = %err,
                                "cancellation failed"
                            );
                            parts.push(user_message(&err));
                        }
                    }
                }
            }
        }

        if parts.is_empty() {
            parts.push("I'm not sure I caught that. Could you rephrase?".to_string());
        }

        let mut reply = ReplyMessage::from_parts(
            inbound.trace_id,
            &inbound.guest_id,
            inbound.channel,
            output.intent,
            parts,
        );
        reply.actions = actions;

        tracing::info!(
            trace_id = %inbound.trace_id,
            guest = %guest_tag(&inbound.guest_id),
            channel = inbound.channel.as_str(),
            intent = output.intent.as_str(),
            from_stage = output.expected_stage.as_str(),
            to_stage = output.session.stage.as_str(),
            reply_chars = reply.text.chars().count(),
            "handled inbound message"
        );

        let _ = self
            .bus
            .publish(BusMessage::MessageReady {
                reply: reply.clone(),
            })
            .await;

        Ok(reply)
    }

    /// Reuse the session's staged booking or stage the draft now. Must run
    /// under the guest lock; the flag is true only when this call created
    /// the record.
    async fn ensure_staged(
        &self,
        inbound: &InboundMessage,
        session: &mut Session,
    ) -> Result<(Booking, bool), CoreError> {
        if let Some(booking_id) = &session.booking_id {
            if let Some(existing) = self.ledger.get(booking_id).await {
                return Ok((existing, false));
            }
        }
        let mut draft = session.draft.clone().unwrap_or_default();
        if draft.guest_contact.is_none() {
            draft.guest_contact = Some(
                inbound
                    .contact_email
                    .clone()
                    .unwrap_or_else(|| inbound.guest_id.clone()),
            );
        }
        let booking = self.ledger.stage(&session.guest_id, &draft).await?;
        session.booking_id = Some(booking.booking_id.clone());
        session.draft = Some(draft);
        Ok((booking, true))
    }

    /// Stage a booking from the structured live-chat form. The session is
    /// parked at `idle` so chat messages keep flowing without tripping over
    /// the form-driven flow.
    pub async fn stage_booking(
        &self,
        req: StageBookingRequest,
    ) -> Result<StageBookingResponse, CoreError> {
        let guest_id = req.session_id.clone();
        let draft = DraftBooking {
            room_id: Some(req.room_id),
            check_in: Some(req.check_in),
            check_out: Some(req.check_out),
            guest_name: Some(req.guest_name),
            guest_contact: Some(req.guest_contact),
            ..DraftBooking::default()
        };

        let guard = self.locks.acquire(&guest_id).await;
        self.store.get_or_create(&guest_id, Channel::LiveChat).await;
        let booking = self.ledger.stage(&guest_id, &draft).await?;
        self.store
            .update(&guest_id, |session| {
                session.booking_id = Some(booking.booking_id.clone());
                session.draft = Some(draft.clone());
                session.stage = Stage::Idle;
                // the booking form is only reachable from the guest UI
                if session.guest_type.is_none() {
                    session.guest_type = Some(GuestType::Guest);
                }
            })
            .await;
        drop(guard);

        let _ = self
            .bus
            .publish(BusMessage::BookingStaged {
                guest_id,
                booking_id: booking.booking_id.clone(),
                at: Utc::now(),
            })
            .await;

        tracing::info!(booking_id = %booking.booking_id, "booking staged from form");
        Ok(StageBookingResponse {
            booking_id: booking.booking_id,
            status: booking.status,
        })
    }

    /// Confirm a staged booking, filling gaps from the request. Repeat
    /// calls return the stored link without a second checkout.
    pub async fn confirm_booking(
        &self,
        req: ConfirmBookingRequest,
    ) -> Result<ConfirmBookingResponse, CoreError> {
        let patch = ConfirmPatch {
            room_type: req.room_type,
            nights: req.nights,
            payment_mode: req.payment_mode,
            extras: req.extras,
        };
        let receipt = self.ledger.confirm(&req.booking_id, patch).await?;
        if receipt.newly_confirmed {
            let guard = self.locks.acquire(&receipt.booking.guest_id).await;
            self.store.reset(&receipt.booking.guest_id).await;
            drop(guard);
            let _ = self
                .bus
                .publish(BusMessage::BookingConfirmed {
                    guest_id: receipt.booking.guest_id.clone(),
                    booking_id: receipt.booking.booking_id.clone(),
                    payment_link: receipt.payment_link.clone(),
                    total_price: receipt.total_price,
                    at: Utc::now(),
                })
                .await;
            tracing::info!(
                booking_id = %receipt.booking.booking_id,
                total_price = receipt.total_price,
                "booking confirmed"
            );
        }
        Ok(ConfirmBookingResponse {
            booking_id: receipt.booking.booking_id.clone(),
            status: receipt.booking.status,
            payment_link: receipt.payment_link,
            total_price: receipt.total_price,
        })
    }

    pub async fn cancel_booking(
        &self,
        req: CancelBookingRequest,
    ) -> Result<CancelBookingResponse, CoreError> {
        let (booking, newly_cancelled) = self.ledger.cancel(&req.booking_id).await?;
        if newly_cancelled {
            let guard = self.locks.acquire(&booking.guest_id).await;
            self.store.reset(&booking.guest_id).await;
            drop(guard);
            let _ = self
                .bus
                .publish(BusMessage::BookingCancelled {
                    guest_id: booking.guest_id.clone(),
                    booking_id: booking.booking_id.clone(),
                    at: Utc::now(),
                })
                .await;
            tracing::info!(booking_id = %booking.booking_id, "booking cancelled");
        }
        Ok(CancelBookingResponse {
            booking_id: booking.booking_id,
            status: booking.status,
        })
    }

    /// Price and charge add-ons for a session outside the message flow.
    pub async fn purchase_addons(
        &self,
        req: PurchaseAddonsRequest,
    ) -> Result<PurchaseAddonsResponse, CoreError> {
        let guest_id = req.session_id.clone();
        {
            let _guard = self.locks.acquire(&guest_id).await;
            self.store.get_or_create(&guest_id, Channel::LiveChat).await;
        }

        let receipt = self.ledger.purchase_addons(&guest_id, &req.extras).await?;
        let reply_text = self.addon_text(&receipt);

        if receipt.payment_link.is_some() {
            let guard = self.locks.acquire(&guest_id).await;
            let parked = self
                .store
                .get(&guest_id)
                .await
                .map(|session| !mid_flow(session.stage))
                .unwrap_or(false);
            if parked {
                self.store.reset(&guest_id).await;
            }
            drop(guard);
        }

        let mut reply = ReplyMessage::from_parts(
            Uuid::new_v4(),
            &guest_id,
            Channel::LiveChat,
            Intent::AddonRequest,
            vec![reply_text.clone()],
        );
        reply.actions.payment_link = receipt.payment_link.clone();
        reply.actions.addons = receipt.lines.iter().map(|line| line.key.clone()).collect();
        let _ = self.bus.publish(BusMessage::MessageReady { reply }).await;

        Ok(PurchaseAddonsResponse {
            items: receipt.lines.iter().map(line_label).collect(),
            total: receipt.total,
            payment_link: receipt.payment_link,
            reply: reply_text,
        })
    }

    /// Snapshot of the guest's session, if one exists.
    pub async fn session_state(&self, guest_id: &str) -> Option<Session> {
        self.store.get(guest_id).await
    }

    /// Operator-triggered reset back to a fresh cycle.
    pub async fn reset_session(&self, guest_id: &str) -> Option<Session> {
        let guard = self.locks.acquire(guest_id).await;
        let session = self.store.reset(guest_id).await;
        drop(guard);
        session
    }

    fn confirmation_text(&self, receipt: &ConfirmReceipt) -> String {
        let booking = &receipt.booking;
        let room = booking.room_type.as_deref().unwrap_or("your room");
        let nights = booking.nights.unwrap_or(0);
        let currency = self.catalog.currency().to_uppercase();
        let closing = match booking.payment_mode {
            Some(PaymentMode::Cash) => format!(
                "Pay the holding deposit here to secure it: {}",
                receipt.payment_link
            ),
            _ => format!("Complete your payment here: {}", receipt.payment_link),
        };
        format!(
            "Booking {} confirmed: {}, {} night(s), total {} {}. {}",
            booking.booking_id, room, nights, receipt.total_price, currency, closing
        )
    }

    fn addon_text(&self, receipt: &AddonReceipt) -> String {
        if receipt.lines.is_empty() {
            if !receipt.complimentary.is_empty() {
                return format!(
                    "{} is on us, no payment needed. Anything else I can arrange?",
                    receipt.complimentary.join(" and ")
                );
            }
            return "I couldn't match that to anything we offer. Could you name the add-on \
                    again?"
                .to_string();
        }
        let names: Vec<String> = receipt.lines.iter().map(line_label).collect();
        let currency = self.catalog.currency().to_uppercase();
        let mut text = format!(
            "Add-ons: {}. Total {} {}.",
            names.join(", "),
            receipt.total,
            currency
        );
        if !receipt.complimentary.is_empty() {
            text.push_str(&format!(
                " {} is on us.",
                receipt.complimentary.join(" and ")
            ));
        }
        if let Some(link) = &receipt.payment_link {
            text.push_str(&format!(" Complete your payment here: {link}"));
        }
        text
    }
}

fn line_label(line: &CartLine) -> String {
    if line.quantity > 1 {
        format!("{} x{}", line.label, line.quantity)
    } else {
        line.label.clone()
    }
}

fn mid_flow(stage: Stage) -> bool {
    matches!(
        stage,
        Stage::RoomSelection | Stage::NightsInput | Stage::PaymentMethod | Stage::Confirm
    )
}

fn user_message(err: &CoreError) -> String {
    match err {
        CoreError::InvalidInput(detail) => format!("That doesn't look right: {detail}."),
        CoreError::IncompleteDraft(field) => format!(
            "Your booking is still missing {field}, so I couldn't finalize it. Reply 'cancel' \
             to discard it and start over."
        ),
        CoreError::NotFound(_) => "I couldn't find that booking.".to_string(),
        CoreError::AlreadyFinalized { status, .. } => match status {
            BookingStatus::Cancelled => "That booking was already cancelled. Say 'book a room' \
                                         whenever you'd like a new one."
                .to_string(),
            _ => "That booking is already confirmed.".to_string(),
        },
        CoreError::ExternalServiceFailure { .. } => ANSWER_FALLBACK.to_string(),
        CoreError::ConcurrencyViolation { .. } => {
            "Something went out of step on my side, so I've reset our conversation. Sorry \
             about that; how can I help?"
                .to_string()
        }
    }
}

/// Guests are keyed by contact addresses; logs carry a short stable tag
/// instead of the raw value.
fn guest_tag(guest_id: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    guest_id.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use stayflow_bus::EventBus;
    use stayflow_core::config::CatalogConfig;
    use stayflow_services::{StubAnswerService, StubPaymentProcessor};
    use tokio::sync::mpsc::Receiver;

    use super::*;

    const PROPERTY: &str = "Acacia Ridge Lodge";

    struct Harness {
        gateway: Gateway,
        bus: Arc<EventBus>,
        payments: Arc<StubPaymentProcessor>,
        ledger: Arc<BookingLedger>,
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(StubAnswerService::new("Breakfast runs 7 to 10.")),
            RateLimitConfig::default(),
        )
    }

    fn harness_with(answers: Arc<StubAnswerService>, rate_limit: RateLimitConfig) -> Harness {
        let catalog = Arc::new(Catalog::from_config(&CatalogConfig::default()));
        let store = Arc::new(SessionStore::new(60));
        let locks = Arc::new(SessionLocks::new());
        let payments = Arc::new(StubPaymentProcessor::new());
        let ledger = Arc::new(BookingLedger::new(catalog.clone(), payments.clone()));
        let bus = Arc::new(EventBus::new(16));
        let gateway = Gateway::new(
            catalog,
            PROPERTY,
            store,
            locks,
            ledger.clone(),
            answers,
            bus.publisher(),
            RateLimiter::new(rate_limit),
        );
        Harness {
            gateway,
            bus,
            payments,
            ledger,
        }
    }

    fn inbound(guest_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            trace_id: Uuid::new_v4(),
            guest_id: guest_id.into(),
            channel: Channel::Webhook,
            text: text.into(),
            guest_type_hint: None,
            contact_email: None,
            at: Utc::now(),
        }
    }

    async fn say(h: &Harness, guest_id: &str, text: &str) -> ReplyMessage {
        h.gateway.handle_inbound(inbound(guest_id, text)).await.unwrap()
    }

    fn drain(rx: &mut Receiver<BusMessage>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            names.push(msg.event_name());
        }
        names
    }

    #[tokio::test]
    async fn webhook_happy_path_confirms_and_resets() {
        let h = harness();
        let mut rx = h.bus.subscribe("g-1").await;

        say(&h, "g-1", "guest").await;
        let menu = say(&h, "g-1", "I want to book a room").await;
        assert!(menu.text.contains("1. Safari Tent"));
        assert!(menu.actions.show_booking_form);

        say(&h, "g-1", "2").await;
        say(&h, "g-1", "3").await;
        let summary = say(&h, "g-1", "1").await;
        assert!(summary.text.contains("Star Bed Suite"));
        assert!(summary.text.contains("Total: 54000 INR"));

        let done = say(&h, "g-1", "yes").await;
        assert!(done.text.contains("confirmed"));
        let link = done.actions.payment_link.clone().unwrap();
        assert!(done.text.contains(&link));

        // clean cycle afterwards
        let session = h.gateway.session_state("g-1").await.unwrap();
        assert_eq!(session.stage, Stage::Identify);
        assert!(session.booking_id.is_none());
        assert_eq!(h.payments.call_count(), 1);

        let events = drain(&mut rx);
        assert!(events.contains(&"booking_staged"));
        assert!(events.contains(&"booking_confirmed"));
    }

    #[tokio::test]
    async fn non_guest_booking_is_declined() {
        let h = harness();
        say(&h, "g-2", "non-guest").await;
        let reply = say(&h, "g-2", "I want to book a room").await;
        assert!(reply.text.contains("registered guests"));
        assert!(!reply.actions.show_booking_form);
        assert_eq!(h.payments.call_count(), 0);
    }

    #[tokio::test]
    async fn payment_outage_keeps_booking_staged_for_retry() {
        let h = harness();
        let mut rx = h.bus.subscribe("g-3").await;
        say(&h, "g-3", "guest").await;
        say(&h, "g-3", "book a room").await;
        say(&h, "g-3", "1").await;
        say(&h, "g-3", "2").await;
        say(&h, "g-3", "1").await;

        h.payments.fail_next(1);
        let failed = say(&h, "g-3", "yes").await;
        assert!(failed.text.contains("payment desk"));
        assert!(failed.actions.payment_link.is_none());

        let session = h.gateway.session_state("g-3").await.unwrap();
        assert_eq!(session.stage, Stage::Confirm);
        let booking_id = session.booking_id.clone().unwrap();

        let retried = say(&h, "g-3", "yes").await;
        assert!(retried.text.contains(&booking_id));
        assert!(retried.actions.payment_link.is_some());
        // exactly one checkout session was ever minted
        assert_eq!(h.payments.call_count(), 1);

        // staged exactly once across the retry
        let events = drain(&mut rx);
        assert_eq!(
            events.iter().filter(|name| **name == "booking_staged").count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|name| **name == "booking_confirmed")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn answer_outage_falls_back_and_holds_stage() {
        let h = harness_with(
            Arc::new(StubAnswerService::failing_first("unused", 5)),
            RateLimitConfig::default(),
        );
        say(&h, "g-4", "guest").await;
        say(&h, "g-4", "book a room").await;
        say(&h, "g-4", "1").await;

        let reply = say(&h, "g-4", "what time is dinner served?").await;
        assert_eq!(reply.parts[0], ANSWER_FALLBACK);
        assert!(reply.text.contains("How many nights"));
        assert_eq!(
            h.gateway.session_state("g-4").await.unwrap().stage,
            Stage::NightsInput
        );
    }

    #[tokio::test]
    async fn addon_purchase_mid_flow_keeps_the_draft() {
        let h = harness();
        say(&h, "g-5", "guest").await;
        say(&h, "g-5", "book a room").await;
        say(&h, "g-5", "1").await;

        let reply = say(&h, "g-5", "add a spa and a brownie please").await;
        assert!(reply.text.contains("Total 4950 INR"));
        assert!(reply.actions.payment_link.is_some());

        let session = h.gateway.session_state("g-5").await.unwrap();
        assert_eq!(session.stage, Stage::NightsInput);
        assert_eq!(
            session.draft.unwrap().room_type.as_deref(),
            Some("Safari Tent")
        );

        // the flow picks up where it left off
        let next = say(&h, "g-5", "2").await;
        assert!(next.text.contains("pay"));
    }

    #[tokio::test]
    async fn addon_purchase_outside_a_flow_closes_the_cycle() {
        let h = harness();
        say(&h, "g-6", "guest").await;
        let reply = say(&h, "g-6", "could you arrange a game drive for us").await;
        assert!(reply.actions.payment_link.is_some());
        assert_eq!(
            h.gateway.session_state("g-6").await.unwrap().stage,
            Stage::Identify
        );
    }

    #[tokio::test]
    async fn complimentary_addons_skip_checkout() {
        let h = harness();
        say(&h, "g-7", "guest").await;
        let reply = say(&h, "g-7", "could I get a morning coffee").await;
        assert!(reply.text.contains("on us"));
        assert!(reply.actions.payment_link.is_none());
        assert_eq!(h.payments.call_count(), 0);
        // nothing to pay for, so the cycle is not reset
        assert_eq!(
            h.gateway.session_state("g-7").await.unwrap().stage,
            Stage::Start
        );
    }

    #[tokio::test]
    async fn rate_limited_guest_is_refused() {
        let h = harness_with(
            Arc::new(StubAnswerService::new("ok")),
            RateLimitConfig {
                requests_per_minute: 60,
                burst: 1,
            },
        );
        assert!(h.gateway.handle_inbound(inbound("g-8", "hello")).await.is_ok());
        let refused = h.gateway.handle_inbound(inbound("g-8", "hello")).await;
        assert!(refused.unwrap_err().to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn live_chat_hint_skips_identification() {
        let h = harness();
        let mut msg = inbound("chat-1", "I want to book a room");
        msg.channel = Channel::LiveChat;
        msg.guest_type_hint = Some(GuestType::Guest);

        let reply = h.gateway.handle_inbound(msg).await.unwrap();
        assert!(reply.text.contains("1. Safari Tent"));
        assert_eq!(
            h.gateway.session_state("chat-1").await.unwrap().stage,
            Stage::RoomSelection
        );
    }

    #[tokio::test]
    async fn contact_email_becomes_the_booking_contact() {
        let h = harness();
        let drive = |text: &str| {
            let mut msg = inbound("chat-2", text);
            msg.channel = Channel::LiveChat;
            msg.guest_type_hint = Some(GuestType::Guest);
            msg.contact_email = Some("amara@example.com".into());
            msg
        };
        h.gateway.handle_inbound(drive("book a room")).await.unwrap();
        h.gateway.handle_inbound(drive("1")).await.unwrap();
        h.gateway.handle_inbound(drive("2")).await.unwrap();
        h.gateway.handle_inbound(drive("1")).await.unwrap();
        h.gateway.handle_inbound(drive("yes")).await.unwrap();

        let requests = h.payments.requests();
        assert_eq!(requests.len(), 1);
        let booking_id = requests[0].metadata["booking_id"].clone();
        let record = h.ledger.get(&booking_id).await.unwrap();
        assert_eq!(record.guest_contact.as_deref(), Some("amara@example.com"));
        assert_eq!(record.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn structured_form_flow_stages_confirms_once() {
        let h = harness();
        let mut rx = h.bus.subscribe("chat-3").await;

        let staged = h
            .gateway
            .stage_booking(StageBookingRequest {
                session_id: "chat-3".into(),
                room_id: "double_room".into(),
                check_in: "2026-09-01".into(),
                check_out: "2026-09-04".into(),
                guest_name: "Amara Njoroge".into(),
                guest_contact: "amara@example.com".into(),
            })
            .await
            .unwrap();
        assert_eq!(staged.status, BookingStatus::Staged);

        let session = h.gateway.session_state("chat-3").await.unwrap();
        assert_eq!(session.stage, Stage::Idle);
        assert_eq!(session.booking_id.as_deref(), Some(staged.booking_id.as_str()));

        let confirmed = h
            .gateway
            .confirm_booking(ConfirmBookingRequest {
                booking_id: staged.booking_id.clone(),
                room_type: Some("Double Room".into()),
                nights: Some(3),
                payment_mode: Some(PaymentMode::Online),
                extras: vec!["spa".into()],
            })
            .await
            .unwrap();
        assert_eq!(confirmed.total_price, 30000);
        assert_eq!(h.payments.call_count(), 1);

        // confirming twice reuses the stored link
        let again = h
            .gateway
            .confirm_booking(ConfirmBookingRequest {
                booking_id: staged.booking_id.clone(),
                room_type: None,
                nights: None,
                payment_mode: None,
                extras: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(again.payment_link, confirmed.payment_link);
        assert_eq!(h.payments.call_count(), 1);

        // session cycles back after confirmation
        assert_eq!(
            h.gateway.session_state("chat-3").await.unwrap().stage,
            Stage::Identify
        );

        let events = drain(&mut rx);
        assert_eq!(
            events.iter().filter(|name| **name == "booking_staged").count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|name| **name == "booking_confirmed")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn structured_cancel_publishes_once() {
        let h = harness();
        let mut rx = h.bus.subscribe("chat-4").await;
        let staged = h
            .gateway
            .stage_booking(StageBookingRequest {
                session_id: "chat-4".into(),
                room_id: "suite".into(),
                check_in: "2026-09-01".into(),
                check_out: "2026-09-02".into(),
                guest_name: "N".into(),
                guest_contact: "n@example.com".into(),
            })
            .await
            .unwrap();

        let first = h
            .gateway
            .cancel_booking(CancelBookingRequest {
                booking_id: staged.booking_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(first.status, BookingStatus::Cancelled);

        let second = h
            .gateway
            .cancel_booking(CancelBookingRequest {
                booking_id: staged.booking_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(second.status, BookingStatus::Cancelled);

        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|name| **name == "booking_cancelled")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn conversational_cancel_after_payment_outage() {
        let h = harness();
        say(&h, "g-9", "guest").await;
        say(&h, "g-9", "book a room").await;
        say(&h, "g-9", "3").await;
        say(&h, "g-9", "4").await;
        say(&h, "g-9", "2").await;

        h.payments.fail_next(1);
        say(&h, "g-9", "yes").await;
        let session = h.gateway.session_state("g-9").await.unwrap();
        let booking_id = session.booking_id.clone().unwrap();

        let reply = say(&h, "g-9", "cancel").await;
        assert!(reply.text.contains(&booking_id));
        assert!(reply.text.contains("cancelled"));
        assert_eq!(
            h.gateway.session_state("g-9").await.unwrap().stage,
            Stage::Identify
        );
    }

    #[tokio::test]
    async fn structured_purchase_addons_prices_and_replies() {
        let h = harness();
        let response = h
            .gateway
            .purchase_addons(PurchaseAddonsRequest {
                session_id: "chat-5".into(),
                extras: vec!["spa".into(), "brownie".into(), "brownie".into()],
            })
            .await
            .unwrap();
        assert_eq!(response.total, 5400);
        assert!(response.payment_link.is_some());
        assert!(response.items.iter().any(|item| item.contains("x2")));
        assert!(response.reply.contains("Total 5400 INR"));
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_burst() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst: 2,
        });
        assert!(limiter.check("g-1").await);
        assert!(limiter.check("g-1").await);
        assert!(!limiter.check("g-1").await);
    }

    #[tokio::test]
    async fn rate_limiter_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst: 1,
        });
        assert!(limiter.check("g-1").await);
        assert!(limiter.check("g-2").await);
        assert!(!limiter.check("g-1").await);
    }

    #[tokio::test]
    async fn rate_limiter_refills_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 6000,
            burst: 1,
        });
        assert!(limiter.check("g-1").await);
        assert!(!limiter.check("g-1").await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("g-1").await);
    }

    #[tokio::test]
    async fn concurrent_messages_apply_in_serial_order() {
        let h = harness();
        say(&h, "g-11", "guest").await;
        say(&h, "g-11", "book a room").await;

        // Both orders walk room choice then nights, so the serial outcome
        // is the payment prompt either way.
        let (a, b) = tokio::join!(
            h.gateway.handle_inbound(inbound("g-11", "1")),
            h.gateway.handle_inbound(inbound("g-11", "1")),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(
            h.gateway.session_state("g-11").await.unwrap().stage,
            Stage::PaymentMethod
        );
    }

    #[tokio::test]
    async fn every_reply_reaches_bus_subscribers() {
        let h = harness();
        let mut rx = h.bus.subscribe("g-10").await;
        say(&h, "g-10", "guest").await;
        let events = drain(&mut rx);
        assert_eq!(events, vec!["message"]);
    }
}
