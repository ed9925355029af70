//! The conversation state machine.
//!
//! `step` is pure: it takes a session snapshot plus a classified message and
//! returns the next session, the reply fragments that are already known, and
//! the effects that involve external services. The caller commits the
//! session under the guest lock, releases it, and only then runs the
//! effects, so a slow payment processor or answer service never blocks other
//! messages. Stage transitions that depend on an external call succeeding
//! (confirmation) are therefore not made here at all; the caller applies
//! them once the call has succeeded.

use std::sync::Arc;

use stayflow_schema::{DraftBooking, GuestType, Intent, PaymentMode, ReplyActions, Stage};

use crate::catalog::{Catalog, Room};
use crate::router::{confirm_token, identify_token, Classified, ConfirmToken};
use crate::session::Session;

/// Work that must happen outside the guest lock.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Forward the raw text to the answer service; its reply is prepended
    /// to the parts already produced.
    AskConcierge {
        question: String,
        guest_type: GuestType,
    },
    /// Stage the session's draft (unless already staged) and confirm it,
    /// producing a payment link. On success the session resets.
    FinalizeBooking,
    /// Price the add-ons and produce a checkout link.
    PurchaseAddons { extras: Vec<String> },
    /// Cancel the staged booking attached to this session.
    CancelBooking { booking_id: String },
}

pub struct EngineOutput {
    /// Post-step session, to be committed against `expected_stage`.
    pub session: Session,
    /// Stage the step started from.
    pub expected_stage: Stage,
    /// Reply fragments produced by the stage logic itself.
    pub parts: Vec<String>,
    pub effects: Vec<Effect>,
    pub intent: Intent,
    pub actions: ReplyActions,
}

pub struct ConversationEngine {
    catalog: Arc<Catalog>,
    property: String,
}

impl ConversationEngine {
    pub fn new(catalog: Arc<Catalog>, property: impl Into<String>) -> Self {
        Self {
            catalog,
            property: property.into(),
        }
    }

    pub fn step(&self, session: &Session, classified: &Classified, text: &str) -> EngineOutput {
        let mut next = session.clone();
        let expected_stage = session.stage;
        let mut parts = Vec::new();
        let mut effects = Vec::new();
        let mut actions = ReplyActions::default();

        match classified.intent {
            Intent::FormInput => self.apply_form_input(&mut next, text, &mut parts, &mut effects),
            Intent::BookingRequest => {
                self.apply_booking_request(&mut next, &mut parts, &mut actions)
            }
            Intent::AddonRequest => {
                let mut seen: Vec<String> = Vec::new();
                for key in &classified.addons {
                    if !seen.contains(key) {
                        seen.push(key.clone());
                    }
                }
                actions.addons = seen;
                effects.push(Effect::PurchaseAddons {
                    extras: classified.addons.clone(),
                });
            }
            Intent::FreeForm => {
                effects.push(Effect::AskConcierge {
                    question: text.to_string(),
                    guest_type: next.guest_type.unwrap_or(GuestType::NonGuest),
                });
                // The booking flow and Q&A are independent: a question does
                // not advance the form, but the due prompt rides along.
                if let Some(prompt) = self.pending_prompt(&next) {
                    parts.push(prompt);
                }
            }
        }

        EngineOutput {
            session: next,
            expected_stage,
            parts,
            effects,
            intent: classified.intent,
            actions,
        }
    }

    fn apply_form_input(
        &self,
        session: &mut Session,
        text: &str,
        parts: &mut Vec<String>,
        effects: &mut Vec<Effect>,
    ) {
        let t = text.trim().to_lowercase();
        match session.stage {
            Stage::Identify => match identify_token(&t) {
                Some(GuestType::Guest) => {
                    session.guest_type = Some(GuestType::Guest);
                    session.stage = Stage::Start;
                    parts.push(self.guest_welcome());
                }
                Some(GuestType::NonGuest) => {
                    session.guest_type = Some(GuestType::NonGuest);
                    session.stage = Stage::Start;
                    parts.push(self.non_guest_welcome());
                }
                None => parts.push(self.identify_prompt()),
            },
            Stage::RoomSelection => {
                let choice = t
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| self.catalog.room_by_choice(n));
                match choice {
                    Some(room) => {
                        let prompt = self.nights_prompt(room);
                        session.draft_mut().room_type = Some(room.name.clone());
                        session.stage = Stage::NightsInput;
                        parts.push(prompt);
                    }
                    None => parts.push(self.invalid_room_choice()),
                }
            }
            Stage::NightsInput => match t.parse::<u32>() {
                Ok(nights) if self.catalog.nights_valid(nights) => {
                    session.draft_mut().nights = Some(nights);
                    session.stage = Stage::PaymentMethod;
                    parts.push(self.payment_prompt(session));
                }
                _ => parts.push(self.invalid_nights()),
            },
            Stage::PaymentMethod => {
                let mode = match t.as_str() {
                    "1" | "online" => Some(PaymentMode::Online),
                    "2" | "cash" => Some(PaymentMode::Cash),
                    _ => None,
                };
                match mode {
                    Some(mode) => {
                        session.draft_mut().payment_mode = Some(mode);
                        session.stage = Stage::Confirm;
                        parts.push(self.confirm_summary(session));
                    }
                    None => parts.push(self.invalid_payment_choice()),
                }
            }
            Stage::Confirm => match confirm_token(&t) {
                Some(ConfirmToken::Yes) => effects.push(Effect::FinalizeBooking),
                Some(ConfirmToken::Cancel) => match session.booking_id.clone() {
                    Some(booking_id) => effects.push(Effect::CancelBooking { booking_id }),
                    None => {
                        session.draft = None;
                        session.stage = Stage::Start;
                        parts.push(
                            "No problem, I've set that booking aside. Anything else I can help with?"
                                .to_string(),
                        );
                    }
                },
                Some(ConfirmToken::No) | None => parts.push(self.confirm_reprompt(session)),
            },
            Stage::Start | Stage::Idle => parts.push(self.help_prompt()),
        }
    }

    fn apply_booking_request(
        &self,
        session: &mut Session,
        parts: &mut Vec<String>,
        actions: &mut ReplyActions,
    ) {
        match session.guest_type {
            Some(GuestType::Guest) => {
                session.draft = Some(DraftBooking::default());
                session.stage = Stage::RoomSelection;
                actions.show_booking_form = true;
                parts.push(self.room_menu_prompt());
            }
            Some(GuestType::NonGuest) => parts.push(self.non_guest_booking_decline()),
            None => parts.push(self.identify_first_prompt()),
        }
    }

    /// The prompt the current stage is still waiting to have answered, if
    /// any. Appended to free-form replies so mid-flow questions do not
    /// derail the form.
    fn pending_prompt(&self, session: &Session) -> Option<String> {
        match session.stage {
            Stage::Identify => Some(self.identify_prompt()),
            Stage::RoomSelection => Some(self.room_menu_prompt()),
            Stage::NightsInput => Some(self.nights_reprompt()),
            Stage::PaymentMethod => Some(self.payment_prompt(session)),
            Stage::Confirm => Some(self.confirm_reprompt(session)),
            Stage::Start | Stage::Idle => None,
        }
    }

    fn identify_prompt(&self) -> String {
        format!(
            "Welcome to {}! Are you staying with us? Reply 'guest' if you have a reservation or 'non-guest' if you're visiting.",
            self.property
        )
    }

    fn identify_first_prompt(&self) -> String {
        "Happy to arrange that. First, are you staying with us? Reply 'guest' or 'non-guest'."
            .to_string()
    }

    fn guest_welcome(&self) -> String {
        format!(
            "Lovely to have you with us. Ask me anything about {}, say 'book a room' to arrange a stay, or name an add-on like a spa session or game drive.",
            self.property
        )
    }

    fn non_guest_welcome(&self) -> String {
        format!(
            "Welcome! I can answer questions about {}. Room bookings are reserved for registered guests, but ask away.",
            self.property
        )
    }

    fn non_guest_booking_decline(&self) -> String {
        "Room bookings are available to our registered guests only. Please speak to reception to arrange a stay; meanwhile I'm happy to answer any questions."
            .to_string()
    }

    fn help_prompt(&self) -> String {
        format!(
            "Ask me anything about {}, say 'book a room' to arrange a stay, or name an add-on to purchase it.",
            self.property
        )
    }

    fn room_menu_prompt(&self) -> String {
        format!(
            "Here are our rooms:\n{}\n\nReply with a number (1-{}) to choose.",
            self.catalog.room_menu(),
            self.catalog.room_count()
        )
    }

    fn invalid_room_choice(&self) -> String {
        format!("That's not one of our rooms.\n\n{}", self.room_menu_prompt())
    }

    fn nights_prompt(&self, room: &Room) -> String {
        let (min, max) = self.catalog.nights_range();
        format!(
            "{} it is ({} {} per night). How many nights will you be staying? ({}-{})",
            room.name,
            room.rate,
            self.catalog.currency().to_uppercase(),
            min,
            max
        )
    }

    fn nights_reprompt(&self) -> String {
        let (min, max) = self.catalog.nights_range();
        format!("How many nights will you be staying? ({}-{})", min, max)
    }

    fn invalid_nights(&self) -> String {
        let (min, max) = self.catalog.nights_range();
        format!(
            "Please reply with a whole number of nights between {} and {}.",
            min, max
        )
    }

    fn payment_prompt(&self, session: &Session) -> String {
        let currency = self.catalog.currency().to_uppercase();
        let draft = session.draft.as_ref();
        let mut lines = Vec::new();
        if let (Some(room), Some(nights)) = (
            draft.and_then(|d| d.room_type.as_deref()),
            draft.and_then(|d| d.nights),
        ) {
            if let Some(rate) = self.catalog.rate(room) {
                lines.push(format!(
                    "{} night(s) in the {}: {} {} total.",
                    nights,
                    room,
                    rate * nights as i64,
                    currency
                ));
            }
        }
        lines.push("How would you like to pay?".to_string());
        lines.push("1. Online now".to_string());
        lines.push(format!(
            "2. Cash on arrival (we hold the booking with a {} {} deposit)",
            self.catalog.deposit(),
            currency
        ));
        lines.join("\n")
    }

    fn invalid_payment_choice(&self) -> String {
        "Please reply 1 to pay online or 2 to pay cash on arrival.".to_string()
    }

    fn confirm_summary(&self, session: &Session) -> String {
        let draft = session.draft.as_ref();
        let room = draft
            .and_then(|d| d.room_type.as_deref())
            .unwrap_or("(room not chosen)");
        let nights = draft.and_then(|d| d.nights);
        let mode = draft.and_then(|d| d.payment_mode);
        let mut lines = vec!["Please confirm your booking:".to_string()];
        lines.push(format!("Room: {}", room));
        if let Some(n) = nights {
            lines.push(format!("Nights: {}", n));
        }
        if let Some(m) = mode {
            lines.push(format!(
                "Payment: {}",
                match m {
                    PaymentMode::Online => "online",
                    PaymentMode::Cash => "cash on arrival",
                }
            ));
        }
        if let (Some(rate), Some(n)) = (self.catalog.rate(room), nights) {
            lines.push(format!(
                "Total: {} {}",
                rate * n as i64,
                self.catalog.currency().to_uppercase()
            ));
        }
        lines.push(String::new());
        lines.push("Reply 'yes' to confirm or 'cancel' to discard.".to_string());
        lines.join("\n")
    }

    fn confirm_reprompt(&self, session: &Session) -> String {
        format!(
            "Your booking is not confirmed yet.\n\n{}",
            self.confirm_summary(session)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::router::IntentRouter;
    use chrono::Utc;
    use stayflow_schema::Channel;

    fn setup() -> (ConversationEngine, IntentRouter) {
        let catalog = Arc::new(Catalog::from_config(&CatalogConfig::default()));
        (
            ConversationEngine::new(catalog.clone(), "Acacia Ridge Lodge"),
            IntentRouter::new(catalog),
        )
    }

    fn fresh_session(guest_id: &str) -> Session {
        let now = Utc::now();
        Session {
            guest_id: guest_id.to_string(),
            channel: Channel::Webhook,
            stage: Stage::Identify,
            guest_type: None,
            draft: None,
            booking_id: None,
            created_at: now,
            last_active: now,
        }
    }

    fn drive(
        engine: &ConversationEngine,
        router: &IntentRouter,
        session: &mut Session,
        text: &str,
    ) -> EngineOutput {
        let classified = router.classify(text, session.stage);
        let out = engine.step(session, &classified, text);
        *session = out.session.clone();
        out
    }

    #[test]
    fn identification_moves_to_start() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");

        let out = drive(&engine, &router, &mut session, "guest");
        assert_eq!(session.stage, Stage::Start);
        assert_eq!(session.guest_type, Some(GuestType::Guest));
        assert!(out.parts[0].contains("Acacia Ridge Lodge"));
    }

    #[test]
    fn non_guest_identification_also_reaches_start() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");

        drive(&engine, &router, &mut session, "non-guest");
        assert_eq!(session.stage, Stage::Start);
        assert_eq!(session.guest_type, Some(GuestType::NonGuest));
    }

    #[test]
    fn booking_request_from_guest_presents_room_menu() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");

        let out = drive(&engine, &router, &mut session, "I want to book a room");
        assert_eq!(session.stage, Stage::RoomSelection);
        assert!(session.draft.is_some());
        assert!(out.actions.show_booking_form);
        assert!(out.parts[0].contains("1. Safari Tent"));
    }

    #[test]
    fn booking_request_from_non_guest_is_declined() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "non-guest");

        let out = drive(&engine, &router, &mut session, "I want to book a room");
        assert_eq!(session.stage, Stage::Start);
        assert!(session.draft.is_none());
        assert!(out.effects.is_empty());
        assert!(out.parts[0].contains("registered guests"));
    }

    #[test]
    fn booking_request_before_identification_asks_who_you_are() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");

        let out = drive(&engine, &router, &mut session, "book a room please");
        assert_eq!(session.stage, Stage::Identify);
        assert!(out.parts[0].contains("'guest' or 'non-guest'"));
    }

    #[test]
    fn happy_path_collects_draft_and_finalizes() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");

        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "I want to book a room");
        drive(&engine, &router, &mut session, "2");
        assert_eq!(session.stage, Stage::NightsInput);
        drive(&engine, &router, &mut session, "3");
        assert_eq!(session.stage, Stage::PaymentMethod);
        let out = drive(&engine, &router, &mut session, "1");
        assert_eq!(session.stage, Stage::Confirm);
        assert!(out.parts[0].contains("Star Bed Suite"));
        assert!(out.parts[0].contains("Total: 54000 INR"));

        let draft = session.draft.clone().unwrap();
        assert_eq!(draft.room_type.as_deref(), Some("Star Bed Suite"));
        assert_eq!(draft.nights, Some(3));
        assert_eq!(draft.payment_mode, Some(PaymentMode::Online));

        let out = drive(&engine, &router, &mut session, "yes");
        assert_eq!(out.effects, vec![Effect::FinalizeBooking]);
        // Stage only advances once the payment link exists; the caller
        // resets the session after the effect succeeds.
        assert_eq!(session.stage, Stage::Confirm);
    }

    #[test]
    fn invalid_room_choice_reprompts_identically() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");

        let first = drive(&engine, &router, &mut session, "9");
        let second = drive(&engine, &router, &mut session, "9");
        assert_eq!(session.stage, Stage::RoomSelection);
        assert_eq!(first.parts, second.parts);
    }

    #[test]
    fn zero_nights_is_rejected() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "1");

        let out = drive(&engine, &router, &mut session, "0");
        assert_eq!(session.stage, Stage::NightsInput);
        assert!(out.parts[0].contains("between 1 and 30"));
    }

    #[test]
    fn payment_mode_words_are_accepted() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "1");
        drive(&engine, &router, &mut session, "2");

        drive(&engine, &router, &mut session, "cash");
        assert_eq!(session.stage, Stage::Confirm);
        assert_eq!(
            session.draft.as_ref().unwrap().payment_mode,
            Some(PaymentMode::Cash)
        );
    }

    #[test]
    fn free_form_mid_flow_answers_and_keeps_the_prompt_due() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "2");

        let out = drive(&engine, &router, &mut session, "what time is breakfast?");
        assert_eq!(session.stage, Stage::NightsInput);
        assert_eq!(
            out.effects,
            vec![Effect::AskConcierge {
                question: "what time is breakfast?".to_string(),
                guest_type: GuestType::Guest,
            }]
        );
        assert!(out.parts[0].contains("How many nights"));
    }

    #[test]
    fn addon_request_mid_flow_preserves_the_draft() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "2");

        let out = drive(&engine, &router, &mut session, "spa and brownie please");
        assert_eq!(session.stage, Stage::NightsInput);
        assert_eq!(
            session.draft.as_ref().unwrap().room_type.as_deref(),
            Some("Star Bed Suite")
        );
        assert_eq!(
            out.effects,
            vec![Effect::PurchaseAddons {
                extras: vec!["spa".to_string(), "brownie".to_string()],
            }]
        );
        assert_eq!(out.actions.addons, vec!["spa".to_string(), "brownie".to_string()]);
    }

    #[test]
    fn cancel_before_staging_discards_the_draft() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "1");
        drive(&engine, &router, &mut session, "2");
        drive(&engine, &router, &mut session, "1");

        let out = drive(&engine, &router, &mut session, "cancel");
        assert_eq!(session.stage, Stage::Start);
        assert!(session.draft.is_none());
        assert!(out.effects.is_empty());
    }

    #[test]
    fn cancel_with_staged_booking_emits_cancel_effect() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "1");
        drive(&engine, &router, &mut session, "2");
        drive(&engine, &router, &mut session, "1");
        session.booking_id = Some("STAY20260825AB12CD".to_string());

        let out = drive(&engine, &router, &mut session, "cancel");
        assert_eq!(
            out.effects,
            vec![Effect::CancelBooking {
                booking_id: "STAY20260825AB12CD".to_string(),
            }]
        );
    }

    #[test]
    fn no_at_confirm_reprompts_without_side_effects() {
        let (engine, router) = setup();
        let mut session = fresh_session("g-1");
        drive(&engine, &router, &mut session, "guest");
        drive(&engine, &router, &mut session, "book a room");
        drive(&engine, &router, &mut session, "1");
        drive(&engine, &router, &mut session, "2");
        drive(&engine, &router, &mut session, "1");

        let out = drive(&engine, &router, &mut session, "no");
        assert_eq!(session.stage, Stage::Confirm);
        assert!(out.effects.is_empty());
        assert!(out.parts[0].contains("not confirmed yet"));
    }
}
