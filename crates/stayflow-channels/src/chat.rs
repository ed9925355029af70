//! Live-chat adapter: JSON in, JSON out, with server-minted session ids.
//!
//! The chat widget does not identify guests by address, so the session id
//! doubles as the guest key. First contact arrives without one; we mint an
//! id and the client echoes it on every later request.

use chrono::Utc;
use stayflow_schema::{ChatRequest, ChatResponse, Channel, GuestType, InboundMessage, ReplyMessage};
use uuid::Uuid;

/// Session id for this request, minting one on first contact.
pub fn session_id(req: &ChatRequest) -> String {
    req.session_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("chat-{}", Uuid::new_v4().simple()))
}

pub fn to_inbound(req: &ChatRequest, session_id: &str) -> InboundMessage {
    InboundMessage {
        trace_id: Uuid::new_v4(),
        guest_id: session_id.to_string(),
        channel: Channel::LiveChat,
        text: req.message.trim().to_string(),
        guest_type_hint: req.is_guest.map(|is_guest| {
            if is_guest {
                GuestType::Guest
            } else {
                GuestType::NonGuest
            }
        }),
        contact_email: req.email.clone(),
        at: Utc::now(),
    }
}

pub fn to_response(reply: ReplyMessage, session_id: String) -> ChatResponse {
    ChatResponse {
        session_id,
        reply: reply.text,
        reply_parts: reply.parts,
        intent: reply.intent,
        actions: reply.actions,
    }
}

#[cfg(test)]
mod tests {
    use stayflow_schema::Intent;

    use super::*;

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.into(),
            is_guest: None,
            session_id: None,
            email: None,
        }
    }

    #[test]
    fn first_contact_mints_a_session_id() {
        let req = request("hello");
        let id = session_id(&req);
        assert!(id.starts_with("chat-"));
        assert!(id.len() > "chat-".len());
    }

    #[test]
    fn existing_session_id_is_kept() {
        let mut req = request("hello");
        req.session_id = Some("chat-abc123".into());
        assert_eq!(session_id(&req), "chat-abc123");
    }

    #[test]
    fn blank_session_id_is_replaced() {
        let mut req = request("hello");
        req.session_id = Some("   ".into());
        assert!(session_id(&req).starts_with("chat-"));
    }

    #[test]
    fn to_inbound_maps_identity_hint_and_email() {
        let mut req = request("  book a room  ");
        req.is_guest = Some(true);
        req.email = Some("amara@example.com".into());
        let inbound = to_inbound(&req, "chat-1");
        assert_eq!(inbound.guest_id, "chat-1");
        assert_eq!(inbound.channel, Channel::LiveChat);
        assert_eq!(inbound.text, "book a room");
        assert_eq!(inbound.guest_type_hint, Some(GuestType::Guest));
        assert_eq!(inbound.contact_email.as_deref(), Some("amara@example.com"));
    }

    #[test]
    fn non_guest_hint_maps_through() {
        let mut req = request("hi");
        req.is_guest = Some(false);
        assert_eq!(
            to_inbound(&req, "chat-1").guest_type_hint,
            Some(GuestType::NonGuest)
        );
    }

    #[test]
    fn response_carries_parts_and_actions() {
        let mut reply = ReplyMessage::from_parts(
            Uuid::new_v4(),
            "chat-1",
            Channel::LiveChat,
            Intent::BookingRequest,
            vec!["Welcome back.".into(), "Which room?".into()],
        );
        reply.actions.show_booking_form = true;

        let response = to_response(reply, "chat-1".into());
        assert_eq!(response.session_id, "chat-1");
        assert_eq!(response.reply, "Welcome back.\n\nWhich room?");
        assert_eq!(response.reply_parts.len(), 2);
        assert!(response.actions.show_booking_form);
    }
}
