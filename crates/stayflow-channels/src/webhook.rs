//! Webhook adapter for form-posting messaging providers.
//!
//! The provider POSTs `From`/`Body` form fields and renders whatever XML
//! document we hand back. The sender address is the guest key; a transport
//! prefix (`whatsapp:+254700111222`) is stripped so the same person keeps
//! one session across transports.

use chrono::Utc;
use serde::Deserialize;
use stayflow_schema::{Channel, InboundMessage, ReplyMessage};
use uuid::Uuid;

/// Inbound form payload. Field names follow the provider's convention.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
}

impl WebhookForm {
    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage {
            trace_id: Uuid::new_v4(),
            guest_id: normalize_sender(&self.from),
            channel: Channel::Webhook,
            text: self.body.trim().to_string(),
            guest_type_hint: None,
            contact_email: None,
            at: Utc::now(),
        }
    }
}

/// `whatsapp:+254700111222` and `+254700111222` are the same guest.
fn normalize_sender(from: &str) -> String {
    match from.split_once(':') {
        Some((_, address)) if !address.is_empty() => address.to_string(),
        _ => from.to_string(),
    }
}

/// Render the reply as the XML document the provider relays to the guest.
pub fn render_reply(reply: &ReplyMessage) -> String {
    render_text(&reply.text)
}

/// XML message document around arbitrary text.
pub fn render_text(text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use stayflow_schema::Intent;

    use super::*;

    #[test]
    fn to_inbound_sets_fields() {
        let form = WebhookForm {
            from: "whatsapp:+254700111222".into(),
            body: "  I want to book a room  ".into(),
        };
        let inbound = form.to_inbound();
        assert_eq!(inbound.guest_id, "+254700111222");
        assert_eq!(inbound.channel, Channel::Webhook);
        assert_eq!(inbound.text, "I want to book a room");
        assert!(inbound.guest_type_hint.is_none());
    }

    #[test]
    fn bare_sender_passes_through() {
        let form = WebhookForm {
            from: "+254700111222".into(),
            body: "hi".into(),
        };
        assert_eq!(form.to_inbound().guest_id, "+254700111222");
    }

    #[test]
    fn form_deserializes_provider_field_names() {
        let form: WebhookForm =
            serde_json::from_str(r#"{"From":"whatsapp:+1555","Body":"hello"}"#).unwrap();
        assert_eq!(form.from, "whatsapp:+1555");
        assert_eq!(form.body, "hello");
    }

    #[test]
    fn render_wraps_text_in_message_document() {
        let reply = ReplyMessage::from_parts(
            Uuid::new_v4(),
            "+1555",
            Channel::Webhook,
            Intent::FreeForm,
            vec!["Safari Tent (12000 INR/night)".into()],
        );
        let xml = render_reply(&reply);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<Response><Message>Safari Tent (12000 INR/night)</Message></Response>"));
    }

    #[test]
    fn render_escapes_markup() {
        let reply = ReplyMessage::from_parts(
            Uuid::new_v4(),
            "+1555",
            Channel::Webhook,
            Intent::FreeForm,
            vec!["Dinner & drinks <on the deck>".into()],
        );
        let xml = render_reply(&reply);
        assert!(xml.contains("Dinner &amp; drinks &lt;on the deck&gt;"));
        assert!(!xml.contains("<on the deck>"));
    }
}
