//! Shared message and domain types for stayflow.
//!
//! Everything that crosses a crate boundary lives here: channel envelopes,
//! booking drafts, bus events, and the request/response shapes of the
//! structured live-chat API. Crates downstream add behavior, not vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a message came from (and where its reply must be rendered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Form-POST webhook channel; replies are rendered as XML.
    Webhook,
    /// JSON live-chat channel served by the HTTP API.
    LiveChat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Webhook => "webhook",
            Channel::LiveChat => "live_chat",
        }
    }
}

/// Whether the person talking to us is a registered guest.
///
/// Set once per session during identification and never inferred again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestType {
    Guest,
    NonGuest,
}

impl GuestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestType::Guest => "guest",
            GuestType::NonGuest => "non-guest",
        }
    }
}

/// Conversation stage of a session.
///
/// `identify` and `idle` are both valid resting states: `identify` is where
/// fresh sessions start, `idle` is where a session parks while a booking is
/// driven through the structured API instead of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identify,
    Start,
    RoomSelection,
    NightsInput,
    PaymentMethod,
    Confirm,
    Idle,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Identify => "identify",
            Stage::Start => "start",
            Stage::RoomSelection => "room_selection",
            Stage::NightsInput => "nights_input",
            Stage::PaymentMethod => "payment_method",
            Stage::Confirm => "confirm",
            Stage::Idle => "idle",
        }
    }

    /// Stages that are waiting on a specific reply shape (a menu digit, a
    /// night count, a payment choice, a confirmation token).
    pub fn expects_input(&self) -> bool {
        matches!(
            self,
            Stage::Identify
                | Stage::RoomSelection
                | Stage::NightsInput
                | Stage::PaymentMethod
                | Stage::Confirm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    /// Full amount collected through an online checkout link.
    Online,
    /// Pay on arrival; only a holding deposit is collected online.
    Cash,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Online => "online",
            PaymentMode::Cash => "cash",
        }
    }
}

/// Intent assigned to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Text matches the reply shape the current stage is waiting for.
    FormInput,
    /// Text asks to book a stay.
    BookingRequest,
    /// Text names one or more purchasable add-ons.
    AddonRequest,
    /// Anything else; forwarded to the answer service.
    FreeForm,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FormInput => "form_input",
            Intent::BookingRequest => "booking_request",
            Intent::AddonRequest => "addon_request",
            Intent::FreeForm => "free_form",
        }
    }
}

/// Partially collected booking details, filled in as the conversation (or the
/// structured API) progresses. Field presence depends on which flow is
/// feeding it: the conversational flow collects room type, nights and payment
/// mode; the structured flow supplies a room id, dates and contact details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftBooking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nights: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<PaymentMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_contact: Option<String>,
}

/// Lifecycle state of a booking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Staged,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Staged => "staged",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// A channel-normalized inbound message, ready for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub trace_id: Uuid,
    /// Stable per-person key: the sender address on the webhook channel, a
    /// client session id on live chat.
    pub guest_id: String,
    pub channel: Channel,
    pub text: String,
    /// Live chat can assert guest/non-guest out of band instead of walking
    /// the identification exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_type_hint: Option<GuestType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub at: DateTime<Utc>,
}

/// UI hints attached to a reply so channel frontends can react without
/// parsing the text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyActions {
    #[serde(default)]
    pub show_booking_form: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
}

impl ReplyActions {
    pub fn is_empty(&self) -> bool {
        !self.show_booking_form && self.addons.is_empty() && self.payment_link.is_none()
    }
}

/// The reply produced for one inbound message.
///
/// `parts` keeps the independently produced fragments (answer-service reply,
/// stage prompt, purchase receipt) in order; `text` is their joined form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub trace_id: Uuid,
    pub guest_id: String,
    pub channel: Channel,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<String>,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "ReplyActions::is_empty")]
    pub actions: ReplyActions,
    pub at: DateTime<Utc>,
}

impl ReplyMessage {
    pub fn from_parts(
        trace_id: Uuid,
        guest_id: impl Into<String>,
        channel: Channel,
        intent: Intent,
        parts: Vec<String>,
    ) -> Self {
        let text = parts.join("\n\n");
        Self {
            trace_id,
            guest_id: guest_id.into(),
            channel,
            text,
            parts,
            intent,
            actions: ReplyActions::default(),
            at: Utc::now(),
        }
    }
}

/// Events fanned out on the per-guest bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    /// A reply was produced for this guest.
    MessageReady { reply: ReplyMessage },
    BookingStaged {
        guest_id: String,
        booking_id: String,
        at: DateTime<Utc>,
    },
    BookingConfirmed {
        guest_id: String,
        booking_id: String,
        payment_link: String,
        total_price: i64,
        at: DateTime<Utc>,
    },
    BookingCancelled {
        guest_id: String,
        booking_id: String,
        at: DateTime<Utc>,
    },
}

impl BusMessage {
    /// Guest this event belongs to; the bus routes on this key.
    pub fn guest_id(&self) -> &str {
        match self {
            BusMessage::MessageReady { reply } => &reply.guest_id,
            BusMessage::BookingStaged { guest_id, .. } => guest_id,
            BusMessage::BookingConfirmed { guest_id, .. } => guest_id,
            BusMessage::BookingCancelled { guest_id, .. } => guest_id,
        }
    }

    /// Stable event name used by stream transports (SSE `event:` field).
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMessage::MessageReady { .. } => "message",
            BusMessage::BookingStaged { .. } => "booking_staged",
            BusMessage::BookingConfirmed { .. } => "booking_confirmed",
            BusMessage::BookingCancelled { .. } => "booking_cancelled",
        }
    }
}

/// Request body of the live-chat message endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Omitted when the client does not know; the conversational
    /// identification exchange then runs as usual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_guest: Option<bool>,
    /// Absent on first contact; the server mints one and echoes it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Response body of the live-chat message endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reply_parts: Vec<String>,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "ReplyActions::is_empty")]
    pub actions: ReplyActions,
}

/// Structured staging request from the live-chat booking form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBookingRequest {
    pub session_id: String,
    pub room_id: String,
    pub check_in: String,
    pub check_out: String,
    pub guest_name: String,
    pub guest_contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBookingResponse {
    pub booking_id: String,
    pub status: BookingStatus,
}

/// Structured confirmation request; fills in whatever the staged record is
/// still missing and triggers checkout creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmBookingRequest {
    pub booking_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nights: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<PaymentMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmBookingResponse {
    pub booking_id: String,
    pub status: BookingStatus,
    pub payment_link: String,
    pub total_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    pub booking_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBookingResponse {
    pub booking_id: String,
    pub status: BookingStatus,
}

/// Add-on purchase outside any booking flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseAddonsRequest {
    pub session_id: String,
    pub extras: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseAddonsResponse {
    pub items: Vec<String>,
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    pub reply: String,
}
