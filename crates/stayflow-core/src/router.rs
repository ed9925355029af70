//! Intent classification for inbound text.
//!
//! Priority order: when the current stage is waiting on a specific reply
//! shape and the text fits that shape, it is form input, full stop. Booking
//! and add-on keywords only win on text the form does not claim, so a guest
//! answering "2" to the room menu is never misread as something else, while
//! "spa and brownie" typed mid-flow still reaches the add-on path.

use std::sync::Arc;

use stayflow_schema::{GuestType, Intent, Stage};

use crate::catalog::Catalog;

const BOOKING_KEYWORDS: &[&str] = &["book", "booking", "reserve", "reservation"];

#[derive(Debug, Clone)]
pub struct Classified {
    pub intent: Intent,
    /// Canonical add-on keys, one per mention, for `AddonRequest`.
    pub addons: Vec<String>,
}

pub struct IntentRouter {
    catalog: Arc<Catalog>,
}

impl IntentRouter {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn classify(&self, text: &str, stage: Stage) -> Classified {
        if stage.expects_input() && self.matches_form_shape(text, stage) {
            return Classified {
                intent: Intent::FormInput,
                addons: Vec::new(),
            };
        }
        if requests_booking(text) {
            return Classified {
                intent: Intent::BookingRequest,
                addons: Vec::new(),
            };
        }
        let addons = self.catalog.find_addons(text);
        if !addons.is_empty() {
            return Classified {
                intent: Intent::AddonRequest,
                addons,
            };
        }
        Classified {
            intent: Intent::FreeForm,
            addons: Vec::new(),
        }
    }

    /// Shape, not validity: any integer fits a digit-expecting stage even
    /// when out of range, so the engine can reprompt instead of shipping
    /// stray digits to the answer service.
    fn matches_form_shape(&self, text: &str, stage: Stage) -> bool {
        let t = text.trim().to_lowercase();
        match stage {
            Stage::Identify => identify_token(&t).is_some(),
            Stage::RoomSelection | Stage::NightsInput => t.parse::<u64>().is_ok(),
            Stage::PaymentMethod => t.parse::<u64>().is_ok() || t == "online" || t == "cash",
            Stage::Confirm => confirm_token(&t).is_some(),
            Stage::Start | Stage::Idle => false,
        }
    }
}

/// Guest/non-guest declaration, if the text contains one. Checked against
/// the non-guest variants first since "non-guest" contains "guest".
pub(crate) fn identify_token(t: &str) -> Option<GuestType> {
    if t.contains("non-guest") || t.contains("non guest") || t.contains("visitor") {
        Some(GuestType::NonGuest)
    } else if t.contains("guest") || t.contains("staying") {
        Some(GuestType::Guest)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfirmToken {
    Yes,
    No,
    Cancel,
}

pub(crate) fn confirm_token(t: &str) -> Option<ConfirmToken> {
    match t {
        "yes" | "y" | "confirm" => Some(ConfirmToken::Yes),
        "no" | "n" => Some(ConfirmToken::No),
        "cancel" => Some(ConfirmToken::Cancel),
        _ => None,
    }
}

fn requests_booking(text: &str) -> bool {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| BOOKING_KEYWORDS.contains(&w))
}
