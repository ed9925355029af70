//! The booking ledger: staged/confirmed/cancelled records and the only code
//! path that talks to the payment processor.
//!
//! Transitions for one booking are serialized on a per-booking lock that IS
//! held across the checkout call; that is what makes confirmation
//! idempotent under racing duplicates (the loser waits, then finds the
//! booking confirmed and returns the stored link instead of minting a second
//! charge). This lock is per booking, not per guest, so it never holds up
//! unrelated conversation traffic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stayflow_schema::{BookingStatus, DraftBooking, PaymentMode};
use stayflow_services::{CheckoutRequest, PaymentProcessor};
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::catalog::{Catalog, CartLine};
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub booking_id: String,
    pub guest_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nights: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_contact: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<PaymentMode>,
    pub status: BookingStatus,
    /// Room rate times nights, frozen at confirmation. Catalog changes
    /// after that point do not move it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Fields supplied at confirmation time to complete the staged record.
/// Everything is optional; values already staged win when the patch is
/// silent.
#[derive(Debug, Clone, Default)]
pub struct ConfirmPatch {
    pub room_type: Option<String>,
    pub nights: Option<u32>,
    pub payment_mode: Option<PaymentMode>,
    pub extras: Vec<String>,
}

#[derive(Debug)]
pub struct ConfirmReceipt {
    pub booking: Booking,
    pub payment_link: String,
    pub total_price: i64,
    /// False when this call found the booking already confirmed and simply
    /// returned the stored link.
    pub newly_confirmed: bool,
}

pub struct AddonReceipt {
    pub lines: Vec<CartLine>,
    pub complimentary: Vec<String>,
    pub unknown: Vec<String>,
    pub total: i64,
    pub payment_link: Option<String>,
}

pub struct BookingLedger {
    bookings: Arc<RwLock<HashMap<String, Booking>>>,
    booking_locks: Mutex<HashMap<String, Arc<Semaphore>>>,
    catalog: Arc<Catalog>,
    payments: Arc<dyn PaymentProcessor>,
}

impl BookingLedger {
    pub fn new(catalog: Arc<Catalog>, payments: Arc<dyn PaymentProcessor>) -> Self {
        Self {
            bookings: Arc::new(RwLock::new(HashMap::new())),
            booking_locks: Mutex::new(HashMap::new()),
            catalog,
            payments,
        }
    }

    /// Create a staged booking from a draft. The draft must identify a room,
    /// a stay length (nights or dates) and a guest contact; pricing details
    /// can wait until confirmation. Blank strings count as missing, since
    /// form channels post empty fields rather than omitting them.
    pub async fn stage(&self, guest_id: &str, draft: &DraftBooking) -> Result<Booking, CoreError> {
        if !present(&draft.room_type) && !present(&draft.room_id) {
            return Err(CoreError::IncompleteDraft("a room"));
        }
        if draft.nights.is_none() && (!present(&draft.check_in) || !present(&draft.check_out)) {
            return Err(CoreError::IncompleteDraft("stay length or dates"));
        }
        if !present(&draft.guest_contact) {
            return Err(CoreError::IncompleteDraft("guest contact"));
        }
        if let Some(room_type) = &draft.room_type {
            if self.catalog.rate(room_type).is_none() {
                return Err(CoreError::InvalidInput(format!(
                    "unknown room type: {room_type}"
                )));
            }
        }

        let mut bookings = self.bookings.write().await;
        let booking_id = loop {
            let id = self.catalog.mint_booking_id();
            if !bookings.contains_key(&id) {
                break id;
            }
        };
        let booking = Booking {
            booking_id: booking_id.clone(),
            guest_id: guest_id.to_string(),
            room_id: draft.room_id.clone(),
            room_type: draft.room_type.clone(),
            nights: draft.nights,
            check_in: draft.check_in.clone(),
            check_out: draft.check_out.clone(),
            guest_name: draft.guest_name.clone(),
            guest_contact: draft.guest_contact.clone(),
            extras: Vec::new(),
            payment_mode: draft.payment_mode,
            status: BookingStatus::Staged,
            total_price: None,
            payment_link: None,
            created_at: Utc::now(),
            confirmed_at: None,
            cancelled_at: None,
        };
        bookings.insert(booking_id, booking.clone());
        Ok(booking)
    }

    pub async fn get(&self, booking_id: &str) -> Option<Booking> {
        self.bookings.read().await.get(booking_id).cloned()
    }

    async fn booking_lock(&self, booking_id: &str) -> Arc<Semaphore> {
        let mut locks = self.booking_locks.lock().await;
        locks
            .entry(booking_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Confirm a staged booking: complete it from the patch, freeze the
    /// total, create the checkout link, then flip the status. A failed
    /// checkout call leaves the booking staged so the guest can retry.
    /// Confirming an already confirmed booking returns the stored link.
    pub async fn confirm(
        &self,
        booking_id: &str,
        patch: ConfirmPatch,
    ) -> Result<ConfirmReceipt, CoreError> {
        let lock = self.booking_lock(booking_id).await;
        let _permit = lock.acquire_owned().await.expect("semaphore closed");

        let current = self
            .get(booking_id)
            .await
            .ok_or_else(|| CoreError::NotFound(booking_id.to_string()))?;
        match current.status {
            BookingStatus::Confirmed => {
                let payment_link = current.payment_link.clone().unwrap_or_default();
                let total_price = current.total_price.unwrap_or_default();
                return Ok(ConfirmReceipt {
                    booking: current,
                    payment_link,
                    total_price,
                    newly_confirmed: false,
                });
            }
            BookingStatus::Cancelled => {
                return Err(CoreError::AlreadyFinalized {
                    booking_id: booking_id.to_string(),
                    status: BookingStatus::Cancelled,
                })
            }
            BookingStatus::Staged => {}
        }

        let room_type = patch
            .room_type
            .or_else(|| current.room_type.clone())
            .ok_or(CoreError::IncompleteDraft("room type"))?;
        let nights = patch
            .nights
            .or(current.nights)
            .ok_or(CoreError::IncompleteDraft("nights"))?;
        let payment_mode = patch
            .payment_mode
            .or(current.payment_mode)
            .ok_or(CoreError::IncompleteDraft("payment mode"))?;
        let rate = self
            .catalog
            .rate(&room_type)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown room type: {room_type}")))?;
        if !self.catalog.nights_valid(nights) {
            return Err(CoreError::InvalidInput(format!(
                "nights out of range: {nights}"
            )));
        }

        let mut extras = current.extras.clone();
        extras.extend(patch.extras);
        let cart = self.catalog.price_extras(&extras);

        let total_price = rate * nights as i64;
        let room_charge = match payment_mode {
            PaymentMode::Online => total_price,
            PaymentMode::Cash => self.catalog.deposit(),
        };
        let description = {
            let base = match payment_mode {
                PaymentMode::Online => format!("{room_type}, {nights} night(s), full payment"),
                PaymentMode::Cash => format!("{room_type}, {nights} night(s), holding deposit"),
            };
            if cart.lines.is_empty() {
                base
            } else {
                format!("{base} + {} add-on(s)", cart.lines.len())
            }
        };
        let mut metadata = HashMap::from([
            ("booking_id".to_string(), booking_id.to_string()),
            ("guest_id".to_string(), current.guest_id.clone()),
            ("room_type".to_string(), room_type.clone()),
            ("nights".to_string(), nights.to_string()),
            ("payment_mode".to_string(), payment_mode.as_str().to_string()),
        ]);
        if !cart.lines.is_empty() {
            let items = cart
                .lines
                .iter()
                .map(|l| format!("{}x{}", l.key, l.quantity))
                .collect::<Vec<_>>()
                .join(",");
            metadata.insert("extras".to_string(), items);
        }

        // Amounts cross to the processor in minor units.
        let checkout = self
            .payments
            .create_checkout(CheckoutRequest {
                description,
                amount: (room_charge + cart.total) * 100,
                currency: self.catalog.currency().to_string(),
                metadata,
            })
            .await
            .map_err(CoreError::from)?;

        let mut bookings = self.bookings.write().await;
        let record = bookings
            .get_mut(booking_id)
            .ok_or_else(|| CoreError::NotFound(booking_id.to_string()))?;
        record.room_type = Some(room_type);
        record.nights = Some(nights);
        record.payment_mode = Some(payment_mode);
        record.extras = extras;
        record.total_price = Some(total_price);
        record.status = BookingStatus::Confirmed;
        record.payment_link = Some(checkout.checkout_url.clone());
        record.confirmed_at = Some(Utc::now());
        Ok(ConfirmReceipt {
            booking: record.clone(),
            payment_link: checkout.checkout_url,
            total_price,
            newly_confirmed: true,
        })
    }

    /// Cancel a staged booking. Idempotent on already cancelled bookings;
    /// confirmed bookings cannot be cancelled here. The flag is true only
    /// for the call that actually performed the transition, so callers
    /// publish the cancellation event exactly once.
    pub async fn cancel(&self, booking_id: &str) -> Result<(Booking, bool), CoreError> {
        let lock = self.booking_lock(booking_id).await;
        let _permit = lock.acquire_owned().await.expect("semaphore closed");

        let mut bookings = self.bookings.write().await;
        let record = bookings
            .get_mut(booking_id)
            .ok_or_else(|| CoreError::NotFound(booking_id.to_string()))?;
        match record.status {
            BookingStatus::Cancelled => Ok((record.clone(), false)),
            BookingStatus::Confirmed => Err(CoreError::AlreadyFinalized {
                booking_id: booking_id.to_string(),
                status: BookingStatus::Confirmed,
            }),
            BookingStatus::Staged => {
                record.status = BookingStatus::Cancelled;
                record.cancelled_at = Some(Utc::now());
                Ok((record.clone(), true))
            }
        }
    }

    /// Price the requested add-ons and, when anything is billable, create a
    /// checkout link. Bypasses staging entirely; an all-complimentary or
    /// all-unknown cart produces no checkout.
    pub async fn purchase_addons(
        &self,
        guest_id: &str,
        extras: &[String],
    ) -> Result<AddonReceipt, CoreError> {
        let cart = self.catalog.price_extras(extras);
        if cart.lines.is_empty() {
            return Ok(AddonReceipt {
                lines: cart.lines,
                complimentary: cart.complimentary,
                unknown: cart.unknown,
                total: 0,
                payment_link: None,
            });
        }

        let labels = cart
            .lines
            .iter()
            .map(|l| {
                if l.quantity > 1 {
                    format!("{} x{}", l.label, l.quantity)
                } else {
                    l.label.clone()
                }
            })
            .collect::<Vec<_>>();
        let items = cart
            .lines
            .iter()
            .map(|l| format!("{}x{}", l.key, l.quantity))
            .collect::<Vec<_>>()
            .join(",");
        let checkout = self
            .payments
            .create_checkout(CheckoutRequest {
                description: format!("Add-ons: {}", labels.join(", ")),
                amount: cart.total * 100,
                currency: self.catalog.currency().to_string(),
                metadata: HashMap::from([
                    ("guest_id".to_string(), guest_id.to_string()),
                    ("kind".to_string(), "addons".to_string()),
                    ("items".to_string(), items),
                ]),
            })
            .await
            .map_err(CoreError::from)?;

        Ok(AddonReceipt {
            lines: cart.lines,
            complimentary: cart.complimentary,
            unknown: cart.unknown,
            total: cart.total,
            payment_link: Some(checkout.checkout_url),
        })
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}
