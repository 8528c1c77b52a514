use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod error;

pub use error::{ReservationError, Result};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(EventId);
id_type!(CategoryId);
id_type!(
    /// Reservation identifier. The display-only reservation number is derived from it.
    ReservationId
);
id_type!(
    /// Opaque buyer reference supplied by the caller. Reservations without one are anonymous.
    BuyerId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Concert,
    Sports,
    Theatre,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Concert => "CONCERT",
            EventType::Sports => "SPORTS",
            EventType::Theatre => "THEATRE",
        }
    }
}

impl FromStr for EventType {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONCERT" => Ok(EventType::Concert),
            "SPORTS" => Ok(EventType::Sports),
            "THEATRE" => Ok(EventType::Theatre),
            other => Err(ReservationError::Storage(format!("unknown event type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub location: String,
    pub event_type: EventType,
    pub organizer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub location: String,
    pub event_type: EventType,
    #[serde(default)]
    pub organizer_id: Option<Uuid>,
}

impl NewEvent {
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            name: self.name,
            starts_at: self.starts_at,
            location: self.location,
            event_type: self.event_type,
            organizer_id: self.organizer_id,
        }
    }
}

/// A priced class of tickets belonging to one event.
///
/// `available_count` is a snapshot read from the inventory ledger; it may be
/// stale the moment it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCategory {
    pub id: CategoryId,
    pub event_id: EventId,
    pub name: String,
    pub unit_price: BigDecimal,
    pub available_count: i32,
    pub total_capacity: i32,
}

impl TicketCategory {
    pub fn has_availability(&self) -> bool {
        self.available_count > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub unit_price: BigDecimal,
    pub total_capacity: i32,
}

impl NewCategory {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReservationError::InvalidCategory(
                "category name must not be blank".to_string(),
            ));
        }
        validate_price(&self.unit_price)?;
        if self.total_capacity < 0 {
            return Err(ReservationError::InvalidCategory(format!(
                "total capacity cannot be negative: {}",
                self.total_capacity
            )));
        }
        Ok(())
    }
}

/// Prices are stored as `NUMERIC(12, 2)`.
pub const PRICE_SCALE: i64 = 2;
const PRICE_INTEGER_DIGITS: u32 = 10;

pub fn validate_price(price: &BigDecimal) -> Result<()> {
    if *price < <BigDecimal as num_traits::Zero>::zero() {
        return Err(ReservationError::InvalidCategory(format!(
            "price cannot be negative: {price}"
        )));
    }
    let (_, scale) = price.normalized().as_bigint_and_exponent();
    if scale > PRICE_SCALE {
        return Err(ReservationError::InvalidCategory(format!(
            "price cannot have more than {PRICE_SCALE} decimal places: {price}"
        )));
    }
    if *price >= BigDecimal::from(10_i64.pow(PRICE_INTEGER_DIGITS)) {
        return Err(ReservationError::InvalidCategory(format!(
            "price is too large: {price}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(ReservationError::Storage(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// A confirmed or cancelled claim on tickets from one category.
///
/// `unit_price` is captured when the reservation is created, so later price
/// changes on the category never alter `total_price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub event_id: EventId,
    pub category_id: CategoryId,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub status: ReservationStatus,
    pub buyer_id: Option<BuyerId>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Short upper-case code shown to buyers. Never used for lookup.
    pub fn reservation_number(&self) -> String {
        self.id.as_uuid().simple().to_string()[..8].to_uppercase()
    }

    pub fn total_price(&self) -> BigDecimal {
        self.unit_price.clone() * BigDecimal::from(self.quantity)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ReservationStatus::Cancelled
    }

    pub fn is_anonymous(&self) -> bool {
        self.buyer_id.is_none()
    }
}

/// Record handed to a reservation store once inventory has been debited.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub event_id: EventId,
    pub category_id: CategoryId,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub buyer_id: Option<BuyerId>,
}

impl NewReservation {
    pub fn into_reservation(self, id: ReservationId, created_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id,
            event_id: self.event_id,
            category_id: self.category_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            status: ReservationStatus::Confirmed,
            buyer_id: self.buyer_id,
            created_at,
            cancelled_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub event_id: EventId,
    pub category_id: CategoryId,
    pub quantity: i32,
    #[serde(default)]
    pub buyer_id: Option<BuyerId>,
}

/// Result of a cancellation. Cancelling twice is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(Reservation),
    AlreadyCancelled(Reservation),
}

impl CancelOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            CancelOutcome::Cancelled(r) | CancelOutcome::AlreadyCancelled(r) => r,
        }
    }

    pub fn into_reservation(self) -> Reservation {
        match self {
            CancelOutcome::Cancelled(r) | CancelOutcome::AlreadyCancelled(r) => r,
        }
    }

    pub fn was_noop(&self) -> bool {
        matches!(self, CancelOutcome::AlreadyCancelled(_))
    }
}
