use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{
    CategoryId, Event, EventId, Reservation, ReservationError, ReservationId, TicketCategory,
};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::events)]
pub struct EventRow {
    pub id: Uuid,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub location: String,
    pub event_type: String,
    pub organizer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::events)]
pub struct NewEventRow {
    pub id: Uuid,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub location: String,
    pub event_type: String,
    pub organizer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::ticket_categories)]
pub struct CategoryRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub unit_price: BigDecimal,
    pub available_count: i32,
    pub total_capacity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::ticket_categories)]
pub struct NewCategoryRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub unit_price: BigDecimal,
    pub available_count: i32,
    pub total_capacity: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub category_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub status: String,
    pub buyer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct NewReservationRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub category_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub status: String,
    pub buyer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = ReservationError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::from_uuid(row.id),
            name: row.name,
            starts_at: row.starts_at,
            location: row.location,
            event_type: row.event_type.parse()?,
            organizer_id: row.organizer_id,
        })
    }
}

impl From<&Event> for NewEventRow {
    fn from(event: &Event) -> Self {
        Self {
            id: *event.id.as_uuid(),
            name: event.name.clone(),
            starts_at: event.starts_at,
            location: event.location.clone(),
            event_type: event.event_type.as_str().to_string(),
            organizer_id: event.organizer_id,
        }
    }
}

impl From<CategoryRow> for TicketCategory {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: CategoryId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            name: row.name,
            unit_price: row.unit_price,
            available_count: row.available_count,
            total_capacity: row.total_capacity,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = ReservationError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ReservationId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            category_id: CategoryId::from_uuid(row.category_id),
            quantity: row.quantity,
            unit_price: row.unit_price,
            status: row.status.parse()?,
            buyer_id: row.buyer_id.map(Into::into),
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

impl From<&Reservation> for NewReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            id: *reservation.id.as_uuid(),
            event_id: *reservation.event_id.as_uuid(),
            category_id: *reservation.category_id.as_uuid(),
            quantity: reservation.quantity,
            unit_price: reservation.unit_price.clone(),
            status: reservation.status.as_str().to_string(),
            buyer_id: reservation.buyer_id.map(Into::into),
            created_at: reservation.created_at,
        }
    }
}
