use thiserror::Error;

use crate::{CategoryId, EventId, ReservationId};

pub type Result<T, E = ReservationError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("ticket category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error("not enough tickets available in category {category_id} for {requested} requested")]
    InsufficientInventory { category_id: CategoryId, requested: i32 },

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Transient infrastructure fault (database, pool, task runtime).
    #[error("storage failure: {0}")]
    Storage(String),

    /// A release would push availability above total capacity. Always an upstream bug.
    #[error("releasing {quantity} tickets would exceed the capacity of category {category_id}")]
    CapacityExceeded { category_id: CategoryId, quantity: i32 },

    #[error("invalid ticket category: {0}")]
    InvalidCategory(String),
}

impl ReservationError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        ReservationError::Storage(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReservationError::EventNotFound(_)
                | ReservationError::CategoryNotFound(_)
                | ReservationError::ReservationNotFound(_)
        )
    }

    /// Only storage faults are worth retrying; everything else is a verdict on the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReservationError::Storage(_))
    }
}
