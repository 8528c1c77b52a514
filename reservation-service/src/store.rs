use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{
    BuyerId, CancelOutcome, NewReservation, Reservation, ReservationError, ReservationId,
    ReservationStatus, Result,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::DbPool;
use crate::models::{NewReservationRow, ReservationRow};
use crate::schema::reservations;

/// Record keeper for reservations. Stores never look at inventory.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Persists a new CONFIRMED reservation with a fresh id and timestamp.
    async fn create(&self, new_reservation: NewReservation) -> Result<Reservation>;

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// All reservations for a buyer, oldest first.
    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Reservation>>;

    /// Every reservation regardless of status, oldest first.
    async fn find_all(&self) -> Result<Vec<Reservation>>;

    /// Flips CONFIRMED to CANCELLED. A reservation that is already cancelled
    /// is reported as `AlreadyCancelled` and left untouched.
    async fn mark_cancelled(&self, id: ReservationId) -> Result<CancelOutcome>;
}

#[derive(Default)]
struct StoreState {
    reservations: HashMap<ReservationId, Reservation>,
    by_buyer: HashMap<BuyerId, Vec<ReservationId>>,
    created: Vec<ReservationId>,
}

#[derive(Default)]
pub struct InMemoryReservationStore {
    state: RwLock<StoreState>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn create(&self, new_reservation: NewReservation) -> Result<Reservation> {
        let reservation = new_reservation.into_reservation(ReservationId::new(), Utc::now());
        let mut state = self.state.write().await;
        if let Some(buyer_id) = reservation.buyer_id {
            state.by_buyer.entry(buyer_id).or_default().push(reservation.id);
        }
        state.created.push(reservation.id);
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .by_buyer
            .get(&buyer_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.reservations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_all(&self) -> Result<Vec<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .created
            .iter()
            .filter_map(|id| state.reservations.get(id).cloned())
            .collect())
    }

    async fn mark_cancelled(&self, id: ReservationId) -> Result<CancelOutcome> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .get_mut(&id)
            .ok_or(ReservationError::ReservationNotFound(id))?;

        if reservation.is_cancelled() {
            return Ok(CancelOutcome::AlreadyCancelled(reservation.clone()));
        }
        reservation.status = ReservationStatus::Cancelled;
        reservation.cancelled_at = Some(Utc::now());
        Ok(CancelOutcome::Cancelled(reservation.clone()))
    }
}

#[derive(Clone)]
pub struct PgReservationStore {
    pool: DbPool,
}

impl PgReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn create(&self, new_reservation: NewReservation) -> Result<Reservation> {
        let reservation = new_reservation.into_reservation(ReservationId::new(), Utc::now());
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        diesel::insert_into(reservations::table)
            .values(&NewReservationRow::from(&reservation))
            .execute(&mut conn)
            .await
            .map_err(ReservationError::storage)?;

        Ok(reservation)
    }

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        reservations::table
            .filter(reservations::id.eq(*id.as_uuid()))
            .first::<ReservationRow>(&mut conn)
            .await
            .optional()
            .map_err(ReservationError::storage)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Reservation>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        reservations::table
            .filter(reservations::buyer_id.eq(*buyer_id.as_uuid()))
            .order((reservations::created_at.asc(), reservations::id.asc()))
            .load::<ReservationRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn find_all(&self) -> Result<Vec<Reservation>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        reservations::table
            .order((reservations::created_at.asc(), reservations::id.asc()))
            .load::<ReservationRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?
            .into_iter()
            .map(Reservation::try_from)
            .collect()
    }

    async fn mark_cancelled(&self, id: ReservationId) -> Result<CancelOutcome> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        let flipped = diesel::update(
            reservations::table
                .filter(reservations::id.eq(*id.as_uuid()))
                .filter(reservations::status.eq(ReservationStatus::Confirmed.as_str())),
        )
        .set((
            reservations::status.eq(ReservationStatus::Cancelled.as_str()),
            reservations::cancelled_at.eq(Some(Utc::now())),
        ))
        .get_result::<ReservationRow>(&mut conn)
        .await
        .optional()
        .map_err(ReservationError::storage)?;

        if let Some(row) = flipped {
            return Ok(CancelOutcome::Cancelled(Reservation::try_from(row)?));
        }

        let found = diesel::select(exists(
            reservations::table.filter(reservations::id.eq(*id.as_uuid())),
        ))
        .get_result::<bool>(&mut conn)
        .await
        .map_err(ReservationError::storage)?;
        drop(conn);

        if !found {
            return Err(ReservationError::ReservationNotFound(id));
        }
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(ReservationError::ReservationNotFound(id))?;
        Ok(CancelOutcome::AlreadyCancelled(existing))
    }
}
