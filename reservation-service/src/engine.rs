//! Reservation use-cases composed from the catalog, the inventory ledger and
//! the reservation store.
//!
//! The ledger and the store are not transactionally linked. The engine keeps
//! them consistent with compensating actions: a failed record write releases
//! the debited tickets, and a failed status flip re-debits released ones.
//!
//! Reserve and cancel run in their own Tokio task. A caller that times out
//! or drops the future stops waiting for the result, but the task always
//! finishes its steps, including compensation.

use shared::{
    BuyerId, CancelOutcome, NewReservation, Reservation, ReservationError, ReservationId,
    ReservationRequest, Result,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::ledger::InventoryLedger;
use crate::store::ReservationStore;

const CANCEL_LOCK_STRIPES: usize = 64;

#[derive(Clone)]
pub struct ReservationEngine {
    catalog: Arc<dyn Catalog>,
    ledger: Arc<dyn InventoryLedger>,
    store: Arc<dyn ReservationStore>,
    cancel_locks: Arc<[Mutex<()>]>,
}

impl ReservationEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        ledger: Arc<dyn InventoryLedger>,
        store: Arc<dyn ReservationStore>,
    ) -> Self {
        let cancel_locks = (0..CANCEL_LOCK_STRIPES)
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into();
        Self {
            catalog,
            ledger,
            store,
            cancel_locks,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Reserves tickets and returns the CONFIRMED reservation.
    ///
    /// Either the tickets are debited and the record exists, or neither
    /// happened.
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation> {
        let engine = self.clone();
        run_to_completion(async move { engine.reserve_in_task(request).await }).await
    }

    /// Cancels a reservation. Cancelling an already cancelled reservation
    /// succeeds with [`CancelOutcome::AlreadyCancelled`] and changes nothing.
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<CancelOutcome> {
        let engine = self.clone();
        run_to_completion(async move { engine.cancel_in_task(reservation_id).await }).await
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .find_by_id(reservation_id)
            .await?
            .ok_or(ReservationError::ReservationNotFound(reservation_id))
    }

    pub async fn list_reservations_for_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Reservation>> {
        self.store.find_by_buyer(buyer_id).await
    }

    /// Every reservation in the system, oldest first.
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        self.store.find_all().await
    }

    async fn reserve_in_task(&self, request: ReservationRequest) -> Result<Reservation> {
        let event = self
            .catalog
            .resolve_event(request.event_id)
            .await?
            .ok_or(ReservationError::EventNotFound(request.event_id))?;
        let category = self
            .catalog
            .resolve_category(event.id, request.category_id)
            .await?
            .ok_or(ReservationError::CategoryNotFound(request.category_id))?;

        let quantity = request.quantity;
        if quantity <= 0 {
            debug!("Rejected reservation for {} with quantity {}", category.id, quantity);
            return Err(ReservationError::InvalidQuantity(quantity));
        }

        if !self.ledger.try_reserve(category.id, quantity).await? {
            debug!(
                "Insufficient inventory in category {} for {} tickets",
                category.id, quantity
            );
            return Err(ReservationError::InsufficientInventory {
                category_id: category.id,
                requested: quantity,
            });
        }

        let new_reservation = NewReservation {
            event_id: event.id,
            category_id: category.id,
            quantity,
            unit_price: category.unit_price,
            buyer_id: request.buyer_id,
        };

        match self.store.create(new_reservation).await {
            Ok(reservation) => {
                info!(
                    "Reservation {} confirmed: {} x '{}' for event {}",
                    reservation.reservation_number(),
                    quantity,
                    category.name,
                    event.id
                );
                Ok(reservation)
            }
            Err(err) => {
                warn!(
                    "Recording reservation failed, releasing {} tickets back to category {}: {}",
                    quantity, category.id, err
                );
                if let Err(release_err) = self.ledger.release(category.id, quantity).await {
                    error!(
                        "Compensating release of {} tickets in category {} failed: {}",
                        quantity, category.id, release_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn cancel_in_task(&self, reservation_id: ReservationId) -> Result<CancelOutcome> {
        let _guard = self.cancel_lock(reservation_id).await;

        let reservation = self.get_reservation(reservation_id).await?;
        if reservation.is_cancelled() {
            debug!("Reservation {} already cancelled", reservation_id);
            return Ok(CancelOutcome::AlreadyCancelled(reservation));
        }

        // Tickets go back before the status flips, never after.
        self.ledger
            .release(reservation.category_id, reservation.quantity)
            .await?;

        match self.store.mark_cancelled(reservation_id).await {
            Ok(CancelOutcome::Cancelled(cancelled)) => {
                info!(
                    "Reservation {} cancelled, {} tickets returned to category {}",
                    cancelled.reservation_number(),
                    cancelled.quantity,
                    cancelled.category_id
                );
                Ok(CancelOutcome::Cancelled(cancelled))
            }
            Ok(CancelOutcome::AlreadyCancelled(existing)) => {
                warn!(
                    "Reservation {} was cancelled concurrently, withdrawing duplicate release",
                    reservation_id
                );
                self.redebit(&reservation).await;
                Ok(CancelOutcome::AlreadyCancelled(existing))
            }
            Err(err) => {
                warn!(
                    "Cancelling reservation {} failed after release, re-debiting: {}",
                    reservation_id, err
                );
                self.redebit(&reservation).await;
                Err(err)
            }
        }
    }

    async fn redebit(&self, reservation: &Reservation) {
        match self
            .ledger
            .try_reserve(reservation.category_id, reservation.quantity)
            .await
        {
            Ok(true) => {}
            Ok(false) => error!(
                "Could not re-debit {} tickets for reservation {}: already resold",
                reservation.quantity, reservation.id
            ),
            Err(err) => error!(
                "Could not re-debit {} tickets for reservation {}: {}",
                reservation.quantity, reservation.id, err
            ),
        }
    }

    async fn cancel_lock(&self, reservation_id: ReservationId) -> MutexGuard<'_, ()> {
        let stripe = (reservation_id.as_uuid().as_u128() % self.cancel_locks.len() as u128) as usize;
        self.cancel_locks[stripe].lock().await
    }
}

async fn run_to_completion<T, F>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ReservationError::Storage(format!("reservation task failed: {}", e)))?
}
