//! Reservation engine behaviour against the in-memory backend.
//!
//! Run with: `cargo test -p reservation-service --test engine`

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use futures::future::join_all;
use reservation_service::catalog::{Catalog, InMemoryCatalog};
use reservation_service::engine::ReservationEngine;
use reservation_service::ledger::{InMemoryLedger, InventoryLedger};
use reservation_service::store::{InMemoryReservationStore, ReservationStore};
use shared::{
    BuyerId, CancelOutcome, CategoryId, Event, EventId, EventType, NewCategory, NewEvent,
    NewReservation, Reservation, ReservationError, ReservationId, ReservationRequest,
    ReservationStatus, Result, TicketCategory,
};
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that can fail or stall on demand.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryReservationStore,
    fail_create: bool,
    fail_mark_cancelled: bool,
    create_delay: Option<Duration>,
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn create(&self, new_reservation: NewReservation) -> Result<Reservation> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create {
            return Err(ReservationError::Storage("database unavailable".to_string()));
        }
        self.inner.create(new_reservation).await
    }

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Reservation>> {
        self.inner.find_by_buyer(buyer_id).await
    }

    async fn find_all(&self) -> Result<Vec<Reservation>> {
        self.inner.find_all().await
    }

    async fn mark_cancelled(&self, id: ReservationId) -> Result<CancelOutcome> {
        if self.fail_mark_cancelled {
            return Err(ReservationError::Storage("database unavailable".to_string()));
        }
        self.inner.mark_cancelled(id).await
    }
}

struct Fixture {
    engine: ReservationEngine,
    catalog: Arc<InMemoryCatalog>,
    ledger: Arc<InMemoryLedger>,
    event: Event,
    category: TicketCategory,
}

impl Fixture {
    async fn new(capacity: i32) -> Self {
        Self::with_store(capacity, FlakyStore::default()).await
    }

    async fn with_store(capacity: i32, store: FlakyStore) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let catalog = Arc::new(InMemoryCatalog::new(Arc::clone(&ledger)));
        let engine = ReservationEngine::new(catalog.clone(), ledger.clone(), Arc::new(store));

        let event = catalog
            .add_event(NewEvent {
                name: "Summer Festival".to_string(),
                starts_at: Utc::now(),
                location: "Main Stage".to_string(),
                event_type: EventType::Concert,
                organizer_id: None,
            })
            .await
            .unwrap();
        let category = catalog
            .add_category(
                event.id,
                NewCategory {
                    name: "General Admission".to_string(),
                    unit_price: BigDecimal::from(50),
                    total_capacity: capacity,
                },
            )
            .await
            .unwrap();

        Self {
            engine,
            catalog,
            ledger,
            event,
            category,
        }
    }

    fn request(&self, quantity: i32, buyer_id: Option<BuyerId>) -> ReservationRequest {
        ReservationRequest {
            event_id: self.event.id,
            category_id: self.category.id,
            quantity,
            buyer_id,
        }
    }

    async fn available(&self) -> i32 {
        self.ledger.peek(self.category.id).await.unwrap()
    }

    async fn confirmed_quantity(&self) -> i32 {
        self.engine
            .list_reservations()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.category_id == self.category.id && !r.is_cancelled())
            .map(|r| r.quantity)
            .sum()
    }
}

#[tokio::test]
async fn scenario_reserve_reject_cancel() {
    let fx = Fixture::new(100).await;
    let u1 = BuyerId::new();
    let u2 = BuyerId::new();

    let first = fx.engine.reserve(fx.request(30, Some(u1))).await.unwrap();
    assert_eq!(first.status, ReservationStatus::Confirmed);
    assert_eq!(first.buyer_id, Some(u1));
    assert_eq!(fx.available().await, 70);

    let second = fx.engine.reserve(fx.request(80, Some(u2))).await;
    assert_eq!(
        second,
        Err(ReservationError::InsufficientInventory {
            category_id: fx.category.id,
            requested: 80,
        })
    );
    assert_eq!(fx.available().await, 70);
    assert!(fx.engine.list_reservations_for_buyer(u2).await.unwrap().is_empty());

    let outcome = fx.engine.cancel(first.id).await.unwrap();
    assert!(!outcome.was_noop());
    assert_eq!(outcome.reservation().status, ReservationStatus::Cancelled);
    assert_eq!(fx.available().await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_oversell() {
    let fx = Fixture::new(10).await;

    let attempts = (0..5).map(|_| {
        let engine = fx.engine.clone();
        let request = fx.request(3, None);
        tokio::spawn(async move { engine.reserve(request).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let granted = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ReservationError::InsufficientInventory { .. })))
        .count();

    assert_eq!(granted, 3);
    assert_eq!(rejected, 2);
    assert_eq!(fx.available().await, 1);
}

#[tokio::test]
async fn cancelling_twice_restores_inventory_once() {
    let fx = Fixture::new(20).await;
    let reservation = fx.engine.reserve(fx.request(5, None)).await.unwrap();
    assert_eq!(fx.available().await, 15);

    let first = fx.engine.cancel(reservation.id).await.unwrap();
    let second = fx.engine.cancel(reservation.id).await.unwrap();

    assert!(matches!(first, CancelOutcome::Cancelled(_)));
    assert!(matches!(second, CancelOutcome::AlreadyCancelled(_)));
    assert_eq!(fx.available().await, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_release_once() {
    let fx = Fixture::new(8).await;
    let reservation_id = fx.engine.reserve(fx.request(6, None)).await.unwrap().id;

    let cancels = (0..10).map(|_| {
        let engine = fx.engine.clone();
        tokio::spawn(async move { engine.cancel(reservation_id).await })
    });
    let outcomes: Vec<_> = join_all(cancels)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let effective = outcomes.iter().filter(|o| !o.was_noop()).count();
    assert_eq!(effective, 1);
    assert_eq!(fx.available().await, 8);
}

#[tokio::test]
async fn failed_record_write_releases_inventory() {
    let store = FlakyStore {
        fail_create: true,
        ..FlakyStore::default()
    };
    let fx = Fixture::with_store(10, store).await;
    let buyer = BuyerId::new();

    let result = fx.engine.reserve(fx.request(4, Some(buyer))).await;

    assert!(matches!(result, Err(ReservationError::Storage(_))));
    assert_eq!(fx.available().await, 10);
    assert!(fx.engine.list_reservations_for_buyer(buyer).await.unwrap().is_empty());
    assert!(fx.engine.list_reservations().await.unwrap().is_empty());
}

#[tokio::test]
async fn caller_timeout_does_not_skip_compensation() {
    let store = FlakyStore {
        fail_create: true,
        create_delay: Some(Duration::from_millis(100)),
        ..FlakyStore::default()
    };
    let fx = Fixture::with_store(10, store).await;

    let waited = tokio::time::timeout(
        Duration::from_millis(10),
        fx.engine.reserve(fx.request(7, None)),
    )
    .await;
    assert!(waited.is_err(), "caller should have given up first");
    assert_eq!(fx.available().await, 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fx.available().await, 10);
}

#[tokio::test]
async fn failed_status_flip_keeps_tickets_held() {
    let store = FlakyStore {
        fail_mark_cancelled: true,
        ..FlakyStore::default()
    };
    let fx = Fixture::with_store(10, store).await;
    let reservation = fx.engine.reserve(fx.request(4, None)).await.unwrap();

    let result = fx.engine.cancel(reservation.id).await;

    assert!(matches!(result, Err(ReservationError::Storage(_))));
    assert_eq!(fx.available().await, 6);
    let stored = fx.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(stored.status, ReservationStatus::Confirmed);
}

#[tokio::test]
async fn reserve_cancel_reserve_round_trip() {
    let fx = Fixture::new(12).await;

    let first = fx.engine.reserve(fx.request(12, None)).await.unwrap();
    assert_eq!(fx.available().await, 0);
    fx.engine.cancel(first.id).await.unwrap();
    assert_eq!(fx.available().await, 12);

    let again = fx.engine.reserve(fx.request(12, None)).await.unwrap();
    assert_ne!(again.id, first.id);
    assert_eq!(fx.available().await, 0);

    fx.engine.cancel(again.id).await.unwrap();
    assert_eq!(fx.available().await, 12);
}

#[tokio::test]
async fn lookups_fail_with_the_right_kind() {
    let fx = Fixture::new(5).await;

    let missing_event = EventId::new();
    let result = fx
        .engine
        .reserve(ReservationRequest {
            event_id: missing_event,
            ..fx.request(1, None)
        })
        .await;
    assert_eq!(result, Err(ReservationError::EventNotFound(missing_event)));

    let missing_category = CategoryId::new();
    let result = fx
        .engine
        .reserve(ReservationRequest {
            category_id: missing_category,
            ..fx.request(1, None)
        })
        .await;
    assert_eq!(result, Err(ReservationError::CategoryNotFound(missing_category)));

    for quantity in [0, -3] {
        assert_eq!(
            fx.engine.reserve(fx.request(quantity, None)).await,
            Err(ReservationError::InvalidQuantity(quantity))
        );
    }

    let missing_reservation = ReservationId::new();
    assert_eq!(
        fx.engine.cancel(missing_reservation).await,
        Err(ReservationError::ReservationNotFound(missing_reservation))
    );
    assert_eq!(
        fx.engine.get_reservation(missing_reservation).await,
        Err(ReservationError::ReservationNotFound(missing_reservation))
    );
    assert_eq!(fx.available().await, 5);
}

#[tokio::test]
async fn category_from_another_event_is_not_found() {
    let fx = Fixture::new(5).await;
    let other = fx
        .catalog
        .add_event(NewEvent {
            name: "Derby".to_string(),
            starts_at: Utc::now(),
            location: "Stadium".to_string(),
            event_type: EventType::Sports,
            organizer_id: None,
        })
        .await
        .unwrap();

    let result = fx
        .engine
        .reserve(ReservationRequest {
            event_id: other.id,
            ..fx.request(1, None)
        })
        .await;

    assert_eq!(result, Err(ReservationError::CategoryNotFound(fx.category.id)));
    assert_eq!(fx.available().await, 5);
}

#[tokio::test]
async fn total_price_is_fixed_at_booking_time() {
    let fx = Fixture::new(10).await;
    let reservation = fx.engine.reserve(fx.request(3, None)).await.unwrap();
    assert_eq!(reservation.total_price(), BigDecimal::from(150));

    fx.catalog
        .update_price(fx.category.id, BigDecimal::from(80))
        .await
        .unwrap();

    let reread = fx.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(reread.unit_price, BigDecimal::from(50));
    assert_eq!(reread.total_price(), BigDecimal::from(150));

    let later = fx.engine.reserve(fx.request(1, None)).await.unwrap();
    assert_eq!(later.total_price(), BigDecimal::from(80));
}

#[tokio::test]
async fn buyer_history_is_in_creation_order_and_anonymous_is_excluded() {
    let fx = Fixture::new(50).await;
    let buyer = BuyerId::new();

    let first = fx.engine.reserve(fx.request(1, Some(buyer))).await.unwrap();
    let anonymous = fx.engine.reserve(fx.request(2, None)).await.unwrap();
    let second = fx.engine.reserve(fx.request(3, Some(buyer))).await.unwrap();
    fx.engine.cancel(first.id).await.unwrap();

    assert!(anonymous.is_anonymous());
    let history = fx.engine.list_reservations_for_buyer(buyer).await.unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(history[0].status, ReservationStatus::Cancelled);
    assert_eq!(history[1].status, ReservationStatus::Confirmed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_matches_confirmed_reservations_after_mixed_load() {
    let capacity = 60;
    let fx = Fixture::new(capacity).await;

    let reserves = (0..40).map(|i| {
        let engine = fx.engine.clone();
        let request = fx.request(i % 5 + 1, None);
        tokio::spawn(async move { engine.reserve(request).await })
    });
    let granted: Vec<Reservation> = join_all(reserves)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap().ok())
        .collect();
    assert!(!granted.is_empty());

    let cancels = granted.iter().step_by(2).map(|reservation| {
        let engine = fx.engine.clone();
        let id = reservation.id;
        tokio::spawn(async move { engine.cancel(id).await })
    });
    for joined in join_all(cancels).await {
        joined.unwrap().unwrap();
    }

    let available = fx.available().await;
    assert!((0..=capacity).contains(&available));
    assert_eq!(capacity - available, fx.confirmed_quantity().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn releases_racing_reserves_keep_counts_consistent() {
    let capacity = 20;
    let fx = Fixture::new(capacity).await;

    let tasks = (0..1000).map(|i| {
        let engine = fx.engine.clone();
        let request = fx.request(i % 3 + 1, None);
        let churn = i % 2 == 0;
        tokio::spawn(async move {
            match engine.reserve(request).await {
                Ok(reservation) if churn => {
                    tokio::task::yield_now().await;
                    engine.cancel(reservation.id).await.map(|_| ())
                }
                Ok(_) | Err(ReservationError::InsufficientInventory { .. }) => Ok(()),
                Err(other) => Err(other),
            }
        })
    });

    let ledger = fx.ledger.clone();
    let category_id = fx.category.id;
    let sampler = tokio::spawn(async move {
        for _ in 0..500 {
            let available = ledger.peek(category_id).await.unwrap();
            assert!((0..=capacity).contains(&available), "observed {available}");
            tokio::task::yield_now().await;
        }
    });

    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }
    sampler.await.unwrap();

    let available = fx.available().await;
    assert!((0..=capacity).contains(&available));
    assert_eq!(capacity - available, fx.confirmed_quantity().await);
}

#[tokio::test]
async fn list_reservations_covers_every_buyer_and_status() {
    let fx = Fixture::new(10).await;
    let first = fx.engine.reserve(fx.request(1, Some(BuyerId::new()))).await.unwrap();
    let second = fx.engine.reserve(fx.request(2, None)).await.unwrap();
    fx.engine.cancel(first.id).await.unwrap();

    let all = fx.engine.list_reservations().await.unwrap();
    let ids: Vec<_> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(all[0].status, ReservationStatus::Cancelled);
    assert_eq!(fx.confirmed_quantity().await, 2);
}

#[tokio::test]
async fn categories_do_not_share_inventory() {
    let fx = Fixture::new(3).await;
    let second = fx
        .catalog
        .add_category(
            fx.event.id,
            NewCategory {
                name: "VIP".to_string(),
                unit_price: BigDecimal::from(300),
                total_capacity: 2,
            },
        )
        .await
        .unwrap();

    fx.engine.reserve(fx.request(3, None)).await.unwrap();
    let vip = fx
        .engine
        .reserve(ReservationRequest {
            category_id: second.id,
            ..fx.request(2, None)
        })
        .await
        .unwrap();

    assert_eq!(vip.total_price(), BigDecimal::from(600));
    assert_eq!(fx.available().await, 0);
    assert_eq!(fx.ledger.peek(second.id).await.unwrap(), 0);
    assert!(fx.catalog.available_categories(fx.event.id).await.unwrap().is_empty());
}
