//! Per-category ticket availability.
//!
//! The ledger is the only component allowed to change a category's available
//! count. Every mutation is a single atomic step on one category, so
//! operations on different categories never wait on each other.

use async_trait::async_trait;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{CategoryId, ReservationError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::db::DbPool;
use crate::schema::ticket_categories;

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Debits `quantity` if that many tickets are available.
    ///
    /// Returns `Ok(false)` without touching the count when there are not
    /// enough tickets, and `CategoryNotFound` when the category is unknown.
    async fn try_reserve(&self, category_id: CategoryId, quantity: i32) -> Result<bool>;

    /// Credits `quantity` back. Refuses with `CapacityExceeded` rather than
    /// pushing the count above total capacity.
    async fn release(&self, category_id: CategoryId, quantity: i32) -> Result<()>;

    /// Point-in-time snapshot. Never use it to decide whether to reserve.
    async fn peek(&self, category_id: CategoryId) -> Result<i32>;
}

fn ensure_positive(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(ReservationError::InvalidQuantity(quantity));
    }
    Ok(())
}

fn capacity_exceeded(category_id: CategoryId, quantity: i32) -> ReservationError {
    error!(
        "Refusing to release {} tickets into category {}: capacity would be exceeded",
        quantity, category_id
    );
    ReservationError::CapacityExceeded { category_id, quantity }
}

struct Account {
    available: AtomicI32,
    total_capacity: i32,
}

#[derive(Default)]
pub struct InMemoryLedger {
    accounts: RwLock<HashMap<CategoryId, Arc<Account>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a category with its full capacity available.
    pub async fn open_account(&self, category_id: CategoryId, total_capacity: i32) -> Result<()> {
        if total_capacity < 0 {
            return Err(ReservationError::InvalidCategory(format!(
                "total capacity cannot be negative: {}",
                total_capacity
            )));
        }
        let account = Arc::new(Account {
            available: AtomicI32::new(total_capacity),
            total_capacity,
        });
        self.accounts.write().await.insert(category_id, account);
        Ok(())
    }

    pub async fn total_capacity(&self, category_id: CategoryId) -> Result<i32> {
        Ok(self.account(category_id).await?.total_capacity)
    }

    async fn account(&self, category_id: CategoryId) -> Result<Arc<Account>> {
        self.accounts
            .read()
            .await
            .get(&category_id)
            .cloned()
            .ok_or(ReservationError::CategoryNotFound(category_id))
    }
}

#[async_trait]
impl InventoryLedger for InMemoryLedger {
    async fn try_reserve(&self, category_id: CategoryId, quantity: i32) -> Result<bool> {
        ensure_positive(quantity)?;
        let account = self.account(category_id).await?;
        let debited = account
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                (available >= quantity).then(|| available - quantity)
            })
            .is_ok();
        if !debited {
            debug!("Category {} cannot cover {} tickets", category_id, quantity);
        }
        Ok(debited)
    }

    async fn release(&self, category_id: CategoryId, quantity: i32) -> Result<()> {
        ensure_positive(quantity)?;
        let account = self.account(category_id).await?;
        let capacity = account.total_capacity;
        account
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                available.checked_add(quantity).filter(|next| *next <= capacity)
            })
            .map(|_| ())
            .map_err(|_| capacity_exceeded(category_id, quantity))
    }

    async fn peek(&self, category_id: CategoryId) -> Result<i32> {
        // Qualified: diesel_async::RunQueryDsl::load would otherwise win method resolution.
        let account = self.account(category_id).await?;
        Ok(AtomicI32::load(&account.available, Ordering::Acquire))
    }
}

/// Ledger backed by the `ticket_categories` table. Each operation is one
/// conditional `UPDATE`, which PostgreSQL serializes on the category row.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn category_exists(&self, category_id: CategoryId) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        diesel::select(exists(
            ticket_categories::table.filter(ticket_categories::id.eq(*category_id.as_uuid())),
        ))
        .get_result::<bool>(&mut conn)
        .await
        .map_err(ReservationError::storage)
    }
}

#[async_trait]
impl InventoryLedger for PgLedger {
    async fn try_reserve(&self, category_id: CategoryId, quantity: i32) -> Result<bool> {
        ensure_positive(quantity)?;
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        let updated = diesel::update(
            ticket_categories::table
                .filter(ticket_categories::id.eq(*category_id.as_uuid()))
                .filter(ticket_categories::available_count.ge(quantity)),
        )
        .set(ticket_categories::available_count.eq(ticket_categories::available_count - quantity))
        .execute(&mut conn)
        .await
        .map_err(ReservationError::storage)?;
        drop(conn);

        if updated == 1 {
            return Ok(true);
        }
        if self.category_exists(category_id).await? {
            debug!("Category {} cannot cover {} tickets", category_id, quantity);
            Ok(false)
        } else {
            Err(ReservationError::CategoryNotFound(category_id))
        }
    }

    async fn release(&self, category_id: CategoryId, quantity: i32) -> Result<()> {
        ensure_positive(quantity)?;
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        let updated = diesel::update(
            ticket_categories::table
                .filter(ticket_categories::id.eq(*category_id.as_uuid()))
                .filter(
                    (ticket_categories::available_count + quantity)
                        .le(ticket_categories::total_capacity),
                ),
        )
        .set(ticket_categories::available_count.eq(ticket_categories::available_count + quantity))
        .execute(&mut conn)
        .await
        .map_err(ReservationError::storage)?;
        drop(conn);

        if updated == 1 {
            return Ok(());
        }
        if self.category_exists(category_id).await? {
            Err(capacity_exceeded(category_id, quantity))
        } else {
            Err(ReservationError::CategoryNotFound(category_id))
        }
    }

    async fn peek(&self, category_id: CategoryId) -> Result<i32> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        ticket_categories::table
            .filter(ticket_categories::id.eq(*category_id.as_uuid()))
            .select(ticket_categories::available_count)
            .first::<i32>(&mut conn)
            .await
            .optional()
            .map_err(ReservationError::storage)?
            .ok_or(ReservationError::CategoryNotFound(category_id))
    }
}
