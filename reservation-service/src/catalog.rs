//! Event and ticket-category catalog.
//!
//! The reservation engine only needs the two `resolve_*` lookups; the rest
//! is the organizer and browsing surface the HTTP layer exposes.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::{
    validate_price, CategoryId, Event, EventId, NewCategory, NewEvent, ReservationError, Result,
    TicketCategory,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::db::DbPool;
use crate::ledger::{InMemoryLedger, InventoryLedger};
use crate::models::{CategoryRow, EventRow, NewCategoryRow, NewEventRow};
use crate::schema::{events, ticket_categories};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn add_event(&self, new_event: NewEvent) -> Result<Event>;

    /// Adds a category to an event with its whole capacity available.
    async fn add_category(&self, event_id: EventId, new_category: NewCategory)
        -> Result<TicketCategory>;

    async fn update_price(&self, category_id: CategoryId, unit_price: BigDecimal)
        -> Result<TicketCategory>;

    async fn resolve_event(&self, event_id: EventId) -> Result<Option<Event>>;

    /// `None` when the category is missing or belongs to another event.
    async fn resolve_category(
        &self,
        event_id: EventId,
        category_id: CategoryId,
    ) -> Result<Option<TicketCategory>>;

    async fn list_events(&self) -> Result<Vec<Event>>;

    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>>;

    async fn events_by_organizer(&self, organizer_id: Uuid) -> Result<Vec<Event>>;

    /// Categories of an event in the order they were added.
    async fn categories(&self, event_id: EventId) -> Result<Vec<TicketCategory>>;

    async fn available_categories(&self, event_id: EventId) -> Result<Vec<TicketCategory>> {
        Ok(self
            .categories(event_id)
            .await?
            .into_iter()
            .filter(TicketCategory::has_availability)
            .collect())
    }
}

#[derive(Debug, Clone)]
struct CategoryEntry {
    id: CategoryId,
    event_id: EventId,
    name: String,
    unit_price: BigDecimal,
}

#[derive(Default)]
struct CatalogState {
    events: HashMap<EventId, Event>,
    categories: HashMap<CategoryId, CategoryEntry>,
    by_event: HashMap<EventId, Vec<CategoryId>>,
}

/// Catalog that keeps category metadata itself and leaves the counts to an
/// [`InMemoryLedger`].
pub struct InMemoryCatalog {
    ledger: Arc<InMemoryLedger>,
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            ledger,
            state: RwLock::new(CatalogState::default()),
        }
    }

    async fn with_counts(&self, entry: CategoryEntry) -> Result<TicketCategory> {
        Ok(TicketCategory {
            available_count: self.ledger.peek(entry.id).await?,
            total_capacity: self.ledger.total_capacity(entry.id).await?,
            id: entry.id,
            event_id: entry.event_id,
            name: entry.name,
            unit_price: entry.unit_price,
        })
    }
}

fn sorted_by_start(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.name.cmp(&b.name)));
    events
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn add_event(&self, new_event: NewEvent) -> Result<Event> {
        let event = new_event.into_event(EventId::new());
        self.state.write().await.events.insert(event.id, event.clone());
        info!("Event {} '{}' added", event.id, event.name);
        Ok(event)
    }

    async fn add_category(
        &self,
        event_id: EventId,
        new_category: NewCategory,
    ) -> Result<TicketCategory> {
        new_category.validate()?;
        let mut state = self.state.write().await;
        if !state.events.contains_key(&event_id) {
            return Err(ReservationError::EventNotFound(event_id));
        }

        let entry = CategoryEntry {
            id: CategoryId::new(),
            event_id,
            name: new_category.name,
            unit_price: new_category.unit_price,
        };
        self.ledger
            .open_account(entry.id, new_category.total_capacity)
            .await?;
        state.by_event.entry(event_id).or_default().push(entry.id);
        state.categories.insert(entry.id, entry.clone());
        drop(state);

        info!(
            "Category {} '{}' added to event {} with capacity {}",
            entry.id, entry.name, event_id, new_category.total_capacity
        );
        self.with_counts(entry).await
    }

    async fn update_price(
        &self,
        category_id: CategoryId,
        unit_price: BigDecimal,
    ) -> Result<TicketCategory> {
        validate_price(&unit_price)?;
        let entry = {
            let mut state = self.state.write().await;
            let entry = state
                .categories
                .get_mut(&category_id)
                .ok_or(ReservationError::CategoryNotFound(category_id))?;
            entry.unit_price = unit_price;
            entry.clone()
        };
        info!("Category {} repriced to {}", category_id, entry.unit_price);
        self.with_counts(entry).await
    }

    async fn resolve_event(&self, event_id: EventId) -> Result<Option<Event>> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn resolve_category(
        &self,
        event_id: EventId,
        category_id: CategoryId,
    ) -> Result<Option<TicketCategory>> {
        let entry = self
            .state
            .read()
            .await
            .categories
            .get(&category_id)
            .filter(|entry| entry.event_id == event_id)
            .cloned();
        match entry {
            Some(entry) => Ok(Some(self.with_counts(entry).await?)),
            None => Ok(None),
        }
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let events = self.state.read().await.events.values().cloned().collect();
        Ok(sorted_by_start(events))
    }

    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>> {
        let events = self
            .state
            .read()
            .await
            .events
            .values()
            .filter(|event| event.starts_at >= from && event.starts_at <= to)
            .cloned()
            .collect();
        Ok(sorted_by_start(events))
    }

    async fn events_by_organizer(&self, organizer_id: Uuid) -> Result<Vec<Event>> {
        let events = self
            .state
            .read()
            .await
            .events
            .values()
            .filter(|event| event.organizer_id == Some(organizer_id))
            .cloned()
            .collect();
        Ok(sorted_by_start(events))
    }

    async fn categories(&self, event_id: EventId) -> Result<Vec<TicketCategory>> {
        let entries: Vec<CategoryEntry> = {
            let state = self.state.read().await;
            state
                .by_event
                .get(&event_id)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.categories.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut categories = Vec::with_capacity(entries.len());
        for entry in entries {
            categories.push(self.with_counts(entry).await?);
        }
        Ok(categories)
    }
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: DbPool,
}

impl PgCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn add_event(&self, new_event: NewEvent) -> Result<Event> {
        let event = new_event.into_event(EventId::new());
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        diesel::insert_into(events::table)
            .values(&NewEventRow::from(&event))
            .execute(&mut conn)
            .await
            .map_err(ReservationError::storage)?;

        info!("Event {} '{}' added", event.id, event.name);
        Ok(event)
    }

    async fn add_category(
        &self,
        event_id: EventId,
        new_category: NewCategory,
    ) -> Result<TicketCategory> {
        new_category.validate()?;
        if self.resolve_event(event_id).await?.is_none() {
            return Err(ReservationError::EventNotFound(event_id));
        }

        let row = NewCategoryRow {
            id: *CategoryId::new().as_uuid(),
            event_id: *event_id.as_uuid(),
            name: new_category.name,
            unit_price: new_category.unit_price,
            available_count: new_category.total_capacity,
            total_capacity: new_category.total_capacity,
        };
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        let inserted = diesel::insert_into(ticket_categories::table)
            .values(&row)
            .get_result::<CategoryRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?;

        info!(
            "Category {} '{}' added to event {} with capacity {}",
            inserted.id, inserted.name, event_id, inserted.total_capacity
        );
        Ok(inserted.into())
    }

    async fn update_price(
        &self,
        category_id: CategoryId,
        unit_price: BigDecimal,
    ) -> Result<TicketCategory> {
        validate_price(&unit_price)?;
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;

        let updated = diesel::update(
            ticket_categories::table.filter(ticket_categories::id.eq(*category_id.as_uuid())),
        )
        .set(ticket_categories::unit_price.eq(unit_price))
        .get_result::<CategoryRow>(&mut conn)
        .await
        .optional()
        .map_err(ReservationError::storage)?
        .ok_or(ReservationError::CategoryNotFound(category_id))?;

        info!("Category {} repriced to {}", category_id, updated.unit_price);
        Ok(updated.into())
    }

    async fn resolve_event(&self, event_id: EventId) -> Result<Option<Event>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        events::table
            .filter(events::id.eq(*event_id.as_uuid()))
            .first::<EventRow>(&mut conn)
            .await
            .optional()
            .map_err(ReservationError::storage)?
            .map(Event::try_from)
            .transpose()
    }

    async fn resolve_category(
        &self,
        event_id: EventId,
        category_id: CategoryId,
    ) -> Result<Option<TicketCategory>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        let row = ticket_categories::table
            .filter(ticket_categories::id.eq(*category_id.as_uuid()))
            .filter(ticket_categories::event_id.eq(*event_id.as_uuid()))
            .first::<CategoryRow>(&mut conn)
            .await
            .optional()
            .map_err(ReservationError::storage)?;
        Ok(row.map(Into::into))
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        events::table
            .order((events::starts_at.asc(), events::name.asc()))
            .load::<EventRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn events_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Event>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        events::table
            .filter(events::starts_at.between(from, to))
            .order((events::starts_at.asc(), events::name.asc()))
            .load::<EventRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn events_by_organizer(&self, organizer_id: Uuid) -> Result<Vec<Event>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        events::table
            .filter(events::organizer_id.eq(organizer_id))
            .order((events::starts_at.asc(), events::name.asc()))
            .load::<EventRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn categories(&self, event_id: EventId) -> Result<Vec<TicketCategory>> {
        let mut conn = self.pool.get().await.map_err(ReservationError::storage)?;
        let rows = ticket_categories::table
            .filter(ticket_categories::event_id.eq(*event_id.as_uuid()))
            .order((ticket_categories::created_at.asc(), ticket_categories::id.asc()))
            .load::<CategoryRow>(&mut conn)
            .await
            .map_err(ReservationError::storage)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
