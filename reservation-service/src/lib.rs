pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod models;
pub mod schema;
pub mod store;

use std::sync::Arc;

use crate::catalog::{InMemoryCatalog, PgCatalog};
use crate::db::DbPool;
use crate::engine::ReservationEngine;
use crate::ledger::{InMemoryLedger, PgLedger};
use crate::store::{InMemoryReservationStore, PgReservationStore};

/// Engine whose catalog, ledger and store all live in process memory.
pub fn in_memory_engine() -> ReservationEngine {
    let ledger = Arc::new(InMemoryLedger::new());
    let catalog = Arc::new(InMemoryCatalog::new(Arc::clone(&ledger)));
    ReservationEngine::new(catalog, ledger, Arc::new(InMemoryReservationStore::new()))
}

pub fn postgres_engine(pool: DbPool) -> ReservationEngine {
    ReservationEngine::new(
        Arc::new(PgCatalog::new(pool.clone())),
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(PgReservationStore::new(pool)),
    )
}
