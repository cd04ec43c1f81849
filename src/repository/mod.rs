//! Repository layer for database persistence.
//!
//! All database access goes through Diesel on SQLite, wrapped for async use.

pub mod context;
pub mod models;
pub mod pool;

pub mod outbox;
pub mod requests;
pub mod versions;

pub mod util;

pub use context::DbContext;
pub use outbox::{DieselEventOutbox, OutboxError, PendingEvent};
pub use pool::{DieselError, SqlitePool};
pub use requests::{
    CancelOutcome, Completion, DieselAdjustmentRepository, Failure, RequestStoreError,
};
pub use versions::DieselVersionStore;
