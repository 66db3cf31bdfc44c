//! The `Store` and `Queue` collaborator interfaces (§6.1) the orchestration
//! core depends on: a document store with per-field conditional updates,
//! and a durable named-queue publish/subscribe bus.
//!
//! Two backends ship: `PgStore`/`PgQueue` (Postgres, via `sqlx`) for real
//! deployments, and `MemoryStore`/`MemoryQueue` behind the `test-util`
//! feature for unit and integration tests — the same "lightweight
//! stand-in instead of the real collaborator" shape as keeping
//! `agent-mock` around instead of a real Windows VM.

pub mod queue;
pub mod schema;
pub mod store;

mod pg_store;
mod pg_queue;

#[cfg(any(test, feature = "test-util"))]
pub mod memory_store;
#[cfg(any(test, feature = "test-util"))]
pub mod memory_queue;

pub use pg_queue::PgQueue;
pub use pg_store::PgStore;
pub use queue::{Queue, Task, TaskHandle};
pub use store::Store;

#[cfg(any(test, feature = "test-util"))]
pub use memory_queue::MemoryQueue;
#[cfg(any(test, feature = "test-util"))]
pub use memory_store::MemoryStore;

fn sqlx_err(e: sqlx::Error) -> fame_core::FameError {
    fame_core::FameError::Store(e.to_string())
}
