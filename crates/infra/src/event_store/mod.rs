//! Append-only event store boundary.
//!
//! Tenant-scoped event streams, one per aggregate instance, with an in-memory
//! backend for dev/tests and a Postgres backend for persistent deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
