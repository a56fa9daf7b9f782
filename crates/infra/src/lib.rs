//! Infrastructure layer: event stores, command dispatch, read models,
//! projections, and the sagas that span aggregates: payment reconciliation,
//! stock movements and account transfers.

pub mod command_dispatcher;
pub mod event_store;
pub mod inventory;
pub mod projections;
pub mod read_model;
pub mod reconciliation;
pub mod scoped_query;
pub mod transfers;
pub mod workers;
