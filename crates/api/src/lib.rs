//! HTTP API: configuration, request context, routing and handlers.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
