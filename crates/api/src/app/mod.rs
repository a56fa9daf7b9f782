//! HTTP API application wiring (axum router + service wiring).
//!
//! - `services.rs`: event store, bus, read models, dispatcher, reconciler
//! - `routes/`: handlers, one file per domain area
//! - `dto.rs`: request bodies
//! - `errors.rs`: JSON error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::config::Config;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::StartupError;

/// Build the full HTTP router (used by `main.rs` and the black-box tests).
pub async fn build_app(config: &Config) -> Result<Router, StartupError> {
    let jwt = Arc::new(branchpos_auth::Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(config).await?);

    // Protected routes: tenant, principal and branch context from the token.
    let protected = routes::router()
        .layer(axum::middleware::from_fn(middleware::active_branch_middleware))
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new()))
}
