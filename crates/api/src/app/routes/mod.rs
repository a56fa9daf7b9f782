use axum::{Router, routing::get};

pub mod accounts;
pub mod branches;
pub mod common;
pub mod parties;
pub mod products;
pub mod purchases;
pub mod stock_transfers;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/branches", branches::router())
        .nest("/products", products::router())
        .nest("/customers", parties::customers_router())
        .nest("/suppliers", parties::suppliers_router())
        .nest("/accounts", accounts::router())
        .nest("/purchases", purchases::router())
        .nest("/stock-transfers", stock_transfers::router())
}
