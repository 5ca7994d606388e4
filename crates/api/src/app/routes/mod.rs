use axum::{routing::get, Router};

pub mod accounts;
pub mod common;
pub mod ledger;
pub mod profile;
pub mod proposals;
pub mod receipts;
pub mod system;
pub mod transactions;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/profile", get(profile::get_profile).put(profile::put_profile))
        .nest("/accounts", accounts::router())
        .nest("/transactions", transactions::router())
        .nest("/proposals", proposals::router())
        .nest("/ledger", ledger::router())
        .nest("/receipts", receipts::router())
}
