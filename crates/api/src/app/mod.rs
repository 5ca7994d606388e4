//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: in-memory infrastructure (event store/bus, read models, suggestion runner)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON helpers
//! - `errors.rs`: consistent error responses

use std::io;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use ezbooks_auth::Hs256JwtValidator;
use ezbooks_infra::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Starts the background workers; they stop when the router is dropped.
pub fn build_app(config: &AppConfig) -> io::Result<Router> {
    let jwt = Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(config)?);

    // Protected routes: require auth + tenant context.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(
                auth_state,
                middleware::auth_middleware,
            ))
            .layer(Extension(services)),
    );

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected))
}
