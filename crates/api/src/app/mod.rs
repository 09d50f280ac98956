//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store / renderer / queue / pipeline / trigger wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use docgen_infra::config::AppConfig;
use docgen_infra::workers::QueueTriggerHandle;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// A built application: the router plus the background queue trigger it feeds.
pub struct AppHandle {
    pub router: Router,
    pub trigger: QueueTriggerHandle,
}

/// Build the full HTTP application (public entrypoint used by `main.rs`).
///
/// Must be called inside a tokio runtime: the queue trigger is spawned here.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<AppHandle> {
    let wiring = services::build_services(config).await?;

    Ok(AppHandle {
        router: router(&config.api_prefix, wiring.services),
        trigger: wiring.trigger,
    })
}

/// Routes under `prefix`, plus the unprefixed health check.
pub fn router(prefix: &str, services: Arc<services::AppServices>) -> Router {
    let api = routes::router().layer(Extension(services));
    let app = Router::new().route("/health", get(routes::system::health));

    let app = if prefix.is_empty() {
        app.merge(api)
    } else {
        app.nest(prefix, api)
    };

    app.layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::request_logging)))
}
