use axum::Router;

pub mod batches;
pub mod system;

/// Router for all prefixed endpoints.
pub fn router() -> Router {
    Router::new().nest("/batches", batches::router())
}
