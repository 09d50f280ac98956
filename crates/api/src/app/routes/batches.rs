use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_batches).post(create_batch))
        .route("/:id", get(get_batch).delete(delete_batch))
        .route("/:id/process", post(enqueue_batch))
        .route("/:id/process/test", post(process_batch_now))
}

pub async fn list_batches(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.batches.list().await {
        Ok(batches) => (StatusCode::OK, Json(batches)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn create_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateBatchRequest>,
) -> axum::response::Response {
    let new = match body.into_new_batch() {
        Ok(new) => new,
        Err(resp) => return resp,
    };

    match services.batches.create(new).await {
        Ok(batch) => (StatusCode::CREATED, Json(batch)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_batch_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.batches.get(&id).await {
        Ok(batch) => (StatusCode::OK, Json(batch)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_batch_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.batches.remove(&id).await {
        Ok(batch) => (StatusCode::OK, Json(batch)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Queue the batch for the background trigger and return immediately.
pub async fn enqueue_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_batch_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.batches.enqueue(&id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(dto::QueuedResponse { id, queued: true }),
        )
            .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// Process synchronously (test/debug path) and return the updated batch.
pub async fn process_batch_now(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_batch_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.batches.process(&id).await {
        Ok(batch) => (StatusCode::OK, Json(batch)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
