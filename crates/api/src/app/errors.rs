use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use docgen_infra::errors::{BoundaryErrorKind, PipelineError};
use docgen_infra::service::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Pipeline(e) => pipeline_error_to_response(&e),
        ServiceError::AlreadyExists(id) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("Batch already exists with ID: {id}"),
        ),
        ServiceError::Queue(e) => {
            tracing::error!(error = %e, "failed to enqueue batch");
            json_error(
                StatusCode::BAD_GATEWAY,
                "publish_error",
                "Batch could not be queued for processing",
            )
        }
    }
}

/// Only `NotFound` carries detail; everything else is an opaque 500.
pub fn pipeline_error_to_response(err: &PipelineError) -> axum::response::Response {
    let boundary = err.boundary();
    if boundary.kind == BoundaryErrorKind::Internal {
        tracing::error!(error = %err, "request failed");
    }

    let status = StatusCode::from_u16(boundary.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_error(status, boundary.code(), boundary.message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
