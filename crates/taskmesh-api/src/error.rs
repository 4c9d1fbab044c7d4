//! Maps domain errors onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("engine error: {0}")]
    Engine(#[from] taskmesh_core::EngineError),
    #[error("store error: {0}")]
    Store(#[from] taskmesh_store::StoreError),
    #[error("registry error: {0}")]
    Registry(#[from] taskmesh_registry::RegistryError),
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Engine(taskmesh_core::EngineError::JobNotFound(_))
            | ApiError::Engine(taskmesh_core::EngineError::InstanceNotFound(_))
            | ApiError::Engine(taskmesh_core::EngineError::TaskNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(taskmesh_store::StoreError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Engine(taskmesh_core::EngineError::CasConflict(_)) => StatusCode::CONFLICT,
            ApiError::Engine(taskmesh_core::EngineError::InvalidSplit { .. })
            | ApiError::Engine(taskmesh_core::EngineError::InvalidTriggerValue { .. })
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_variants_map_to_404() {
        let cases = vec![
            ApiError::from(taskmesh_core::EngineError::JobNotFound(1)),
            ApiError::from(taskmesh_core::EngineError::InstanceNotFound(1)),
            ApiError::from(taskmesh_core::EngineError::TaskNotFound(1)),
            ApiError::from(taskmesh_store::StoreError::NotFound),
        ];
        for err in cases {
            assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn cas_conflict_maps_to_409() {
        let err = ApiError::from(taskmesh_core::EngineError::CasConflict("instance 1".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn bad_request_variants_map_to_400() {
        let cases = vec![
            ApiError::from(taskmesh_core::EngineError::InvalidSplit { job_id: 1, reason: "empty".to_string() }),
            ApiError::from(taskmesh_core::EngineError::InvalidTriggerValue {
                job_id: 1,
                trigger_type: taskmesh_core::model::TriggerType::Cron,
                reason: "malformed".to_string(),
            }),
            ApiError::BadRequest("bad".to_string()),
        ];
        for err in cases {
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(ApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unmapped_engine_errors_map_to_500() {
        let err = ApiError::from(taskmesh_core::EngineError::DataInvalid("corrupt".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
