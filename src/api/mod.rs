/// HTTP API Layer
///
/// REST endpoints over the structure service:
/// - Administrative structure update, read-back and deletion
/// - Virtual structure adapter browse endpoints
/// - Wiring resolution and input loading

// Structure administration endpoints (PUT/GET/DELETE)
pub mod structure;

// Virtual structure adapter browse endpoints
pub mod adapter;

// Wiring resolution endpoints
pub mod wirings;

use crate::error::{AdapterError, StructureError, WiringError, WorkflowIoError};
use crate::runtime::WorkflowIo;
use crate::structure::StructureService;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Structure persistence
    pub structure: StructureService,
    /// Wiring resolution plus adapter dispatch
    pub io: WorkflowIo,
}

/// Error returned by handlers, rendered as `{"detail": "..."}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    /// 400 with the given detail
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    /// Keep axum's status (400, 415 or 422) but answer in the `detail` shape
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<StructureError> for ApiError {
    fn from(err: StructureError) -> Self {
        let status = match &err {
            StructureError::Structural(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StructureError::NotFound(_) => StatusCode::NOT_FOUND,
            StructureError::Integrity(_) => StatusCode::CONFLICT,
            StructureError::Fetch(_) | StructureError::Update(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<WiringError> for ApiError {
    fn from(err: WiringError) -> Self {
        match err {
            WiringError::Structure(err) => err.into(),
            mismatch @ WiringError::ResolutionMismatch { .. } => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: mismatch.to_string(),
            },
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: err.to_string(),
        }
    }
}

impl From<WorkflowIoError> for ApiError {
    fn from(err: WorkflowIoError) -> Self {
        match err {
            WorkflowIoError::Wiring(err) => err.into(),
            WorkflowIoError::Adapter(err) => err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self.detail);
        } else {
            tracing::warn!("Request rejected ({}): {}", self.status, self.detail);
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// All API routes sharing the application state
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(structure::create_structure_routes())
        .merge(adapter::create_virtual_structure_routes())
        .merge(wirings::create_wiring_routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_errors_map_to_status_codes() {
        let cases = [
            (StructureError::structural("cycle"), StatusCode::UNPROCESSABLE_ENTITY),
            (StructureError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StructureError::Integrity("dup".into()), StatusCode::CONFLICT),
            (StructureError::Fetch("io".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (StructureError::Update("io".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn wiring_and_adapter_errors_map_to_status_codes() {
        let not_found = WiringError::Structure(StructureError::NotFound("x".into()));
        assert_eq!(ApiError::from(not_found).status, StatusCode::NOT_FOUND);

        let mismatch = WiringError::ResolutionMismatch {
            direction: crate::error::WiringDirection::Input,
            expected: 2,
            found: 1,
        };
        assert_eq!(
            ApiError::from(mismatch).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let load = AdapterError::Load {
            adapter_key: "sql-adapter".into(),
            source: anyhow::anyhow!("connection refused"),
        };
        let api = ApiError::from(load);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.detail.contains("sql-adapter"));
        assert!(api.detail.contains("connection refused"));
    }
}
