/// Structure administration REST API endpoints
///
/// Replaces or merges the stored structure from a full structure document,
/// reads it back and deletes it.

use crate::api::{ApiError, AppState};
use crate::error::StructureError;
use crate::structure::{CompleteStructure, StructureSubmission};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::Value;

/// Query parameters of the update endpoint
#[derive(Debug, Deserialize)]
pub struct UpdateStructureQuery {
    #[serde(default = "default_delete_existing")]
    pub delete_existing_structure: bool,
}

fn default_delete_existing() -> bool {
    true
}

/// Create structure administration routes
///
/// Update, read-back and delete of the whole stored structure.
pub fn create_structure_routes() -> Router<AppState> {
    Router::new()
        .route("/api/structure/update", put(update_structure))
        .route("/api/structure", get(get_structure).delete(delete_structure))
}

/// Validate a structure document and store it
///
/// PUT /api/structure/update?delete_existing_structure=true
/// Body: { "element_types": [...], "thing_nodes": [...], "sources": [...], "sinks": [...] }
async fn update_structure(
    State(state): State<AppState>,
    Query(query): Query<UpdateStructureQuery>,
    document: Result<Json<Value>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(document) = document?;
    tracing::info!("📝 Updating structure (delete existing: {})", query.delete_existing_structure);

    let structure = parse_structure(document)?;
    state
        .structure
        .update_structure(&structure, query.delete_existing_structure)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Read the stored structure back
///
/// GET /api/structure
async fn get_structure(State(state): State<AppState>) -> Result<Json<CompleteStructure>, ApiError> {
    Ok(Json(state.structure.load_structure().await?))
}

/// Delete the stored structure
///
/// DELETE /api/structure
async fn delete_structure(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.structure.delete().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Decode and validate a raw structure document
///
/// A document that does not match the submission shape is reported as a
/// structural error, the same as one that fails validation.
pub fn parse_structure(document: Value) -> Result<CompleteStructure, StructureError> {
    let submission: StructureSubmission = serde_json::from_value(document).map_err(|e| {
        StructureError::structural(format!("Malformed structure document: {}", e))
    })?;
    crate::structure::validate(submission)
}
