/// Wiring REST API endpoints
///
/// Resolves virtual wiring entries against the stored structure, and loads
/// workflow inputs through the registered adapters.

use crate::api::{ApiError, AppState};
use crate::wiring::{resolve_virtual_wirings, WorkflowWiring};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Loaded inputs together with the wiring they were loaded through
#[derive(Debug, Serialize)]
pub struct LoadedInputs {
    pub inputs: HashMap<String, Value>,
    pub wiring: WorkflowWiring,
}

/// Create wiring routes
///
/// Both routes take a wiring document as JSON body.
pub fn create_wiring_routes() -> Router<AppState> {
    Router::new()
        .route("/api/wirings/resolve", post(resolve_wiring))
        .route("/api/wirings/load", post(load_inputs))
}

/// Rewrite virtual entries to their concrete adapter references
///
/// POST /api/wirings/resolve
/// Body: { "input_wirings": [...], "output_wirings": [...] }
async fn resolve_wiring(
    State(state): State<AppState>,
    wiring: Result<Json<WorkflowWiring>, JsonRejection>,
) -> Result<Json<WorkflowWiring>, ApiError> {
    let Json(mut wiring) = wiring?;
    resolve_virtual_wirings(&state.structure, &mut wiring).await?;
    Ok(Json(wiring))
}

/// Resolve the wiring and load every input through its adapter
///
/// POST /api/wirings/load
async fn load_inputs(
    State(state): State<AppState>,
    wiring: Result<Json<WorkflowWiring>, JsonRejection>,
) -> Result<Json<LoadedInputs>, ApiError> {
    let Json(mut wiring) = wiring?;
    let inputs = state.io.load_inputs(&mut wiring).await?;
    Ok(Json(LoadedInputs { inputs, wiring }))
}
