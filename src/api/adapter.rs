/// Virtual structure adapter REST API endpoints
///
/// Read-only browse endpoints used by designer front ends to pick sources
/// and sinks out of the stored structure.

use crate::adapters::virtual_structure::{
    self, VirtualEndpoint, VirtualStructureLevel, VirtualThingNode,
};
use crate::api::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// `?parentId=<uuid>`; absent means the root level
#[derive(Debug, Deserialize)]
pub struct BrowseQuery {
    #[serde(rename = "parentId")]
    pub parent_id: Option<Uuid>,
}

/// Comma-separated ids, e.g. `?ids=<uuid>,<uuid>`
#[derive(Debug, Deserialize)]
pub struct IdsQuery {
    pub ids: String,
}

/// Create virtual structure adapter routes
///
/// All routes are read-only and sit under `/adapters/virtual_structure`.
pub fn create_virtual_structure_routes() -> Router<AppState> {
    Router::new()
        .route("/adapters/virtual_structure/structure", get(browse_structure))
        .route("/adapters/virtual_structure/thingNodes/{id}", get(get_thing_node))
        .route("/adapters/virtual_structure/sources", get(get_sources))
        .route("/adapters/virtual_structure/sources/{id}", get(get_source))
        .route("/adapters/virtual_structure/sinks", get(get_sinks))
        .route("/adapters/virtual_structure/sinks/{id}", get(get_sink))
}

/// GET /adapters/virtual_structure/structure?parentId=<uuid>
async fn browse_structure(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<VirtualStructureLevel>, ApiError> {
    Ok(Json(virtual_structure::browse(&state.structure, query.parent_id).await?))
}

/// GET /adapters/virtual_structure/thingNodes/{id}
async fn get_thing_node(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VirtualThingNode>, ApiError> {
    Ok(Json(virtual_structure::thing_node(&state.structure, id).await?))
}

/// GET /adapters/virtual_structure/sources/{id}
async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VirtualEndpoint>, ApiError> {
    Ok(Json(virtual_structure::source(&state.structure, id).await?))
}

/// GET /adapters/virtual_structure/sinks/{id}
async fn get_sink(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VirtualEndpoint>, ApiError> {
    Ok(Json(virtual_structure::sink(&state.structure, id).await?))
}

/// GET /adapters/virtual_structure/sources?ids=<uuid>,<uuid>
async fn get_sources(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Vec<VirtualEndpoint>>, ApiError> {
    let ids = parse_ids(&query.ids)?;
    Ok(Json(virtual_structure::sources(&state.structure, &ids).await?))
}

/// GET /adapters/virtual_structure/sinks?ids=<uuid>,<uuid>
async fn get_sinks(
    State(state): State<AppState>,
    Query(query): Query<IdsQuery>,
) -> Result<Json<Vec<VirtualEndpoint>>, ApiError> {
    let ids = parse_ids(&query.ids)?;
    Ok(Json(virtual_structure::sinks(&state.structure, &ids).await?))
}

fn parse_ids(raw: &str) -> Result<Vec<Uuid>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            Uuid::parse_str(id).map_err(|_| ApiError::bad_request(format!("'{}' is not a valid id", id)))
        })
        .collect()
}
