//! Supported sites listing.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct SitesResponse {
    pub sites: Vec<String>,
}

/// List sites the extractor supports.
///
/// GET /api/sites
pub async fn list_sites(State(state): State<AppState>) -> Json<SitesResponse> {
    Json(SitesResponse {
        sites: state.orchestrator.supported_sites().await,
    })
}
