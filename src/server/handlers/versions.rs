//! Variation history endpoints for a saved recipe.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use super::super::problem::Problem;
use super::super::AppState;

/// All variations, oldest first.
pub async fn list_versions(
    State(state): State<AppState>,
    Path(saved_recipe_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let versions = state.orchestrator.versions(&saved_recipe_id).await?;
    Ok(Json(versions))
}

pub async fn get_active(
    State(state): State<AppState>,
    Path(saved_recipe_id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    match state.orchestrator.active(&saved_recipe_id).await? {
        Some(variation) => Ok(Json(variation)),
        None => Err(Problem::not_found(format!(
            "saved recipe {} has no active variation",
            saved_recipe_id
        ))),
    }
}

/// Changes from the original recipe to one variation.
pub async fn version_diff(
    State(state): State<AppState>,
    Path((saved_recipe_id, version_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, Problem> {
    let diff = state
        .orchestrator
        .diff_against_original(&saved_recipe_id, &version_id)
        .await?;
    Ok(Json(diff))
}

pub async fn activate_version(
    State(state): State<AppState>,
    Path((saved_recipe_id, version_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, Problem> {
    let variation = state
        .orchestrator
        .activate(&saved_recipe_id, &version_id)
        .await?;
    Ok(Json(variation))
}

pub async fn rollback_version(
    State(state): State<AppState>,
    Path((saved_recipe_id, version_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, Problem> {
    let variation = state
        .orchestrator
        .rollback(&saved_recipe_id, &version_id)
        .await?;
    Ok(Json(variation))
}
