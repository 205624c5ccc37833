use super::AppState;
use crate::{Error, Result, auth::Secured, types::CancerStudy};
use axum::{
    Json,
    extract::{Path, State},
};

/// Studies the caller may read. Unreadable studies are omitted, not reported.
pub async fn list_studies(
    State(state): State<AppState>,
    Secured(ctx): Secured,
) -> Result<Json<Vec<CancerStudy>>> {
    let studies = state.store.list_studies().await?;
    let total = studies.len();
    let visible: Vec<CancerStudy> = studies
        .into_iter()
        .filter(|study| ctx.can_read_study(&study.study_id))
        .collect();

    tracing::debug!(
        "{} of {} studies visible to {}",
        visible.len(),
        total,
        ctx.identity().map(|i| i.subject()).unwrap_or("anonymous")
    );
    Ok(Json(visible))
}

/// A single study. Access is checked before existence, so a hidden study
/// answers 403 whether or not it exists.
pub async fn get_study(
    State(state): State<AppState>,
    Secured(ctx): Secured,
    Path(study_id): Path<String>,
) -> Result<Json<CancerStudy>> {
    if !ctx.can_read_study(&study_id) {
        return Err(Error::PermissionDenied);
    }

    state
        .store
        .get_study(&study_id)
        .await?
        .map(Json)
        .ok_or(Error::NotFound(study_id))
}
