use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_types::api::SubmitAppealRequest;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// GET /appeals
pub async fn list_mine(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| Ok(db.list_my_appeals(me.id)?)).await?;
    Ok(Json(rows.into_iter().map(views::appeal).collect::<Vec<_>>()))
}

/// POST /appeals
///
/// Reachable while banned.
pub async fn submit(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<SubmitAppealRequest>,
) -> ApiResult<impl IntoResponse> {
    let appeal = with_db(&state, move |db| {
        db.submit_appeal(
            me.id,
            req.appeal_type,
            &req.reason,
            req.additional_info.as_deref(),
            Utc::now(),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(views::appeal(appeal))))
}

/// GET /appeals/eligibility
pub async fn eligibility(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let eligibility = with_db(&state, move |db| db.appeal_eligibility(me.id, Utc::now())).await?;
    Ok(Json(eligibility))
}
