//! Admin endpoints. Handlers reject non-admins up front; the database layer
//! re-checks the actor inside each transaction.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_core::moderation::ModerationAction;
use piggies_core::venues::VenueReview;
use piggies_types::api::{
    AppealQuery, LogQuery, ModerationResult, ReasonRequest, SetTierRequest, SuspendRequest,
    UpdateAppealRequest, VenueQuery, VenueResponse,
};
use piggies_types::events::GatewayEvent;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::referrals::notify_rewards;
use crate::state::{AppState, with_db};
use crate::views;

fn require_admin(me: &CurrentUser) -> Result<(), PiggiesError> {
    if me.is_admin {
        Ok(())
    } else {
        Err(PiggiesError::unauthorized("admin access required"))
    }
}

// -- Moderation --

async fn moderate(
    state: &AppState,
    me: CurrentUser,
    target: Uuid,
    action: ModerationAction,
) -> ApiResult<Json<ModerationResult>> {
    require_admin(&me)?;
    let now = Utc::now();
    let kind = action.kind();
    let reason = action.reason().map(str::to_string);
    let user = with_db(state, move |db| db.moderate(Some(me.id), target, &action, now)).await?;

    state
        .dispatcher
        .notify(
            target,
            GatewayEvent::ModerationNotice {
                kind,
                reason,
                standing: user.moderation.standing(now),
            },
        )
        .await;
    Ok(Json(views::moderation_result(&user, now)))
}

/// POST /admin/users/{id}/warn
pub async fn warn_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<impl IntoResponse> {
    moderate(&state, me, target, ModerationAction::Warn { reason: req.reason }).await
}

/// POST /admin/users/{id}/suspend
pub async fn suspend_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
    Json(req): Json<SuspendRequest>,
) -> ApiResult<impl IntoResponse> {
    let action = ModerationAction::Suspend {
        until: req.until,
        reason: req.reason,
    };
    moderate(&state, me, target, action).await
}

/// POST /admin/users/{id}/ban
pub async fn ban_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<impl IntoResponse> {
    moderate(&state, me, target, ModerationAction::Ban { reason: req.reason }).await
}

/// POST /admin/users/{id}/unban
pub async fn unban_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    moderate(&state, me, target, ModerationAction::Unban).await
}

/// POST /admin/users/{id}/unsuspend
pub async fn unsuspend_user(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    moderate(&state, me, target, ModerationAction::Unsuspend).await
}

/// POST /admin/users/{id}/clear-warning
pub async fn clear_warning(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    moderate(&state, me, target, ModerationAction::ClearWarning).await
}

/// PUT /admin/users/{id}/tier
pub async fn set_tier(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(target): Path<Uuid>,
    Json(req): Json<SetTierRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let user = with_db(&state, move |db| db.set_subscription_tier(me.id, target, req.tier)).await?;
    Ok(Json(views::user_profile(&user, &state.media, Utc::now())))
}

/// GET /admin/moderation-log
pub async fn moderation_log(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let rows =
        with_db(&state, move |db| db.moderation_log(me.id, query.user_id, query.limit)).await?;
    Ok(Json(rows.into_iter().map(views::log_entry).collect::<Vec<_>>()))
}

// -- Appeals --

/// GET /admin/appeals
pub async fn list_appeals(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Query(query): Query<AppealQuery>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let rows = with_db(&state, move |db| db.list_appeals(me.id, query.status)).await?;
    Ok(Json(rows.into_iter().map(views::appeal).collect::<Vec<_>>()))
}

/// PUT /admin/appeals/{id}
pub async fn update_appeal(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(appeal_id): Path<Uuid>,
    Json(req): Json<UpdateAppealRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let appeal = with_db(&state, move |db| {
        let response = req.admin_response.as_deref();
        db.update_appeal_status(me.id, appeal_id, req.status, response, Utc::now())
    })
    .await?;

    state
        .dispatcher
        .notify(
            appeal.user_id,
            GatewayEvent::AppealUpdated {
                appeal_id: appeal.id,
                status: appeal.status,
                admin_response: appeal.admin_response.clone(),
            },
        )
        .await;
    Ok(Json(views::appeal(appeal)))
}

// -- Venues --

/// GET /admin/venues
pub async fn list_venues(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let rows = with_db(&state, move |db| db.list_venues_admin(me.id, query.status)).await?;
    Ok(Json(rows.into_iter().map(views::venue).collect::<Vec<_>>()))
}

async fn review(
    state: &AppState,
    me: CurrentUser,
    venue_id: Uuid,
    action: VenueReview,
) -> ApiResult<Json<VenueResponse>> {
    require_admin(&me)?;
    let venue =
        with_db(state, move |db| db.review_venue(me.id, venue_id, action, Utc::now())).await?;
    Ok(Json(views::venue(venue)))
}

/// POST /admin/venues/{id}/approve
pub async fn approve_venue(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(venue_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    review(&state, me, venue_id, VenueReview::Approve).await
}

/// POST /admin/venues/{id}/reject
pub async fn reject_venue(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(venue_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    review(&state, me, venue_id, VenueReview::Reject).await
}

/// POST /admin/venues/{id}/restore
pub async fn restore_venue(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(venue_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    review(&state, me, venue_id, VenueReview::Restore).await
}

/// DELETE /admin/venues/{id}
pub async fn delete_venue(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(venue_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    with_db(&state, move |db| db.delete_venue(me.id, venue_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Referrals --

/// POST /admin/referrals/sweep
pub async fn run_sweep(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&me)?;
    let report = with_db(&state, move |db| db.run_activation_sweep(Utc::now())).await?;
    notify_rewards(&state, &report.rewards).await;
    Ok(Json(report.summary()))
}
