use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use piggies_types::api::ReferralCodeResponse;
use piggies_types::events::GatewayEvent;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};

/// POST /referrals/code
pub async fn generate_code(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let code = with_db(&state, move |db| db.generate_referral_code(me.id)).await?;
    Ok(Json(ReferralCodeResponse { code }))
}

/// GET /referrals/me
///
/// Evaluates the caller's pending referrals before reporting, so stats never
/// wait on the periodic sweep.
pub async fn my_stats(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let (report, stats) = with_db(&state, move |db| {
        let report = db.check_referrals_for(me.id, now)?;
        Ok((report, db.referral_stats(me.id, now)?))
    })
    .await?;

    notify_rewards(&state, &report.rewards).await;
    Ok(Json(stats))
}

/// Tells each rewarded referrer about their new Ultra expiry.
pub async fn notify_rewards(state: &AppState, rewards: &[(Uuid, DateTime<Utc>)]) {
    for (user_id, ultra_expires_at) in rewards {
        state
            .dispatcher
            .notify(
                *user_id,
                GatewayEvent::ReferralRewarded {
                    ultra_expires_at: *ultra_expires_at,
                },
            )
            .await;
    }
}
