use axum::{Extension, Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_types::api::{Claims, SessionRequest, SessionResponse};
use tracing::info;

use crate::error::ApiResult;
use crate::state::{AppState, with_db};
use crate::views;

/// POST /auth/session
///
/// Finds or creates the local user for the token's
/// subject. A referral code is honoured only when the user is new.
pub async fn open_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    // The body is optional; an empty one means no referral code
    let req: SessionRequest = if body.is_empty() {
        SessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PiggiesError::validation(format!("invalid session request: {}", e)))?
    };
    let make_admin = state.bootstrap_admins.contains(&claims.sub);
    let now = Utc::now();

    let (user, created) = with_db(&state, move |db| {
        db.upsert_user_from_identity(
            &claims.sub,
            &claims.name,
            make_admin,
            req.referral_code.as_deref(),
            now,
        )
    })
    .await?;

    if created {
        info!("New user {} signed up", user.id);
    }
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(SessionResponse {
            created,
            user: views::user_profile(&user, &state.media, now),
        }),
    ))
}
