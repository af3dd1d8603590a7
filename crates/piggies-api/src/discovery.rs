use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::Utc;
use piggies_core::discovery::NearbyFilters;
use piggies_types::api::{NearbyRequest, NearbyResponse, NearbyUser};

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// POST /discovery/nearby
pub async fn nearby(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<NearbyRequest>,
) -> ApiResult<impl IntoResponse> {
    let filters = NearbyFilters {
        online_only: req.online_only,
        has_photos: req.has_photos,
        min_age: req.min_age,
        max_age: req.max_age,
        interests: req
            .interests
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect(),
    };
    let (offset, limit) = (req.offset, req.limit);

    let page = with_db(&state, move |db| {
        db.nearby_users(me.id, &filters, offset, limit, Utc::now())
    })
    .await?;

    let users = page
        .users
        .iter()
        .map(|(user, distance)| NearbyUser {
            profile: views::public_profile(user, &state.media),
            distance_km: distance.map(|km| (km * 10.0).round() / 10.0),
        })
        .collect();

    Ok(Json(NearbyResponse {
        users,
        total_available: page.total_available,
        cap: page.cap,
    }))
}
