use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_db::queries::venues::NewVenue;
use piggies_types::api::{ReportVenueRequest, SubmitVenueRequest, VenueQuery};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// GET /venues
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<VenueQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| Ok(db.list_venues(query.category)?)).await?;
    Ok(Json(rows.into_iter().map(views::venue).collect::<Vec<_>>()))
}

/// POST /venues
///
/// Submissions without coordinates are geocoded from the address.
pub async fn submit(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<SubmitVenueRequest>,
) -> ApiResult<impl IntoResponse> {
    let (latitude, longitude) = match (req.latitude, req.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        (None, None) => resolve_address(&state, &req.address).await?,
        _ => {
            let msg = "latitude and longitude must be given together";
            return Err(PiggiesError::validation(msg).into());
        }
    };

    let venue = with_db(&state, move |db| {
        let venue = NewVenue {
            name: &req.name,
            category: req.category,
            address: &req.address,
            latitude,
            longitude,
            features: &req.features,
        };
        db.submit_venue(me.id, &venue, Utc::now())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(views::venue(venue))))
}

async fn resolve_address(state: &AppState, address: &str) -> Result<(f64, f64), PiggiesError> {
    let geocoder = state
        .geocoder
        .as_ref()
        .ok_or_else(|| PiggiesError::validation("coordinates are required"))?;
    match geocoder.lookup(address).await {
        Ok(Some(coords)) => Ok(coords),
        Ok(None) => Err(PiggiesError::validation("address not found")),
        Err(e) => {
            warn!("Geocoding {:?} failed: {}", address, e);
            Err(PiggiesError::validation("address not found"))
        }
    }
}

/// POST /venues/{id}/report
pub async fn report(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(venue_id): Path<Uuid>,
    Json(req): Json<ReportVenueRequest>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| db.report_venue(me.id, venue_id, &req.reason, Utc::now())).await?;
    Ok(StatusCode::NO_CONTENT)
}
