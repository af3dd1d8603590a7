use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use piggies_core::PiggiesError;
use piggies_types::api::Claims;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AppState, with_db};

/// The local user behind a request, inserted by [`require_user`].
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: Uuid,
    pub is_admin: bool,
}

/// Paths a banned user can still reach: their profile, appeals and session.
fn reachable_while_banned(path: &str) -> bool {
    path == "/me" || path == "/auth/session" || path == "/appeals" || path.starts_with("/appeals/")
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Rejected bearer token: {}", e);
            ApiError::Unauthenticated("invalid or expired token")
        })
}

fn bearer_claims(state: &AppState, req: &Request) -> Result<Claims, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated("missing bearer token"))?;
    decode_token(&state.jwt_secret, token)
}

/// Validates the identity provider's JWT and inserts its [`Claims`].
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(&state, &req)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Validates the JWT, resolves the local user and inserts [`CurrentUser`].
/// Banned users are held to the few routes they need to appeal.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(&state, &req)?;

    let sub = claims.sub.clone();
    let user = with_db(&state, move |db| Ok(db.get_user_by_external_id(&sub)?))
        .await?
        .ok_or(ApiError::Unauthenticated("no session; call POST /auth/session first"))?;

    if user.moderation.is_banned() && !reachable_while_banned(req.uri().path()) {
        return Err(PiggiesError::unauthorized("account is banned").into());
    }

    req.extensions_mut().insert(CurrentUser {
        id: user.id,
        is_admin: user.is_admin,
    });
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
