pub mod admin;
pub mod albums;
pub mod appeals;
pub mod auth;
pub mod conversations;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod geocode;
pub mod media;
pub mod middleware;
pub mod referrals;
pub mod state;
pub mod users;
pub mod venues;
pub mod views;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full HTTP surface: public, identity-only, user and admin
/// routes plus the realtime gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/gateway", get(gateway::upgrade));

    let identity_routes = Router::new()
        .route("/auth/session", post(auth::open_session))
        .layer(from_fn_with_state(state.clone(), middleware::require_identity));

    let user_routes = Router::new()
        // Profile and safety
        .route("/me", get(users::get_me).patch(users::update_me))
        .route("/me/location", put(users::update_location))
        .route("/me/presence", put(users::set_presence))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/block", put(users::block).delete(users::unblock))
        .route("/blocks", get(users::list_blocked))
        .route("/discovery/nearby", post(discovery::nearby))
        // Messaging
        .route("/conversations", get(conversations::list).post(conversations::create))
        .route(
            "/conversations/{id}/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route("/conversations/{id}/read", post(conversations::mark_read))
        .route("/messages/{id}/view", post(conversations::view_snap))
        .route("/messages/{id}", delete(conversations::delete_message))
        // Albums
        .route("/albums", get(albums::list).post(albums::create))
        .route("/albums/shared", get(albums::shared_with_me))
        .route("/albums/share", post(albums::share))
        .route("/albums/revoke", post(albums::revoke))
        .route("/albums/{id}", get(albums::get).delete(albums::delete))
        .route("/albums/{id}/photos", post(albums::add_photo))
        .route("/albums/{id}/photos/{key}", delete(albums::remove_photo))
        .route("/albums/{id}/grants", get(albums::grants))
        // Appeals and referrals
        .route("/appeals", get(appeals::list_mine).post(appeals::submit))
        .route("/appeals/eligibility", get(appeals::eligibility))
        .route("/referrals/code", post(referrals::generate_code))
        .route("/referrals/me", get(referrals::my_stats))
        // Venues
        .route("/venues", get(venues::list).post(venues::submit))
        .route("/venues/{id}/report", post(venues::report))
        // Media
        .route(
            "/media",
            post(media::upload).layer(DefaultBodyLimit::max(media::MAX_UPLOAD_BYTES)),
        )
        .route("/media/{key}", get(media::serve))
        // Admin
        .route("/admin/users/{id}/warn", post(admin::warn_user))
        .route("/admin/users/{id}/suspend", post(admin::suspend_user))
        .route("/admin/users/{id}/ban", post(admin::ban_user))
        .route("/admin/users/{id}/unban", post(admin::unban_user))
        .route("/admin/users/{id}/unsuspend", post(admin::unsuspend_user))
        .route("/admin/users/{id}/clear-warning", post(admin::clear_warning))
        .route("/admin/users/{id}/tier", put(admin::set_tier))
        .route("/admin/moderation-log", get(admin::moderation_log))
        .route("/admin/appeals", get(admin::list_appeals))
        .route("/admin/appeals/{id}", put(admin::update_appeal))
        .route("/admin/venues", get(admin::list_venues))
        .route("/admin/venues/{id}", delete(admin::delete_venue))
        .route("/admin/venues/{id}/approve", post(admin::approve_venue))
        .route("/admin/venues/{id}/reject", post(admin::reject_venue))
        .route("/admin/venues/{id}/restore", post(admin::restore_venue))
        .route("/admin/referrals/sweep", post(admin::run_sweep))
        .layer(from_fn_with_state(state.clone(), middleware::require_user));

    Router::new()
        .merge(public_routes)
        .merge(identity_routes)
        .merge(user_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
