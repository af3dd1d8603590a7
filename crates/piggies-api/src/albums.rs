use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_types::api::{
    AddPhotoRequest, AlbumDetail, CreateAlbumRequest, RevokeAlbumRequest, RevokeAlbumResponse,
    ShareAlbumRequest, ShareAlbumResponse, SharedAlbum,
};
use piggies_types::events::GatewayEvent;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::media;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// GET /albums
///
/// Creates the default album on first use so every user has one.
pub async fn list(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let albums = with_db(&state, move |db| {
        db.get_or_create_default_album(me.id, Utc::now())?;
        Ok(db.list_albums(me.id)?)
    })
    .await?;
    Ok(Json(albums.iter().map(views::album).collect::<Vec<_>>()))
}

/// POST /albums
pub async fn create(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<CreateAlbumRequest>,
) -> ApiResult<impl IntoResponse> {
    let album = with_db(&state, move |db| db.create_album(me.id, &req.title, Utc::now())).await?;
    Ok((StatusCode::CREATED, Json(views::album(&album))))
}

/// GET /albums/shared
pub async fn shared_with_me(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| Ok(db.list_albums_shared_with(me.id, Utc::now())?)).await?;
    let shared: Vec<SharedAlbum> = rows
        .iter()
        .map(|(album, expires_at)| SharedAlbum {
            album: views::album(album),
            expires_at: *expires_at,
        })
        .collect();
    Ok(Json(shared))
}

/// GET /albums/{id}
///
/// Owners always see their album; anyone else needs an effective grant.
pub async fn get(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(album_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (album, keys) =
        with_db(&state, move |db| db.view_album(me.id, album_id, Utc::now())).await?;
    Ok(Json(AlbumDetail {
        album: views::album(&album),
        photos: keys.iter().map(|k| views::photo(&state.media, k)).collect(),
    }))
}

/// DELETE /albums/{id}
pub async fn delete(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(album_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let keys = with_db(&state, move |db| db.delete_album(me.id, album_id)).await?;
    media::release_unused(&state, keys).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /albums/{id}/photos
pub async fn add_photo(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(album_id): Path<Uuid>,
    Json(req): Json<AddPhotoRequest>,
) -> ApiResult<impl IntoResponse> {
    let album = with_db(&state, move |db| {
        db.add_album_photo(me.id, album_id, &req.storage_key, Utc::now())
    })
    .await?;
    Ok(Json(views::album(&album)))
}

/// DELETE /albums/{id}/photos/{key}
pub async fn remove_photo(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path((album_id, storage_key)): Path<(Uuid, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = storage_key.clone();
    let album =
        with_db(&state, move |db| db.remove_album_photo(me.id, album_id, &key)).await?;
    media::release_unused(&state, vec![storage_key]).await;
    Ok(Json(views::album(&album)))
}

/// GET /albums/{id}/grants
pub async fn grants(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(album_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| db.list_album_grants(me.id, album_id)).await?;
    let now = Utc::now();
    Ok(Json(rows.iter().map(|g| views::grant(g, now)).collect::<Vec<_>>()))
}

/// POST /albums/share
///
/// The grant is committed first. The in-conversation album message and the
/// realtime event follow on a best-effort basis.
pub async fn share(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<ShareAlbumRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let grant = with_db(&state, move |db| {
        db.share_album(
            me.id,
            req.grantee_id,
            req.conversation_id,
            req.album_id,
            req.expires_in,
            now,
        )
    })
    .await?;

    let (conversation_id, album_id) = (grant.conversation_id, grant.album_id);
    let posted = with_db(&state, move |db| {
        db.post_album_share(me.id, conversation_id, album_id, now)
    })
    .await;
    match posted {
        Ok(message) => {
            state
                .dispatcher
                .notify(
                    grant.grantee_id,
                    GatewayEvent::MessageCreate {
                        id: message.id,
                        conversation_id,
                        sender_id: me.id,
                        format: message.format,
                        timestamp: message.created_at,
                    },
                )
                .await;
        }
        Err(e) => warn!("Album {} shared but share message failed: {:?}", album_id, e),
    }

    state
        .dispatcher
        .notify(
            grant.grantee_id,
            GatewayEvent::AlbumShared {
                album_id,
                owner_id: me.id,
                conversation_id,
                expires_at: grant.expires_at,
            },
        )
        .await;

    Ok(Json(ShareAlbumResponse {
        grant_id: grant.id,
        album_id,
        expires_at: grant.expires_at,
    }))
}

/// POST /albums/revoke
pub async fn revoke(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<RevokeAlbumRequest>,
) -> ApiResult<impl IntoResponse> {
    let grantee = req.grantee_id;
    let album_ids = with_db(&state, move |db| {
        db.revoke_album_access(me.id, grantee, req.album_id, Utc::now())
    })
    .await?;

    let revoked = album_ids.len();
    if revoked > 0 {
        state
            .dispatcher
            .notify(
                grantee,
                GatewayEvent::AlbumRevoked {
                    owner_id: me.id,
                    album_ids,
                },
            )
            .await;
    }
    Ok(Json(RevokeAlbumResponse { success: true, revoked }))
}
