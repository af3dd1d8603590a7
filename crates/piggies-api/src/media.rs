use std::path::PathBuf;

use anyhow::Result;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_core::collaborators::MediaStore;
use piggies_db::queries::media::MediaAccess;
use piggies_types::api::UploadResponse;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};

/// Upload size limit (20 MB).
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Content-addressed media on local disk. Each blob is stored at
/// `{dir}/{sha256 hex}`, so identical uploads share one file.
pub struct LocalMediaStore {
    dir: PathBuf,
    base_url: String,
}

impl LocalMediaStore {
    pub async fn new(dir: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self {
            dir,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn key_for(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn is_valid_key(key: &str) -> bool {
        key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Stores `data` and returns its storage key.
    pub async fn save(&self, data: &[u8]) -> Result<String> {
        let key = Self::key_for(data);
        let path = self.dir.join(&key);
        if fs::try_exists(&path).await? {
            return Ok(key);
        }
        // Write then rename so readers never see a partial blob
        let tmp = self.dir.join(format!("{}.part", key));
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &path).await?;
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !Self::is_valid_key(key) {
            return Ok(None);
        }
        match fs::read(self.dir.join(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl MediaStore for LocalMediaStore {
    fn url_for(&self, storage_key: &str) -> String {
        format!("{}/{}", self.base_url, storage_key)
    }

    fn delete(&self, storage_key: &str) -> Result<()> {
        if !Self::is_valid_key(storage_key) {
            return Ok(());
        }
        match std::fs::remove_file(self.dir.join(storage_key)) {
            Ok(()) => {
                info!("Deleted media {}", storage_key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media {} already gone", storage_key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// POST /media (raw body upload)
pub async fn upload(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    if body.is_empty() {
        return Err(PiggiesError::validation("upload must not be empty").into());
    }
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(PiggiesError::validation("upload exceeds 20 MB").into());
    }

    let storage_key = state.media.save(&body).await?;
    info!("User {} uploaded {} bytes as {}", me.id, body.len(), storage_key);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: state.media.url_for(&storage_key),
            storage_key,
            size: body.len() as u64,
        }),
    ))
}

/// GET /media/{key}
///
/// Album and message media are never cached, so a revoked grant or a
/// consumed snap cannot be replayed from a client cache.
pub async fn serve(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !LocalMediaStore::is_valid_key(&key) {
        return Err(PiggiesError::validation("malformed media key").into());
    }
    let lookup = key.clone();
    let access = with_db(&state, move |db| db.media_access(me.id, &lookup, Utc::now())).await?;
    let data = state
        .media
        .read(&key)
        .await?
        .ok_or(ApiError::Domain(PiggiesError::NotFound("media")))?;

    let cache_control = match access {
        MediaAccess::Profile => "private, max-age=3600",
        MediaAccess::Private => "no-store",
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, cache_control),
        ],
        data,
    ))
}

/// Deletes the blobs among `keys` that nothing references any more.
/// The owning rows are already gone, so failures are only logged.
pub async fn release_unused(state: &AppState, keys: Vec<String>) {
    if keys.is_empty() {
        return;
    }
    let state = state.clone();
    let cleanup = tokio::task::spawn_blocking(move || {
        for key in keys {
            match state.db.media_key_in_use(&key) {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = state.media.delete(&key) {
                        warn!("Failed to delete media {}: {}", key, e);
                    }
                }
                Err(e) => warn!("Failed to check media {}: {}", key, e),
            }
        }
    });
    if let Err(e) = cleanup.await {
        warn!("Media cleanup task failed: {}", e);
    }
}
