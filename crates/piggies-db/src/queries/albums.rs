use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::grants::{ALBUM_PHOTO_LIMIT, album_cap, expiry_for, validate_album_title};
use piggies_types::models::ShareDuration;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::models::{
    ALBUM_COLUMNS, AlbumRow, GRANT_COLUMNS, GrantRow, album_from_row, grant_from_row, opt_time_at,
    to_millis,
};
use crate::queries::conversations::require_conversation;
use crate::queries::users::{blocked_either, require_user};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

const DEFAULT_ALBUM_TITLE: &str = "Private";

impl Database {
    pub fn get_or_create_default_album(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<AlbumRow> {
        self.with_tx(|tx| {
            require_user(tx, owner)?;
            Ok(default_album(tx, owner, now)?)
        })
    }

    /// New non-default album. The default album always exists first and
    /// counts toward the tier cap.
    pub fn create_album(
        &self,
        owner: Uuid,
        title: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<AlbumRow> {
        let title = validate_album_title(title)?;

        self.with_tx(|tx| {
            let user = require_user(tx, owner)?;
            default_album(tx, owner, now)?;

            let cap = album_cap(user.effective_tier(now));
            let owned: usize = tx
                .query_row(
                    "SELECT COUNT(*) FROM albums WHERE owner_id = ?1",
                    [owner.to_string()],
                    |row| row.get(0),
                )
                .map_err(anyhow::Error::from)?;
            if owned >= cap {
                return Err(PiggiesError::invalid_state(format!(
                    "album limit of {} reached for your plan",
                    cap
                )));
            }

            let id = Uuid::new_v4();
            insert_album(tx, id, owner, &title, false, now)?;
            info!("User {} created album {}", owner, id);
            require_album(tx, id)
        })
    }

    pub fn list_albums(&self, owner: Uuid) -> Result<Vec<AlbumRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM albums a WHERE a.owner_id = ?1
                 ORDER BY a.is_default DESC, a.created_at",
                ALBUM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([owner.to_string()], album_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Deletes a non-default album together with its photos and grants.
    /// Returns the photo keys it held so the caller can drop unused blobs.
    pub fn delete_album(&self, owner: Uuid, album_id: Uuid) -> DomainResult<Vec<String>> {
        self.with_tx(|tx| {
            let album = require_owned_album(tx, owner, album_id)?;
            if album.is_default {
                return Err(PiggiesError::invalid_state("the default album cannot be deleted"));
            }
            let keys = photo_keys(tx, album_id)?;
            tx.execute("DELETE FROM albums WHERE id = ?1", [album_id.to_string()])
                .map_err(anyhow::Error::from)?;
            info!("User {} deleted album {}", owner, album_id);
            Ok(keys)
        })
    }

    /// Idempotent per storage key.
    pub fn add_album_photo(
        &self,
        owner: Uuid,
        album_id: Uuid,
        storage_key: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<AlbumRow> {
        if storage_key.trim().is_empty() {
            return Err(PiggiesError::validation("storage key must not be empty"));
        }

        self.with_tx(|tx| {
            let album = require_owned_album(tx, owner, album_id)?;
            if album.photo_count as usize >= ALBUM_PHOTO_LIMIT {
                return Err(PiggiesError::invalid_state(format!(
                    "an album holds at most {} photos",
                    ALBUM_PHOTO_LIMIT
                )));
            }
            tx.execute(
                "INSERT OR IGNORE INTO album_photos (album_id, storage_key, position, created_at)
                 VALUES (?1, ?2,
                         (SELECT COALESCE(MAX(position), -1) + 1
                          FROM album_photos WHERE album_id = ?1),
                         ?3)",
                params![album_id.to_string(), storage_key.trim(), to_millis(now)],
            )
            .map_err(anyhow::Error::from)?;
            require_album(tx, album_id)
        })
    }

    pub fn remove_album_photo(
        &self,
        owner: Uuid,
        album_id: Uuid,
        storage_key: &str,
    ) -> DomainResult<AlbumRow> {
        self.with_tx(|tx| {
            require_owned_album(tx, owner, album_id)?;
            tx.execute(
                "DELETE FROM album_photos WHERE album_id = ?1 AND storage_key = ?2",
                params![album_id.to_string(), storage_key],
            )
            .map_err(anyhow::Error::from)?;
            require_album(tx, album_id)
        })
    }

    /// Grants `grantee` access to an album (the default album when `album`
    /// is `None`). Re-sharing refreshes the existing grant in place.
    pub fn share_album(
        &self,
        owner: Uuid,
        grantee: Uuid,
        conversation_id: Uuid,
        album: Option<Uuid>,
        duration: ShareDuration,
        now: DateTime<Utc>,
    ) -> DomainResult<GrantRow> {
        if owner == grantee {
            return Err(PiggiesError::validation("you cannot share an album with yourself"));
        }

        self.with_tx(|tx| {
            require_user(tx, owner)?;
            require_user(tx, grantee)?;
            let conversation = require_conversation(tx, conversation_id)?;
            if !conversation.includes(owner) || !conversation.includes(grantee) {
                return Err(PiggiesError::unauthorized("conversation does not include both users"));
            }
            if blocked_either(tx, owner, grantee)? {
                return Err(PiggiesError::invalid_state("cannot share with this user"));
            }

            let album = match album {
                Some(id) => require_owned_album(tx, owner, id)?,
                None => default_album(tx, owner, now)?,
            };
            let expires_at = expiry_for(duration, now);

            tx.execute(
                "INSERT INTO album_grants
                     (id, album_id, owner_id, grantee_id, conversation_id, expires_at,
                      is_revoked, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
                 ON CONFLICT (album_id, grantee_id) DO UPDATE SET
                     conversation_id = excluded.conversation_id,
                     expires_at = excluded.expires_at,
                     is_revoked = 0,
                     updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    album.id.to_string(),
                    owner.to_string(),
                    grantee.to_string(),
                    conversation_id.to_string(),
                    expires_at.map(to_millis),
                    to_millis(now),
                ],
            )
            .map_err(anyhow::Error::from)?;

            info!("User {} shared album {} with {} ({})", owner, album.id, grantee, duration);
            let grant = grant_for(tx, album.id, grantee)?;
            grant.ok_or(PiggiesError::NotFound("grant"))
        })
    }

    /// Revokes the grant for one album, or every grant from `owner` to
    /// `grantee`. Idempotent; returns the albums whose grant changed.
    pub fn revoke_album_access(
        &self,
        owner: Uuid,
        grantee: Uuid,
        album: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<Uuid>> {
        self.with_tx(|tx| {
            if let Some(album_id) = album {
                require_owned_album(tx, owner, album_id)?;
            }
            let mut stmt = tx
                .prepare(
                    "UPDATE album_grants SET is_revoked = 1, updated_at = ?1
                     WHERE owner_id = ?2 AND grantee_id = ?3 AND is_revoked = 0
                       AND (?4 IS NULL OR album_id = ?4)
                     RETURNING album_id",
                )
                .map_err(anyhow::Error::from)?;
            let revoked = stmt
                .query_map(
                    params![
                        to_millis(now),
                        owner.to_string(),
                        grantee.to_string(),
                        album.map(|a| a.to_string()),
                    ],
                    |row| crate::models::uuid_at(row, 0),
                )
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(anyhow::Error::from)?;

            if !revoked.is_empty() {
                info!("User {} revoked {} album grant(s) from {}", owner, revoked.len(), grantee);
            }
            Ok(revoked)
        })
    }

    /// Album and its photo keys for `viewer`: the owner, or a grantee whose
    /// grant is effective at `now`.
    pub fn view_album(
        &self,
        viewer: Uuid,
        album_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<(AlbumRow, Vec<String>)> {
        self.with_tx(|tx| {
            let album = require_album(tx, album_id)?;
            if album.owner_id != viewer {
                let effective = grant_for(tx, album_id, viewer)?
                    .is_some_and(|grant| grant.window().is_effective(now));
                if !effective || blocked_either(tx, viewer, album.owner_id)? {
                    debug!("Denied album {} to {}", album_id, viewer);
                    return Err(PiggiesError::unauthorized("you do not have access to this album"));
                }
            }
            let photos = photo_keys(tx, album_id)?;
            Ok((album, photos))
        })
    }

    pub fn list_album_grants(&self, owner: Uuid, album_id: Uuid) -> DomainResult<Vec<GrantRow>> {
        self.with_tx(|tx| {
            require_owned_album(tx, owner, album_id)?;
            let sql = format!(
                "SELECT {} FROM album_grants WHERE album_id = ?1 ORDER BY updated_at DESC",
                GRANT_COLUMNS
            );
            let mut stmt = tx.prepare(&sql).map_err(anyhow::Error::from)?;
            let rows = stmt
                .query_map([album_id.to_string()], grant_from_row)
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(anyhow::Error::from)?;
            Ok(rows)
        })
    }

    /// Albums currently visible to `viewer` through effective grants, with
    /// each grant's expiry.
    pub fn list_albums_shared_with(
        &self,
        viewer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<(AlbumRow, Option<DateTime<Utc>>)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, g.expires_at FROM albums a
                 JOIN album_grants g ON g.album_id = a.id
                 WHERE g.grantee_id = ?1 AND g.is_revoked = 0
                   AND (g.expires_at IS NULL OR g.expires_at > ?2)
                   AND NOT EXISTS (
                       SELECT 1 FROM blocks b
                       WHERE (b.blocker_id = a.owner_id AND b.blocked_id = ?1)
                          OR (b.blocker_id = ?1 AND b.blocked_id = a.owner_id))
                 ORDER BY g.updated_at DESC",
                ALBUM_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![viewer.to_string(), to_millis(now)], |row| {
                    Ok((album_from_row(row)?, opt_time_at(row, 6)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn default_album(conn: &Connection, owner: Uuid, now: DateTime<Utc>) -> Result<AlbumRow> {
    let sql = format!(
        "SELECT {} FROM albums a WHERE a.owner_id = ?1 AND a.is_default = 1",
        ALBUM_COLUMNS
    );
    if let Some(album) = conn
        .query_row(&sql, [owner.to_string()], album_from_row)
        .optional()?
    {
        return Ok(album);
    }

    let id = Uuid::new_v4();
    insert_album(conn, id, owner, DEFAULT_ALBUM_TITLE, true, now)?;
    debug!("Created default album {} for {}", id, owner);
    Ok(conn.query_row(&sql, [owner.to_string()], album_from_row)?)
}

fn insert_album(
    conn: &Connection,
    id: Uuid,
    owner: Uuid,
    title: &str,
    is_default: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO albums (id, owner_id, title, is_default, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id.to_string(), owner.to_string(), title, is_default, to_millis(now)],
    )?;
    Ok(())
}

fn load_album(conn: &Connection, id: Uuid) -> Result<Option<AlbumRow>> {
    let sql = format!("SELECT {} FROM albums a WHERE a.id = ?1", ALBUM_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], album_from_row).optional()?)
}

fn require_album(conn: &Connection, id: Uuid) -> DomainResult<AlbumRow> {
    load_album(conn, id)?.ok_or(PiggiesError::NotFound("album"))
}

fn require_owned_album(conn: &Connection, owner: Uuid, id: Uuid) -> DomainResult<AlbumRow> {
    let album = require_album(conn, id)?;
    if album.owner_id != owner {
        return Err(PiggiesError::unauthorized("only the owner can manage this album"));
    }
    Ok(album)
}

fn grant_for(conn: &Connection, album_id: Uuid, grantee: Uuid) -> Result<Option<GrantRow>> {
    let sql = format!(
        "SELECT {} FROM album_grants WHERE album_id = ?1 AND grantee_id = ?2",
        GRANT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![album_id.to_string(), grantee.to_string()], grant_from_row)
        .optional()?)
}

fn photo_keys(conn: &Connection, album_id: Uuid) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT storage_key FROM album_photos WHERE album_id = ?1 ORDER BY position")?;
    let keys = stmt
        .query_map([album_id.to_string()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(keys)
}
