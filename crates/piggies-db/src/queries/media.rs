use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::messaging::snap_media_fetchable;
use rusqlite::{Connection, params};
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::models::{GRANT_COLUMNS, MESSAGE_COLUMNS, grant_from_row, message_from_row, uuid_at};
use crate::queries::users::blocked_either;

type DomainResult<T> = std::result::Result<T, PiggiesError>;

/// Why a viewer may download a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAccess {
    /// A profile photo, visible to anyone who can see the profile.
    Profile,
    /// Album or message media, visible only to the people it was shared
    /// with and only while that share lasts.
    Private,
}

impl Database {
    /// Decides whether `viewer` may download `storage_key` at `now`.
    /// Album photos need ownership or an effective grant; message media
    /// needs membership of the conversation, and a snap must be open.
    pub fn media_access(
        &self,
        viewer: Uuid,
        storage_key: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<MediaAccess> {
        let access = self.with_conn(|conn| {
            if owns_album_photo(conn, viewer, storage_key)?
                || granted_album_photo(conn, viewer, storage_key, now)?
                || visible_message_media(conn, viewer, storage_key, now)?
            {
                return Ok(Some(MediaAccess::Private));
            }
            if visible_profile_photo(conn, viewer, storage_key)? {
                return Ok(Some(MediaAccess::Profile));
            }
            Ok(None)
        })?;

        access.ok_or_else(|| {
            debug!("Denied media {} to {}", storage_key, viewer);
            PiggiesError::unauthorized("you do not have access to this media")
        })
    }

    /// Whether any message, album or profile still references a stored
    /// blob. Content-addressed keys can be shared between uploads.
    pub fn media_key_in_use(&self, storage_key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let in_use: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM messages
                                WHERE content = ?1 AND format IN ('image', 'video', 'gif'))
                     OR EXISTS (SELECT 1 FROM album_photos WHERE storage_key = ?1)
                     OR EXISTS (SELECT 1 FROM users, json_each(users.photos)
                                WHERE json_each.value = ?1)",
                [storage_key],
                |row| row.get(0),
            )?;
            Ok(in_use)
        })
    }
}

fn owns_album_photo(conn: &Connection, viewer: Uuid, storage_key: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM album_photos p JOIN albums a ON a.id = p.album_id
                        WHERE p.storage_key = ?1 AND a.owner_id = ?2)",
        params![storage_key, viewer.to_string()],
        |row| row.get(0),
    )?)
}

fn granted_album_photo(
    conn: &Connection,
    viewer: Uuid,
    storage_key: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = format!(
        "SELECT {} FROM album_grants
         WHERE grantee_id = ?2
           AND album_id IN (SELECT album_id FROM album_photos WHERE storage_key = ?1)",
        GRANT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let grants = stmt
        .query_map(params![storage_key, viewer.to_string()], grant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for grant in grants {
        if grant.window().is_effective(now) && !blocked_either(conn, viewer, grant.owner_id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Senders can always fetch what they sent. Recipients can fetch plain
/// media, and snaps only inside the window opened by viewing them.
fn visible_message_media(
    conn: &Connection,
    viewer: Uuid,
    storage_key: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = format!(
        "SELECT {} FROM messages
         WHERE content = ?1 AND format IN ('image', 'video', 'gif')
           AND conversation_id IN (
               SELECT id FROM conversations WHERE participant_a = ?2 OR participant_b = ?2)",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map(params![storage_key, viewer.to_string()], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(messages.iter().any(|m| {
        m.sender_id == viewer || snap_media_fetchable(m.snap, m.snap_viewed_at, now)
    }))
}

fn visible_profile_photo(conn: &Connection, viewer: Uuid, storage_key: &str) -> Result<bool> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT u.id FROM users u, json_each(u.photos) p WHERE p.value = ?1",
    )?;
    let owners = stmt
        .query_map([storage_key], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for owner in owners {
        if owner == viewer || !blocked_either(conn, viewer, owner)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;
    use chrono::Duration;
    use piggies_types::api::UpdateProfileRequest;
    use piggies_types::models::{MessageFormat, ShareDuration, SnapMode};

    fn denied(result: DomainResult<MediaAccess>) -> bool {
        matches!(result, Err(PiggiesError::Unauthorized(_)))
    }

    #[test]
    fn test_album_media_follows_grant() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice").id;
        let bob = user(&db, "idp|bob").id;
        let carol = user(&db, "idp|carol").id;
        let conversation = db.get_or_create_conversation(alice, bob, t0()).unwrap().id;
        let album = db.get_or_create_default_album(alice, t0()).unwrap();
        db.add_album_photo(alice, album.id, "private-key", t0()).unwrap();

        assert_eq!(db.media_access(alice, "private-key", t0()).unwrap(), MediaAccess::Private);
        assert!(denied(db.media_access(bob, "private-key", t0())));

        db.share_album(alice, bob, conversation, None, ShareDuration::Hours24, t0())
            .unwrap();
        assert_eq!(db.media_access(bob, "private-key", t0()).unwrap(), MediaAccess::Private);
        assert!(denied(db.media_access(carol, "private-key", t0())));
        assert!(denied(db.media_access(bob, "private-key", t0() + Duration::hours(25))));

        db.revoke_album_access(alice, bob, None, t0()).unwrap();
        assert!(denied(db.media_access(bob, "private-key", t0())));
        assert!(denied(db.media_access(bob, "unknown-key", t0())));
    }

    #[test]
    fn test_snap_media_needs_an_open() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice").id;
        let bob = user(&db, "idp|bob").id;
        let carol = user(&db, "idp|carol").id;
        let conversation = db.get_or_create_conversation(alice, bob, t0()).unwrap().id;

        db.send_message(alice, conversation, MessageFormat::Image, "plain", None, t0())
            .unwrap();
        assert!(db.media_access(bob, "plain", t0()).is_ok());
        assert!(denied(db.media_access(carol, "plain", t0())));

        let once = Some(SnapMode::ViewOnce);
        let snap = db
            .send_message(alice, conversation, MessageFormat::Image, "snap", once, t0())
            .unwrap();
        assert!(db.media_access(alice, "snap", t0()).is_ok());
        assert!(denied(db.media_access(bob, "snap", t0())));

        db.view_snap(bob, snap.id, t0()).unwrap();
        assert!(db.media_access(bob, "snap", t0() + Duration::seconds(5)).is_ok());
        assert!(denied(db.media_access(bob, "snap", t0() + Duration::minutes(5))));
    }

    #[test]
    fn test_profile_photos_hidden_across_blocks() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice").id;
        let bob = user(&db, "idp|bob").id;
        let update = UpdateProfileRequest {
            photos: Some(vec!["face".into()]),
            ..Default::default()
        };
        db.update_profile(alice, &update).unwrap();

        assert_eq!(db.media_access(bob, "face", t0()).unwrap(), MediaAccess::Profile);
        db.block_user(alice, bob, t0()).unwrap();
        assert!(denied(db.media_access(bob, "face", t0())));
        assert!(db.media_access(alice, "face", t0()).is_ok());
    }

    #[test]
    fn test_key_in_use_tracks_references() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice").id;
        let album = db.get_or_create_default_album(alice, t0()).unwrap();
        assert!(!db.media_key_in_use("shared").unwrap());

        db.add_album_photo(alice, album.id, "shared", t0()).unwrap();
        assert!(db.media_key_in_use("shared").unwrap());
        db.remove_album_photo(alice, album.id, "shared").unwrap();
        assert!(!db.media_key_in_use("shared").unwrap());
    }
}
