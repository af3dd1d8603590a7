use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::moderation::{ModerationRecord, Restriction};
use piggies_core::profile::{
    MAX_PROFILE_PHOTOS, normalize_interests, validate_age, validate_bio, validate_coordinates,
    validate_display_name,
};
use piggies_core::referrals::{generate_code, normalize_code};
use piggies_core::PiggiesError;
use piggies_types::api::UpdateProfileRequest;
use piggies_types::models::SubscriptionTier;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::models::{
    BlockRow, USER_COLUMNS, UserRow, json_list, time_at, to_millis, user_from_row, uuid_at,
};
use crate::queries::referrals::record_referral;

type DomainResult<T> = std::result::Result<T, PiggiesError>;

const FALLBACK_DISPLAY_NAME: &str = "New user";

impl Database {
    // -- Identity --

    /// Finds or creates the local user for an identity-provider subject.
    /// Returns the user and whether it was created by this call. A
    /// referral code only counts for a new user and is recorded in the
    /// same transaction that creates them.
    pub fn upsert_user_from_identity(
        &self,
        external_id: &str,
        display_name: &str,
        grant_admin: bool,
        referral_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<(UserRow, bool)> {
        if external_id.trim().is_empty() {
            return Err(PiggiesError::validation("identity subject must not be empty"));
        }

        self.with_tx(|tx| {
            if let Some(user) = query_user_by_external_id(tx, external_id)? {
                touch_last_active(tx, user.id, now)?;
                if grant_admin && !user.is_admin {
                    set_admin(tx, user.id)?;
                    info!("Promoted {} to admin from bootstrap list", user.id);
                }
                let user = require_user(tx, user.id)?;
                return Ok((user, false));
            }

            let id = Uuid::new_v4();
            let name = validate_display_name(display_name)
                .unwrap_or_else(|_| FALLBACK_DISPLAY_NAME.to_string());
            let code = unused_referral_code(tx)?;
            insert_user(tx, id, external_id, &name, &code, grant_admin, now)?;
            info!("Created user {} for identity {}", id, external_id);
            if let Some(referral) = referral_code.and_then(normalize_code) {
                record_referral(tx, id, &referral, now)?;
            }

            Ok((require_user(tx, id)?, true))
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| load_user(conn, id))
    }

    pub fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_external_id(conn, external_id))
    }

    /// Another user's profile as seen by `viewer`. Users who block each
    /// other are invisible to each other.
    pub fn get_visible_user(&self, viewer: Uuid, target: Uuid) -> DomainResult<UserRow> {
        self.with_tx(|tx| {
            let user = require_user(tx, target)?;
            if viewer != target && blocked_either(tx, viewer, target)? {
                return Err(PiggiesError::NotFound("user"));
            }
            Ok(user)
        })
    }

    // -- Profile --

    pub fn update_profile(
        &self,
        user_id: Uuid,
        update: &UpdateProfileRequest,
    ) -> DomainResult<UserRow> {
        let display_name = update.display_name.as_deref().map(validate_display_name).transpose()?;
        let bio = update.bio.as_deref().map(validate_bio).transpose()?;
        let age = update.age.map(validate_age).transpose()?;
        let interests = update.interests.as_deref().map(normalize_interests).transpose()?;
        let photos = update.photos.as_deref().map(validate_photo_keys).transpose()?;

        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            let id = user_id.to_string();
            if let Some(name) = &display_name {
                tx_exec(tx, "UPDATE users SET display_name = ?1 WHERE id = ?2", params![name, id])?;
            }
            if let Some(bio) = &bio {
                tx_exec(tx, "UPDATE users SET bio = ?1 WHERE id = ?2", params![bio, id])?;
            }
            if let Some(age) = age {
                tx_exec(tx, "UPDATE users SET age = ?1 WHERE id = ?2", params![age, id])?;
            }
            if let Some(interests) = &interests {
                let interests = json_list(interests)?;
                let sql = "UPDATE users SET interests = ?1 WHERE id = ?2";
                tx_exec(tx, sql, params![interests, id])?;
            }
            if let Some(photos) = &photos {
                let photos = json_list(photos)?;
                tx_exec(tx, "UPDATE users SET photos = ?1 WHERE id = ?2", params![photos, id])?;
            }
            Ok(require_user(tx, user_id)?)
        })
    }

    pub fn update_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> DomainResult<UserRow> {
        validate_coordinates(latitude, longitude)?;
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            tx_exec(
                tx,
                "UPDATE users SET latitude = ?1, longitude = ?2 WHERE id = ?3",
                params![latitude, longitude, user_id.to_string()],
            )?;
            require_user(tx, user_id)
        })
    }

    pub fn set_presence(
        &self,
        user_id: Uuid,
        online: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.with_tx(|tx| {
            require_user(tx, user_id)?;
            tx_exec(
                tx,
                "UPDATE users SET is_online = ?1, last_active_at = ?2 WHERE id = ?3",
                params![online, to_millis(now), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Admin console: change a user's paid tier. Billing itself lives elsewhere.
    pub fn set_subscription_tier(
        &self,
        admin_id: Uuid,
        user_id: Uuid,
        tier: SubscriptionTier,
    ) -> DomainResult<UserRow> {
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            require_user(tx, user_id)?;
            tx_exec(
                tx,
                "UPDATE users SET subscription_tier = ?1 WHERE id = ?2",
                params![tier.as_str(), user_id.to_string()],
            )?;
            info!("Admin {} set tier of {} to {}", admin_id, user_id, tier);
            require_user(tx, user_id)
        })
    }

    // -- Blocks --

    /// Idempotent.
    pub fn block_user(&self, blocker: Uuid, blocked: Uuid, now: DateTime<Utc>) -> DomainResult<()> {
        if blocker == blocked {
            return Err(PiggiesError::validation("you cannot block yourself"));
        }
        self.with_tx(|tx| {
            require_user(tx, blocked)?;
            tx_exec(
                tx,
                "INSERT OR IGNORE INTO blocks (blocker_id, blocked_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![blocker.to_string(), blocked.to_string(), to_millis(now)],
            )?;
            debug!("{} blocked {}", blocker, blocked);
            Ok(())
        })
    }

    /// Idempotent.
    pub fn unblock_user(&self, blocker: Uuid, blocked: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                params![blocker.to_string(), blocked.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn list_blocks(&self, blocker: Uuid) -> Result<Vec<BlockRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT blocked_id, created_at FROM blocks
                 WHERE blocker_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([blocker.to_string()], |row| {
                    Ok(BlockRow {
                        blocked_id: uuid_at(row, 0)?,
                        created_at: time_at(row, 1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn validate_photo_keys(keys: &[String]) -> DomainResult<Vec<String>> {
    if keys.len() > MAX_PROFILE_PHOTOS {
        return Err(PiggiesError::validation(format!(
            "at most {} profile photos allowed",
            MAX_PROFILE_PHOTOS
        )));
    }
    if keys.iter().any(|k| k.trim().is_empty()) {
        return Err(PiggiesError::validation("photo keys must not be empty"));
    }
    Ok(keys.to_vec())
}

// -- Shared helpers (used by the other query modules) --

pub(crate) fn tx_exec<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<usize> {
    Ok(conn.execute(sql, params)?)
}

pub(crate) fn load_user(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [id.to_string()], user_from_row)
        .optional()?;
    Ok(row)
}

fn query_user_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE external_id = ?1", USER_COLUMNS);
    let row = conn.query_row(&sql, [external_id], user_from_row).optional()?;
    Ok(row)
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> DomainResult<UserRow> {
    load_user(conn, id)?.ok_or(PiggiesError::NotFound("user"))
}

pub(crate) fn require_admin(conn: &Connection, id: Uuid) -> DomainResult<UserRow> {
    let user = load_user(conn, id)?
        .ok_or_else(|| PiggiesError::unauthorized("admin rights required"))?;
    if !user.is_admin {
        return Err(PiggiesError::unauthorized("admin rights required"));
    }
    Ok(user)
}

pub(crate) fn blocked_either(conn: &Connection, a: Uuid, b: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM blocks
             WHERE (blocker_id = ?1 AND blocked_id = ?2) OR (blocker_id = ?2 AND blocked_id = ?1)
             LIMIT 1",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn store_moderation(
    conn: &Connection,
    user_id: Uuid,
    record: &ModerationRecord,
) -> Result<()> {
    let (restriction, reason, until) = match &record.restriction {
        Restriction::None => ("none", None, None),
        Restriction::Suspended { until, reason } => {
            ("suspended", Some(reason.as_str()), Some(to_millis(*until)))
        }
        Restriction::Banned { reason } => ("banned", Some(reason.as_str()), None),
    };
    conn.execute(
        "UPDATE users
         SET warning_count = ?1, restriction = ?2, restriction_reason = ?3, restriction_until = ?4
         WHERE id = ?5",
        params![record.warnings, restriction, reason, until, user_id.to_string()],
    )?;
    Ok(())
}

fn touch_last_active(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE users SET last_active_at = ?1 WHERE id = ?2",
        params![to_millis(now), id.to_string()],
    )?;
    Ok(())
}

fn set_admin(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute("UPDATE users SET is_admin = 1 WHERE id = ?1", [id.to_string()])?;
    Ok(())
}

fn insert_user(
    conn: &Connection,
    id: Uuid,
    external_id: &str,
    display_name: &str,
    referral_code: &str,
    is_admin: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users
             (id, external_id, display_name, referral_code, is_admin, last_active_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id.to_string(), external_id, display_name, referral_code, is_admin, to_millis(now)],
    )?;
    Ok(())
}

/// Draws codes until one is free. The code space (32^8) makes a second
/// draw rare; the unique index is the real guarantee.
pub(crate) fn unused_referral_code(conn: &Connection) -> Result<String> {
    let mut rng = rand::rng();
    loop {
        let code = generate_code(&mut rng);
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE referral_code = ?1", [&code], |row| row.get(0))
            .optional()?;
        if taken.is_none() {
            return Ok(code);
        }
        debug!("Referral code collision on {}, drawing again", code);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn user(db: &Database, external_id: &str) -> UserRow {
        db.upsert_user_from_identity(external_id, external_id, false, None, t0())
            .unwrap()
            .0
    }

    pub fn admin(db: &Database, external_id: &str) -> UserRow {
        db.upsert_user_from_identity(external_id, external_id, true, None, t0())
            .unwrap()
            .0
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use piggies_types::models::Standing;

    #[test]
    fn test_upsert_creates_once() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db
            .upsert_user_from_identity("idp|alice", "Alice", false, None, t0())
            .unwrap();
        assert!(created);
        assert_eq!(first.display_name, "Alice");
        assert_eq!(first.referral_code.as_ref().map(String::len), Some(8));
        assert_eq!(first.moderation.standing(t0()), Standing::Active);

        let (second, created) = db
            .upsert_user_from_identity("idp|alice", "Renamed", false, None, t0())
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.display_name, "Alice");
        assert_eq!(second.referral_code, first.referral_code);
    }

    #[test]
    fn test_bootstrap_admin_promotion() {
        let db = Database::open_in_memory().unwrap();
        let plain = user(&db, "idp|root");
        assert!(!plain.is_admin);
        let promoted = admin(&db, "idp|root");
        assert!(promoted.is_admin);
    }

    #[test]
    fn test_update_profile_validates() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");

        let updated = db
            .update_profile(
                alice.id,
                &UpdateProfileRequest {
                    bio: Some("hello".into()),
                    age: Some(31),
                    interests: Some(vec!["Jazz".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("hello"));
        assert_eq!(updated.age, Some(31));
        assert_eq!(updated.interests, vec!["jazz"]);

        let err = db
            .update_profile(
                alice.id,
                &UpdateProfileRequest {
                    age: Some(16),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, PiggiesError::Validation(_)));
    }

    #[test]
    fn test_blocks_hide_profiles_both_ways() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let bob = user(&db, "idp|bob");

        db.block_user(alice.id, bob.id, t0()).unwrap();
        db.block_user(alice.id, bob.id, t0()).unwrap();
        assert_eq!(db.list_blocks(alice.id).unwrap().len(), 1);

        assert!(matches!(db.get_visible_user(bob.id, alice.id), Err(PiggiesError::NotFound(_))));
        assert!(matches!(db.get_visible_user(alice.id, bob.id), Err(PiggiesError::NotFound(_))));

        db.unblock_user(alice.id, bob.id).unwrap();
        db.unblock_user(alice.id, bob.id).unwrap();
        assert!(db.get_visible_user(bob.id, alice.id).is_ok());

        assert!(matches!(
            db.block_user(alice.id, alice.id, t0()),
            Err(PiggiesError::Validation(_))
        ));
    }

    #[test]
    fn test_set_tier_requires_admin() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let root = admin(&db, "idp|root");

        let err = db
            .set_subscription_tier(alice.id, alice.id, SubscriptionTier::Ultra)
            .unwrap_err();
        assert!(matches!(err, PiggiesError::Unauthorized(_)));

        let updated = db
            .set_subscription_tier(root.id, alice.id, SubscriptionTier::Ultra)
            .unwrap();
        assert_eq!(updated.subscription_tier, SubscriptionTier::Ultra);
    }
}
