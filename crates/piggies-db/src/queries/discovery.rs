use std::collections::HashMap;

use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::discovery::{Candidate, NearbyFilters, discovery_cap, paginate, rank};
use rusqlite::params;
use uuid::Uuid;

use crate::Database;
use crate::models::{USER_COLUMNS, UserRow, to_millis, user_from_row};
use crate::queries::users::require_user;

type DomainResult<T> = std::result::Result<T, PiggiesError>;

/// One page of discovery results.
#[derive(Debug)]
pub struct NearbyPage {
    /// Users in rank order, with distance from the viewer when both sides
    /// have a location.
    pub users: Vec<(UserRow, Option<f64>)>,
    /// Results available under the viewer's tier cap.
    pub total_available: usize,
    pub cap: usize,
}

impl Database {
    /// Ranks every eligible user around `viewer`. Excludes the viewer,
    /// users blocked in either direction, banned users and users whose
    /// suspension is still running.
    pub fn nearby_users(
        &self,
        viewer: Uuid,
        filters: &NearbyFilters,
        offset: usize,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DomainResult<NearbyPage> {
        filters.validate()?;

        let (me, mut pool) = self.with_tx(|tx| {
            let me = require_user(tx, viewer)?;
            let sql = format!(
                "SELECT {} FROM users u
                 WHERE u.id != ?1
                   AND u.restriction != 'banned'
                   AND NOT (u.restriction = 'suspended' AND u.restriction_until > ?2)
                   AND NOT EXISTS (
                       SELECT 1 FROM blocks b
                       WHERE (b.blocker_id = ?1 AND b.blocked_id = u.id)
                          OR (b.blocker_id = u.id AND b.blocked_id = ?1))",
                USER_COLUMNS
            );
            let mut stmt = tx.prepare(&sql).map_err(anyhow::Error::from)?;
            let pool = stmt
                .query_map(params![viewer.to_string(), to_millis(now)], user_from_row)
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(anyhow::Error::from)?;
            Ok((me, pool))
        })?;

        let candidates: Vec<Candidate> = pool
            .iter()
            .map(|u| Candidate {
                id: u.id,
                age: u.age,
                has_photos: !u.photos.is_empty(),
                interests: u.interests.clone(),
                is_online: u.is_online,
                location: u.location(),
            })
            .collect();

        let cap = discovery_cap(me.effective_tier(now));
        let ranked = rank(me.location(), &candidates, filters);
        let (page, total_available) = paginate(ranked, cap, offset, limit);

        let mut by_id: HashMap<Uuid, UserRow> = pool.drain(..).map(|u| (u.id, u)).collect();
        let users = page
            .into_iter()
            .filter_map(|r| by_id.remove(&r.id).map(|u| (u, r.distance_km)))
            .collect();

        Ok(NearbyPage {
            users,
            total_available,
            cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;
    use chrono::Duration;
    use piggies_core::discovery::{FREE_DISCOVERY_CAP, ULTRA_DISCOVERY_CAP};
    use piggies_core::moderation::ModerationAction;
    use piggies_types::api::UpdateProfileRequest;
    use piggies_types::models::SubscriptionTier;

    fn place(db: &Database, external_id: &str, lat: f64, lon: f64, online: bool) -> Uuid {
        let u = user(db, external_id);
        db.update_location(u.id, lat, lon).unwrap();
        db.set_presence(u.id, online, t0()).unwrap();
        u.id
    }

    #[test]
    fn test_order_and_exclusions() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root").id;
        let me = place(&db, "idp|me", 52.52, 13.40, true);
        let near = place(&db, "idp|near", 52.53, 13.40, false);
        let far = place(&db, "idp|far", 52.70, 13.40, true);
        let nowhere = user(&db, "idp|nowhere").id;
        let banned = place(&db, "idp|banned", 52.52, 13.41, true);
        let blocked = place(&db, "idp|blocked", 52.52, 13.41, true);
        let suspended = place(&db, "idp|suspended", 52.52, 13.41, true);

        db.moderate(Some(root), banned, &ModerationAction::Ban { reason: "x".into() }, t0())
            .unwrap();
        db.moderate(
            Some(root),
            suspended,
            &ModerationAction::Suspend {
                until: t0() + Duration::days(1),
                reason: "x".into(),
            },
            t0(),
        )
        .unwrap();
        db.block_user(blocked, me, t0()).unwrap();

        let page = db
            .nearby_users(me, &NearbyFilters::default(), 0, 50, t0())
            .unwrap();
        let ids: Vec<Uuid> = page.users.iter().map(|(u, _)| u.id).collect();
        // both unlocated users are offline, so they fall back to id order
        let mut unlocated = vec![root, nowhere];
        unlocated.sort();
        assert_eq!(ids, [vec![near, far], unlocated].concat());
        assert!(page.users[0].1.unwrap() < 1.2);
        assert!(page.users[3].1.is_none());
        assert_eq!(page.total_available, 4);
        assert_eq!(page.cap, FREE_DISCOVERY_CAP);

        let later = db
            .nearby_users(me, &NearbyFilters::default(), 0, 50, t0() + Duration::days(2))
            .unwrap();
        assert!(later.users.iter().any(|(u, _)| u.id == suspended));
    }

    #[test]
    fn test_filters_apply_before_cap() {
        let db = Database::open_in_memory().unwrap();
        let me = place(&db, "idp|me", 0.0, 0.0, true);
        let young = place(&db, "idp|young", 0.01, 0.0, true);
        let old = place(&db, "idp|old", 0.02, 0.0, true);
        for (id, age) in [(young, 22u8), (old, 60)] {
            db.update_profile(
                id,
                &UpdateProfileRequest {
                    age: Some(age),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let filters = NearbyFilters {
            min_age: Some(50),
            ..Default::default()
        };
        let page = db.nearby_users(me, &filters, 0, 50, t0()).unwrap();
        assert_eq!(page.users.len(), 1);
        assert_eq!(page.users[0].0.id, old);

        let bad = NearbyFilters {
            min_age: Some(40),
            max_age: Some(30),
            ..Default::default()
        };
        assert!(matches!(
            db.nearby_users(me, &bad, 0, 50, t0()),
            Err(PiggiesError::Validation(_))
        ));
    }

    #[test]
    fn test_cap_follows_effective_tier() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root").id;
        let me = user(&db, "idp|me").id;
        db.set_subscription_tier(root, me, SubscriptionTier::Ultra).unwrap();
        let page = db
            .nearby_users(me, &NearbyFilters::default(), 0, 10, t0())
            .unwrap();
        assert_eq!(page.cap, ULTRA_DISCOVERY_CAP);
    }
}
