use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::moderation::ModerationAction;
use piggies_types::models::{ModerationKind, ReferralStatus};
use rusqlite::{Connection, params};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::models::{
    MODERATION_ACTION_COLUMNS, ModerationActionRow, UserRow, moderation_action_from_row, to_millis,
};
use crate::queries::users::{require_admin, require_user, store_moderation};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

impl Database {
    /// Applies a moderation action to `target`. `actor` is the admin, or
    /// `None` for automated actions (content checker). The state change,
    /// the audit row and (for bans) the referral expiry commit together.
    pub fn moderate(
        &self,
        actor: Option<Uuid>,
        target: Uuid,
        action: &ModerationAction,
        now: DateTime<Utc>,
    ) -> DomainResult<UserRow> {
        self.with_tx(|tx| {
            if let Some(admin) = actor {
                require_admin(tx, admin)?;
            }
            let user = require_user(tx, target)?;
            let next = user.moderation.apply(action, now)?;

            store_moderation(tx, target, &next)?;
            insert_action(
                tx,
                actor,
                target,
                action.kind(),
                action.reason().map(str::trim),
                action.until(),
                now,
            )?;

            if matches!(action, ModerationAction::Ban { .. }) {
                let expired = expire_pending_referral(tx, target, now)?;
                if expired > 0 {
                    info!("Expired pending referral of banned user {}", target);
                }
            }

            match actor {
                Some(admin) => info!("Admin {} applied {} to {}", admin, action.kind(), target),
                None => info!("System applied {} to {}", action.kind(), target),
            }
            require_user(tx, target)
        })
    }

    /// Audit trail, newest first. Optionally narrowed to one target.
    pub fn moderation_log(
        &self,
        admin_id: Uuid,
        target: Option<Uuid>,
        limit: u32,
    ) -> DomainResult<Vec<ModerationActionRow>> {
        let limit = limit.clamp(1, 500);
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            Ok(query_actions(tx, target, limit)?)
        })
    }
}

pub(crate) fn insert_action(
    conn: &Connection,
    actor: Option<Uuid>,
    target: Uuid,
    kind: ModerationKind,
    reason: Option<&str>,
    until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO moderation_actions (id, actor_id, target_id, kind, reason, until, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id.to_string(),
            actor.map(|a| a.to_string()),
            target.to_string(),
            kind.as_str(),
            reason,
            until.map(to_millis),
            to_millis(now),
        ],
    )?;
    Ok(id)
}

fn expire_pending_referral(conn: &Connection, referred: Uuid, now: DateTime<Utc>) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE referrals SET status = ?1, resolved_at = ?2 WHERE referred_id = ?3 AND status = ?4",
        params![
            ReferralStatus::Expired.as_str(),
            to_millis(now),
            referred.to_string(),
            ReferralStatus::Pending.as_str(),
        ],
    )?)
}

fn query_actions(
    conn: &Connection,
    target: Option<Uuid>,
    limit: u32,
) -> Result<Vec<ModerationActionRow>> {
    let rows = match target {
        Some(target) => {
            let sql = format!(
                "SELECT {} FROM moderation_actions WHERE target_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
                MODERATION_ACTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![target.to_string(), limit], moderation_action_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM moderation_actions ORDER BY created_at DESC LIMIT ?1",
                MODERATION_ACTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([limit], moderation_action_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;
    use chrono::Duration;
    use piggies_types::models::Standing;

    fn warn(reason: &str) -> ModerationAction {
        ModerationAction::Warn {
            reason: reason.into(),
        }
    }

    #[test]
    fn test_two_warnings_then_ban() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");

        db.moderate(Some(root.id), bob.id, &warn("spam"), t0()).unwrap();
        let warned = db.moderate(Some(root.id), bob.id, &warn("spam again"), t0()).unwrap();
        assert_eq!(warned.moderation.standing(t0()), Standing::Warned { count: 2 });

        let ban = ModerationAction::Ban {
            reason: "abuse".into(),
        };
        let banned = db.moderate(Some(root.id), bob.id, &ban, t0()).unwrap();
        assert!(banned.moderation.is_banned());
        assert_eq!(banned.moderation.warnings, 2);

        let log = db.moderation_log(root.id, Some(bob.id), 100).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, ModerationKind::Ban);
        assert!(log.iter().all(|entry| entry.actor_id == Some(root.id)));
    }

    #[test]
    fn test_non_admin_cannot_moderate() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let bob = user(&db, "idp|bob");

        let err = db.moderate(Some(alice.id), bob.id, &warn("nope"), t0()).unwrap_err();
        assert!(matches!(err, PiggiesError::Unauthorized(_)));
        assert!(db.moderation_log(alice.id, None, 10).is_err());
    }

    #[test]
    fn test_failed_action_leaves_no_audit_row() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");

        let err = db
            .moderate(Some(root.id), bob.id, &ModerationAction::Unban, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));

        let err = db
            .moderate(
                Some(root.id),
                bob.id,
                &ModerationAction::Suspend {
                    until: t0() - Duration::hours(1),
                    reason: "late".into(),
                },
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, PiggiesError::Validation(_)));
        assert!(db.moderation_log(root.id, Some(bob.id), 10).unwrap().is_empty());
    }

    #[test]
    fn test_suspension_expires_by_time() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        let until = t0() + Duration::days(1);

        let suspended = db
            .moderate(
                Some(root.id),
                bob.id,
                &ModerationAction::Suspend {
                    until,
                    reason: "cool off".into(),
                },
                t0(),
            )
            .unwrap();
        assert!(suspended.moderation.is_suspended(t0()));
        assert!(!suspended.moderation.is_suspended(until + Duration::seconds(1)));
    }

    #[test]
    fn test_system_warning_has_no_actor() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");

        db.moderate(None, bob.id, &warn("flagged word"), t0()).unwrap();
        let log = db.moderation_log(root.id, Some(bob.id), 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].actor_id, None);
    }
}
