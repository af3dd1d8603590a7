use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::moderation::{can_submit_appeal, transition_appeal, validate_reason};
use piggies_types::api::AppealEligibility;
use piggies_types::models::{AppealStatus, AppealType, ModerationKind};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::models::{APPEAL_COLUMNS, AppealRow, appeal_from_row, to_millis};
use crate::queries::moderation::insert_action;
use crate::queries::users::{require_admin, require_user, store_moderation};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

const MAX_ADDITIONAL_INFO_LEN: usize = 4000;

impl Database {
    pub fn submit_appeal(
        &self,
        user_id: Uuid,
        appeal_type: AppealType,
        reason: &str,
        additional_info: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<AppealRow> {
        validate_reason(reason)?;
        let additional_info = additional_info
            .map(str::trim)
            .filter(|info| !info.is_empty());
        if additional_info.is_some_and(|info| info.chars().count() > MAX_ADDITIONAL_INFO_LEN) {
            return Err(PiggiesError::validation(format!(
                "additional info must be at most {} characters",
                MAX_ADDITIONAL_INFO_LEN
            )));
        }

        self.with_tx(|tx| {
            let user = require_user(tx, user_id)?;
            if !user.moderation.has_appealable(appeal_type, now) {
                return Err(PiggiesError::invalid_state(format!(
                    "there is no {} to appeal",
                    appeal_type
                )));
            }
            if !can_submit_appeal(appeal_statuses(tx, user_id)?) {
                return Err(PiggiesError::invalid_state("an appeal is already outstanding"));
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO appeals
                     (id, user_id, appeal_type, reason, additional_info, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    user_id.to_string(),
                    appeal_type.as_str(),
                    reason.trim(),
                    additional_info,
                    AppealStatus::Pending.as_str(),
                    to_millis(now),
                ],
            )
            .map_err(anyhow::Error::from)?;
            info!("User {} filed {} appeal {}", user_id, appeal_type, id);

            require_appeal(tx, id)
        })
    }

    pub fn appeal_eligibility(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<AppealEligibility> {
        self.with_tx(|tx| {
            let user = require_user(tx, user_id)?;
            Ok(AppealEligibility {
                can_submit: can_submit_appeal(appeal_statuses(tx, user_id)?),
                has_restriction: user.moderation.has_any_appealable(now),
            })
        })
    }

    /// Admin review. Accepting lifts the contested restriction in the same
    /// transaction; if it was already lifted, acceptance changes no flags.
    pub fn update_appeal_status(
        &self,
        admin_id: Uuid,
        appeal_id: Uuid,
        requested: AppealStatus,
        admin_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<AppealRow> {
        let admin_response = admin_response.map(str::trim).filter(|r| !r.is_empty());

        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            let appeal = require_appeal(tx, appeal_id)?;
            let status = transition_appeal(appeal.status, requested)?;

            tx.execute(
                "UPDATE appeals
                 SET status = ?1, admin_response = COALESCE(?2, admin_response),
                     reviewed_by = ?3, reviewed_at = ?4
                 WHERE id = ?5",
                params![
                    status.as_str(),
                    admin_response,
                    admin_id.to_string(),
                    to_millis(now),
                    appeal_id.to_string(),
                ],
            )
            .map_err(anyhow::Error::from)?;

            if status == AppealStatus::Accepted {
                let user = require_user(tx, appeal.user_id)?;
                let lifted = user.moderation.lift_for_appeal(appeal.appeal_type);
                if lifted != user.moderation {
                    store_moderation(tx, appeal.user_id, &lifted)?;
                }
                insert_action(
                    tx,
                    Some(admin_id),
                    appeal.user_id,
                    ModerationKind::AppealAccepted,
                    admin_response,
                    None,
                    now,
                )?;
            }

            info!("Admin {} moved appeal {} to {}", admin_id, appeal_id, status);
            require_appeal(tx, appeal_id)
        })
    }

    pub fn list_my_appeals(&self, user_id: Uuid) -> Result<Vec<AppealRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM appeals WHERE user_id = ?1 ORDER BY created_at DESC",
                APPEAL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], appeal_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Admin queue, oldest first so reviewers work in filing order.
    pub fn list_appeals(
        &self,
        admin_id: Uuid,
        status: Option<AppealStatus>,
    ) -> DomainResult<Vec<AppealRow>> {
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            let sql = format!(
                "SELECT {} FROM appeals WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at ASC",
                APPEAL_COLUMNS
            );
            let rows = query_appeals(tx, &sql, status.map(AppealStatus::as_str))?;
            Ok(rows)
        })
    }

    pub fn get_appeal(&self, appeal_id: Uuid) -> Result<Option<AppealRow>> {
        self.with_conn(|conn| load_appeal(conn, appeal_id))
    }
}

fn query_appeals(conn: &Connection, sql: &str, status: Option<&str>) -> Result<Vec<AppealRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([status], appeal_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn appeal_statuses(conn: &Connection, user_id: Uuid) -> Result<Vec<AppealStatus>> {
    let sql = format!("SELECT {} FROM appeals WHERE user_id = ?1", APPEAL_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let statuses = stmt
        .query_map([user_id.to_string()], appeal_from_row)?
        .map(|row| row.map(|appeal| appeal.status))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(statuses)
}

fn load_appeal(conn: &Connection, id: Uuid) -> Result<Option<AppealRow>> {
    let sql = format!("SELECT {} FROM appeals WHERE id = ?1", APPEAL_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], appeal_from_row).optional()?)
}

fn require_appeal(conn: &Connection, id: Uuid) -> DomainResult<AppealRow> {
    load_appeal(conn, id)?.ok_or(PiggiesError::NotFound("appeal"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;
    use chrono::Duration;
    use piggies_core::moderation::ModerationAction;

    fn ban(db: &Database, admin: Uuid, target: Uuid) {
        let action = ModerationAction::Ban {
            reason: "abuse".into(),
        };
        db.moderate(Some(admin), target, &action, t0()).unwrap();
    }

    #[test]
    fn test_appeal_requires_matching_restriction() {
        let db = Database::open_in_memory().unwrap();
        let bob = user(&db, "idp|bob");

        let err = db
            .submit_appeal(bob.id, AppealType::Ban, "I did nothing", None, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));

        let eligibility = db.appeal_eligibility(bob.id, t0()).unwrap();
        assert!(eligibility.can_submit);
        assert!(!eligibility.has_restriction);
    }

    #[test]
    fn test_one_outstanding_appeal() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        ban(&db, root.id, bob.id);

        let appeal = db
            .submit_appeal(bob.id, AppealType::Ban, "Please", Some("context"), t0())
            .unwrap();
        assert_eq!(appeal.status, AppealStatus::Pending);
        assert!(!db.appeal_eligibility(bob.id, t0()).unwrap().can_submit);

        let err = db
            .submit_appeal(bob.id, AppealType::Ban, "Again", None, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));

        db.update_appeal_status(root.id, appeal.id, AppealStatus::UnderReview, None, t0())
            .unwrap();
        assert!(!db.appeal_eligibility(bob.id, t0()).unwrap().can_submit);

        db.update_appeal_status(root.id, appeal.id, AppealStatus::Rejected, Some("no"), t0())
            .unwrap();
        assert!(db.appeal_eligibility(bob.id, t0()).unwrap().can_submit);
        assert!(db.get_user(bob.id).unwrap().unwrap().moderation.is_banned());
    }

    #[test]
    fn test_accepting_ban_appeal_unbans() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        ban(&db, root.id, bob.id);

        let appeal = db
            .submit_appeal(bob.id, AppealType::Ban, "It was a mistake", None, t0())
            .unwrap();
        let decided = db
            .update_appeal_status(root.id, appeal.id, AppealStatus::Accepted, Some("Fair"), t0())
            .unwrap();
        assert_eq!(decided.status, AppealStatus::Accepted);
        assert_eq!(decided.reviewed_by, Some(root.id));
        assert_eq!(decided.admin_response.as_deref(), Some("Fair"));
        assert_eq!(decided.reviewed_at, Some(t0()));

        let bob = db.get_user(bob.id).unwrap().unwrap();
        assert!(!bob.moderation.is_banned());

        let log = db.moderation_log(root.id, Some(bob.id), 10).unwrap();
        assert_eq!(log[0].kind, ModerationKind::AppealAccepted);

        let err = db
            .update_appeal_status(root.id, appeal.id, AppealStatus::Rejected, None, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));
    }

    #[test]
    fn test_accepting_after_manual_lift_is_noop_on_flags() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        db.moderate(
            Some(root.id),
            bob.id,
            &ModerationAction::Suspend {
                until: t0() + Duration::days(3),
                reason: "cool off".into(),
            },
            t0(),
        )
        .unwrap();

        let appeal = db
            .submit_appeal(bob.id, AppealType::Suspension, "Too harsh", None, t0())
            .unwrap();
        db.moderate(Some(root.id), bob.id, &ModerationAction::Unsuspend, t0())
            .unwrap();

        db.update_appeal_status(root.id, appeal.id, AppealStatus::Accepted, None, t0())
            .unwrap();
        let bob = db.get_user(bob.id).unwrap().unwrap();
        assert!(!bob.moderation.is_restricted(t0()));
    }

    #[test]
    fn test_warning_appeal_removes_one_warning() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        let warn = ModerationAction::Warn {
            reason: "spam".into(),
        };
        for _ in 0..2 {
            db.moderate(Some(root.id), bob.id, &warn, t0()).unwrap();
        }

        let appeal = db
            .submit_appeal(bob.id, AppealType::Warning, "Not spam", None, t0())
            .unwrap();
        db.update_appeal_status(root.id, appeal.id, AppealStatus::Accepted, None, t0())
            .unwrap();
        assert_eq!(db.get_user(bob.id).unwrap().unwrap().moderation.warnings, 1);
    }

    #[test]
    fn test_admin_queue_filters_by_status() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let bob = user(&db, "idp|bob");
        ban(&db, root.id, bob.id);
        db.submit_appeal(bob.id, AppealType::Ban, "Please", None, t0())
            .unwrap();

        assert_eq!(db.list_appeals(root.id, None).unwrap().len(), 1);
        assert_eq!(db.list_appeals(root.id, Some(AppealStatus::Pending)).unwrap().len(), 1);
        assert!(db.list_appeals(root.id, Some(AppealStatus::Accepted)).unwrap().is_empty());
        assert!(db.list_appeals(bob.id, None).is_err());
        assert_eq!(db.list_my_appeals(bob.id).unwrap().len(), 1);
    }
}
