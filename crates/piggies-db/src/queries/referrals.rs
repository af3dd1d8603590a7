use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::referrals::{
    ActivationInput, check_activation, normalize_code, progress_to_next, reward_expiry,
};
use piggies_types::api::{ReferralStats, SweepResponse};
use piggies_types::models::ReferralStatus;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Database;
use crate::models::{
    REFERRAL_COLUMNS, ReferralRow, USER_COLUMNS, UserRow, referral_from_row, to_millis,
    user_from_row,
};
use crate::queries::users::{load_user, require_user, unused_referral_code};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

/// Result of evaluating pending referrals.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub activated: u32,
    pub expired: u32,
    /// Referrers who earned a reward cycle, with their new bonus expiry.
    pub rewards: Vec<(Uuid, DateTime<Utc>)>,
}

impl SweepReport {
    pub fn summary(&self) -> SweepResponse {
        SweepResponse {
            activated: self.activated,
            expired: self.expired,
            rewarded: self.rewards.len() as u32,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Unchanged => {}
            Outcome::Expired => self.expired += 1,
            Outcome::Activated { reward } => {
                self.activated += 1;
                self.rewards.extend(reward);
            }
        }
    }
}

enum Outcome {
    Unchanged,
    Expired,
    Activated { reward: Option<(Uuid, DateTime<Utc>)> },
}

impl Database {
    /// Returns the user's code, issuing one if they have none.
    pub fn generate_referral_code(&self, user_id: Uuid) -> DomainResult<String> {
        self.with_tx(|tx| {
            let user = require_user(tx, user_id)?;
            if let Some(code) = user.referral_code {
                return Ok(code);
            }
            let code = unused_referral_code(tx)?;
            tx.execute(
                "UPDATE users SET referral_code = ?1 WHERE id = ?2",
                params![code, user_id.to_string()],
            )
            .map_err(anyhow::Error::from)?;
            Ok(code)
        })
    }

    /// Records that `referred` signed up with `code`. Unknown codes,
    /// self-referral and already-referred users are ignored.
    pub fn apply_referral_code(
        &self,
        referred: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<ReferralRow>> {
        let Some(code) = normalize_code(code) else {
            debug!("Ignoring malformed referral code from {}", referred);
            return Ok(None);
        };

        self.with_tx(|tx| record_referral(tx, referred, &code, now))
    }

    /// Lazily evaluates `referrer`'s pending referrals.
    pub fn check_referrals_for(
        &self,
        referrer: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<SweepReport> {
        let pending = self.with_conn(|conn| pending_ids(conn, Some(referrer)))?;
        self.evaluate_all(pending, now)
    }

    /// Evaluates every pending referral. Run periodically by the server.
    pub fn run_activation_sweep(&self, now: DateTime<Utc>) -> DomainResult<SweepReport> {
        let pending = self.with_conn(|conn| pending_ids(conn, None))?;
        let report = self.evaluate_all(pending, now)?;
        if report.activated > 0 || report.expired > 0 {
            info!(
                "Referral sweep: {} activated, {} expired, {} rewarded",
                report.activated,
                report.expired,
                report.rewards.len()
            );
        }
        Ok(report)
    }

    pub fn referral_stats(&self, user_id: Uuid, now: DateTime<Utc>) -> DomainResult<ReferralStats> {
        self.check_referrals_for(user_id, now)?;

        self.with_tx(|tx| {
            let user = require_user(tx, user_id)?;
            let mut stmt = tx
                .prepare(
                    "SELECT status, COUNT(*) FROM referrals
                     WHERE referrer_id = ?1 GROUP BY status",
                )
                .map_err(anyhow::Error::from)?;
            let counts = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
                })
                .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>())
                .map_err(anyhow::Error::from)?;

            let count = |status: ReferralStatus| {
                counts
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map_or(0, |(_, n)| *n)
            };

            Ok(ReferralStats {
                code: user.referral_code.clone(),
                credits: user.referral_credits,
                pending: count(ReferralStatus::Pending),
                activated: count(ReferralStatus::Activated),
                expired: count(ReferralStatus::Expired),
                progress_to_next: progress_to_next(user.referral_credits),
                ultra_expires_at: user.referral_ultra_expires_at,
            })
        })
    }

    fn evaluate_all(&self, ids: Vec<Uuid>, now: DateTime<Utc>) -> DomainResult<SweepReport> {
        let mut report = SweepReport::default();
        for id in ids {
            let outcome = self.with_tx(|tx| evaluate_one(tx, id, now))?;
            report.record(outcome);
        }
        Ok(report)
    }
}

/// Links `referred` to the owner of an already normalized `code`.
pub(crate) fn record_referral(
    conn: &Connection,
    referred: Uuid,
    code: &str,
    now: DateTime<Utc>,
) -> DomainResult<Option<ReferralRow>> {
    let user = require_user(conn, referred)?;
    let Some(referrer) = user_by_code(conn, code)? else {
        debug!("Ignoring unknown referral code {} from {}", code, referred);
        return Ok(None);
    };
    if referrer.id == referred {
        debug!("Ignoring self-referral by {}", referred);
        return Ok(None);
    }
    if user.referred_by.is_some() || referral_of(conn, referred)?.is_some() {
        debug!("User {} was already referred", referred);
        return Ok(None);
    }

    let id = Uuid::new_v4();
    insert_referral(conn, id, referrer.id, referred, code, now)?;
    info!("User {} referred by {} with code {}", referred, referrer.id, code);

    Ok(referral_of(conn, referred)?)
}

/// One referral, one transaction: status change, credit and reward
/// commit together or not at all.
fn evaluate_one(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> DomainResult<Outcome> {
    let sql = format!("SELECT {} FROM referrals WHERE id = ?1", REFERRAL_COLUMNS);
    let Some(referral) = conn
        .query_row(&sql, [id.to_string()], referral_from_row)
        .optional()
        .map_err(anyhow::Error::from)?
    else {
        return Ok(Outcome::Unchanged);
    };

    let referred = load_user(conn, referral.referred_id)?;
    let input = ActivationInput {
        status: referral.status,
        created_at: referral.created_at,
        referred_in_good_standing: referred.is_some_and(|u| !u.moderation.is_banned()),
    };

    match check_activation(input, now) {
        status if status == referral.status => Ok(Outcome::Unchanged),
        ReferralStatus::Expired => {
            resolve(conn, id, ReferralStatus::Expired, now)?;
            debug!("Referral {} expired", id);
            Ok(Outcome::Expired)
        }
        ReferralStatus::Activated => {
            resolve(conn, id, ReferralStatus::Activated, now)?;
            let referrer = require_user(conn, referral.referrer_id)?;
            let credits = referrer.referral_credits + 1;
            let reward = reward_expiry(credits, referrer.referral_ultra_expires_at, now);

            conn.execute(
                "UPDATE users
                 SET referral_credits = ?1,
                     referral_ultra_expires_at = COALESCE(?2, referral_ultra_expires_at)
                 WHERE id = ?3",
                params![credits, reward.map(to_millis), referrer.id.to_string()],
            )
            .map_err(anyhow::Error::from)?;

            if let Some(expiry) = reward {
                info!("Referrer {} earned bonus Ultra until {}", referrer.id, expiry);
            }
            Ok(Outcome::Activated {
                reward: reward.map(|expiry| (referrer.id, expiry)),
            })
        }
        ReferralStatus::Pending => {
            warn!("Referral {} moved back to pending, ignoring", id);
            Ok(Outcome::Unchanged)
        }
    }
}

fn resolve(conn: &Connection, id: Uuid, status: ReferralStatus, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE referrals SET status = ?1, resolved_at = ?2 WHERE id = ?3",
        params![status.as_str(), to_millis(now), id.to_string()],
    )?;
    Ok(())
}

fn pending_ids(conn: &Connection, referrer: Option<Uuid>) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM referrals
         WHERE status = ?1 AND (?2 IS NULL OR referrer_id = ?2)
         ORDER BY created_at",
    )?;
    let ids = stmt
        .query_map(
            params![ReferralStatus::Pending.as_str(), referrer.map(|r| r.to_string())],
            |row| crate::models::uuid_at(row, 0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn user_by_code(conn: &Connection, code: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE referral_code = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [code], user_from_row).optional()?)
}

fn referral_of(conn: &Connection, referred: Uuid) -> Result<Option<ReferralRow>> {
    let sql = format!("SELECT {} FROM referrals WHERE referred_id = ?1", REFERRAL_COLUMNS);
    Ok(conn
        .query_row(&sql, [referred.to_string()], referral_from_row)
        .optional()?)
}

fn insert_referral(
    conn: &Connection,
    id: Uuid,
    referrer: Uuid,
    referred: Uuid,
    code: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO referrals (id, referrer_id, referred_id, code, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            referrer.to_string(),
            referred.to_string(),
            code,
            ReferralStatus::Pending.as_str(),
            to_millis(now),
        ],
    )?;
    conn.execute(
        "UPDATE users SET referred_by = ?1 WHERE id = ?2",
        params![referrer.to_string(), referred.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;
    use chrono::Duration;
    use piggies_core::moderation::ModerationAction;
    use piggies_core::referrals::{REWARD_DAYS, activation_window};
    use piggies_types::models::SubscriptionTier;

    fn refer(db: &Database, referrer: &UserRow, external_id: &str) -> UserRow {
        let referred = user(db, external_id);
        let code = referrer.referral_code.clone().unwrap().to_lowercase();
        db.apply_referral_code(referred.id, &format!("  {} ", code), t0())
            .unwrap()
            .expect("referral recorded");
        referred
    }

    #[test]
    fn test_apply_code_ignores_bad_input() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let bob = user(&db, "idp|bob");

        assert!(db.apply_referral_code(bob.id, "ZZZZZZZZ", t0()).unwrap().is_none());
        assert!(db.apply_referral_code(bob.id, "short", t0()).unwrap().is_none());
        let own = alice.referral_code.clone().unwrap();
        assert!(db.apply_referral_code(alice.id, &own, t0()).unwrap().is_none());

        assert!(db.apply_referral_code(bob.id, &own, t0()).unwrap().is_some());
        let carol = user(&db, "idp|carol");
        let carol_code = carol.referral_code.unwrap();
        assert!(db.apply_referral_code(bob.id, &carol_code, t0()).unwrap().is_none());
    }

    #[test]
    fn test_signup_records_referral_with_user() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let code = alice.referral_code.clone().unwrap();

        let (bob, created) = db
            .upsert_user_from_identity("idp|bob", "Bob", false, Some(&code), t0())
            .unwrap();
        assert!(created);
        assert_eq!(bob.referred_by, Some(alice.id));
        let stored = db.with_conn(|conn| referral_of(conn, bob.id)).unwrap().unwrap();
        assert_eq!(stored.referrer_id, alice.id);

        // Returning users keep their original referrer
        let carol = user(&db, "idp|carol");
        let carol_code = carol.referral_code.unwrap();
        let (again, created) = db
            .upsert_user_from_identity("idp|bob", "Bob", false, Some(&carol_code), t0())
            .unwrap();
        assert!(!created);
        assert_eq!(again.referred_by, Some(alice.id));

        // An unknown code never blocks signup
        let (dave, created) = db
            .upsert_user_from_identity("idp|dave", "Dave", false, Some("ZZZZZZZZ"), t0())
            .unwrap();
        assert!(created);
        assert!(dave.referred_by.is_none());
    }

    #[test]
    fn test_generate_code_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        let first = db.generate_referral_code(alice.id).unwrap();
        assert_eq!(Some(first.clone()), alice.referral_code);
        assert_eq!(db.generate_referral_code(alice.id).unwrap(), first);
    }

    #[test]
    fn test_activation_waits_for_window() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        refer(&db, &alice, "idp|r1");

        let early = db.run_activation_sweep(t0() + Duration::days(6)).unwrap();
        assert_eq!(early.activated, 0);

        let due = db.run_activation_sweep(t0() + activation_window()).unwrap();
        assert_eq!(due.activated, 1);
        assert!(due.rewards.is_empty());

        let again = db.run_activation_sweep(t0() + Duration::days(30)).unwrap();
        assert_eq!(again.activated, 0);
    }

    #[test]
    fn test_banned_referral_expires() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root");
        let alice = user(&db, "idp|alice");
        let referred = refer(&db, &alice, "idp|r1");

        let ban = ModerationAction::Ban {
            reason: "abuse".into(),
        };
        db.moderate(Some(root.id), referred.id, &ban, t0()).unwrap();
        db.moderate(Some(root.id), referred.id, &ModerationAction::Unban, t0())
            .unwrap();

        let report = db.run_activation_sweep(t0() + Duration::days(8)).unwrap();
        assert_eq!(report.activated, 0);
        let stats = db.referral_stats(alice.id, t0() + Duration::days(8)).unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.credits, 0);
    }

    #[test]
    fn test_third_activation_grants_ultra() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice");
        for n in 0..3 {
            refer(&db, &alice, &format!("idp|r{}", n));
        }

        let now = t0() + Duration::days(7);
        let stats = db.referral_stats(alice.id, now).unwrap();
        assert_eq!(stats.activated, 3);
        assert_eq!(stats.credits, 3);
        assert_eq!(stats.progress_to_next, 0);
        assert_eq!(stats.ultra_expires_at, Some(now + Duration::days(REWARD_DAYS)));

        let alice = db.get_user(alice.id).unwrap().unwrap();
        assert_eq!(alice.subscription_tier, SubscriptionTier::Free);
        assert_eq!(alice.effective_tier(now), SubscriptionTier::Ultra);
        assert_eq!(
            alice.effective_tier(now + Duration::days(REWARD_DAYS)),
            SubscriptionTier::Free
        );
    }
}
