use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::moderation::validate_reason;
use piggies_core::profile::validate_coordinates;
use piggies_core::venues::{VenueReview, after_report, review, validate_submission};
use piggies_types::models::{VenueCategory, VenueStatus};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use crate::Database;
use crate::models::{VENUE_COLUMNS, VenueRow, json_list, to_millis, venue_from_row};
use crate::queries::users::{require_admin, require_user};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

/// A venue submission with coordinates already resolved.
pub struct NewVenue<'a> {
    pub name: &'a str,
    pub category: VenueCategory,
    pub address: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub features: &'a [String],
}

impl Database {
    pub fn submit_venue(
        &self,
        submitter: Uuid,
        venue: &NewVenue<'_>,
        now: DateTime<Utc>,
    ) -> DomainResult<VenueRow> {
        let draft = validate_submission(venue.name, venue.address, venue.features)?;
        validate_coordinates(venue.latitude, venue.longitude)?;

        self.with_tx(|tx| {
            require_user(tx, submitter)?;
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO venues
                     (id, name, category, address, latitude, longitude, features, status,
                      submitted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    draft.name,
                    venue.category.as_str(),
                    draft.address,
                    venue.latitude,
                    venue.longitude,
                    json_list(&draft.features)?,
                    VenueStatus::Pending.as_str(),
                    submitter.to_string(),
                    to_millis(now),
                ],
            )
            .map_err(anyhow::Error::from)?;
            info!("User {} submitted venue {} ({})", submitter, id, draft.name);
            require_venue(tx, id)
        })
    }

    /// Public directory: approved venues only.
    pub fn list_venues(&self, category: Option<VenueCategory>) -> Result<Vec<VenueRow>> {
        self.with_conn(|conn| query_venues(conn, Some(VenueStatus::Approved), category))
    }

    pub fn list_venues_admin(
        &self,
        admin_id: Uuid,
        status: Option<VenueStatus>,
    ) -> DomainResult<Vec<VenueRow>> {
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            Ok(query_venues(tx, status, None)?)
        })
    }

    pub fn get_venue(&self, id: Uuid) -> Result<Option<VenueRow>> {
        self.with_conn(|conn| load_venue(conn, id))
    }

    /// Approve or reject a pending venue, or restore a flagged one.
    /// Restoring clears its reports.
    pub fn review_venue(
        &self,
        admin_id: Uuid,
        venue_id: Uuid,
        action: VenueReview,
        now: DateTime<Utc>,
    ) -> DomainResult<VenueRow> {
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            let venue = require_venue(tx, venue_id)?;
            let status = review(venue.status, action)?;

            if action == VenueReview::Restore {
                tx.execute("DELETE FROM venue_reports WHERE venue_id = ?1", [venue_id.to_string()])
                    .map_err(anyhow::Error::from)?;
            }
            tx.execute(
                "UPDATE venues SET status = ?1, reviewed_by = ?2, reviewed_at = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    admin_id.to_string(),
                    to_millis(now),
                    venue_id.to_string()
                ],
            )
            .map_err(anyhow::Error::from)?;

            info!(
                "Admin {} moved venue {} from {} to {}",
                admin_id, venue_id, venue.status, status
            );
            require_venue(tx, venue_id)
        })
    }

    pub fn delete_venue(&self, admin_id: Uuid, venue_id: Uuid) -> DomainResult<()> {
        self.with_tx(|tx| {
            require_admin(tx, admin_id)?;
            require_venue(tx, venue_id)?;
            tx.execute("DELETE FROM venues WHERE id = ?1", [venue_id.to_string()])
                .map_err(anyhow::Error::from)?;
            info!("Admin {} deleted venue {}", admin_id, venue_id);
            Ok(())
        })
    }

    /// One report per user per venue; repeats are ignored. Enough distinct
    /// reports flag an approved venue.
    pub fn report_venue(
        &self,
        reporter: Uuid,
        venue_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<VenueRow> {
        validate_reason(reason)?;

        self.with_tx(|tx| {
            require_user(tx, reporter)?;
            let venue = require_venue(tx, venue_id)?;
            if !matches!(venue.status, VenueStatus::Approved | VenueStatus::Flagged) {
                return Err(PiggiesError::NotFound("venue"));
            }

            tx.execute(
                "INSERT OR IGNORE INTO venue_reports (venue_id, reporter_id, reason, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![venue_id.to_string(), reporter.to_string(), reason.trim(), to_millis(now)],
            )
            .map_err(anyhow::Error::from)?;

            let venue = require_venue(tx, venue_id)?;
            let status = after_report(venue.status, venue.report_count);
            if status != venue.status {
                tx.execute(
                    "UPDATE venues SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), venue_id.to_string()],
                )
                .map_err(anyhow::Error::from)?;
                info!("Venue {} flagged after {} reports", venue_id, venue.report_count);
            }
            require_venue(tx, venue_id)
        })
    }
}

fn query_venues(
    conn: &Connection,
    status: Option<VenueStatus>,
    category: Option<VenueCategory>,
) -> Result<Vec<VenueRow>> {
    let sql = format!(
        "SELECT {} FROM venues v
         WHERE (?1 IS NULL OR v.status = ?1) AND (?2 IS NULL OR v.category = ?2)
         ORDER BY v.created_at DESC",
        VENUE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![status.map(VenueStatus::as_str), category.map(VenueCategory::as_str)],
            venue_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_venue(conn: &Connection, id: Uuid) -> Result<Option<VenueRow>> {
    let sql = format!("SELECT {} FROM venues v WHERE v.id = ?1", VENUE_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], venue_from_row).optional()?)
}

fn require_venue(conn: &Connection, id: Uuid) -> DomainResult<VenueRow> {
    load_venue(conn, id)?.ok_or(PiggiesError::NotFound("venue"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users::test_support::*;

    fn submit(db: &Database, submitter: Uuid) -> VenueRow {
        let features = vec!["Darkroom".to_string(), "darkroom".to_string()];
        db.submit_venue(
            submitter,
            &NewVenue {
                name: " The Pig Pen ",
                category: VenueCategory::Bar,
                address: "1 Main St",
                latitude: 52.5,
                longitude: 13.4,
                features: &features,
            },
            t0(),
        )
        .unwrap()
    }

    #[test]
    fn test_submission_starts_pending_and_hidden() {
        let db = Database::open_in_memory().unwrap();
        let alice = user(&db, "idp|alice").id;
        let venue = submit(&db, alice);
        assert_eq!(venue.status, VenueStatus::Pending);
        assert_eq!(venue.name, "The Pig Pen");
        assert_eq!(venue.features, vec!["darkroom"]);
        assert!(db.list_venues(None).unwrap().is_empty());
    }

    #[test]
    fn test_review_and_flag_cycle() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root").id;
        let alice = user(&db, "idp|alice").id;
        let venue = submit(&db, alice);

        let err = db
            .review_venue(alice, venue.id, VenueReview::Approve, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::Unauthorized(_)));

        db.review_venue(root, venue.id, VenueReview::Approve, t0()).unwrap();
        assert_eq!(db.list_venues(Some(VenueCategory::Bar)).unwrap().len(), 1);
        assert!(db.list_venues(Some(VenueCategory::Club)).unwrap().is_empty());

        let reporters: Vec<Uuid> = (0..3).map(|n| user(&db, &format!("idp|r{}", n)).id).collect();
        db.report_venue(reporters[0], venue.id, "closed", t0()).unwrap();
        let repeated = db.report_venue(reporters[0], venue.id, "closed", t0()).unwrap();
        assert_eq!(repeated.report_count, 1);
        assert_eq!(repeated.status, VenueStatus::Approved);

        db.report_venue(reporters[1], venue.id, "closed", t0()).unwrap();
        let flagged = db.report_venue(reporters[2], venue.id, "closed", t0()).unwrap();
        assert_eq!(flagged.status, VenueStatus::Flagged);
        assert!(db.list_venues(None).unwrap().is_empty());

        let err = db
            .review_venue(root, venue.id, VenueReview::Approve, t0())
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));

        let restored = db.review_venue(root, venue.id, VenueReview::Restore, t0()).unwrap();
        assert_eq!(restored.status, VenueStatus::Approved);
        assert_eq!(restored.report_count, 0);
    }

    #[test]
    fn test_admin_listing_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let root = admin(&db, "idp|root").id;
        let alice = user(&db, "idp|alice").id;
        let venue = submit(&db, alice);

        let pending = db.list_venues_admin(root, Some(VenueStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert!(db.list_venues_admin(alice, None).is_err());

        let err = db.report_venue(alice, venue.id, "spam", t0()).unwrap_err();
        assert!(matches!(err, PiggiesError::NotFound(_)));

        db.delete_venue(root, venue.id).unwrap();
        assert!(db.get_venue(venue.id).unwrap().is_none());
    }
}
