//! Community venue lifecycle.
//!
//! `pending -> approved | rejected` by admin review; `approved -> flagged`
//! once enough distinct users report it; `flagged -> approved` by admin
//! restore. Deletion is allowed from any state.

use piggies_types::models::VenueStatus;

use crate::error::{PiggiesError, Result};

/// Distinct reports that flag an approved venue.
pub const FLAG_THRESHOLD: u32 = 3;
pub const MAX_VENUE_NAME_LEN: usize = 80;
pub const MAX_ADDRESS_LEN: usize = 200;
pub const MAX_FEATURES: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueReview {
    Approve,
    Reject,
    Restore,
}

pub fn review(current: VenueStatus, action: VenueReview) -> Result<VenueStatus> {
    match (current, action) {
        (VenueStatus::Pending, VenueReview::Approve) => Ok(VenueStatus::Approved),
        (VenueStatus::Pending, VenueReview::Reject) => Ok(VenueStatus::Rejected),
        (VenueStatus::Flagged, VenueReview::Restore) => Ok(VenueStatus::Approved),
        (status, action) => Err(PiggiesError::invalid_state(format!(
            "cannot {:?} a venue that is {}",
            action, status
        ).to_lowercase())),
    }
}

/// Status after a new report brings the distinct report count to `reports`.
pub fn after_report(current: VenueStatus, reports: u32) -> VenueStatus {
    match current {
        VenueStatus::Approved if reports >= FLAG_THRESHOLD => VenueStatus::Flagged,
        status => status,
    }
}

pub struct VenueDraft {
    pub name: String,
    pub address: String,
    pub features: Vec<String>,
}

pub fn validate_submission(name: &str, address: &str, features: &[String]) -> Result<VenueDraft> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_VENUE_NAME_LEN {
        return Err(PiggiesError::validation(format!(
            "venue name must be 1-{} characters",
            MAX_VENUE_NAME_LEN
        )));
    }
    let address = address.trim();
    if address.is_empty() || address.chars().count() > MAX_ADDRESS_LEN {
        return Err(PiggiesError::validation(format!(
            "address must be 1-{} characters",
            MAX_ADDRESS_LEN
        )));
    }

    let mut tags: Vec<String> = Vec::new();
    for feature in features {
        let feature = feature.trim().to_lowercase();
        if !feature.is_empty() && !tags.contains(&feature) {
            tags.push(feature);
        }
    }
    if tags.len() > MAX_FEATURES {
        return Err(PiggiesError::validation(format!(
            "at most {} feature tags allowed",
            MAX_FEATURES
        )));
    }

    Ok(VenueDraft {
        name: name.to_string(),
        address: address.to_string(),
        features: tags,
    })
}
