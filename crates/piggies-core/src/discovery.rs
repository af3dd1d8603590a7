//! Nearby-user filtering and ranking.
//!
//! Order is distance ascending (users without a location last), then online
//! before offline, then user id so pages are stable between requests.

use std::cmp::Ordering;

use piggies_types::models::SubscriptionTier;
use uuid::Uuid;

use crate::error::{PiggiesError, Result};
use crate::profile::{MAX_AGE, MIN_AGE};

pub const FREE_DISCOVERY_CAP: usize = 50;
pub const ULTRA_DISCOVERY_CAP: usize = 500;
pub const MAX_PAGE_LIMIT: usize = 100;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

pub fn discovery_cap(tier: SubscriptionTier) -> usize {
    match tier {
        SubscriptionTier::Free => FREE_DISCOVERY_CAP,
        SubscriptionTier::Ultra => ULTRA_DISCOVERY_CAP,
    }
}

#[derive(Debug, Clone, Default)]
pub struct NearbyFilters {
    pub online_only: bool,
    pub has_photos: bool,
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    /// Lowercased tags; a candidate matches if it shares any one of them.
    pub interests: Vec<String>,
}

impl NearbyFilters {
    pub fn validate(&self) -> Result<()> {
        for age in [self.min_age, self.max_age].into_iter().flatten() {
            if !(MIN_AGE..=MAX_AGE).contains(&age) {
                return Err(PiggiesError::validation(format!(
                    "age filter must be between {} and {}",
                    MIN_AGE, MAX_AGE
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                return Err(PiggiesError::validation("min_age must not exceed max_age"));
            }
        }
        Ok(())
    }

    pub fn matches(&self, candidate: &Candidate) -> bool {
        if self.online_only && !candidate.is_online {
            return false;
        }
        if self.has_photos && !candidate.has_photos {
            return false;
        }
        if self.min_age.is_some() || self.max_age.is_some() {
            let Some(age) = candidate.age else {
                return false;
            };
            if self.min_age.is_some_and(|min| age < min)
                || self.max_age.is_some_and(|max| age > max)
            {
                return false;
            }
        }
        if !self.interests.is_empty()
            && !candidate
                .interests
                .iter()
                .any(|tag| self.interests.iter().any(|want| want.eq_ignore_ascii_case(tag)))
        {
            return false;
        }
        true
    }
}

/// A user eligible to appear in discovery. Blocked, banned and suspended
/// users are excluded before candidates are built.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub age: Option<u8>,
    pub has_photos: bool,
    pub interests: Vec<String>,
    pub is_online: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone)]
pub struct Ranked {
    pub id: Uuid,
    pub distance_km: Option<f64>,
    pub is_online: bool,
}

/// Filters and orders candidates as seen from `origin`.
pub fn rank(
    origin: Option<GeoPoint>,
    candidates: &[Candidate],
    filters: &NearbyFilters,
) -> Vec<Ranked> {
    let mut ranked: Vec<Ranked> = candidates
        .iter()
        .filter(|c| filters.matches(c))
        .map(|c| Ranked {
            id: c.id,
            distance_km: origin.zip(c.location).map(|(o, l)| haversine_km(o, l)),
            is_online: c.is_online,
        })
        .collect();

    ranked.sort_by(|a, b| {
        compare_distance(a.distance_km, b.distance_km)
            .then_with(|| b.is_online.cmp(&a.is_online))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

fn compare_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Applies the tier cap, then the page window. Returns the page and the
/// number of results available under the cap.
pub fn paginate<T>(mut ranked: Vec<T>, cap: usize, offset: usize, limit: usize) -> (Vec<T>, usize) {
    ranked.truncate(cap);
    let total = ranked.len();
    let page = ranked
        .into_iter()
        .skip(offset)
        .take(limit.min(MAX_PAGE_LIMIT))
        .collect();
    (page, total)
}
