//! Album sharing grants.
//!
//! A grant is checked at every photo access. Nothing here caches; callers
//! pass the current time in and get a fresh answer.

use chrono::{DateTime, Duration, Utc};
use piggies_types::models::{ShareDuration, SubscriptionTier};

use crate::error::{PiggiesError, Result};

/// Albums a free user may hold (the default album).
pub const FREE_ALBUM_CAP: usize = 1;
/// Albums an Ultra user may hold.
pub const ULTRA_ALBUM_CAP: usize = 10;
/// Photos per album.
pub const ALBUM_PHOTO_LIMIT: usize = 50;

pub const MAX_ALBUM_TITLE_LEN: usize = 60;

/// The part of a grant that decides whether it is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantWindow {
    pub is_revoked: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantWindow {
    /// `!revoked && (no expiry || expiry > now)`
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// Expiry stamped on a grant created or refreshed at `now`.
pub fn expiry_for(duration: ShareDuration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match duration {
        ShareDuration::Hours24 => Some(now + Duration::hours(24)),
        ShareDuration::Days7 => Some(now + Duration::days(7)),
        ShareDuration::Indefinite => None,
    }
}

pub fn album_cap(tier: SubscriptionTier) -> usize {
    match tier {
        SubscriptionTier::Free => FREE_ALBUM_CAP,
        SubscriptionTier::Ultra => ULTRA_ALBUM_CAP,
    }
}

pub fn validate_album_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PiggiesError::validation("album title must not be empty"));
    }
    if title.chars().count() > MAX_ALBUM_TITLE_LEN {
        return Err(PiggiesError::validation(format!(
            "album title must be at most {} characters",
            MAX_ALBUM_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::Rng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_effective_matches_definition_for_random_inputs() {
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let now = t0() + Duration::seconds(rng.random_range(-1_000_000..1_000_000));
            let is_revoked = rng.random_bool(0.3);
            let expires_at = if rng.random_bool(0.2) {
                None
            } else {
                Some(t0() + Duration::seconds(rng.random_range(-1_000_000..1_000_000)))
            };
            let grant = GrantWindow { is_revoked, expires_at };

            let expected = !is_revoked && expires_at.is_none_or(|e| e > now);
            assert_eq!(grant.is_effective(now), expected, "{:?} at {}", grant, now);
            if is_revoked {
                assert!(!grant.is_effective(now));
            }
            if let Some(expiry) = expires_at {
                if now > expiry {
                    assert!(!grant.is_effective(now));
                }
            }
        }
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let grant = GrantWindow {
            is_revoked: false,
            expires_at: Some(t0()),
        };
        assert!(grant.is_effective(t0() - Duration::milliseconds(1)));
        assert!(!grant.is_effective(t0()));
    }

    #[test]
    fn test_24h_share_lapses_without_revocation() {
        let grant = GrantWindow {
            is_revoked: false,
            expires_at: expiry_for(ShareDuration::Hours24, t0()),
        };
        assert!(grant.is_effective(t0() + Duration::hours(23)));
        assert!(!grant.is_effective(t0() + Duration::hours(25)));
    }

    #[test]
    fn test_indefinite_share() {
        assert_eq!(expiry_for(ShareDuration::Indefinite, t0()), None);
        assert_eq!(
            expiry_for(ShareDuration::Days7, t0()),
            Some(t0() + Duration::days(7))
        );
    }

    #[test]
    fn test_album_title() {
        assert_eq!(validate_album_title("  Beach  ").unwrap(), "Beach");
        assert!(validate_album_title("   ").is_err());
        assert!(validate_album_title(&"x".repeat(61)).is_err());
    }
}
