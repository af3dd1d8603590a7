use chrono::{DateTime, Utc};
use piggies_types::models::SubscriptionTier;

use crate::error::{PiggiesError, Result};

pub const MIN_AGE: u8 = 18;
pub const MAX_AGE: u8 = 99;
pub const MAX_DISPLAY_NAME_LEN: usize = 50;
pub const MAX_BIO_LEN: usize = 500;
pub const MAX_PROFILE_PHOTOS: usize = 6;
pub const MAX_INTERESTS: usize = 20;
pub const MAX_INTEREST_LEN: usize = 32;

/// Ultra when paid for, or while referral bonus time remains.
pub fn effective_tier(
    tier: SubscriptionTier,
    referral_ultra_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SubscriptionTier {
    match (tier, referral_ultra_expires_at) {
        (SubscriptionTier::Ultra, _) => SubscriptionTier::Ultra,
        (_, Some(expiry)) if expiry > now => SubscriptionTier::Ultra,
        _ => SubscriptionTier::Free,
    }
}

pub fn validate_display_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(PiggiesError::validation(format!(
            "display name must be 1-{} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Empty bios are stored as `None`.
pub fn validate_bio(bio: &str) -> Result<Option<String>> {
    let bio = bio.trim();
    if bio.chars().count() > MAX_BIO_LEN {
        return Err(PiggiesError::validation(format!(
            "bio must be at most {} characters",
            MAX_BIO_LEN
        )));
    }
    Ok((!bio.is_empty()).then(|| bio.to_string()))
}

pub fn validate_age(age: u8) -> Result<u8> {
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(PiggiesError::validation(format!(
            "age must be between {} and {}",
            MIN_AGE, MAX_AGE
        )));
    }
    Ok(age)
}

/// Lowercases, trims and de-duplicates interest tags, keeping first-seen order.
pub fn normalize_interests(tags: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_INTEREST_LEN {
            return Err(PiggiesError::validation(format!(
                "interest tags must be at most {} characters",
                MAX_INTEREST_LEN
            )));
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    if out.len() > MAX_INTERESTS {
        return Err(PiggiesError::validation(format!(
            "at most {} interests allowed",
            MAX_INTERESTS
        )));
    }
    Ok(out)
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    let valid = latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude);
    if !valid {
        return Err(PiggiesError::validation("coordinates out of range"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_effective_tier() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        use SubscriptionTier::*;
        assert_eq!(effective_tier(Free, None, now), Free);
        assert_eq!(effective_tier(Ultra, None, now), Ultra);
        assert_eq!(effective_tier(Free, Some(now + Duration::days(1)), now), Ultra);
        assert_eq!(effective_tier(Free, Some(now - Duration::days(1)), now), Free);
        assert_eq!(effective_tier(Free, Some(now), now), Free);
    }

    #[test]
    fn test_profile_field_rules() {
        assert_eq!(validate_display_name("  Kit ").unwrap(), "Kit");
        assert!(validate_display_name("").is_err());
        assert_eq!(validate_bio("   ").unwrap(), None);
        assert!(validate_bio(&"b".repeat(501)).is_err());
        assert!(validate_age(17).is_err());
        assert!(validate_age(100).is_err());
        assert_eq!(validate_age(18).unwrap(), 18);
        assert!(validate_coordinates(91.0, 0.0).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(-33.86, 151.2).is_ok());
    }

    #[test]
    fn test_normalize_interests() {
        let tags = vec!["Hiking".to_string(), " hiking ".into(), "".into(), "Jazz".into()];
        assert_eq!(normalize_interests(&tags).unwrap(), vec!["hiking", "jazz"]);

        let many: Vec<String> = (0..21).map(|i| format!("tag{}", i)).collect();
        assert!(normalize_interests(&many).is_err());
    }
}
