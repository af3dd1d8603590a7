//! Referral codes, activation and reward stacking.

use chrono::{DateTime, Duration, Utc};
use piggies_types::models::ReferralStatus;
use rand::Rng;

/// Code alphabet without the look-alikes O, 0, I and 1.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 8;

/// Days a referred user must stay in good standing.
pub const ACTIVATION_WINDOW_DAYS: i64 = 7;
/// Activations per reward cycle.
pub const ACTIVATIONS_PER_REWARD: u32 = 3;
/// Days of bonus Ultra per reward cycle.
pub const REWARD_DAYS: i64 = 30;

pub fn activation_window() -> Duration {
    Duration::days(ACTIVATION_WINDOW_DAYS)
}

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-typed code, or `None` if it cannot be a code
/// we issued.
pub fn normalize_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    let well_formed = code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b));
    well_formed.then_some(code)
}

/// Facts about a pending referral needed to decide its fate.
#[derive(Debug, Clone, Copy)]
pub struct ActivationInput {
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
    /// Referred user still exists and has not been banned.
    pub referred_in_good_standing: bool,
}

/// Lazily evaluated referral transition. Only `pending` referrals move;
/// `activated` and `expired` are terminal.
pub fn check_activation(input: ActivationInput, now: DateTime<Utc>) -> ReferralStatus {
    match input.status {
        ReferralStatus::Pending if !input.referred_in_good_standing => ReferralStatus::Expired,
        ReferralStatus::Pending if now - input.created_at >= activation_window() => {
            ReferralStatus::Activated
        }
        status => status,
    }
}

/// New bonus expiry for a referrer whose cumulative activation count has
/// just become `activated_total`. Every third activation earns a cycle,
/// stacked on top of whatever bonus time is left.
pub fn reward_expiry(
    activated_total: u32,
    current_expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if activated_total == 0 || activated_total % ACTIVATIONS_PER_REWARD != 0 {
        return None;
    }
    let base = current_expiry.map_or(now, |expiry| expiry.max(now));
    Some(base + Duration::days(REWARD_DAYS))
}

/// Activations counted toward the next reward.
pub fn progress_to_next(activated_total: u32) -> u32 {
    activated_total % ACTIVATIONS_PER_REWARD
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_generated_codes_are_normalized_form() {
        let mut rng = rand::rng();
        for _ in 0..500 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), CODE_LEN);
            assert!(!code.contains(['O', '0', 'I', '1']));
            assert_eq!(normalize_code(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" abcd2345 ").as_deref(), Some("ABCD2345"));
        assert_eq!(normalize_code("ZZZZ0000"), None);
        assert_eq!(normalize_code("ABCD234"), None);
        assert_eq!(normalize_code(""), None);
    }

    #[test]
    fn test_activation_transition_table() {
        let cases = [
            // status, days since creation, good standing, expected
            (ReferralStatus::Pending, 3, true, ReferralStatus::Pending),
            (ReferralStatus::Pending, 7, true, ReferralStatus::Activated),
            (ReferralStatus::Pending, 30, true, ReferralStatus::Activated),
            (ReferralStatus::Pending, 3, false, ReferralStatus::Expired),
            (ReferralStatus::Pending, 8, false, ReferralStatus::Expired),
            (ReferralStatus::Activated, 8, false, ReferralStatus::Activated),
            (ReferralStatus::Activated, 1, true, ReferralStatus::Activated),
            (ReferralStatus::Expired, 8, true, ReferralStatus::Expired),
            (ReferralStatus::Expired, 1, true, ReferralStatus::Expired),
        ];
        for (status, days, good, expected) in cases {
            let input = ActivationInput {
                status,
                created_at: t0(),
                referred_in_good_standing: good,
            };
            assert_eq!(
                check_activation(input, t0() + Duration::days(days)),
                expected,
                "{} after {} days (good standing: {})",
                status,
                days,
                good
            );
        }
    }

    #[test]
    fn test_activation_boundary() {
        let input = ActivationInput {
            status: ReferralStatus::Pending,
            created_at: t0(),
            referred_in_good_standing: true,
        };
        let just_before = t0() + activation_window() - Duration::seconds(1);
        assert_eq!(check_activation(input, just_before), ReferralStatus::Pending);
        assert_eq!(
            check_activation(input, t0() + activation_window()),
            ReferralStatus::Activated
        );
    }

    #[test]
    fn test_reward_every_third_activation() {
        let now = t0();
        assert_eq!(reward_expiry(1, None, now), None);
        assert_eq!(reward_expiry(2, None, now), None);
        assert_eq!(reward_expiry(3, None, now), Some(now + Duration::days(30)));
        assert_eq!(reward_expiry(4, None, now), None);
        assert_eq!(reward_expiry(6, None, now), Some(now + Duration::days(30)));
        assert_eq!(progress_to_next(4), 1);
        assert_eq!(progress_to_next(6), 0);
    }

    #[test]
    fn test_reward_stacks_on_remaining_bonus() {
        let now = t0();
        let remaining = now + Duration::days(10);
        assert_eq!(
            reward_expiry(3, Some(remaining), now),
            Some(remaining + Duration::days(30))
        );

        let lapsed = now - Duration::days(10);
        assert_eq!(
            reward_expiry(3, Some(lapsed), now),
            Some(now + Duration::days(30))
        );
    }
}
