//! Per-user moderation state and the appeal lifecycle.
//!
//! A user carries a warning counter plus at most one restriction. A ban and
//! a suspension cannot coexist: banning replaces a suspension, and a banned
//! user cannot be suspended.

use chrono::{DateTime, Utc};
use piggies_types::models::{AppealStatus, AppealType, ModerationKind, Standing};

use crate::error::{PiggiesError, Result};

pub const MAX_REASON_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    None,
    Suspended { until: DateTime<Utc>, reason: String },
    Banned { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationRecord {
    pub warnings: u32,
    pub restriction: Restriction,
}

impl Default for ModerationRecord {
    fn default() -> Self {
        Self {
            warnings: 0,
            restriction: Restriction::None,
        }
    }
}

/// An admin (or automated) action against a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationAction {
    Warn { reason: String },
    Suspend { until: DateTime<Utc>, reason: String },
    Ban { reason: String },
    Unban,
    Unsuspend,
    ClearWarning,
}

impl ModerationAction {
    pub fn kind(&self) -> ModerationKind {
        match self {
            Self::Warn { .. } => ModerationKind::Warn,
            Self::Suspend { .. } => ModerationKind::Suspend,
            Self::Ban { .. } => ModerationKind::Ban,
            Self::Unban => ModerationKind::Unban,
            Self::Unsuspend => ModerationKind::Unsuspend,
            Self::ClearWarning => ModerationKind::ClearWarning,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Warn { reason } | Self::Suspend { reason, .. } | Self::Ban { reason } => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Suspend { until, .. } => Some(*until),
            _ => None,
        }
    }
}

impl ModerationRecord {
    pub fn is_banned(&self) -> bool {
        matches!(self.restriction, Restriction::Banned { .. })
    }

    /// A suspension whose end lies in the past reads as lifted. It is never
    /// cleared on read.
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.restriction, Restriction::Suspended { until, .. } if until > now)
    }

    pub fn is_restricted(&self, now: DateTime<Utc>) -> bool {
        self.is_banned() || self.is_suspended(now)
    }

    pub fn standing(&self, now: DateTime<Utc>) -> Standing {
        match &self.restriction {
            Restriction::Banned { reason } => Standing::Banned {
                reason: reason.clone(),
            },
            Restriction::Suspended { until, reason } if *until > now => Standing::Suspended {
                until: *until,
                reason: reason.clone(),
            },
            _ if self.warnings > 0 => Standing::Warned {
                count: self.warnings,
            },
            _ => Standing::Active,
        }
    }

    /// Pure transition function. Returns the new record or explains why the
    /// action does not apply.
    pub fn apply(&self, action: &ModerationAction, now: DateTime<Utc>) -> Result<ModerationRecord> {
        if let Some(reason) = action.reason() {
            validate_reason(reason)?;
        }

        let mut next = self.clone();
        match action {
            ModerationAction::Warn { .. } => {
                next.warnings = next.warnings.saturating_add(1);
            }
            ModerationAction::Suspend { until, reason } => {
                if *until <= now {
                    return Err(PiggiesError::validation("suspension end must be in the future"));
                }
                if self.is_banned() {
                    return Err(PiggiesError::invalid_state("user is banned"));
                }
                next.restriction = Restriction::Suspended {
                    until: *until,
                    reason: reason.trim().to_string(),
                };
            }
            ModerationAction::Ban { reason } => {
                if self.is_banned() {
                    return Err(PiggiesError::invalid_state("user is already banned"));
                }
                next.restriction = Restriction::Banned {
                    reason: reason.trim().to_string(),
                };
            }
            ModerationAction::Unban => {
                if !self.is_banned() {
                    return Err(PiggiesError::invalid_state("user is not banned"));
                }
                next.restriction = Restriction::None;
            }
            ModerationAction::Unsuspend => {
                if !self.is_suspended(now) {
                    return Err(PiggiesError::invalid_state("user is not suspended"));
                }
                next.restriction = Restriction::None;
            }
            ModerationAction::ClearWarning => {
                if self.warnings == 0 {
                    return Err(PiggiesError::invalid_state("user has no warnings"));
                }
                next.warnings -= 1;
            }
        }
        Ok(next)
    }

    /// Whether the user currently holds the restriction an appeal of this
    /// type would contest.
    pub fn has_appealable(&self, appeal_type: AppealType, now: DateTime<Utc>) -> bool {
        match appeal_type {
            AppealType::Ban => self.is_banned(),
            AppealType::Suspension => self.is_suspended(now),
            AppealType::Warning => self.warnings > 0,
        }
    }

    pub fn has_any_appealable(&self, now: DateTime<Utc>) -> bool {
        AppealType::ALL
            .iter()
            .any(|t| self.has_appealable(*t, now))
    }

    /// Restriction lifted by an accepted appeal. If the restriction is
    /// already gone the record is returned unchanged.
    pub fn lift_for_appeal(&self, appeal_type: AppealType) -> ModerationRecord {
        let mut next = self.clone();
        match appeal_type {
            AppealType::Ban => {
                if self.is_banned() {
                    next.restriction = Restriction::None;
                }
            }
            AppealType::Suspension => {
                if matches!(self.restriction, Restriction::Suspended { .. }) {
                    next.restriction = Restriction::None;
                }
            }
            AppealType::Warning => {
                next.warnings = next.warnings.saturating_sub(1);
            }
        }
        next
    }
}

pub fn validate_reason(reason: &str) -> Result<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(PiggiesError::validation("reason must not be empty"));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(PiggiesError::validation(format!(
            "reason must be at most {} characters",
            MAX_REASON_LEN
        )));
    }
    Ok(())
}

/// A new appeal may be filed only when none is outstanding.
pub fn can_submit_appeal<I>(existing: I) -> bool
where
    I: IntoIterator<Item = AppealStatus>,
{
    !existing.into_iter().any(AppealStatus::is_outstanding)
}

/// `pending -> under_review -> {accepted, rejected}`; a pending appeal may
/// also be decided directly.
pub fn transition_appeal(current: AppealStatus, requested: AppealStatus) -> Result<AppealStatus> {
    use AppealStatus::*;

    match (current, requested) {
        (Pending, UnderReview) => Ok(UnderReview),
        (Pending | UnderReview, Accepted | Rejected) => Ok(requested),
        (Accepted | Rejected, _) => Err(PiggiesError::invalid_state(format!(
            "appeal is already {}",
            current
        ))),
        _ => Err(PiggiesError::invalid_state(format!(
            "cannot move appeal from {} to {}",
            current, requested
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 9, 30, 0).unwrap()
    }

    fn warn() -> ModerationAction {
        ModerationAction::Warn {
            reason: "rude".into(),
        }
    }

    fn ban() -> ModerationAction {
        ModerationAction::Ban {
            reason: "spam".into(),
        }
    }

    #[test]
    fn test_two_warnings_do_not_ban() {
        let record = ModerationRecord::default()
            .apply(&warn(), now())
            .unwrap()
            .apply(&warn(), now())
            .unwrap();
        assert_eq!(record.warnings, 2);
        assert!(!record.is_banned());
        assert_eq!(record.standing(now()), Standing::Warned { count: 2 });
    }

    #[test]
    fn test_ban_replaces_suspension() {
        let suspended = ModerationRecord::default()
            .apply(
                &ModerationAction::Suspend {
                    until: now() + Duration::days(3),
                    reason: "cooldown".into(),
                },
                now(),
            )
            .unwrap();
        assert!(suspended.is_suspended(now()));

        let banned = suspended.apply(&ban(), now()).unwrap();
        assert!(banned.is_banned());
        assert!(!banned.is_suspended(now()));
    }

    #[test]
    fn test_cannot_suspend_banned_user() {
        let banned = ModerationRecord::default().apply(&ban(), now()).unwrap();
        let err = banned
            .apply(
                &ModerationAction::Suspend {
                    until: now() + Duration::days(1),
                    reason: "x".into(),
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, PiggiesError::InvalidState(_)));
    }

    #[test]
    fn test_suspension_in_past_rejected() {
        let err = ModerationRecord::default()
            .apply(
                &ModerationAction::Suspend {
                    until: now() - Duration::minutes(1),
                    reason: "late".into(),
                },
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, PiggiesError::Validation(_)));
    }

    #[test]
    fn test_expired_suspension_reads_as_active() {
        let record = ModerationRecord {
            warnings: 0,
            restriction: Restriction::Suspended {
                until: now() - Duration::hours(1),
                reason: "old".into(),
            },
        };
        assert!(!record.is_suspended(now()));
        assert!(!record.is_restricted(now()));
        assert_eq!(record.standing(now()), Standing::Active);
        // stored value is left alone
        assert!(matches!(record.restriction, Restriction::Suspended { .. }));
        assert!(!record.has_appealable(AppealType::Suspension, now()));
    }

    #[test]
    fn test_empty_reason_rejected() {
        let blank = ModerationAction::Warn {
            reason: "  ".into(),
        };
        let err = ModerationRecord::default().apply(&blank, now()).unwrap_err();
        assert!(matches!(err, PiggiesError::Validation(_)));
    }

    #[test]
    fn test_lift_actions_need_something_to_lift() {
        let clean = ModerationRecord::default();
        assert!(clean.apply(&ModerationAction::Unban, now()).is_err());
        assert!(clean.apply(&ModerationAction::Unsuspend, now()).is_err());
        assert!(clean.apply(&ModerationAction::ClearWarning, now()).is_err());

        let banned = clean.apply(&ban(), now()).unwrap();
        let unbanned = banned.apply(&ModerationAction::Unban, now()).unwrap();
        assert_eq!(unbanned.restriction, Restriction::None);
    }

    #[test]
    fn test_accepted_appeal_lifts_matching_restriction() {
        let banned = ModerationRecord {
            warnings: 1,
            restriction: Restriction::Banned {
                reason: "spam".into(),
            },
        };
        let lifted = banned.lift_for_appeal(AppealType::Ban);
        assert!(!lifted.is_banned());
        assert_eq!(lifted.warnings, 1);

        let warned = lifted.lift_for_appeal(AppealType::Warning);
        assert_eq!(warned.warnings, 0);
        assert_eq!(warned.lift_for_appeal(AppealType::Warning).warnings, 0);
    }

    #[test]
    fn test_can_submit_appeal() {
        use AppealStatus::*;
        assert!(can_submit_appeal(Vec::<AppealStatus>::new()));
        assert!(can_submit_appeal([Accepted, Rejected]));
        assert!(!can_submit_appeal([Rejected, Pending]));
        assert!(!can_submit_appeal([UnderReview]));
    }

    #[test]
    fn test_appeal_transition_table() {
        use AppealStatus::*;
        for from in AppealStatus::ALL {
            for to in AppealStatus::ALL {
                let allowed = matches!(
                    (from, to),
                    (Pending, UnderReview)
                        | (Pending, Accepted)
                        | (Pending, Rejected)
                        | (UnderReview, Accepted)
                        | (UnderReview, Rejected)
                );
                let result = transition_appeal(*from, *to);
                assert_eq!(result.is_ok(), allowed, "{} -> {}", from, to);
                if let Err(e) = result {
                    assert!(matches!(e, PiggiesError::InvalidState(_)));
                }
            }
        }
    }
}
