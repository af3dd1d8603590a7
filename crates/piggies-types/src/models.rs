use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a unit-only enum whose serde form, `as_str` form and `FromStr`
/// form all agree. Those strings are what the database stores.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum! {
    /// Paid plan of a user. Referral rewards can lift a free user to Ultra
    /// temporarily; see the effective-tier rule in `piggies-core`.
    pub enum SubscriptionTier ("subscription tier") {
        Free => "free",
        Ultra => "ultra",
    }
}

string_enum! {
    pub enum AppealType ("appeal type") {
        Ban => "ban",
        Suspension => "suspension",
        Warning => "warning",
    }
}

string_enum! {
    pub enum AppealStatus ("appeal status") {
        Pending => "pending",
        UnderReview => "under_review",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

impl AppealStatus {
    /// Pending and under-review appeals block a new submission.
    pub fn is_outstanding(self) -> bool {
        matches!(self, AppealStatus::Pending | AppealStatus::UnderReview)
    }
}

string_enum! {
    pub enum ReferralStatus ("referral status") {
        Pending => "pending",
        Activated => "activated",
        Expired => "expired",
    }
}

string_enum! {
    pub enum VenueStatus ("venue status") {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Flagged => "flagged",
    }
}

string_enum! {
    pub enum VenueCategory ("venue category") {
        Bar => "bar",
        Club => "club",
        Sauna => "sauna",
        Cafe => "cafe",
        Restaurant => "restaurant",
        Park => "park",
        Gym => "gym",
        Other => "other",
    }
}

string_enum! {
    pub enum MessageFormat ("message format") {
        Text => "text",
        Image => "image",
        Video => "video",
        Gif => "gif",
        Location => "location",
        /// System-style message announcing an album share.
        AlbumShare => "album_share",
    }
}

impl MessageFormat {
    /// Formats whose content is an object-storage key.
    pub fn carries_media(self) -> bool {
        matches!(self, MessageFormat::Image | MessageFormat::Video | MessageFormat::Gif)
    }
}

string_enum! {
    /// How long an album share stays effective.
    pub enum ShareDuration ("share duration") {
        Hours24 => "24h",
        Days7 => "7d",
        Indefinite => "indefinite",
    }
}

impl Default for ShareDuration {
    fn default() -> Self {
        ShareDuration::Indefinite
    }
}

string_enum! {
    pub enum ModerationKind ("moderation action") {
        Warn => "warn",
        Suspend => "suspend",
        Ban => "ban",
        Unban => "unban",
        Unsuspend => "unsuspend",
        ClearWarning => "clear_warning",
        AppealAccepted => "appeal_accepted",
    }
}

/// Ephemeral media behaviour of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SnapMode {
    /// Content disappears after the recipient's first view.
    ViewOnce,
    /// Content stays visible for `seconds` after the first view.
    Timed { seconds: u32 },
}

/// A user's moderation standing at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Standing {
    Active,
    Warned { count: u32 },
    Suspended { until: DateTime<Utc>, reason: String },
    Banned { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_forms_agree() {
        for status in AppealStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<AppealStatus>().unwrap(), *status);
        }
        assert_eq!("24h".parse::<ShareDuration>().unwrap(), ShareDuration::Hours24);
    }

    #[test]
    fn test_unknown_variant() {
        let err = "sleeping".parse::<VenueStatus>().unwrap_err();
        assert_eq!(err.kind, "venue status");
        assert_eq!(err.value, "sleeping");
    }

    #[test]
    fn test_outstanding_statuses() {
        assert!(AppealStatus::Pending.is_outstanding());
        assert!(AppealStatus::UnderReview.is_outstanding());
        assert!(!AppealStatus::Accepted.is_outstanding());
        assert!(!AppealStatus::Rejected.is_outstanding());
    }

    #[test]
    fn test_snap_mode_wire_form() {
        let timed: SnapMode = serde_json::from_str(r#"{"mode":"timed","seconds":10}"#).unwrap();
        assert_eq!(timed, SnapMode::Timed { seconds: 10 });
        let once: SnapMode = serde_json::from_str(r#"{"mode":"view_once"}"#).unwrap();
        assert_eq!(once, SnapMode::ViewOnce);
    }
}
