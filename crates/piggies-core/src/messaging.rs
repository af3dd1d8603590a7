use chrono::{DateTime, Duration, Utc};
use piggies_types::models::{MessageFormat, SnapMode};
use uuid::Uuid;

use crate::error::{PiggiesError, Result};

pub const MAX_TEXT_LEN: usize = 4000;
pub const MAX_SNAP_SECONDS: u32 = 60;
/// Grace after opening a view-once snap during which the recipient can
/// still download the media the open revealed.
pub const VIEW_ONCE_FETCH_SECONDS: i64 = 30;

/// Conversations are keyed by their participants in sorted order, so a
/// pair maps to one row whichever side starts it.
pub fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

pub fn validate_message(
    format: MessageFormat,
    content: &str,
    snap: Option<SnapMode>,
) -> Result<()> {
    if content.trim().is_empty() {
        return Err(PiggiesError::validation("message content must not be empty"));
    }
    if format == MessageFormat::Text && content.chars().count() > MAX_TEXT_LEN {
        return Err(PiggiesError::validation(format!(
            "text messages are limited to {} characters",
            MAX_TEXT_LEN
        )));
    }
    if format == MessageFormat::AlbumShare {
        return Err(PiggiesError::validation("album shares are sent by sharing an album"));
    }
    if let Some(mode) = snap {
        if !matches!(format, MessageFormat::Image | MessageFormat::Video) {
            return Err(PiggiesError::validation("only images and videos can be snaps"));
        }
        if let SnapMode::Timed { seconds } = mode {
            if seconds == 0 || seconds > MAX_SNAP_SECONDS {
                return Err(PiggiesError::validation(format!(
                    "snap timer must be 1-{} seconds",
                    MAX_SNAP_SECONDS
                )));
            }
        }
    }
    Ok(())
}

/// Whether a snap's content is gone. Non-snaps are never consumed.
pub fn snap_consumed(
    snap: Option<SnapMode>,
    viewed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match (snap, viewed_at) {
        (Some(SnapMode::ViewOnce), Some(_)) => true,
        (Some(SnapMode::Timed { seconds }), Some(viewed)) => {
            now >= viewed + Duration::seconds(i64::from(seconds))
        }
        _ => false,
    }
}

/// Whether the recipient may see a message's content in a listing.
/// Snaps stay hidden until opened and again once consumed, so a
/// view-once snap only ever shows in the response to the open itself.
pub fn content_visible_to_recipient(
    snap: Option<SnapMode>,
    viewed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    snap.is_none() || (viewed_at.is_some() && !snap_consumed(snap, viewed_at, now))
}

/// Whether the recipient may download a snap's media blob at `now`.
pub fn snap_media_fetchable(
    snap: Option<SnapMode>,
    viewed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(mode) = snap else {
        return true;
    };
    let Some(viewed) = viewed_at else {
        return false;
    };
    let window = match mode {
        SnapMode::ViewOnce => VIEW_ONCE_FETCH_SECONDS,
        SnapMode::Timed { seconds } => i64::from(seconds),
    };
    now < viewed + Duration::seconds(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ordered_pair_is_symmetric() {
        let a = Uuid::from_u128(7);
        let b = Uuid::from_u128(3);
        assert_eq!(ordered_pair(a, b), (b, a));
        assert_eq!(ordered_pair(b, a), (b, a));
    }

    #[test]
    fn test_validate_message() {
        assert!(validate_message(MessageFormat::Text, "hi", None).is_ok());
        assert!(validate_message(MessageFormat::Text, "   ", None).is_err());
        assert!(validate_message(MessageFormat::Text, &"a".repeat(4001), None).is_err());
        assert!(validate_message(MessageFormat::Text, "hi", Some(SnapMode::ViewOnce)).is_err());
        assert!(validate_message(MessageFormat::Image, "key", Some(SnapMode::ViewOnce)).is_ok());
        let timed = |seconds| Some(SnapMode::Timed { seconds });
        assert!(validate_message(MessageFormat::Video, "key", timed(0)).is_err());
        assert!(validate_message(MessageFormat::Video, "key", timed(10)).is_ok());
        assert!(validate_message(MessageFormat::AlbumShare, "x", None).is_err());
    }

    #[test]
    fn test_snap_consumption() {
        let viewed = Utc.with_ymd_and_hms(2026, 4, 1, 20, 0, 0).unwrap();
        let later = viewed + Duration::seconds(5);

        assert!(!snap_consumed(None, Some(viewed), later));
        assert!(!snap_consumed(Some(SnapMode::ViewOnce), None, later));
        assert!(snap_consumed(Some(SnapMode::ViewOnce), Some(viewed), viewed));

        let timed = Some(SnapMode::Timed { seconds: 10 });
        assert!(!snap_consumed(timed, Some(viewed), later));
        assert!(snap_consumed(timed, Some(viewed), viewed + Duration::seconds(10)));
    }

    #[test]
    fn test_snap_visibility() {
        let viewed = Utc.with_ymd_and_hms(2026, 4, 1, 20, 0, 0).unwrap();
        let once = Some(SnapMode::ViewOnce);
        let timed = Some(SnapMode::Timed { seconds: 10 });

        assert!(content_visible_to_recipient(None, None, viewed));
        assert!(!content_visible_to_recipient(once, None, viewed));
        assert!(!content_visible_to_recipient(once, Some(viewed), viewed));
        assert!(!content_visible_to_recipient(timed, None, viewed));
        assert!(content_visible_to_recipient(timed, Some(viewed), viewed + Duration::seconds(9)));
        assert!(!content_visible_to_recipient(timed, Some(viewed), viewed + Duration::seconds(10)));

        assert!(snap_media_fetchable(None, None, viewed));
        assert!(!snap_media_fetchable(once, None, viewed));
        assert!(snap_media_fetchable(once, Some(viewed), viewed + Duration::seconds(29)));
        assert!(!snap_media_fetchable(once, Some(viewed), viewed + Duration::seconds(30)));
        assert!(snap_media_fetchable(timed, Some(viewed), viewed + Duration::seconds(9)));
        assert!(!snap_media_fetchable(timed, Some(viewed), viewed + Duration::seconds(10)));
    }
}
