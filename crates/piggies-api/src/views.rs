//! Row-to-response conversions. Media keys become URLs here, and snap
//! content is withheld from recipients until opened and once consumed.

use chrono::{DateTime, Utc};
use piggies_core::collaborators::MediaStore;
use piggies_core::messaging::content_visible_to_recipient;
use piggies_db::models::{
    AlbumRow, AppealRow, ConversationRow, GrantRow, MessageRow, ModerationActionRow, UserRow,
    VenueRow,
};
use piggies_types::api::{
    AlbumResponse, AppealResponse, ConversationResponse, GrantResponse, MessageResponse,
    ModerationLogEntry, ModerationResult, PhotoView, PublicProfile, UserProfile, VenueResponse,
};
use uuid::Uuid;

pub fn photo(media: &dyn MediaStore, storage_key: &str) -> PhotoView {
    PhotoView {
        storage_key: storage_key.to_string(),
        url: media.url_for(storage_key),
    }
}

fn photos(media: &dyn MediaStore, keys: &[String]) -> Vec<PhotoView> {
    keys.iter().map(|key| photo(media, key)).collect()
}

pub fn user_profile(user: &UserRow, media: &dyn MediaStore, now: DateTime<Utc>) -> UserProfile {
    UserProfile {
        id: user.id,
        display_name: user.display_name.clone(),
        bio: user.bio.clone(),
        age: user.age,
        photos: photos(media, &user.photos),
        interests: user.interests.clone(),
        latitude: user.latitude,
        longitude: user.longitude,
        is_online: user.is_online,
        last_active_at: user.last_active_at,
        subscription_tier: user.subscription_tier,
        effective_tier: user.effective_tier(now),
        standing: user.moderation.standing(now),
        warning_count: user.moderation.warnings,
        referral_code: user.referral_code.clone(),
        is_admin: user.is_admin,
    }
}

pub fn public_profile(user: &UserRow, media: &dyn MediaStore) -> PublicProfile {
    PublicProfile {
        id: user.id,
        display_name: user.display_name.clone(),
        bio: user.bio.clone(),
        age: user.age,
        photos: photos(media, &user.photos),
        interests: user.interests.clone(),
        is_online: user.is_online,
        last_active_at: user.last_active_at,
    }
}

pub fn moderation_result(user: &UserRow, now: DateTime<Utc>) -> ModerationResult {
    ModerationResult {
        user_id: user.id,
        standing: user.moderation.standing(now),
        warning_count: user.moderation.warnings,
    }
}

pub fn conversation(row: &ConversationRow) -> ConversationResponse {
    ConversationResponse {
        id: row.id,
        participants: [row.participant_a, row.participant_b],
        last_message_id: row.last_message_id,
        last_message_at: row.last_message_at,
        created_at: row.created_at,
    }
}

/// A message as `viewer` sees it. Senders always see their own content;
/// recipients see a snap only between opening it and its consumption.
pub fn message(
    row: &MessageRow,
    media: &dyn MediaStore,
    viewer: Uuid,
    now: DateTime<Utc>,
) -> MessageResponse {
    let visible =
        viewer == row.sender_id || content_visible_to_recipient(row.snap, row.snap_viewed_at, now);
    render_message(row, media, visible)
}

/// The response to the open that revealed a snap. A view-once snap is
/// consumed by that open and this is the only response carrying its media.
pub fn opened_snap(row: &MessageRow, media: &dyn MediaStore) -> MessageResponse {
    render_message(row, media, true)
}

/// Media formats carry a storage key in `content`; it is exposed only as a
/// URL. Hidden content shows neither.
fn render_message(row: &MessageRow, media: &dyn MediaStore, visible: bool) -> MessageResponse {
    let (content, media_url) = if !visible {
        (None, None)
    } else if row.format.carries_media() {
        (None, Some(media.url_for(&row.content)))
    } else {
        (Some(row.content.clone()), None)
    };

    MessageResponse {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        format: row.format,
        content,
        media_url,
        snap: row.snap,
        snap_viewed_at: row.snap_viewed_at,
        read_by: row.read_by.clone(),
        created_at: row.created_at,
    }
}

pub fn album(row: &AlbumRow) -> AlbumResponse {
    AlbumResponse {
        id: row.id,
        owner_id: row.owner_id,
        title: row.title.clone(),
        is_default: row.is_default,
        photo_count: row.photo_count,
        created_at: row.created_at,
    }
}

pub fn grant(row: &GrantRow, now: DateTime<Utc>) -> GrantResponse {
    GrantResponse {
        id: row.id,
        album_id: row.album_id,
        grantee_id: row.grantee_id,
        conversation_id: row.conversation_id,
        expires_at: row.expires_at,
        is_revoked: row.is_revoked,
        effective: row.window().is_effective(now),
        created_at: row.created_at,
    }
}

pub fn appeal(row: AppealRow) -> AppealResponse {
    AppealResponse {
        id: row.id,
        user_id: row.user_id,
        appeal_type: row.appeal_type,
        reason: row.reason,
        additional_info: row.additional_info,
        status: row.status,
        admin_response: row.admin_response,
        reviewed_by: row.reviewed_by,
        created_at: row.created_at,
        reviewed_at: row.reviewed_at,
    }
}

pub fn log_entry(row: ModerationActionRow) -> ModerationLogEntry {
    ModerationLogEntry {
        id: row.id,
        actor_id: row.actor_id,
        target_id: row.target_id,
        kind: row.kind,
        reason: row.reason,
        until: row.until,
        created_at: row.created_at,
    }
}

pub fn venue(row: VenueRow) -> VenueResponse {
    VenueResponse {
        id: row.id,
        name: row.name,
        category: row.category,
        address: row.address,
        latitude: row.latitude,
        longitude: row.longitude,
        features: row.features,
        status: row.status,
        submitted_by: row.submitted_by,
        report_count: row.report_count,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use piggies_types::models::{MessageFormat, SnapMode};
    use std::collections::HashMap;

    struct FakeMedia;

    impl MediaStore for FakeMedia {
        fn url_for(&self, storage_key: &str) -> String {
            format!("https://cdn.test/{}", storage_key)
        }

        fn delete(&self, _storage_key: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    const SENDER: Uuid = Uuid::from_u128(1);
    const RECIPIENT: Uuid = Uuid::from_u128(2);

    fn row(
        format: MessageFormat,
        snap: Option<SnapMode>,
        viewed: Option<DateTime<Utc>>,
    ) -> MessageRow {
        MessageRow {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: SENDER,
            format,
            content: "abc".into(),
            snap,
            snap_viewed_at: viewed,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            read_by: HashMap::new(),
        }
    }

    #[test]
    fn test_message_media_and_redaction() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let earlier = Some(now - Duration::seconds(1));

        let text = message(&row(MessageFormat::Text, None, None), &FakeMedia, RECIPIENT, now);
        assert_eq!(text.content.as_deref(), Some("abc"));
        assert!(text.media_url.is_none());

        let image = message(&row(MessageFormat::Image, None, None), &FakeMedia, RECIPIENT, now);
        assert!(image.content.is_none());
        assert_eq!(image.media_url.as_deref(), Some("https://cdn.test/abc"));

        // Unopened snaps are hidden from the recipient but not the sender
        let unopened = row(MessageFormat::Image, Some(SnapMode::ViewOnce), None);
        assert!(message(&unopened, &FakeMedia, RECIPIENT, now).media_url.is_none());
        assert!(message(&unopened, &FakeMedia, SENDER, now).media_url.is_some());

        // The open reveals a view-once snap exactly once
        let opened = row(MessageFormat::Image, Some(SnapMode::ViewOnce), earlier);
        assert!(opened_snap(&opened, &FakeMedia).media_url.is_some());
        let listed = message(&opened, &FakeMedia, RECIPIENT, now);
        assert!(listed.media_url.is_none());
        assert!(listed.content.is_none());

        let timed = row(MessageFormat::Video, Some(SnapMode::Timed { seconds: 10 }), earlier);
        assert!(message(&timed, &FakeMedia, RECIPIENT, now).media_url.is_some());
        let expired = now + Duration::seconds(10);
        assert!(message(&timed, &FakeMedia, RECIPIENT, expired).media_url.is_none());
    }
}
