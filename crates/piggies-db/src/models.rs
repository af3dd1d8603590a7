//! Database row types, decoded from SQLite rows into typed values.
//! Distinct from piggies-types API models to keep the DB layer independent.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use piggies_core::discovery::GeoPoint;
use piggies_core::grants::GrantWindow;
use piggies_core::moderation::{ModerationRecord, Restriction};
use piggies_core::profile::effective_tier;
use piggies_types::models::{
    AppealStatus, AppealType, MessageFormat, ModerationKind, ParseEnumError, ReferralStatus,
    SnapMode, SubscriptionTier, VenueCategory, VenueStatus,
};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub age: Option<u8>,
    /// Ordered storage keys.
    pub photos: Vec<String>,
    pub interests: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_online: bool,
    pub last_active_at: DateTime<Utc>,
    pub subscription_tier: SubscriptionTier,
    pub is_admin: bool,
    pub moderation: ModerationRecord,
    pub referral_code: Option<String>,
    pub referred_by: Option<Uuid>,
    pub referral_credits: u32,
    pub referral_ultra_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn effective_tier(&self, now: DateTime<Utc>) -> SubscriptionTier {
        effective_tier(self.subscription_tier, self.referral_ultra_expires_at, now)
    }

    pub fn location(&self) -> Option<GeoPoint> {
        self.latitude
            .zip(self.longitude)
            .map(|(latitude, longitude)| GeoPoint { latitude, longitude })
    }
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    pub fn other(&self, user_id: Uuid) -> Uuid {
        if self.participant_a == user_id {
            self.participant_b
        } else {
            self.participant_a
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub format: MessageFormat,
    pub content: String,
    pub snap: Option<SnapMode>,
    pub snap_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Per-recipient read receipts.
    pub read_by: HashMap<Uuid, DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AlbumRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub is_default: bool,
    pub photo_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GrantRow {
    pub id: Uuid,
    pub album_id: Uuid,
    pub owner_id: Uuid,
    pub grantee_id: Uuid,
    pub conversation_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GrantRow {
    pub fn window(&self) -> GrantWindow {
        GrantWindow {
            is_revoked: self.is_revoked,
            expires_at: self.expires_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModerationActionRow {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub target_id: Uuid,
    pub kind: ModerationKind,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppealRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub appeal_type: AppealType,
    pub reason: String,
    pub additional_info: Option<String>,
    pub status: AppealStatus,
    pub admin_response: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ReferralRow {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub code: String,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct VenueRow {
    pub id: Uuid,
    pub name: String,
    pub category: VenueCategory,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub features: Vec<String>,
    pub status: VenueStatus,
    pub submitted_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub report_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlockRow {
    pub blocked_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// -- Column decoding --

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| raw.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn millis_to_time(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    millis_to_time(idx, row.get(idx)?)
}

pub(crate) fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|millis| millis_to_time(idx, millis))
        .transpose()
}

pub(crate) fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn json_list_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn json_list(values: &[String]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(values)?)
}

// -- Row mappers --

pub(crate) const USER_COLUMNS: &str = "id, external_id, display_name, bio, age, photos, interests, \
     latitude, longitude, is_online, last_active_at, subscription_tier, is_admin, warning_count, \
     restriction, restriction_reason, restriction_until, referral_code, referred_by, \
     referral_credits, referral_ultra_expires_at, created_at";

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    let restriction = match row.get::<_, String>(14)?.as_str() {
        "none" => Restriction::None,
        "banned" => Restriction::Banned {
            reason: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
        },
        "suspended" => Restriction::Suspended {
            until: time_at(row, 16)?,
            reason: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
        },
        other => {
            return Err(conversion_error(
                14,
                ParseEnumError {
                    kind: "restriction",
                    value: other.to_string(),
                },
            ));
        }
    };

    Ok(UserRow {
        id: uuid_at(row, 0)?,
        external_id: row.get(1)?,
        display_name: row.get(2)?,
        bio: row.get(3)?,
        age: row.get(4)?,
        photos: json_list_at(row, 5)?,
        interests: json_list_at(row, 6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        is_online: row.get(9)?,
        last_active_at: time_at(row, 10)?,
        subscription_tier: enum_at(row, 11)?,
        is_admin: row.get(12)?,
        moderation: ModerationRecord {
            warnings: row.get(13)?,
            restriction,
        },
        referral_code: row.get(17)?,
        referred_by: opt_uuid_at(row, 18)?,
        referral_credits: row.get(19)?,
        referral_ultra_expires_at: opt_time_at(row, 20)?,
        created_at: time_at(row, 21)?,
    })
}

pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, last_message_at, created_at";

pub(crate) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: uuid_at(row, 0)?,
        participant_a: uuid_at(row, 1)?,
        participant_b: uuid_at(row, 2)?,
        last_message_id: opt_uuid_at(row, 3)?,
        last_message_at: opt_time_at(row, 4)?,
        created_at: time_at(row, 5)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, format, content, \
     snap_mode, snap_seconds, snap_viewed_at, created_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let snap = match row.get::<_, Option<String>>(5)?.as_deref() {
        None => None,
        Some("view_once") => Some(SnapMode::ViewOnce),
        Some("timed") => Some(SnapMode::Timed {
            seconds: row.get::<_, Option<u32>>(6)?.unwrap_or_default(),
        }),
        Some(other) => {
            return Err(conversion_error(
                5,
                ParseEnumError {
                    kind: "snap mode",
                    value: other.to_string(),
                },
            ));
        }
    };

    Ok(MessageRow {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        format: enum_at(row, 3)?,
        content: row.get(4)?,
        snap,
        snap_viewed_at: opt_time_at(row, 7)?,
        created_at: time_at(row, 8)?,
        read_by: HashMap::new(),
    })
}

pub(crate) const ALBUM_COLUMNS: &str = "a.id, a.owner_id, a.title, a.is_default, a.created_at, \
     (SELECT COUNT(*) FROM album_photos p WHERE p.album_id = a.id)";

pub(crate) fn album_from_row(row: &Row<'_>) -> rusqlite::Result<AlbumRow> {
    Ok(AlbumRow {
        id: uuid_at(row, 0)?,
        owner_id: uuid_at(row, 1)?,
        title: row.get(2)?,
        is_default: row.get(3)?,
        created_at: time_at(row, 4)?,
        photo_count: row.get(5)?,
    })
}

pub(crate) const GRANT_COLUMNS: &str = "id, album_id, owner_id, grantee_id, conversation_id, \
     expires_at, is_revoked, created_at, updated_at";

pub(crate) fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<GrantRow> {
    Ok(GrantRow {
        id: uuid_at(row, 0)?,
        album_id: uuid_at(row, 1)?,
        owner_id: uuid_at(row, 2)?,
        grantee_id: uuid_at(row, 3)?,
        conversation_id: uuid_at(row, 4)?,
        expires_at: opt_time_at(row, 5)?,
        is_revoked: row.get(6)?,
        created_at: time_at(row, 7)?,
        updated_at: time_at(row, 8)?,
    })
}

pub(crate) const MODERATION_ACTION_COLUMNS: &str =
    "id, actor_id, target_id, kind, reason, until, created_at";

pub(crate) fn moderation_action_from_row(row: &Row<'_>) -> rusqlite::Result<ModerationActionRow> {
    Ok(ModerationActionRow {
        id: uuid_at(row, 0)?,
        actor_id: opt_uuid_at(row, 1)?,
        target_id: uuid_at(row, 2)?,
        kind: enum_at(row, 3)?,
        reason: row.get(4)?,
        until: opt_time_at(row, 5)?,
        created_at: time_at(row, 6)?,
    })
}

pub(crate) const APPEAL_COLUMNS: &str = "id, user_id, appeal_type, reason, additional_info, \
     status, admin_response, reviewed_by, created_at, reviewed_at";

pub(crate) fn appeal_from_row(row: &Row<'_>) -> rusqlite::Result<AppealRow> {
    Ok(AppealRow {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        appeal_type: enum_at(row, 2)?,
        reason: row.get(3)?,
        additional_info: row.get(4)?,
        status: enum_at(row, 5)?,
        admin_response: row.get(6)?,
        reviewed_by: opt_uuid_at(row, 7)?,
        created_at: time_at(row, 8)?,
        reviewed_at: opt_time_at(row, 9)?,
    })
}

pub(crate) const REFERRAL_COLUMNS: &str =
    "id, referrer_id, referred_id, code, status, created_at, resolved_at";

pub(crate) fn referral_from_row(row: &Row<'_>) -> rusqlite::Result<ReferralRow> {
    Ok(ReferralRow {
        id: uuid_at(row, 0)?,
        referrer_id: uuid_at(row, 1)?,
        referred_id: uuid_at(row, 2)?,
        code: row.get(3)?,
        status: enum_at(row, 4)?,
        created_at: time_at(row, 5)?,
        resolved_at: opt_time_at(row, 6)?,
    })
}

pub(crate) const VENUE_COLUMNS: &str = "v.id, v.name, v.category, v.address, v.latitude, \
     v.longitude, v.features, v.status, v.submitted_by, v.reviewed_by, v.reviewed_at, \
     v.created_at, (SELECT COUNT(*) FROM venue_reports r WHERE r.venue_id = v.id)";

pub(crate) fn venue_from_row(row: &Row<'_>) -> rusqlite::Result<VenueRow> {
    Ok(VenueRow {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        category: enum_at(row, 2)?,
        address: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        features: json_list_at(row, 6)?,
        status: enum_at(row, 7)?,
        submitted_by: uuid_at(row, 8)?,
        reviewed_by: opt_uuid_at(row, 9)?,
        reviewed_at: opt_time_at(row, 10)?,
        created_at: time_at(row, 11)?,
        report_count: row.get(12)?,
    })
}
