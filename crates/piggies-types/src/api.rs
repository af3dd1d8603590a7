use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AppealStatus, AppealType, MessageFormat, ModerationKind, ShareDuration, SnapMode, Standing,
    SubscriptionTier, VenueCategory, VenueStatus,
};

// -- Identity --

/// Claims issued by the identity provider. `sub` is the provider's user id,
/// not ours; the local user is looked up (or created) from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRequest {
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub created: bool,
    pub user: UserProfile,
}

// -- Users --

/// The caller's own profile, including private fields.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub age: Option<u8>,
    pub photos: Vec<PhotoView>,
    pub interests: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_online: bool,
    pub last_active_at: DateTime<Utc>,
    pub subscription_tier: SubscriptionTier,
    pub effective_tier: SubscriptionTier,
    pub standing: Standing,
    pub warning_count: u32,
    pub referral_code: Option<String>,
    pub is_admin: bool,
}

/// What other users see.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub display_name: String,
    pub bio: Option<String>,
    pub age: Option<u8>,
    pub photos: Vec<PhotoView>,
    pub interests: Vec<String>,
    pub is_online: bool,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoView {
    pub storage_key: String,
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub age: Option<u8>,
    pub photos: Option<Vec<String>>,
    pub interests: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceRequest {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct BlockedUser {
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// -- Discovery --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NearbyRequest {
    #[serde(default)]
    pub online_only: bool,
    #[serde(default)]
    pub has_photos: bool,
    pub min_age: Option<u8>,
    pub max_age: Option<u8>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

fn default_page_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct NearbyUser {
    #[serde(flatten)]
    pub profile: PublicProfile,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub users: Vec<NearbyUser>,
    /// Candidates left after the tier cap, before paging.
    pub total_available: usize,
    pub cap: usize,
}

// -- Conversations & messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other_user: PublicProfile,
    pub last_message_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub format: MessageFormat,
    pub content: String,
    #[serde(default)]
    pub snap: Option<SnapMode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub format: MessageFormat,
    /// `None` while a snap is hidden from the viewer.
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub snap: Option<SnapMode>,
    pub snap_viewed_at: Option<DateTime<Utc>>,
    pub read_by: HashMap<Uuid, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_message_limit")]
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message already loaded.
    pub before: Option<DateTime<Utc>>,
}

fn default_message_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

// -- Albums --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAlbumRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct AlbumResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub is_default: bool,
    pub photo_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlbumDetail {
    #[serde(flatten)]
    pub album: AlbumResponse,
    pub photos: Vec<PhotoView>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddPhotoRequest {
    pub storage_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShareAlbumRequest {
    pub grantee_id: Uuid,
    pub conversation_id: Uuid,
    #[serde(default)]
    pub album_id: Option<Uuid>,
    #[serde(default)]
    pub expires_in: ShareDuration,
}

#[derive(Debug, Serialize)]
pub struct ShareAlbumResponse {
    pub grant_id: Uuid,
    pub album_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevokeAlbumRequest {
    pub grantee_id: Uuid,
    #[serde(default)]
    pub album_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RevokeAlbumResponse {
    pub success: bool,
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub id: Uuid,
    pub album_id: Uuid,
    pub grantee_id: Uuid,
    pub conversation_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
    pub effective: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SharedAlbum {
    #[serde(flatten)]
    pub album: AlbumResponse,
    pub expires_at: Option<DateTime<Utc>>,
}

// -- Appeals --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitAppealRequest {
    pub appeal_type: AppealType,
    pub reason: String,
    #[serde(default)]
    pub additional_info: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppealResponse {
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

#[derive(Debug, Serialize)]
pub struct AppealEligibility {
    pub can_submit: bool,
    pub has_restriction: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAppealRequest {
    pub status: AppealStatus,
    #[serde(default)]
    pub admin_response: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppealQuery {
    pub status: Option<AppealStatus>,
}

// -- Referrals --

#[derive(Debug, Serialize)]
pub struct ReferralCodeResponse {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ReferralStats {
    pub code: Option<String>,
    pub credits: u32,
    pub pending: u32,
    pub activated: u32,
    pub expired: u32,
    /// Activations counted toward the next reward (0..3).
    pub progress_to_next: u32,
    pub ultra_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize)]
pub struct SweepResponse {
    pub activated: u32,
    pub expired: u32,
    pub rewarded: u32,
}

// -- Moderation (admin) --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuspendRequest {
    pub reason: String,
    pub until: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetTierRequest {
    pub tier: SubscriptionTier,
}

#[derive(Debug, Serialize)]
pub struct ModerationResult {
    pub user_id: Uuid,
    pub standing: Standing,
    pub warning_count: u32,
}

#[derive(Debug, Serialize)]
pub struct ModerationLogEntry {
    pub id: Uuid,
    /// `None` for automated actions.
    pub actor_id: Option<Uuid>,
    pub target_id: Uuid,
    pub kind: ModerationKind,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub user_id: Option<Uuid>,
    #[serde(default = "default_log_limit")]
    pub limit: u32,
}

fn default_log_limit() -> u32 {
    100
}

// -- Venues --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitVenueRequest {
    pub name: String,
    pub category: VenueCategory,
    pub address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VenueResponse {
    pub id: Uuid,
    pub name: String,
    pub category: VenueCategory,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub features: Vec<String>,
    pub status: VenueStatus,
    pub submitted_by: Uuid,
    pub report_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportVenueRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VenueQuery {
    pub category: Option<VenueCategory>,
    pub status: Option<VenueStatus>,
}

// -- Media --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub storage_key: String,
    pub url: String,
    pub size: u64,
}
