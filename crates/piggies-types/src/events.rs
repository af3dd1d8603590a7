use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AppealStatus, MessageFormat, ModerationKind, Standing};

/// Events pushed to a user over the realtime gateway. Delivery is best
/// effort: nothing that produces an event waits for it to arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: Uuid },

    /// A message arrived in one of the user's conversations
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        format: MessageFormat,
        timestamp: DateTime<Utc>,
    },

    /// The sender deleted a message
    MessageDeleted { id: Uuid, conversation_id: Uuid },

    /// The other participant read the conversation
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },

    /// Someone granted the user access to an album
    AlbumShared {
        album_id: Uuid,
        owner_id: Uuid,
        conversation_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    },

    /// An album owner revoked the user's access
    AlbumRevoked { owner_id: Uuid, album_ids: Vec<Uuid> },

    /// A moderation action was taken on the user's account
    ModerationNotice {
        kind: ModerationKind,
        reason: Option<String>,
        standing: Standing,
    },

    /// An admin changed the status of one of the user's appeals
    AppealUpdated {
        appeal_id: Uuid,
        status: AppealStatus,
        admin_response: Option<String>,
    },

    /// Referral activations earned the user bonus Ultra time
    ReferralRewarded { ultra_expires_at: DateTime<Utc> },
}
