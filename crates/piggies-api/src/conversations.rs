use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use piggies_core::PiggiesError;
use piggies_core::collaborators::Verdict;
use piggies_core::moderation::ModerationAction;
use piggies_types::api::{
    ConversationSummary, CreateConversationRequest, MarkReadResponse, MessageQuery,
    SendMessageRequest,
};
use piggies_types::events::GatewayEvent;
use piggies_types::models::{MessageFormat, ModerationKind};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::media;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};
use crate::views;

/// GET /conversations
pub async fn list(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| {
        let mut rows = Vec::new();
        for (conversation, unread) in db.list_conversations(me.id)? {
            let other = db
                .get_user(conversation.other(me.id))?
                .ok_or(PiggiesError::NotFound("user"))?;
            rows.push((conversation, other, unread));
        }
        Ok(rows)
    })
    .await?;

    let summaries: Vec<ConversationSummary> = rows
        .iter()
        .map(|(conversation, other, unread)| ConversationSummary {
            id: conversation.id,
            other_user: views::public_profile(other, &state.media),
            last_message_id: conversation.last_message_id,
            last_message_at: conversation.last_message_at,
            unread_count: *unread,
        })
        .collect();
    Ok(Json(summaries))
}

/// POST /conversations
pub async fn create(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation = with_db(&state, move |db| {
        db.get_or_create_conversation(me.id, req.user_id, Utc::now())
    })
    .await?;
    Ok(Json(views::conversation(&conversation)))
}

/// GET /conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| {
        db.list_messages(me.id, conversation_id, query.before, query.limit)
    })
    .await?;

    let now = Utc::now();
    let messages: Vec<_> = rows
        .iter()
        .map(|row| views::message(row, &state.media, me.id, now))
        .collect();
    Ok(Json(messages))
}

/// POST /conversations/{id}/messages
///
/// Text is run through the content checker after it is stored. A flagged
/// message is still delivered and the sender gets an automated warning.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let verdict = match req.format {
        MessageFormat::Text => state.checker.check(&req.content),
        _ => Verdict::Clean,
    };

    let (message, conversation) = with_db(&state, move |db| {
        let message =
            db.send_message(me.id, conversation_id, req.format, &req.content, req.snap, now)?;
        let conversation = db.get_conversation(me.id, conversation_id)?;
        Ok((message, conversation))
    })
    .await?;

    state
        .dispatcher
        .notify(
            conversation.other(me.id),
            GatewayEvent::MessageCreate {
                id: message.id,
                conversation_id,
                sender_id: me.id,
                format: message.format,
                timestamp: message.created_at,
            },
        )
        .await;

    if let Verdict::Flagged(reason) = verdict {
        auto_warn(&state, me.id, reason).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(views::message(&message, &state.media, me.id, now)),
    ))
}

/// Automated warning for flagged content. Failures are logged; the
/// message has already been delivered.
async fn auto_warn(state: &AppState, user_id: Uuid, reason: String) {
    let now = Utc::now();
    let action = ModerationAction::Warn {
        reason: reason.clone(),
    };
    match with_db(state, move |db| db.moderate(None, user_id, &action, now)).await {
        Ok(user) => {
            info!("Content checker warned {}: {}", user_id, reason);
            state
                .dispatcher
                .notify(
                    user_id,
                    GatewayEvent::ModerationNotice {
                        kind: ModerationKind::Warn,
                        reason: Some(reason),
                        standing: user.moderation.standing(now),
                    },
                )
                .await;
        }
        Err(e) => warn!("Automated warning for {} failed: {:?}", user_id, e),
    }
}

/// POST /conversations/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let (marked, conversation) = with_db(&state, move |db| {
        let marked = db.mark_read(me.id, conversation_id, now)?;
        Ok((marked, db.get_conversation(me.id, conversation_id)?))
    })
    .await?;

    if marked > 0 {
        state
            .dispatcher
            .notify(
                conversation.other(me.id),
                GatewayEvent::MessagesRead {
                    conversation_id,
                    reader_id: me.id,
                    read_at: now,
                },
            )
            .await;
    }
    Ok(Json(MarkReadResponse { marked }))
}

/// POST /messages/{id}/view
///
/// Opens a snap for its recipient. The response carries the media even
/// for a view-once snap, which this call consumes.
pub async fn view_snap(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let message = with_db(&state, move |db| db.view_snap(me.id, message_id, now)).await?;
    Ok(Json(views::opened_snap(&message, &state.media)))
}

/// DELETE /messages/{id}
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(me): Extension<CurrentUser>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (message, conversation) = with_db(&state, move |db| {
        let message = db.delete_message(me.id, message_id)?;
        let conversation = db.get_conversation(me.id, message.conversation_id)?;
        Ok((message, conversation))
    })
    .await?;

    if message.format.carries_media() {
        media::release_unused(&state, vec![message.content.clone()]).await;
    }

    state
        .dispatcher
        .notify(
            conversation.other(me.id),
            GatewayEvent::MessageDeleted {
                id: message.id,
                conversation_id: message.conversation_id,
            },
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
}
