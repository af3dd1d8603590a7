use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use piggies_core::PiggiesError;
use piggies_core::messaging::{ordered_pair, snap_consumed, validate_message};
use piggies_types::models::{MessageFormat, SnapMode};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::models::{
    CONVERSATION_COLUMNS, ConversationRow, MESSAGE_COLUMNS, MessageRow, conversation_from_row,
    message_from_row, time_at, to_millis, uuid_at,
};
use crate::queries::users::{blocked_either, require_user};

type DomainResult<T> = std::result::Result<T, PiggiesError>;

pub const MAX_MESSAGE_PAGE: u32 = 200;

impl Database {
    /// One conversation per pair of users, whichever side opens it.
    pub fn get_or_create_conversation(
        &self,
        initiator: Uuid,
        other: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<ConversationRow> {
        if initiator == other {
            return Err(PiggiesError::validation("you cannot message yourself"));
        }

        self.with_tx(|tx| {
            let user = require_user(tx, initiator)?;
            let peer = require_user(tx, other)?;
            if user.moderation.is_restricted(now) {
                return Err(PiggiesError::invalid_state("your account is restricted"));
            }
            if peer.moderation.is_banned() || blocked_either(tx, initiator, other)? {
                return Err(PiggiesError::NotFound("user"));
            }

            let (a, b) = ordered_pair(initiator, other);
            if let Some(existing) = conversation_between(tx, a, b)? {
                return Ok(existing);
            }

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO conversations (id, participant_a, participant_b, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), a.to_string(), b.to_string(), to_millis(now)],
            )
            .map_err(anyhow::Error::from)?;
            info!("Conversation {} opened between {} and {}", id, initiator, other);
            require_conversation(tx, id)
        })
    }

    /// Conversation as seen by a participant.
    pub fn get_conversation(
        &self,
        viewer: Uuid,
        conversation_id: Uuid,
    ) -> DomainResult<ConversationRow> {
        self.with_tx(|tx| require_participant(tx, viewer, conversation_id))
    }

    /// Sends a user-authored message.
    pub fn send_message(
        &self,
        sender: Uuid,
        conversation_id: Uuid,
        format: MessageFormat,
        content: &str,
        snap: Option<SnapMode>,
        now: DateTime<Utc>,
    ) -> DomainResult<MessageRow> {
        validate_message(format, content, snap)?;
        self.with_tx(|tx| {
            insert_message(tx, sender, conversation_id, format, content.trim(), snap, now)
        })
    }

    /// Posts the chat message announcing an album share. Album shares are
    /// never authored directly by users.
    pub fn post_album_share(
        &self,
        owner: Uuid,
        conversation_id: Uuid,
        album_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<MessageRow> {
        self.with_tx(|tx| {
            insert_message(
                tx,
                owner,
                conversation_id,
                MessageFormat::AlbumShare,
                &album_id.to_string(),
                None,
                now,
            )
        })
    }

    /// The user's conversations, most recent activity first, each with the
    /// count of messages from the other side the user has not read.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<(ConversationRow, u32)>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {},
                     (SELECT COUNT(*) FROM messages m
                      WHERE m.conversation_id = c.id AND m.sender_id != ?1
                        AND NOT EXISTS (SELECT 1 FROM message_reads r
                                        WHERE r.message_id = m.id AND r.user_id = ?1))
                 FROM conversations c
                 WHERE c.participant_a = ?1 OR c.participant_b = ?1
                 ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
                prefixed(CONVERSATION_COLUMNS, "c")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((conversation_from_row(row)?, row.get(6)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest first, `before` is an exclusive cursor. Read receipts are
    /// attached; snap redaction is left to the caller.
    pub fn list_messages(
        &self,
        viewer: Uuid,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> DomainResult<Vec<MessageRow>> {
        let limit = limit.clamp(1, MAX_MESSAGE_PAGE);
        self.with_tx(|tx| {
            require_participant(tx, viewer, conversation_id)?;
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, id DESC LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut messages = query_messages(
                tx,
                &sql,
                params![conversation_id.to_string(), before.map(to_millis), limit],
            )?;
            attach_receipts(tx, &mut messages)?;
            Ok(messages)
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let Some(mut message) = load_message(conn, message_id)? else {
                return Ok(None);
            };
            attach_receipts(conn, std::slice::from_mut(&mut message))?;
            Ok(Some(message))
        })
    }

    /// Stamps the user's read time on every unread message from the other
    /// participant. Returns how many were marked.
    pub fn mark_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<usize> {
        self.with_tx(|tx| {
            require_participant(tx, user_id, conversation_id)?;
            let marked = tx
                .execute(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                     SELECT id, ?1, ?2 FROM messages
                     WHERE conversation_id = ?3 AND sender_id != ?1",
                    params![user_id.to_string(), to_millis(now), conversation_id.to_string()],
                )
                .map_err(anyhow::Error::from)?;
            debug!("User {} marked {} message(s) read in {}", user_id, marked, conversation_id);
            Ok(marked)
        })
    }

    /// Recipient opens a snap. The first view starts the clock; once
    /// consumed the snap cannot be opened again.
    pub fn view_snap(
        &self,
        viewer: Uuid,
        message_id: Uuid,
        now: DateTime<Utc>,
    ) -> DomainResult<MessageRow> {
        self.with_tx(|tx| {
            let message = require_message(tx, message_id)?;
            require_participant(tx, viewer, message.conversation_id)?;
            if message.sender_id == viewer {
                return Err(PiggiesError::unauthorized("only the recipient can open a snap"));
            }
            if message.snap.is_none() {
                return Err(PiggiesError::validation("message is not a snap"));
            }
            if snap_consumed(message.snap, message.snap_viewed_at, now) {
                return Err(PiggiesError::invalid_state("snap has already been viewed"));
            }

            if message.snap_viewed_at.is_none() {
                tx.execute(
                    "UPDATE messages SET snap_viewed_at = ?1 WHERE id = ?2",
                    params![to_millis(now), message_id.to_string()],
                )
                .map_err(anyhow::Error::from)?;
            }
            let mut message = require_message(tx, message_id)?;
            attach_receipts(tx, std::slice::from_mut(&mut message))?;
            Ok(message)
        })
    }

    /// Sender removes their message. Returns the deleted row so the caller
    /// can drop any stored media.
    pub fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> DomainResult<MessageRow> {
        self.with_tx(|tx| {
            let message = require_message(tx, message_id)?;
            if message.sender_id != user_id {
                return Err(PiggiesError::unauthorized("only the sender can delete a message"));
            }

            tx.execute("DELETE FROM message_reads WHERE message_id = ?1", [message_id.to_string()])
                .map_err(anyhow::Error::from)?;
            tx.execute("DELETE FROM messages WHERE id = ?1", [message_id.to_string()])
                .map_err(anyhow::Error::from)?;
            repoint_last_message(tx, message.conversation_id)?;

            info!("User {} deleted message {}", user_id, message_id);
            Ok(message)
        })
    }
}

fn insert_message(
    conn: &Connection,
    sender: Uuid,
    conversation_id: Uuid,
    format: MessageFormat,
    content: &str,
    snap: Option<SnapMode>,
    now: DateTime<Utc>,
) -> DomainResult<MessageRow> {
    let conversation = require_participant(conn, sender, conversation_id)?;
    let user = require_user(conn, sender)?;
    if user.moderation.is_restricted(now) {
        return Err(PiggiesError::invalid_state("your account is restricted"));
    }
    if blocked_either(conn, sender, conversation.other(sender))? {
        return Err(PiggiesError::invalid_state("you cannot message this user"));
    }

    let (snap_mode, snap_seconds) = match snap {
        None => (None, None),
        Some(SnapMode::ViewOnce) => (Some("view_once"), None),
        Some(SnapMode::Timed { seconds }) => (Some("timed"), Some(seconds)),
    };

    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO messages
             (id, conversation_id, sender_id, format, content, snap_mode, snap_seconds, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            conversation_id.to_string(),
            sender.to_string(),
            format.as_str(),
            content,
            snap_mode,
            snap_seconds,
            to_millis(now),
        ],
    )
    .map_err(anyhow::Error::from)?;
    conn.execute(
        "UPDATE conversations SET last_message_id = ?1, last_message_at = ?2 WHERE id = ?3",
        params![id.to_string(), to_millis(now), conversation_id.to_string()],
    )
    .map_err(anyhow::Error::from)?;

    require_message(conn, id)
}

fn repoint_last_message(conn: &Connection, conversation_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET
             last_message_id = (SELECT id FROM messages WHERE conversation_id = ?1
                                ORDER BY created_at DESC, id DESC LIMIT 1),
             last_message_at = (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1)
         WHERE id = ?1",
        [conversation_id.to_string()],
    )?;
    Ok(())
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversation_between(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
        CONVERSATION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![a.to_string(), b.to_string()], conversation_from_row)
        .optional()?)
}

pub(crate) fn require_conversation(conn: &Connection, id: Uuid) -> DomainResult<ConversationRow> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
    conn.query_row(&sql, [id.to_string()], conversation_from_row)
        .optional()
        .map_err(anyhow::Error::from)?
        .ok_or(PiggiesError::NotFound("conversation"))
}

fn require_participant(
    conn: &Connection,
    user_id: Uuid,
    id: Uuid,
) -> DomainResult<ConversationRow> {
    let conversation = require_conversation(conn, id)?;
    if !conversation.includes(user_id) {
        return Err(PiggiesError::unauthorized("not a participant in this conversation"));
    }
    Ok(conversation)
}

fn load_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    Ok(conn.query_row(&sql, [id.to_string()], message_from_row).optional()?)
}

fn require_message(conn: &Connection, id: Uuid) -> DomainResult<MessageRow> {
    load_message(conn, id)?.ok_or(PiggiesError::NotFound("message"))
}

fn query_messages<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn attach_receipts(conn: &Connection, messages: &mut [MessageRow]) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT user_id, read_at FROM message_reads WHERE message_id = ?1")?;
    for message in messages.iter_mut() {
        message.read_by = stmt
            .query_map([message.id.to_string()], |row| {
                Ok((uuid_at(row, 0)?, time_at(row, 1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    }
    Ok(())
}
