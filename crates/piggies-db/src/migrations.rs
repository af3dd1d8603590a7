use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps are stored as unix milliseconds (INTEGER) so range checks are
/// plain integer comparisons.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                          TEXT PRIMARY KEY,
                external_id                 TEXT NOT NULL UNIQUE,
                display_name                TEXT NOT NULL,
                bio                         TEXT,
                age                         INTEGER,
                photos                      TEXT NOT NULL DEFAULT '[]',
                interests                   TEXT NOT NULL DEFAULT '[]',
                latitude                    REAL,
                longitude                   REAL,
                is_online                   INTEGER NOT NULL DEFAULT 0,
                last_active_at              INTEGER NOT NULL,
                subscription_tier           TEXT NOT NULL DEFAULT 'free',
                is_admin                    INTEGER NOT NULL DEFAULT 0,
                warning_count               INTEGER NOT NULL DEFAULT 0,
                restriction                 TEXT NOT NULL DEFAULT 'none'
                                            CHECK (restriction IN ('none', 'suspended', 'banned')),
                restriction_reason          TEXT,
                restriction_until           INTEGER,
                referral_code               TEXT UNIQUE,
                referred_by                 TEXT REFERENCES users(id),
                referral_credits            INTEGER NOT NULL DEFAULT 0,
                referral_ultra_expires_at   INTEGER,
                created_at                  INTEGER NOT NULL,
                CHECK (restriction != 'suspended' OR restriction_until IS NOT NULL)
            );

            CREATE TABLE blocks (
                blocker_id  TEXT NOT NULL REFERENCES users(id),
                blocked_id  TEXT NOT NULL REFERENCES users(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (blocker_id, blocked_id)
            );

            CREATE INDEX idx_blocks_blocked ON blocks(blocked_id);

            CREATE TABLE conversations (
                id              TEXT PRIMARY KEY,
                participant_a   TEXT NOT NULL REFERENCES users(id),
                participant_b   TEXT NOT NULL REFERENCES users(id),
                last_message_id TEXT,
                last_message_at INTEGER,
                created_at      INTEGER NOT NULL,
                UNIQUE (participant_a, participant_b),
                CHECK (participant_a < participant_b)
            );

            CREATE INDEX idx_conversations_b ON conversations(participant_b);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES users(id),
                format          TEXT NOT NULL,
                content         TEXT NOT NULL,
                snap_mode       TEXT,
                snap_seconds    INTEGER,
                snap_viewed_at  INTEGER,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

            CREATE TABLE message_reads (
                message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                read_at     INTEGER NOT NULL,
                PRIMARY KEY (message_id, user_id)
            );

            CREATE TABLE albums (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                title       TEXT NOT NULL,
                is_default  INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX idx_albums_one_default ON albums(owner_id) WHERE is_default = 1;

            CREATE TABLE album_photos (
                album_id    TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
                storage_key TEXT NOT NULL,
                position    INTEGER NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (album_id, storage_key)
            );

            CREATE TABLE album_grants (
                id              TEXT PRIMARY KEY,
                album_id        TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
                owner_id        TEXT NOT NULL REFERENCES users(id),
                grantee_id      TEXT NOT NULL REFERENCES users(id),
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                expires_at      INTEGER,
                is_revoked      INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                UNIQUE (album_id, grantee_id)
            );

            CREATE INDEX idx_album_grants_grantee ON album_grants(grantee_id);

            CREATE TABLE moderation_actions (
                id          TEXT PRIMARY KEY,
                actor_id    TEXT REFERENCES users(id),
                target_id   TEXT NOT NULL REFERENCES users(id),
                kind        TEXT NOT NULL,
                reason      TEXT,
                until       INTEGER,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_moderation_actions_target ON moderation_actions(target_id, created_at);

            CREATE TABLE appeals (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                appeal_type     TEXT NOT NULL,
                reason          TEXT NOT NULL,
                additional_info TEXT,
                status          TEXT NOT NULL DEFAULT 'pending',
                admin_response  TEXT,
                reviewed_by     TEXT REFERENCES users(id),
                created_at      INTEGER NOT NULL,
                reviewed_at     INTEGER
            );

            -- at most one outstanding appeal per user
            CREATE UNIQUE INDEX idx_appeals_outstanding ON appeals(user_id)
                WHERE status IN ('pending', 'under_review');

            CREATE TABLE referrals (
                id          TEXT PRIMARY KEY,
                referrer_id TEXT NOT NULL REFERENCES users(id),
                referred_id TEXT NOT NULL UNIQUE REFERENCES users(id),
                code        TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'pending',
                created_at  INTEGER NOT NULL,
                resolved_at INTEGER
            );

            CREATE INDEX idx_referrals_referrer ON referrals(referrer_id, status);

            CREATE TABLE venues (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                category        TEXT NOT NULL,
                address         TEXT NOT NULL,
                latitude        REAL NOT NULL,
                longitude       REAL NOT NULL,
                features        TEXT NOT NULL DEFAULT '[]',
                status          TEXT NOT NULL DEFAULT 'pending',
                submitted_by    TEXT NOT NULL REFERENCES users(id),
                reviewed_by     TEXT REFERENCES users(id),
                reviewed_at     INTEGER,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_venues_status ON venues(status, category);

            CREATE TABLE venue_reports (
                venue_id    TEXT NOT NULL REFERENCES venues(id) ON DELETE CASCADE,
                reporter_id TEXT NOT NULL REFERENCES users(id),
                reason      TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (venue_id, reporter_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
