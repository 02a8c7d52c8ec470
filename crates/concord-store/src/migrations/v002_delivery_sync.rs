//! v002 -- Reliable delivery and multi-device sync.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_messages (
    id                      TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    local_chat_id           TEXT NOT NULL,
    message_type            INTEGER NOT NULL,
    payload                 BLOB NOT NULL,
    recipients              TEXT NOT NULL,              -- JSON array of hex pubkeys
    target_installation     TEXT,                       -- UUID v4
    last_sent               INTEGER NOT NULL DEFAULT 0, -- unix millis
    send_count              INTEGER NOT NULL DEFAULT 0,
    next_attempt_at         INTEGER NOT NULL DEFAULT 0, -- unix millis
    sent                    INTEGER NOT NULL DEFAULT 0,
    terminal                INTEGER NOT NULL DEFAULT 0,
    resend_automatically    INTEGER NOT NULL DEFAULT 0,
    skip_encryption         INTEGER NOT NULL DEFAULT 0,
    skip_group_message_wrap INTEGER NOT NULL DEFAULT 0,
    send_push_notification  INTEGER NOT NULL DEFAULT 0,
    send_on_personal_topic  INTEGER NOT NULL DEFAULT 0,
    created_at              TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_messages_due
    ON raw_messages(sent, terminal, resend_automatically, next_attempt_at);

CREATE TABLE IF NOT EXISTS installations (
    id             TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    identity       TEXT NOT NULL,               -- hex-encoded pubkey
    name           TEXT NOT NULL DEFAULT '',
    device_type    TEXT NOT NULL DEFAULT '',
    enabled        INTEGER NOT NULL DEFAULT 0,
    last_synced    INTEGER NOT NULL DEFAULT 0,  -- unix millis watermark
    timestamp      INTEGER NOT NULL             -- clock of the latest pairing message
);

CREATE TABLE IF NOT EXISTS bookmarks (
    url       TEXT PRIMARY KEY NOT NULL,
    name      TEXT NOT NULL,
    image_url TEXT NOT NULL DEFAULT '',
    removed   INTEGER NOT NULL DEFAULT 0,
    clock     INTEGER NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
