//! v001 -- Community state.
//!
//! Creates `communities` (one signed description per community) and
//! `join_requests`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Communities
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS communities (
    id          TEXT PRIMARY KEY NOT NULL,   -- hex-encoded community public key
    description BLOB NOT NULL,               -- bincode SignedDescription
    clock       INTEGER NOT NULL,            -- version marker of `description`
    private_key BLOB,                        -- present only on the controlling node
    joined      INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    joined_clock INTEGER NOT NULL DEFAULT 0, -- unix millis of the last join/leave
    created_at  TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Join requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS join_requests (
    id           TEXT PRIMARY KEY NOT NULL,  -- hex digest of (community, requester)
    community_id TEXT NOT NULL,              -- FK -> communities(id)
    requester    TEXT NOT NULL,              -- hex-encoded pubkey
    ens_name     TEXT,
    clock        INTEGER NOT NULL,
    state        INTEGER NOT NULL,           -- 1 pending, 2 approved, 3 rejected

    FOREIGN KEY (community_id) REFERENCES communities(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_join_requests_community
    ON join_requests(community_id, state);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
