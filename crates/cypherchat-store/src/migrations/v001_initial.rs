//! v001 -- Initial schema creation.
//!
//! Creates `contacts` and the single-row `wallet_session` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Contacts (append-only, duplicates by address allowed)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id       TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name     TEXT NOT NULL,
    address  TEXT NOT NULL,               -- lowercase 0x-prefixed hex
    added_at TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_contacts_address ON contacts(address);

-- ----------------------------------------------------------------
-- Wallet session marker, used to reconnect on the next start
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS wallet_session (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    wallet       TEXT NOT NULL,
    account      TEXT NOT NULL,
    connected_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
