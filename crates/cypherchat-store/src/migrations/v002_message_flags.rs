use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS message_flags (
    message_id   TEXT NOT NULL,               -- "chain:<index>" or "local:<uuid>"
    conversation TEXT NOT NULL,               -- "<local>:<peer>", lowercase hex
    flag         TEXT NOT NULL CHECK (flag IN ('pinned', 'starred', 'deleted')),
    created_at   TEXT NOT NULL,
    PRIMARY KEY (conversation, message_id, flag)
);

CREATE INDEX IF NOT EXISTS idx_message_flags_conversation ON message_flags(conversation, flag);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
