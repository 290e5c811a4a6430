//! Local pinned / starred / deleted markers on messages.

use chrono::Utc;
use rusqlite::params;

use cypherchat_shared::{ConversationId, MessageId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{conversation_key, MessageFlag};

impl Database {
    /// Set a flag. Setting it twice is a no-op.
    pub fn set_flag(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        flag: MessageFlag,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO message_flags (conversation, message_id, flag, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_key(conversation),
                message.to_string(),
                flag.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Remove a flag. Returns `true` if it was set.
    pub fn clear_flag(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        flag: MessageFlag,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM message_flags
             WHERE conversation = ?1 AND message_id = ?2 AND flag = ?3",
            params![
                conversation_key(conversation),
                message.to_string(),
                flag.as_str()
            ],
        )?;
        Ok(affected > 0)
    }

    /// Flip a flag and return whether it is now set.
    pub fn toggle_flag(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        flag: MessageFlag,
    ) -> Result<bool> {
        if self.clear_flag(conversation, message, flag)? {
            Ok(false)
        } else {
            self.set_flag(conversation, message, flag)?;
            Ok(true)
        }
    }

    /// Every message in the conversation carrying `flag`, oldest flag first.
    pub fn list_flagged(
        &self,
        conversation: &ConversationId,
        flag: MessageFlag,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id FROM message_flags
             WHERE conversation = ?1 AND flag = ?2
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(
            params![conversation_key(conversation), flag.as_str()],
            |row| {
                let raw: String = row.get(0)?;
                raw.parse::<MessageId>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
            },
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cypherchat_shared::ChainAddress;

    fn conversation() -> ConversationId {
        ConversationId::new(
            ChainAddress::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            ChainAddress::parse("0x00000000000000000000000000000000000000bb").unwrap(),
        )
    }

    #[test]
    fn test_set_and_clear_flags() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("flags.db")).unwrap();
        let conv = conversation();

        db.set_flag(&conv, &MessageId::Chain(0), MessageFlag::Pinned).unwrap();
        db.set_flag(&conv, &MessageId::Chain(0), MessageFlag::Pinned).unwrap();
        db.set_flag(&conv, &MessageId::Chain(3), MessageFlag::Pinned).unwrap();
        db.set_flag(&conv, &MessageId::Chain(3), MessageFlag::Deleted).unwrap();

        assert_eq!(
            db.list_flagged(&conv, MessageFlag::Pinned).unwrap(),
            vec![MessageId::Chain(0), MessageId::Chain(3)]
        );
        assert_eq!(
            db.list_flagged(&conv, MessageFlag::Deleted).unwrap(),
            vec![MessageId::Chain(3)]
        );

        assert!(db.clear_flag(&conv, &MessageId::Chain(0), MessageFlag::Pinned).unwrap());
        assert!(!db.clear_flag(&conv, &MessageId::Chain(0), MessageFlag::Pinned).unwrap());
    }

    #[test]
    fn test_toggle_flag() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("flags.db")).unwrap();
        let conv = conversation();
        let id = MessageId::new_local();

        assert!(db.toggle_flag(&conv, &id, MessageFlag::Starred).unwrap());
        assert_eq!(db.list_flagged(&conv, MessageFlag::Starred).unwrap(), vec![id]);
        assert!(!db.toggle_flag(&conv, &id, MessageFlag::Starred).unwrap());
        assert!(db.list_flagged(&conv, MessageFlag::Starred).unwrap().is_empty());
    }

    #[test]
    fn test_flags_scoped_to_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("flags.db")).unwrap();
        let conv = conversation();
        let other = ConversationId::new(conv.peer, conv.local);

        db.set_flag(&conv, &MessageId::Chain(1), MessageFlag::Starred).unwrap();
        assert!(db.list_flagged(&other, MessageFlag::Starred).unwrap().is_empty());
    }
}
