//! Records persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cypherchat_shared::{ChainAddress, ConversationId};

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A locally saved contact. The list is append-only and may hold the same
/// address more than once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: Uuid,
    /// Display name, either typed by the user or the on-chain name.
    pub name: String,
    pub address: ChainAddress,
    pub added_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(name: impl Into<String>, address: ChainAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            address,
            added_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session marker
// ---------------------------------------------------------------------------

/// Remembers that a wallet was connected, so the next start can reconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMarker {
    /// Provider label of the wallet used.
    pub wallet: String,
    pub account: ChainAddress,
    pub connected_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageFlag {
    Pinned,
    Starred,
    /// Hidden from the conversation view. Chain data is never touched.
    Deleted,
}

impl MessageFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Starred => "starred",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pinned" => Some(Self::Pinned),
            "starred" => Some(Self::Starred),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage key for a conversation. Both sides of the same pair on one
/// device keep separate flags.
pub fn conversation_key(conversation: &ConversationId) -> String {
    format!("{}:{}", conversation.local.to_hex(), conversation.peer.to_hex())
}
