use alloy_primitives::TxHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abi;
use crate::error::{ChatError, FailureKind};
use crate::types::{ChainAddress, MessageId, MessageStatus};

/// A message as shown in a conversation, confirmed or optimistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: ChainAddress,
    pub receiver: ChainAddress,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    /// Hash of the transaction that carried this message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    /// Set only on failed optimistic messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ChatMessage {
    /// Build a confirmed message from the contract's `index`-th entry.
    pub fn from_chain(index: u64, raw: abi::Message) -> Result<Self, ChatError> {
        let secs = u64::try_from(raw.timestamp)
            .ok()
            .and_then(|s| i64::try_from(s).ok())
            .ok_or_else(|| ChatError::Abi(format!("timestamp out of range at index {index}")))?;
        let timestamp = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ChatError::Abi(format!("invalid timestamp {secs} at index {index}")))?;

        Ok(Self {
            id: MessageId::Chain(index),
            sender: raw.sender.into(),
            receiver: raw.receiver.into(),
            content: raw.content,
            timestamp,
            status: MessageStatus::Confirmed,
            tx_hash: None,
            failure: None,
        })
    }

    /// A locally originated message, shown before the chain reflects it.
    pub fn optimistic(sender: ChainAddress, receiver: ChainAddress, content: String) -> Self {
        Self {
            id: MessageId::new_local(),
            sender,
            receiver,
            content,
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            tx_hash: None,
            failure: None,
        }
    }

    /// Same participants and content, ignoring ids and timestamps.
    pub fn same_payload(&self, other: &ChatMessage) -> bool {
        self.sender == other.sender
            && self.receiver == other.receiver
            && self.content == other.content
    }
}

/// On-chain registration record for an address.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub exists: bool,
}

impl From<abi::usersReturn> for Registration {
    fn from(raw: abi::usersReturn) -> Self {
        Self {
            name: raw.name,
            exists: raw.exists,
        }
    }
}

/// Which end of the conversation a [`Page`] offset counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageAnchor {
    #[default]
    Oldest,
    Newest,
}

/// Offset/limit window applied to a fetched conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
    #[serde(default)]
    pub anchor: PageAnchor,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            anchor: PageAnchor::Oldest,
        }
    }

    /// The `limit` most recent items, still in chronological order.
    pub fn latest(limit: usize) -> Self {
        Self {
            offset: 0,
            limit,
            anchor: PageAnchor::Newest,
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        match self.anchor {
            PageAnchor::Oldest => items.into_iter().skip(self.offset).take(self.limit).collect(),
            PageAnchor::Newest => {
                let end = items.len().saturating_sub(self.offset);
                let start = end.saturating_sub(self.limit);
                items.into_iter().take(end).skip(start).collect()
            }
        }
    }
}
