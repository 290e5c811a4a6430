use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

// Chain account = 20-byte address, always rendered lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainAddress(Address);

impl ChainAddress {
    /// Parse a `0x`-prefixed or bare 40-digit hex address.
    ///
    /// All-lowercase and all-uppercase input is accepted as is. Mixed-case
    /// input is treated as EIP-55 and must carry a valid checksum.
    pub fn parse(s: &str) -> Result<Self, ChatError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChatError::InvalidAddress(s.to_string()));
        }

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            Address::parse_checksummed(format!("0x{digits}"), None)
                .map_err(|_| ChatError::InvalidAddress(s.to_string()))?;
        }

        let bytes = hex::decode(digits).map_err(|_| ChatError::InvalidAddress(s.to_string()))?;
        Ok(Self(Address::from_slice(&bytes)))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_slice()))
    }

    /// `0x1234…abcd`, for compact display.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}…{}", &hex[..6], &hex[hex.len() - 4..])
    }

    pub fn as_address(&self) -> Address {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Address::ZERO
    }
}

impl From<Address> for ChainAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<ChainAddress> for Address {
    fn from(address: ChainAddress) -> Self {
        address.0
    }
}

impl FromStr for ChainAddress {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChainAddress {
    type Error = ChatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ChainAddress> for String {
    fn from(address: ChainAddress) -> Self {
        address.to_hex()
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A one-to-one conversation between the connected account and a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub local: ChainAddress,
    pub peer: ChainAddress,
}

impl ConversationId {
    pub fn new(local: ChainAddress, peer: ChainAddress) -> Self {
        Self { local, peer }
    }

    /// Whether a message between `a` and `b` belongs to this conversation.
    pub fn involves(&self, a: &ChainAddress, b: &ChainAddress) -> bool {
        (a == &self.local && b == &self.peer) || (a == &self.peer && b == &self.local)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local.short(), self.peer.short())
    }
}

/// Identifies a message in a conversation view.
///
/// Confirmed messages are addressed by their index in the contract's
/// append-only conversation list, which is stable across polls. Optimistic
/// messages carry a locally generated UUID until the chain reflects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageId {
    Chain(u64),
    Local(Uuid),
}

impl MessageId {
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn chain_index(&self) -> Option<u64> {
        match self {
            Self::Chain(index) => Some(*index),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain(index) => write!(f, "chain:{index}"),
            Self::Local(id) => write!(f, "local:{id}"),
        }
    }
}

impl FromStr for MessageId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChatError::InvalidInput(format!("invalid message id: {s}"));
        match s.split_once(':') {
            Some(("chain", index)) => index.parse().map(Self::Chain).map_err(|_| invalid()),
            Some(("local", id)) => Uuid::parse_str(id).map(Self::Local).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for MessageId {
    type Error = ChatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Confirmed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Submitted or about to be, outcome not yet known.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a send a registration check concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Sender,
    Recipient,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Recipient => f.write_str("recipient"),
        }
    }
}
