use thiserror::Error;

use cypherchat_shared::ChatError;
use cypherchat_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Wallet not connected")]
    NotConnected,

    #[error("No conversation open")]
    NoActiveConversation,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Short notification text for the user.
    pub fn notice(&self) -> String {
        match self {
            Self::Chat(e) => e.notice(),
            Self::Store(_) => "Could not save to local storage.".into(),
            Self::NotConnected => "Connect your wallet first.".into(),
            Self::NoActiveConversation => "Open a conversation first.".into(),
            Self::Config(detail) => detail.clone(),
            Self::Serialization(_) => "Could not export the conversation.".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
