use alloy_primitives::TxHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChainAddress, Party};

/// Every failure a user-facing operation can end in.
///
/// None of these are fatal to the process; each is scoped to the operation
/// that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("No wallet provider available")]
    WalletUnavailable,

    #[error("Request rejected in the wallet")]
    UserRejected,

    #[error("Wrong network: connected to chain {current}, expected {required}")]
    WrongNetwork { current: u64, required: u64 },

    #[error("Wallet returned no accounts")]
    NoAccounts,

    #[error("No contract deployed at {0}")]
    ContractNotFound(ChainAddress),

    #[error("{party} {address} is not registered")]
    NotRegistered { party: Party, address: ChainAddress },

    #[error("Insufficient funds for gas")]
    InsufficientFunds,

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Broadcast, but no receipt before the deadline. The transaction may
    /// still be mined.
    #[error("Transaction {0} not confirmed in time")]
    ConfirmationTimeout(TxHash),

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("Network switch failed: {0}")]
    NetworkSwitch(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("ABI error: {0}")]
    Abi(String),
}

impl ChatError {
    /// Classification used when an optimistic message ends up failed.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UserRejected => FailureKind::Rejected,
            Self::InsufficientFunds => FailureKind::InsufficientFunds,
            Self::NotRegistered {
                party: Party::Recipient,
                ..
            } => FailureKind::RecipientUnregistered,
            Self::NotRegistered {
                party: Party::Sender,
                ..
            } => FailureKind::SenderUnregistered,
            _ => FailureKind::Generic,
        }
    }

    /// Failures that may succeed when simply tried again. Reverts are
    /// deterministic and excluded.
    pub fn is_transient(&self) -> bool {
        self.failure_kind().is_retryable()
            && matches!(
                self,
                Self::WalletUnavailable | Self::TransactionFailed(_) | Self::Poll(_)
            )
    }

    /// Short notification text for the user.
    pub fn notice(&self) -> String {
        match self {
            Self::WalletUnavailable => "No wallet found. Configure a wallet provider first.".into(),
            Self::UserRejected => "You rejected the request in your wallet.".into(),
            Self::WrongNetwork { required, .. } => {
                format!("Please switch your wallet to chain {required}.")
            }
            Self::NoAccounts => "Your wallet has no accounts to connect.".into(),
            Self::ContractNotFound(_) => "The chat contract is not deployed on this network.".into(),
            Self::NotRegistered {
                party: Party::Sender,
                ..
            } => "Register a name before sending messages.".into(),
            Self::NotRegistered {
                party: Party::Recipient,
                ..
            } => "The recipient has not registered yet.".into(),
            Self::InsufficientFunds => "Not enough ETH to pay for gas.".into(),
            Self::TransactionReverted(reason) => format!("Transaction reverted: {reason}"),
            Self::TransactionFailed(_) => "Transaction failed. Please try again.".into(),
            Self::ConfirmationTimeout(_) => {
                "Your message is still waiting to be mined. It will appear once confirmed.".into()
            }
            Self::Poll(_) => "Could not refresh messages.".into(),
            Self::NetworkSwitch(_) => "Could not switch networks.".into(),
            Self::InvalidAddress(_) => "That is not a valid address.".into(),
            Self::InvalidInput(detail) => detail.clone(),
            Self::Abi(_) => "Unexpected response from the contract.".into(),
        }
    }
}

/// Why an optimistic message was marked failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Rejected,
    InsufficientFunds,
    RecipientUnregistered,
    SenderUnregistered,
    Generic,
}

impl FailureKind {
    /// Only transient failures are worth resending automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Generic)
    }
}
