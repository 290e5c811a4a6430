//! Wallet connection flow: account access, network check, network switch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use cypherchat_shared::constants::EIP1193_UNRECOGNIZED_CHAIN;
use cypherchat_shared::{ChainAddress, ChatError};

use crate::provider::{ChainParams, SharedProvider};
use crate::rpc::RpcError;

/// A connected wallet: the account that signs and the provider it lives in.
///
/// Created by [`WalletConnector::connect`]; dropped on disconnect or when
/// the wallet switches accounts.
#[derive(Clone)]
pub struct WalletSession {
    pub account: ChainAddress,
    pub chain_id: u64,
    /// Provider label, persisted so a later start can reconnect.
    pub wallet: String,
    pub connected_at: DateTime<Utc>,
    provider: SharedProvider,
}

impl WalletSession {
    pub fn provider(&self) -> SharedProvider {
        Arc::clone(&self.provider)
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .field("wallet", &self.wallet)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

pub struct WalletConnector {
    provider: Option<SharedProvider>,
    required_chain_id: u64,
    chain_params: ChainParams,
}

impl WalletConnector {
    /// `provider` is `None` when no wallet is configured at all.
    pub fn new(
        provider: Option<SharedProvider>,
        required_chain_id: u64,
        chain_params: ChainParams,
    ) -> Self {
        Self {
            provider,
            required_chain_id,
            chain_params,
        }
    }

    pub fn required_chain_id(&self) -> u64 {
        self.required_chain_id
    }

    fn provider(&self) -> Result<&SharedProvider, ChatError> {
        self.provider.as_ref().ok_or(ChatError::WalletUnavailable)
    }

    /// Request account access and verify the active network.
    pub async fn connect(&self) -> Result<WalletSession, ChatError> {
        let provider = self.provider()?;

        let accounts = provider
            .request_accounts()
            .await
            .map_err(connect_error)?;
        let account = *accounts.first().ok_or(ChatError::NoAccounts)?;

        let chain_id = provider.chain_id().await.map_err(connect_error)?;
        if chain_id != self.required_chain_id {
            warn!(
                current = chain_id,
                required = self.required_chain_id,
                "Wallet on wrong network"
            );
            return Err(ChatError::WrongNetwork {
                current: chain_id,
                required: self.required_chain_id,
            });
        }

        info!(account = %account, chain_id, wallet = %provider.label(), "Wallet connected");

        Ok(WalletSession {
            account,
            chain_id,
            wallet: provider.label(),
            connected_at: Utc::now(),
            provider: Arc::clone(provider),
        })
    }

    /// Ask the wallet to move to the required chain, adding it first if the
    /// wallet does not know it. The switch is retried once after adding.
    pub async fn switch_network(&self) -> Result<(), ChatError> {
        let provider = self.provider()?;

        match provider.switch_chain(self.required_chain_id).await {
            Ok(()) => {}
            Err(e) if e.code() == Some(EIP1193_UNRECOGNIZED_CHAIN) => {
                info!(chain_id = self.required_chain_id, "Chain unknown to wallet, adding it");
                provider
                    .add_chain(&self.chain_params)
                    .await
                    .map_err(|e| switch_error("add chain", e))?;
                provider
                    .switch_chain(self.required_chain_id)
                    .await
                    .map_err(|e| switch_error("switch after add", e))?;
            }
            Err(e) => return Err(switch_error("switch", e)),
        }

        info!(chain_id = self.required_chain_id, "Wallet switched network");
        Ok(())
    }
}

fn connect_error(e: RpcError) -> ChatError {
    match e {
        RpcError::Transport(_) | RpcError::Unavailable(_) => ChatError::WalletUnavailable,
        other if other.is_user_rejection() => ChatError::UserRejected,
        other => ChatError::TransactionFailed(other.to_string()),
    }
}

fn switch_error(step: &str, e: RpcError) -> ChatError {
    if e.is_user_rejection() {
        ChatError::UserRejected
    } else {
        ChatError::NetworkSwitch(format!("{step}: {e}"))
    }
}
