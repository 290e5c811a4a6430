//! Minimal JSON-RPC 2.0 client over HTTP.
//!
//! Wallet bridges and nodes both speak JSON-RPC; the wallet-specific
//! methods (`eth_requestAccounts`, `wallet_switchEthereumChain`, ...) travel
//! over the same transport as plain chain reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::trace;

use cypherchat_shared::constants::{
    EIP1193_USER_REJECTED, RPC_EXECUTION_REVERTED, RPC_SERVER_ERROR,
};
use cypherchat_shared::ChatError;

/// Per-request timeout for the HTTP transport.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum RpcError {
    /// The endpoint could not be reached at all.
    #[error("Provider unreachable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON-RPC error object returned by the provider.
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Invalid RPC response: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code() == Some(EIP1193_USER_REJECTED)
    }

    fn message_lower(&self) -> String {
        match self {
            Self::Rpc { message, .. } => message.to_lowercase(),
            _ => String::new(),
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.message_lower().contains("insufficient funds")
    }

    pub fn is_revert(&self) -> bool {
        self.code() == Some(RPC_EXECUTION_REVERTED)
            || self.message_lower().contains("execution reverted")
    }

    /// Raw revert payload attached to the error, if any.
    ///
    /// Providers put it either directly in `data` as a hex string or nest
    /// it one level down as `data.data`.
    pub fn revert_data(&self) -> Option<Bytes> {
        let Self::Rpc {
            data: Some(data), ..
        } = self
        else {
            return None;
        };
        let hex_str = data
            .as_str()
            .or_else(|| data.get("data").and_then(Value::as_str))?;
        hex_str.parse::<Bytes>().ok()
    }

    /// Best-effort human readable revert reason.
    pub fn revert_reason(&self) -> Option<String> {
        if let Some(reason) = self
            .revert_data()
            .and_then(|data| alloy_sol_types::decode_revert_reason(&data))
        {
            return Some(reason);
        }
        let Self::Rpc { message, .. } = self else {
            return None;
        };
        match message.split_once("execution reverted:") {
            Some((_, reason)) if !reason.trim().is_empty() => Some(reason.trim().to_string()),
            _ if self.is_revert() => Some("execution reverted".to_string()),
            _ => None,
        }
    }

    /// Map onto the user-facing taxonomy.
    pub fn into_chat_error(self) -> ChatError {
        if self.is_user_rejection() {
            return ChatError::UserRejected;
        }
        if self.is_insufficient_funds() {
            return ChatError::InsufficientFunds;
        }
        if self.is_revert() {
            let reason = self
                .revert_reason()
                .unwrap_or_else(|| "execution reverted".to_string());
            return ChatError::TransactionReverted(reason);
        }
        match self {
            Self::Unavailable(_) => ChatError::WalletUnavailable,
            Self::Rpc { code, message, .. } if code == RPC_SERVER_ERROR => {
                ChatError::TransactionFailed(message)
            }
            other => ChatError::TransactionFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// HTTP JSON-RPC endpoint.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue a single request and decode its `result`.
    ///
    /// A `null` result decodes into `()` or `Option::None`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(id, method, "RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    RpcError::Unavailable(e.to_string())
                } else {
                    RpcError::Transport(e)
                }
            })?;

        let body: RpcResponse = response.json().await?;
        if let Some(err) = body.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        serde_json::from_value(body.result)
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::{Revert, SolError};

    #[test]
    fn test_user_rejection_maps() {
        let err = RpcError::rpc(4001, "User denied transaction signature");
        assert_eq!(err.into_chat_error(), ChatError::UserRejected);
    }

    #[test]
    fn test_insufficient_funds_maps() {
        let err = RpcError::rpc(-32000, "insufficient funds for gas * price + value");
        assert_eq!(err.into_chat_error(), ChatError::InsufficientFunds);
    }

    #[test]
    fn test_revert_reason_from_data() {
        let data = Revert {
            reason: "Recipient not registered".into(),
        }
        .abi_encode();
        let err = RpcError::Rpc {
            code: 3,
            message: "execution reverted".into(),
            data: Some(Value::String(format!("0x{}", hex::encode(data)))),
        };
        assert_eq!(
            err.into_chat_error(),
            ChatError::TransactionReverted("Recipient not registered".into())
        );
    }

    #[test]
    fn test_revert_reason_from_nested_data() {
        let data = Revert {
            reason: "Name required".into(),
        }
        .abi_encode();
        let err = RpcError::Rpc {
            code: -32603,
            message: "Internal JSON-RPC error.".into(),
            data: Some(json!({ "data": format!("0x{}", hex::encode(data)) })),
        };
        assert_eq!(err.revert_reason().as_deref(), Some("Name required"));
    }

    #[test]
    fn test_revert_reason_from_message() {
        let err = RpcError::rpc(-32000, "execution reverted: Already registered");
        assert_eq!(
            err.into_chat_error(),
            ChatError::TransactionReverted("Already registered".into())
        );
    }

    #[test]
    fn test_unavailable_maps_to_wallet_unavailable() {
        let err = RpcError::Unavailable("connection refused".into());
        assert_eq!(err.into_chat_error(), ChatError::WalletUnavailable);
    }

    #[test]
    fn test_other_errors_are_generic() {
        let err = RpcError::rpc(-32601, "method not found");
        assert!(matches!(
            err.into_chat_error(),
            ChatError::TransactionFailed(_)
        ));
    }
}
