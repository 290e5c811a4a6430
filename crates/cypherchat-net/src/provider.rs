//! The wallet seam.
//!
//! [`WalletProvider`] mirrors what an EIP-1193 wallet exposes to a dapp:
//! account access, chain management, signing-and-sending transactions and
//! read calls. [`JsonRpcWallet`] implements it on top of a JSON-RPC
//! endpoint that holds the keys (a wallet bridge or a node with managed
//! accounts).

use std::sync::Arc;

use alloy_primitives::{Bytes, TxHash, U256, U64};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use cypherchat_shared::constants::{
    SEPOLIA_CHAIN_ID, SEPOLIA_CHAIN_NAME, SEPOLIA_CURRENCY_DECIMALS, SEPOLIA_CURRENCY_NAME,
    SEPOLIA_CURRENCY_SYMBOL, SEPOLIA_EXPLORER_URL,
};
use cypherchat_shared::ChainAddress;

use crate::rpc::{JsonRpcClient, RpcError};

/// Shared handle to whichever provider the session was opened with.
pub type SharedProvider = Arc<dyn WalletProvider>;

/// Transaction handed to the wallet for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    pub from: ChainAddress,
    pub to: ChainAddress,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
}

/// Read-only call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ChainAddress>,
    pub to: ChainAddress,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            Self::Latest => Value::String("latest".into()),
            Self::Number(n) => Value::String(format!("{n:#x}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// `0x1` on success, `0x0` on revert.
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U256>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == Some(U64::from(1))
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Parameters for `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainParams {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl ChainParams {
    pub fn sepolia(rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id: format!("{SEPOLIA_CHAIN_ID:#x}"),
            chain_name: SEPOLIA_CHAIN_NAME.into(),
            native_currency: NativeCurrency {
                name: SEPOLIA_CURRENCY_NAME.into(),
                symbol: SEPOLIA_CURRENCY_SYMBOL.into(),
                decimals: SEPOLIA_CURRENCY_DECIMALS,
            },
            rpc_urls: vec![rpc_url.into()],
            block_explorer_urls: vec![SEPOLIA_EXPLORER_URL.into()],
        }
    }
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Identifies the wallet in the persisted session marker.
    fn label(&self) -> String;

    /// Ask the user for account access (may prompt).
    async fn request_accounts(&self) -> Result<Vec<ChainAddress>, RpcError>;

    /// Accounts already exposed to us (never prompts).
    async fn accounts(&self) -> Result<Vec<ChainAddress>, RpcError>;

    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn switch_chain(&self, chain_id: u64) -> Result<(), RpcError>;

    async fn add_chain(&self, params: &ChainParams) -> Result<(), RpcError>;

    async fn balance(&self, address: &ChainAddress) -> Result<U256, RpcError>;

    async fn code_at(&self, address: &ChainAddress) -> Result<Bytes, RpcError>;

    async fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, RpcError>;

    /// Sign and broadcast; resolves once the wallet returns a hash.
    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, RpcError>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;
}

/// [`WalletProvider`] over a JSON-RPC endpoint.
pub struct JsonRpcWallet {
    rpc: JsonRpcClient,
}

impl JsonRpcWallet {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url)?,
        })
    }
}

fn parse_accounts(raw: Vec<String>) -> Result<Vec<ChainAddress>, RpcError> {
    raw.iter()
        .map(|s| ChainAddress::parse(s).map_err(|e| RpcError::Decode(e.to_string())))
        .collect()
}

#[async_trait]
impl WalletProvider for JsonRpcWallet {
    fn label(&self) -> String {
        self.rpc.url().to_string()
    }

    async fn request_accounts(&self) -> Result<Vec<ChainAddress>, RpcError> {
        let raw: Vec<String> = self.rpc.request("eth_requestAccounts", json!([])).await?;
        parse_accounts(raw)
    }

    async fn accounts(&self) -> Result<Vec<ChainAddress>, RpcError> {
        let raw: Vec<String> = self.rpc.request("eth_accounts", json!([])).await?;
        parse_accounts(raw)
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.rpc.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), RpcError> {
        let _: Value = self
            .rpc
            .request(
                "wallet_switchEthereumChain",
                json!([{ "chainId": format!("{chain_id:#x}") }]),
            )
            .await?;
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), RpcError> {
        let _: Value = self
            .rpc
            .request("wallet_addEthereumChain", json!([params]))
            .await?;
        Ok(())
    }

    async fn balance(&self, address: &ChainAddress) -> Result<U256, RpcError> {
        self.rpc
            .request("eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn code_at(&self, address: &ChainAddress) -> Result<Bytes, RpcError> {
        self.rpc
            .request("eth_getCode", json!([address, "latest"]))
            .await
    }

    async fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, RpcError> {
        self.rpc
            .request("eth_call", json!([request, block.to_param()]))
            .await
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, RpcError> {
        self.rpc
            .request("eth_sendTransaction", json!([request]))
            .await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, RpcError> {
        self.rpc
            .request("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let n: U64 = self.rpc.request("eth_blockNumber", json!([])).await?;
        Ok(n.to::<u64>())
    }
}
