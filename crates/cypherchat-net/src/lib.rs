// Chain access layer: JSON-RPC transport, wallet seam, contract gateway.

pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod provider;
pub mod rpc;
pub mod wallet;

pub use gateway::{ChatContract, ContractGateway, GatewayOptions};
pub use provider::{
    BlockTag, CallRequest, ChainParams, JsonRpcWallet, SharedProvider, TransactionRequest,
    TxReceipt, WalletProvider,
};
pub use rpc::{JsonRpcClient, RpcError};
pub use wallet::{WalletConnector, WalletSession};
