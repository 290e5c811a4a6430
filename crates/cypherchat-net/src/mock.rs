//! In-memory wallet and chain for tests.
//!
//! [`MockWallet`] executes the chat contract's four functions directly on
//! its own state, mines transactions instantly (or on demand), and can be
//! told to fail individual RPC methods with EIP-1193 error codes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use alloy_primitives::{keccak256, Address, Bytes, TxHash, U256, U64};
use alloy_sol_types::{Revert, SolCall, SolError};
use async_trait::async_trait;
use serde_json::Value;

use cypherchat_shared::abi;
use cypherchat_shared::constants::SEPOLIA_CHAIN_ID;
use cypherchat_shared::ChainAddress;

use crate::provider::{
    BlockTag, CallRequest, ChainParams, TransactionRequest, TxReceipt, WalletProvider,
};
use crate::rpc::RpcError;

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
struct StoredMessage {
    sender: Address,
    receiver: Address,
    content: String,
    timestamp: u64,
}

#[derive(Debug)]
struct PendingTx {
    hash: TxHash,
    from: ChainAddress,
    data: Bytes,
}

#[derive(Debug)]
struct MockState {
    accounts: Vec<ChainAddress>,
    chain_id: u64,
    known_chains: HashSet<u64>,
    unreachable: bool,
    contract: Option<ChainAddress>,
    balances: HashMap<ChainAddress, U256>,
    users: HashMap<Address, String>,
    messages: Vec<StoredMessage>,
    receipts: HashMap<TxHash, TxReceipt>,
    mempool: Vec<PendingTx>,
    auto_mine: bool,
    block: u64,
    nonce: u64,
    revert_next: Option<String>,
    reverting: HashMap<Bytes, String>,
    failures: VecDeque<(String, i64, String)>,
    call_counts: HashMap<String, usize>,
    last_gas: Option<u64>,
}

pub struct MockWallet {
    state: Mutex<MockState>,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWallet {
    /// Sepolia wallet with no accounts and no contract.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                accounts: Vec::new(),
                chain_id: SEPOLIA_CHAIN_ID,
                known_chains: [1, SEPOLIA_CHAIN_ID].into_iter().collect(),
                unreachable: false,
                contract: None,
                balances: HashMap::new(),
                users: HashMap::new(),
                messages: Vec::new(),
                receipts: HashMap::new(),
                mempool: Vec::new(),
                auto_mine: true,
                block: 1,
                nonce: 0,
                revert_next: None,
                reverting: HashMap::new(),
                failures: VecDeque::new(),
                call_counts: HashMap::new(),
                last_gas: None,
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Add an account whose address is `byte` repeated.
    pub fn add_account(&self, byte: u8) -> ChainAddress {
        let account = ChainAddress::from(Address::repeat_byte(byte));
        self.with(|s| s.accounts.push(account));
        account
    }

    /// Wallet switched to `accounts` (first one active).
    pub fn set_accounts(&self, accounts: Vec<ChainAddress>) {
        self.with(|s| s.accounts = accounts);
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.with(|s| s.chain_id = chain_id);
    }

    pub fn chain(&self) -> u64 {
        self.with(|s| s.chain_id)
    }

    pub fn forget_chain(&self, chain_id: u64) {
        self.with(|s| {
            s.known_chains.remove(&chain_id);
        });
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.with(|s| s.unreachable = unreachable);
    }

    /// Put code at a fixed address and return it.
    pub fn deploy_contract(&self) -> ChainAddress {
        let contract = ChainAddress::from(Address::repeat_byte(0xcc));
        self.with(|s| s.contract = Some(contract));
        contract
    }

    pub fn set_balance(&self, account: &ChainAddress, wei: u128) {
        self.with(|s| {
            s.balances.insert(*account, U256::from(wei));
        });
    }

    /// Register directly in contract state, bypassing transactions.
    pub fn register(&self, account: &ChainAddress, name: &str) {
        self.with(|s| {
            s.users.insert(account.as_address(), name.to_string());
        });
    }

    /// Append a message directly to contract state.
    pub fn push_message(&self, sender: &ChainAddress, receiver: &ChainAddress, content: &str) {
        self.with(|s| {
            let timestamp = GENESIS_TIMESTAMP + s.block;
            s.block += 1;
            s.messages.push(StoredMessage {
                sender: sender.as_address(),
                receiver: receiver.as_address(),
                content: content.to_string(),
                timestamp,
            });
        });
    }

    /// When off, transactions wait in a mempool until [`MockWallet::mine`].
    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.with(|s| s.auto_mine = auto_mine);
    }

    /// Mine everything in the mempool, one block per transaction.
    pub fn mine(&self) {
        self.with(|s| {
            let pending: Vec<PendingTx> = s.mempool.drain(..).collect();
            for tx in pending {
                s.execute(tx);
            }
        });
    }

    /// The next transaction is mined but reverts with `reason`.
    pub fn revert_next(&self, reason: &str) {
        self.with(|s| s.revert_next = Some(reason.to_string()));
    }

    /// The next call to `method` fails with the given JSON-RPC error.
    pub fn fail_next(&self, method: &str, code: i64, message: &str) {
        self.with(|s| {
            s.failures
                .push_back((method.to_string(), code, message.to_string()))
        });
    }

    /// How many times `method` was invoked.
    pub fn calls(&self, method: &str) -> usize {
        self.with(|s| s.call_counts.get(method).copied().unwrap_or(0))
    }

    pub fn last_gas(&self) -> Option<u64> {
        self.with(|s| s.last_gas)
    }

    pub fn message_count(&self) -> usize {
        self.with(|s| s.messages.len())
    }

    fn enter(&self, method: &str) -> Result<(), RpcError> {
        self.with(|s| {
            *s.call_counts.entry(method.to_string()).or_default() += 1;
            if s.unreachable {
                return Err(RpcError::Unavailable("connection refused".into()));
            }
            if let Some(pos) = s.failures.iter().position(|(m, _, _)| m == method) {
                if let Some((_, code, message)) = s.failures.remove(pos) {
                    return Err(RpcError::rpc(code, message));
                }
            }
            Ok(())
        })
    }
}

impl MockState {
    fn next_hash(&mut self) -> TxHash {
        self.nonce += 1;
        keccak256(self.nonce.to_be_bytes())
    }

    fn execute(&mut self, tx: PendingTx) {
        self.block += 1;
        let reverted = self.reverting.contains_key(&tx.data);

        if !reverted {
            if let Ok(call) = abi::registerUserCall::abi_decode(&tx.data, true) {
                self.users.insert(tx.from.as_address(), call.name);
            } else if let Ok(call) = abi::sendMessageCall::abi_decode(&tx.data, true) {
                self.messages.push(StoredMessage {
                    sender: tx.from.as_address(),
                    receiver: call.to,
                    content: call.content,
                    timestamp: GENESIS_TIMESTAMP + self.block,
                });
            }
        }

        self.receipts.insert(
            tx.hash,
            TxReceipt {
                transaction_hash: tx.hash,
                block_number: Some(U64::from(self.block)),
                status: Some(U64::from(if reverted { 0 } else { 1 })),
                gas_used: Some(U256::from(21_000)),
            },
        );
    }

    fn conversation(&self, a: Address, b: Address) -> Vec<abi::Message> {
        self.messages
            .iter()
            .filter(|m| (m.sender == a && m.receiver == b) || (m.sender == b && m.receiver == a))
            .map(|m| abi::Message {
                sender: m.sender,
                receiver: m.receiver,
                content: m.content.clone(),
                timestamp: U256::from(m.timestamp),
            })
            .collect()
    }
}

fn revert_error(reason: &str) -> RpcError {
    let data = Revert {
        reason: reason.to_string(),
    }
    .abi_encode();
    RpcError::Rpc {
        code: 3,
        message: "execution reverted".into(),
        data: Some(Value::String(format!("0x{}", hex::encode(data)))),
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn label(&self) -> String {
        "mock".into()
    }

    async fn request_accounts(&self) -> Result<Vec<ChainAddress>, RpcError> {
        self.enter("eth_requestAccounts")?;
        Ok(self.with(|s| s.accounts.clone()))
    }

    async fn accounts(&self) -> Result<Vec<ChainAddress>, RpcError> {
        self.enter("eth_accounts")?;
        Ok(self.with(|s| s.accounts.clone()))
    }

    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.enter("eth_chainId")?;
        Ok(self.with(|s| s.chain_id))
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), RpcError> {
        self.enter("wallet_switchEthereumChain")?;
        self.with(|s| {
            if !s.known_chains.contains(&chain_id) {
                return Err(RpcError::rpc(4902, "Unrecognized chain ID"));
            }
            s.chain_id = chain_id;
            Ok(())
        })
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), RpcError> {
        self.enter("wallet_addEthereumChain")?;
        let hex = params.chain_id.trim_start_matches("0x");
        let chain_id = u64::from_str_radix(hex, 16)
            .map_err(|e| RpcError::rpc(-32602, format!("bad chainId: {e}")))?;
        self.with(|s| {
            s.known_chains.insert(chain_id);
        });
        Ok(())
    }

    async fn balance(&self, address: &ChainAddress) -> Result<U256, RpcError> {
        self.enter("eth_getBalance")?;
        Ok(self.with(|s| s.balances.get(address).copied().unwrap_or_default()))
    }

    async fn code_at(&self, address: &ChainAddress) -> Result<Bytes, RpcError> {
        self.enter("eth_getCode")?;
        Ok(self.with(|s| {
            if s.contract.as_ref() == Some(address) {
                Bytes::from_static(&[0x60, 0x80, 0x60, 0x40])
            } else {
                Bytes::new()
            }
        }))
    }

    async fn call(&self, request: &CallRequest, _block: BlockTag) -> Result<Bytes, RpcError> {
        self.enter("eth_call")?;
        self.with(|s| {
            if s.contract.as_ref() != Some(&request.to) {
                return Ok(Bytes::new());
            }
            if let Some(reason) = s.reverting.get(&request.data) {
                return Err(revert_error(reason));
            }
            let data = &request.data;
            if let Ok(call) = abi::usersCall::abi_decode(data, true) {
                let (name, exists) = match s.users.get(&call._0) {
                    Some(name) => (name.clone(), true),
                    None => (String::new(), false),
                };
                return Ok(abi::usersCall::abi_encode_returns(&(name, exists)).into());
            }
            if let Ok(call) = abi::getMessagesCall::abi_decode(data, true) {
                let messages = s.conversation(call.user1, call.user2);
                return Ok(abi::getMessagesCall::abi_encode_returns(&(messages,)).into());
            }
            Err(revert_error("unknown selector"))
        })
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, RpcError> {
        self.enter("eth_sendTransaction")?;
        self.with(|s| {
            s.last_gas = request.gas.map(|g| g.to::<u64>());
            let balance = s.balances.get(&request.from).copied().unwrap_or_default();
            if balance.is_zero() {
                return Err(RpcError::rpc(
                    -32000,
                    "insufficient funds for gas * price + value",
                ));
            }
            if let Some(reason) = s.revert_next.take() {
                s.reverting.insert(request.data.clone(), reason);
            }
            let hash = s.next_hash();
            let tx = PendingTx {
                hash,
                from: request.from,
                data: request.data.clone(),
            };
            if s.auto_mine {
                s.execute(tx);
            } else {
                s.mempool.push(tx);
            }
            Ok(hash)
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, RpcError> {
        self.enter("eth_getTransactionReceipt")?;
        Ok(self.with(|s| s.receipts.get(&hash).cloned()))
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.enter("eth_blockNumber")?;
        Ok(self.with(|s| s.block))
    }
}
