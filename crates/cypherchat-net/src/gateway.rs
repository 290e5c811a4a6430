//! Typed access to the chat contract.
//!
//! Reads are plain `eth_call`s against the latest block. Writes go through
//! the wallet with an explicit gas limit and are followed by a receipt wait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::{Bytes, TxHash, U64};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use cypherchat_shared::abi;
use cypherchat_shared::constants::{
    DEFAULT_CONFIRMATIONS, DEFAULT_GAS_LIMIT, DEFAULT_RECEIPT_TIMEOUT_SECS,
    RECEIPT_POLL_INTERVAL_MS,
};
use cypherchat_shared::{ChainAddress, ChatError, ChatMessage, Page, Party, Registration};

use crate::provider::{BlockTag, CallRequest, SharedProvider, TransactionRequest, TxReceipt};
use crate::wallet::WalletSession;

/// The contract operations the chat engine depends on.
#[async_trait]
pub trait ChatContract: Send + Sync {
    /// Account that signs writes.
    fn account(&self) -> ChainAddress;

    async fn get_user(&self, address: &ChainAddress) -> Result<Registration, ChatError>;

    async fn register_user(&self, name: &str) -> Result<TxReceipt, ChatError>;

    /// Fail fast on conditions the chain would revert on anyway.
    async fn preflight(&self, to: &ChainAddress) -> Result<(), ChatError>;

    /// Hand the message to the wallet; resolves once it has a hash.
    async fn submit_message(&self, to: &ChainAddress, content: &str) -> Result<TxHash, ChatError>;

    async fn wait_for_confirmation(&self, hash: TxHash) -> Result<TxReceipt, ChatError>;

    /// Full conversation between two accounts, oldest first.
    async fn get_messages(
        &self,
        user1: &ChainAddress,
        user2: &ChainAddress,
        page: Option<Page>,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn send_message(&self, to: &ChainAddress, content: &str) -> Result<TxReceipt, ChatError> {
        self.preflight(to).await?;
        let hash = self.submit_message(to, content).await?;
        self.wait_for_confirmation(hash).await
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub gas_limit: u64,
    pub confirmations: u64,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            confirmations: DEFAULT_CONFIRMATIONS,
            receipt_poll_interval: Duration::from_millis(RECEIPT_POLL_INTERVAL_MS),
            receipt_timeout: Duration::from_secs(DEFAULT_RECEIPT_TIMEOUT_SECS),
        }
    }
}

pub struct ContractGateway {
    provider: SharedProvider,
    contract: ChainAddress,
    account: ChainAddress,
    options: GatewayOptions,
    /// Calldata of submitted transactions, kept to replay a revert for its reason.
    in_flight: Mutex<HashMap<TxHash, Bytes>>,
}

impl ContractGateway {
    pub fn new(session: &WalletSession, contract: ChainAddress, options: GatewayOptions) -> Self {
        Self {
            provider: session.provider(),
            contract,
            account: session.account,
            options,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn contract(&self) -> ChainAddress {
        self.contract
    }

    /// Fails with [`ChatError::ContractNotFound`] when nothing is deployed
    /// at the configured address.
    pub async fn ensure_deployed(&self) -> Result<(), ChatError> {
        let code = self
            .provider
            .code_at(&self.contract)
            .await
            .map_err(|e| e.into_chat_error())?;
        if code.is_empty() {
            warn!(contract = %self.contract, "No contract code at configured address");
            return Err(ChatError::ContractNotFound(self.contract));
        }
        Ok(())
    }

    async fn read<C>(&self, call: &C) -> Result<C::Return, ChatError>
    where
        C: SolCall + Send + Sync,
        C::Return: Send,
    {
        let request = CallRequest {
            from: Some(self.account),
            to: self.contract,
            data: call.abi_encode().into(),
        };
        let out = self
            .provider
            .call(&request, BlockTag::Latest)
            .await
            .map_err(|e| e.into_chat_error())?;
        C::abi_decode_returns(&out, true)
            .map_err(|e| ChatError::Abi(format!("{}: {e}", C::SIGNATURE)))
    }

    async fn transact(&self, data: Vec<u8>) -> Result<TxHash, ChatError> {
        let data = Bytes::from(data);
        let request = TransactionRequest {
            from: self.account,
            to: self.contract,
            data: data.clone(),
            gas: Some(U64::from(self.options.gas_limit)),
        };
        let hash = self
            .provider
            .send_transaction(&request)
            .await
            .map_err(|e| e.into_chat_error())?;

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(hash, data);
        }
        info!(tx = %hash, gas_limit = self.options.gas_limit, "Transaction submitted");
        Ok(hash)
    }

    fn forget(&self, hash: &TxHash) -> Option<Bytes> {
        self.in_flight.lock().ok().and_then(|mut m| m.remove(hash))
    }

    /// Replay a reverted transaction as a call at its block to recover the
    /// revert reason.
    async fn revert_reason(&self, hash: &TxHash, block: Option<u64>) -> String {
        let Some(data) = self.forget(hash) else {
            return "execution reverted".into();
        };
        let request = CallRequest {
            from: Some(self.account),
            to: self.contract,
            data,
        };
        let tag = block.map(BlockTag::Number).unwrap_or(BlockTag::Latest);
        match self.provider.call(&request, tag).await {
            Err(e) => e
                .revert_reason()
                .unwrap_or_else(|| "execution reverted".into()),
            Ok(_) => "execution reverted".into(),
        }
    }

    async fn has_confirmations(&self, receipt: &TxReceipt) -> bool {
        if self.options.confirmations <= 1 {
            return true;
        }
        let Some(mined_at) = receipt.block() else {
            return false;
        };
        match self.provider.block_number().await {
            Ok(head) => head + 1 >= mined_at + self.options.confirmations,
            Err(e) => {
                debug!(error = %e, "Block number lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChatContract for ContractGateway {
    fn account(&self) -> ChainAddress {
        self.account
    }

    async fn get_user(&self, address: &ChainAddress) -> Result<Registration, ChatError> {
        let ret = self
            .read(&abi::usersCall {
                _0: address.as_address(),
            })
            .await?;
        Ok(ret.into())
    }

    async fn register_user(&self, name: &str) -> Result<TxReceipt, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("Name must not be empty".into()));
        }
        let call = abi::registerUserCall {
            name: name.to_string(),
        };
        let hash = self.transact(call.abi_encode()).await?;
        let receipt = self.wait_for_confirmation(hash).await?;
        info!(account = %self.account, name, "Registered");
        Ok(receipt)
    }

    async fn preflight(&self, to: &ChainAddress) -> Result<(), ChatError> {
        if !self.get_user(&self.account).await?.exists {
            return Err(ChatError::NotRegistered {
                party: Party::Sender,
                address: self.account,
            });
        }
        if !self.get_user(to).await?.exists {
            return Err(ChatError::NotRegistered {
                party: Party::Recipient,
                address: *to,
            });
        }
        let balance = self
            .provider
            .balance(&self.account)
            .await
            .map_err(|e| e.into_chat_error())?;
        if balance.is_zero() {
            return Err(ChatError::InsufficientFunds);
        }
        Ok(())
    }

    async fn submit_message(&self, to: &ChainAddress, content: &str) -> Result<TxHash, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidInput("Message must not be empty".into()));
        }
        let call = abi::sendMessageCall {
            to: to.as_address(),
            content: content.to_string(),
        };
        self.transact(call.abi_encode()).await
    }

    async fn wait_for_confirmation(&self, hash: TxHash) -> Result<TxReceipt, ChatError> {
        let deadline = tokio::time::Instant::now() + self.options.receipt_timeout;

        loop {
            match self.provider.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.succeeded() {
                        let reason = self.revert_reason(&hash, receipt.block()).await;
                        warn!(tx = %hash, reason = %reason, "Transaction reverted");
                        return Err(ChatError::TransactionReverted(reason));
                    }
                    if self.has_confirmations(&receipt).await {
                        self.forget(&hash);
                        debug!(tx = %hash, block = ?receipt.block(), "Transaction confirmed");
                        return Ok(receipt);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(tx = %hash, error = %e, "Receipt lookup failed, retrying"),
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(tx = %hash, "No receipt before deadline, transaction may still be mined");
                return Err(ChatError::ConfirmationTimeout(hash));
            }
            tokio::time::sleep(self.options.receipt_poll_interval).await;
        }
    }

    async fn get_messages(
        &self,
        user1: &ChainAddress,
        user2: &ChainAddress,
        page: Option<Page>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let ret = self
            .read(&abi::getMessagesCall {
                user1: user1.as_address(),
                user2: user2.as_address(),
            })
            .await?;

        let messages = ret
            ._0
            .into_iter()
            .enumerate()
            .map(|(index, raw)| ChatMessage::from_chain(index as u64, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match page {
            Some(page) => page.apply(messages),
            None => messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::MockWallet;
    use crate::provider::ChainParams;
    use crate::wallet::WalletConnector;
    use cypherchat_shared::constants::SEPOLIA_CHAIN_ID;
    use cypherchat_shared::MessageStatus;

    struct Fixture {
        wallet: Arc<MockWallet>,
        gateway: ContractGateway,
        alice: ChainAddress,
        bob: ChainAddress,
    }

    async fn fixture() -> Fixture {
        let wallet = Arc::new(MockWallet::new());
        let alice = wallet.add_account(0xa1);
        let bob = ChainAddress::from(alloy_primitives::Address::repeat_byte(0xb2));
        let contract = wallet.deploy_contract();
        wallet.set_balance(&alice, 1_000_000_000_000_000_000u128);

        let provider: SharedProvider = wallet.clone();
        let session = WalletConnector::new(
            Some(provider),
            SEPOLIA_CHAIN_ID,
            ChainParams::sepolia("https://rpc.example"),
        )
        .connect()
        .await
        .unwrap();

        let options = GatewayOptions {
            receipt_poll_interval: Duration::from_millis(5),
            receipt_timeout: Duration::from_millis(200),
            ..GatewayOptions::default()
        };
        let gateway = ContractGateway::new(&session, contract, options);
        Fixture {
            wallet,
            gateway,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_ensure_deployed() {
        let f = fixture().await;
        f.gateway.ensure_deployed().await.unwrap();

        let empty = ContractGateway::new(
            &WalletConnector::new(
                Some(f.wallet.clone() as SharedProvider),
                SEPOLIA_CHAIN_ID,
                ChainParams::sepolia("https://rpc.example"),
            )
            .connect()
            .await
            .unwrap(),
            f.bob,
            GatewayOptions::default(),
        );
        assert_eq!(
            empty.ensure_deployed().await.unwrap_err(),
            ChatError::ContractNotFound(f.bob)
        );
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let f = fixture().await;
        assert!(!f.gateway.get_user(&f.alice).await.unwrap().exists);

        f.gateway.register_user("  alice ").await.unwrap();
        let reg = f.gateway.get_user(&f.alice).await.unwrap();
        assert!(reg.exists);
        assert_eq!(reg.name, "alice");
    }

    #[tokio::test]
    async fn test_register_empty_name_rejected_locally() {
        let f = fixture().await;
        assert!(matches!(
            f.gateway.register_user("   ").await,
            Err(ChatError::InvalidInput(_))
        ));
        assert_eq!(f.wallet.calls("eth_sendTransaction"), 0);
    }

    #[tokio::test]
    async fn test_writes_carry_gas_limit() {
        let f = fixture().await;
        f.gateway.register_user("alice").await.unwrap();
        assert_eq!(f.wallet.last_gas(), Some(DEFAULT_GAS_LIMIT));
    }

    #[tokio::test]
    async fn test_preflight_order() {
        let f = fixture().await;

        assert_eq!(
            f.gateway.preflight(&f.bob).await.unwrap_err(),
            ChatError::NotRegistered {
                party: Party::Sender,
                address: f.alice
            }
        );

        f.wallet.register(&f.alice, "alice");
        assert_eq!(
            f.gateway.preflight(&f.bob).await.unwrap_err(),
            ChatError::NotRegistered {
                party: Party::Recipient,
                address: f.bob
            }
        );

        f.wallet.register(&f.bob, "bob");
        f.wallet.set_balance(&f.alice, 0);
        assert_eq!(
            f.gateway.preflight(&f.bob).await.unwrap_err(),
            ChatError::InsufficientFunds
        );

        f.wallet.set_balance(&f.alice, 1);
        f.gateway.preflight(&f.bob).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_and_read_back() {
        let f = fixture().await;
        f.wallet.register(&f.alice, "alice");
        f.wallet.register(&f.bob, "bob");

        f.gateway.send_message(&f.bob, "hello").await.unwrap();
        f.gateway.send_message(&f.bob, "again").await.unwrap();

        let msgs = f.gateway.get_messages(&f.alice, &f.bob, None).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[0].sender, f.alice);
        assert_eq!(msgs[0].receiver, f.bob);
        assert_eq!(msgs[0].status, MessageStatus::Confirmed);
        assert_eq!(msgs[1].id, cypherchat_shared::MessageId::Chain(1));

        // Either argument order reads the same conversation.
        let reversed = f.gateway.get_messages(&f.bob, &f.alice, None).await.unwrap();
        assert_eq!(reversed, msgs);

        let paged = f
            .gateway
            .get_messages(&f.alice, &f.bob, Some(Page::new(1, 10)))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].content, "again");
    }

    #[tokio::test]
    async fn test_user_rejects_signature() {
        let f = fixture().await;
        f.wallet.register(&f.alice, "alice");
        f.wallet.register(&f.bob, "bob");
        f.wallet
            .fail_next("eth_sendTransaction", 4001, "User denied transaction signature.");

        assert_eq!(
            f.gateway.send_message(&f.bob, "hello").await.unwrap_err(),
            ChatError::UserRejected
        );
    }

    #[tokio::test]
    async fn test_revert_reason_recovered_from_replay() {
        let f = fixture().await;
        f.wallet.register(&f.alice, "alice");
        f.wallet.register(&f.bob, "bob");
        f.wallet.revert_next("Message too long");

        let hash = f.gateway.submit_message(&f.bob, "hello").await.unwrap();
        assert_eq!(
            f.gateway.wait_for_confirmation(hash).await.unwrap_err(),
            ChatError::TransactionReverted("Message too long".into())
        );
    }

    #[tokio::test]
    async fn test_confirmation_timeout() {
        let f = fixture().await;
        f.wallet.register(&f.alice, "alice");
        f.wallet.register(&f.bob, "bob");
        f.wallet.set_auto_mine(false);

        let hash = f.gateway.submit_message(&f.bob, "hello").await.unwrap();
        assert_eq!(
            f.gateway.wait_for_confirmation(hash).await.unwrap_err(),
            ChatError::ConfirmationTimeout(hash)
        );

        // The broadcast transaction is still honoured once mined.
        f.wallet.mine();
        assert!(f.gateway.wait_for_confirmation(hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirmation_after_mining() {
        let f = fixture().await;
        f.wallet.register(&f.alice, "alice");
        f.wallet.register(&f.bob, "bob");
        f.wallet.set_auto_mine(false);

        let hash = f.gateway.submit_message(&f.bob, "hello").await.unwrap();
        assert!(f
            .gateway
            .get_messages(&f.alice, &f.bob, None)
            .await
            .unwrap()
            .is_empty());

        let wallet = f.wallet.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            wallet.mine();
        });

        let receipt = f.gateway.wait_for_confirmation(hash).await.unwrap();
        assert_eq!(receipt.transaction_hash, hash);
        assert!(receipt.succeeded());
        assert_eq!(
            f.gateway.get_messages(&f.alice, &f.bob, None).await.unwrap().len(),
            1
        );
    }
}
