//! The chat client: wallet session lifecycle, conversations and sends.
//!
//! [`ChatClient`] is cheap to clone. All clones share one [`ClientState`];
//! background work (the poller, message delivery, the retry worker) runs on
//! tokio tasks that lock the state only for short synchronous updates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cypherchat_net::{
    ChainParams, ChatContract, ContractGateway, GatewayOptions, JsonRpcWallet, SharedProvider,
    WalletConnector, WalletSession,
};
use cypherchat_shared::constants::SEPOLIA_CHAIN_ID;
use cypherchat_shared::{
    ChainAddress, ChatError, ChatMessage, ConversationId, MessageId, MessageStatus, Registration,
};
use cypherchat_store::{Contact, Database, MessageFlag, SessionMarker};

use crate::config::ClientConfig;
use crate::contacts::ContactBook;
use crate::error::{ClientError, Result};
use crate::events::{self, emit_event, ChatEvent, EventSender};
use crate::poller::{fetch_page, PollTarget, Poller};
use crate::state::{ClientState, ConversationState, FlagSets, Outgoing};

/// Builds the contract handle for a freshly connected session.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn open(&self, session: &WalletSession) -> std::result::Result<Arc<dyn ChatContract>, ChatError>;
}

/// [`ContractGateway`] at a fixed address, checked for deployed code.
pub struct DeployedGateway {
    contract: ChainAddress,
    options: GatewayOptions,
}

impl DeployedGateway {
    pub fn new(contract: ChainAddress, options: GatewayOptions) -> Self {
        Self { contract, options }
    }
}

#[async_trait]
impl GatewayFactory for DeployedGateway {
    async fn open(&self, session: &WalletSession) -> std::result::Result<Arc<dyn ChatContract>, ChatError> {
        let gateway = ContractGateway::new(session, self.contract, self.options.clone());
        gateway.ensure_deployed().await?;
        Ok(Arc::new(gateway))
    }
}

/// Who is connected, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub account: ChainAddress,
    pub wallet: String,
    pub registration: Registration,
}

/// A message handed to the delivery pipeline.
pub struct PendingSend {
    pub id: MessageId,
    handle: JoinHandle<std::result::Result<(), ChatError>>,
}

impl PendingSend {
    /// Wait for the pipeline to settle. The message state is updated
    /// whether or not anyone waits.
    pub async fn outcome(self) -> std::result::Result<(), ChatError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::TransactionFailed(format!("send task failed: {e}"))),
        }
    }
}

#[derive(Serialize)]
struct ExportedContact {
    name: Option<String>,
    address: ChainAddress,
}

#[derive(Serialize)]
struct ConversationExport<'a> {
    contact: ExportedContact,
    messages: &'a [ChatMessage],
    exported_at: DateTime<Utc>,
}

struct Inner {
    config: ClientConfig,
    connector: WalletConnector,
    gateways: Arc<dyn GatewayFactory>,
    db: Mutex<Database>,
    state: Arc<Mutex<ClientState>>,
    events: EventSender,
}

#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        db: Database,
        provider: Option<SharedProvider>,
        gateways: Arc<dyn GatewayFactory>,
    ) -> Result<Self> {
        let contacts = ContactBook::load(&db)?;
        let connector = WalletConnector::new(
            provider,
            SEPOLIA_CHAIN_ID,
            ChainParams::sepolia(config.public_rpc_url.clone()),
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                connector,
                gateways,
                db: Mutex::new(db),
                state: Arc::new(Mutex::new(ClientState::new(contacts))),
                events: events::channel(),
            }),
        })
    }

    /// Wire up the JSON-RPC wallet, the database and the deployed contract
    /// from configuration.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let contract = config
            .contract_address
            .ok_or_else(|| ClientError::Config("CYPHERCHAT_CONTRACT_ADDRESS is not set".into()))?;

        let provider: Option<SharedProvider> = match &config.wallet_url {
            Some(url) => match JsonRpcWallet::new(url.clone()) {
                Ok(wallet) => Some(Arc::new(wallet)),
                Err(e) => {
                    warn!(url = %url, error = %e, "Could not create wallet client");
                    None
                }
            },
            None => None,
        };

        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };

        let gateways = Arc::new(DeployedGateway::new(contract, config.gateway_options()));
        Self::new(config, db, provider, gateways)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.inner.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        emit_event(&self.inner.events, event);
    }

    fn notify(&self, message: String) {
        self.emit(ChatEvent::Notice { message });
    }

    /// Surface the error to the user, then hand it back.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.notify(e.notice());
        }
        result
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Connect the wallet and remember the session for the next start.
    pub async fn connect(&self) -> Result<SessionInfo> {
        let result = self.connect_and_remember().await;
        self.report(result)
    }

    async fn connect_and_remember(&self) -> Result<SessionInfo> {
        let info = self.open_session().await?;
        self.db().save_session(&SessionMarker {
            wallet: info.wallet.clone(),
            account: info.account,
            connected_at: Utc::now(),
        })?;
        Ok(info)
    }

    /// Reconnect once from the stored session marker.
    ///
    /// Connects only if reconnecting is enabled and a marker exists. A
    /// failed attempt, or one that lands on a different account, clears the
    /// marker and leaves the client disconnected.
    pub async fn reconnect(&self) -> Result<Option<SessionInfo>> {
        if !self.inner.config.auto_reconnect {
            return Ok(None);
        }
        let Some(marker) = self.db().load_session()? else {
            return Ok(None);
        };

        info!(account = %marker.account, wallet = %marker.wallet, "Reconnecting stored session");

        match self.open_session().await {
            Ok(info) if info.account == marker.account => {
                self.db().save_session(&SessionMarker {
                    connected_at: Utc::now(),
                    ..marker
                })?;
                Ok(Some(info))
            }
            Ok(info) => {
                info!(
                    stored = %marker.account,
                    current = %info.account,
                    "Wallet account changed since last session"
                );
                self.disconnect()?;
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Reconnect failed, forgetting session");
                self.db().clear_session()?;
                Ok(None)
            }
        }
    }

    async fn open_session(&self) -> Result<SessionInfo> {
        let session = self.inner.connector.connect().await?;
        let gateway = self.inner.gateways.open(&session).await?;
        let registration = gateway.get_user(&session.account).await?;

        let info = SessionInfo {
            account: session.account,
            wallet: session.wallet.clone(),
            registration: registration.clone(),
        };

        let token = CancellationToken::new();
        {
            let mut state = self.state();
            state.reset_session();
            state.session = Some(session);
            state.gateway = Some(gateway);
            state.registration = Some(registration.clone());
            state.session_cancel = Some(token.clone());
        }
        self.spawn_retry_worker(token);

        info!(account = %info.account, registered = registration.exists, "Session opened");
        self.emit(ChatEvent::Connected {
            account: info.account,
            registered: registration.exists,
            name: registration.exists.then(|| registration.name.clone()),
        });
        Ok(info)
    }

    pub async fn switch_network(&self) -> Result<()> {
        let result = self.inner.connector.switch_network().await.map_err(ClientError::from);
        self.report(result)
    }

    /// Drop the session, stop every poll and forget the stored marker.
    pub fn disconnect(&self) -> Result<()> {
        let was_connected = {
            let mut state = self.state();
            let connected = state.session.is_some();
            state.reset_session();
            connected
        };
        self.db().clear_session()?;
        if was_connected {
            info!("Wallet disconnected");
            self.emit(ChatEvent::Disconnected);
        }
        Ok(())
    }

    /// React to the wallet reporting a new account list. Returns whether
    /// the session was torn down.
    pub fn accounts_changed(&self, accounts: &[ChainAddress]) -> Result<bool> {
        let Some(current) = self.state().account() else {
            return Ok(false);
        };
        if accounts.first() == Some(&current) {
            return Ok(false);
        }
        info!(previous = %current, next = ?accounts.first(), "Wallet account changed");
        self.disconnect()?;
        Ok(true)
    }

    pub fn whoami(&self) -> Option<SessionInfo> {
        let state = self.state();
        let session = state.session.as_ref()?;
        Some(SessionInfo {
            account: session.account,
            wallet: session.wallet.clone(),
            registration: state.registration.clone().unwrap_or_default(),
        })
    }

    fn gateway(&self) -> Result<Arc<dyn ChatContract>> {
        self.state().gateway.clone().ok_or(ClientError::NotConnected)
    }

    /// Register `name` for the session account, then re-read the chain.
    ///
    /// The registration record is refreshed even when the transaction
    /// fails.
    pub async fn register(&self, name: &str) -> Result<Registration> {
        let result = self.register_and_refresh(name).await;
        self.report(result)
    }

    async fn register_and_refresh(&self, name: &str) -> Result<Registration> {
        let gateway = self.gateway()?;
        let account = gateway.account();
        let outcome = gateway.register_user(name).await;

        let registration = gateway.get_user(&account).await?;
        {
            let mut state = self.state();
            if state.account() == Some(account) {
                state.registration = Some(registration.clone());
            }
        }
        outcome?;

        if registration.exists {
            self.emit(ChatEvent::Registered {
                account,
                name: registration.name.clone(),
            });
        }
        Ok(registration)
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    /// Save a contact. Without a name, the on-chain registration name is
    /// used when available, else the short address.
    pub async fn add_contact(&self, name: Option<&str>, address: &str) -> Result<Contact> {
        let result = self.save_contact(name, address).await;
        self.report(result)
    }

    async fn save_contact(&self, name: Option<&str>, address: &str) -> Result<Contact> {
        let parsed = ChainAddress::parse(address)?;
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => self
                .chain_name(&parsed)
                .await
                .unwrap_or_else(|| parsed.short()),
        };

        let db = self.db();
        let mut state = self.state();
        state.contacts.add(&db, &name, address)
    }

    async fn chain_name(&self, address: &ChainAddress) -> Option<String> {
        let gateway = self.gateway().ok()?;
        match gateway.get_user(address).await {
            Ok(registration) if registration.exists => Some(registration.name),
            Ok(_) => None,
            Err(e) => {
                debug!(address = %address, error = %e, "Name lookup failed");
                None
            }
        }
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.state().contacts.all().to_vec()
    }

    /// Look a contact up by name or address.
    pub fn resolve_contact(&self, query: &str) -> Option<Contact> {
        self.state().contacts.resolve(query).cloned()
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Make `peer` the active conversation and start polling it. Any
    /// previous poller is cancelled first.
    pub fn open_conversation(&self, peer: ChainAddress) -> Result<ConversationId> {
        let (account, gateway) = {
            let state = self.state();
            match (state.account(), state.gateway.clone()) {
                (Some(account), Some(gateway)) => (account, gateway),
                _ => return self.report(Err(ClientError::NotConnected)),
            }
        };
        let conversation = ConversationId::new(account, peer);
        let flags = self.load_flags(&conversation)?;

        let (target, token) = {
            let mut state = self.state();
            state.stop_polling();
            let generation = state.next_generation();
            state.conversation = Some(
                ConversationState::new(conversation, generation, flags)
                    .paged(self.inner.config.page_size),
            );
            state.retries.retain_conversation(&conversation);
            let token = match &state.session_cancel {
                Some(session) => session.child_token(),
                None => CancellationToken::new(),
            };
            state.poll_cancel = Some(token.clone());
            (
                PollTarget {
                    conversation,
                    generation,
                },
                token,
            )
        };

        info!(conversation = %conversation, generation = target.generation, "Conversation opened");

        Poller {
            state: Arc::clone(&self.inner.state),
            gateway,
            events: self.inner.events.clone(),
            interval: self.inner.config.poll_interval,
            max_backoff: self.inner.config.max_poll_backoff,
        }
        .spawn(target, token);

        self.emit(ChatEvent::ConversationUpdated {
            conversation,
            messages: Vec::new(),
        });
        Ok(conversation)
    }

    fn load_flags(&self, conversation: &ConversationId) -> Result<FlagSets> {
        let db = self.db();
        Ok(FlagSets {
            pinned: db.list_flagged(conversation, MessageFlag::Pinned)?.into_iter().collect(),
            starred: db.list_flagged(conversation, MessageFlag::Starred)?.into_iter().collect(),
            deleted: db.list_flagged(conversation, MessageFlag::Deleted)?.into_iter().collect(),
        })
    }

    pub fn close_conversation(&self) {
        let mut state = self.state();
        state.stop_polling();
        state.conversation = None;
        state.retries.clear();
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.state().conversation.as_ref().map(|c| c.id)
    }

    /// The active conversation's visible messages.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state()
            .conversation
            .as_ref()
            .map(|c| c.view().to_vec())
            .unwrap_or_default()
    }

    pub fn draft(&self) -> String {
        self.state()
            .conversation
            .as_ref()
            .map(|c| c.draft.clone())
            .unwrap_or_default()
    }

    pub fn set_draft(&self, text: &str) {
        if let Some(conv) = self.state().conversation.as_mut() {
            conv.draft = text.to_string();
        }
    }

    /// Widen the active conversation by one page of older messages.
    ///
    /// Returns whether even older messages remain. Without paging, or
    /// before the first poll lands, there is nothing more to load.
    pub async fn load_more(&self) -> Result<bool> {
        let result = self.fetch_older().await;
        self.report(result)
    }

    async fn fetch_older(&self) -> Result<bool> {
        let (conversation, generation, gateway, page) = {
            let mut state = self.state();
            let gateway = state.gateway.clone().ok_or(ClientError::NotConnected)?;
            let conv = state
                .conversation
                .as_mut()
                .ok_or(ClientError::NoActiveConversation)?;
            if !conv.has_more() {
                return Ok(false);
            }
            let Some(page) = conv.expand_page() else {
                return Ok(false);
            };
            (conv.id, conv.generation, gateway, page)
        };

        let messages = fetch_page(gateway.as_ref(), &conversation, Some(page)).await?;

        let (view, more) = {
            let mut state = self.state();
            let Some(conv) = state.conversation_at(&conversation, generation) else {
                return Ok(false);
            };
            let update = conv.apply_poll(Some(page), messages);
            (update.changed.then(|| conv.view().to_vec()), conv.has_more())
        };

        debug!(conversation = %conversation, limit = page.limit, more, "Loaded older messages");
        if let Some(messages) = view {
            self.emit(ChatEvent::ConversationUpdated {
                conversation,
                messages,
            });
        }
        Ok(more)
    }

    /// Number of queued automatic resends.
    pub fn pending_retries(&self) -> usize {
        self.state().retries.len()
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Show `content` as pending right away and deliver it in the
    /// background.
    ///
    /// Blank content or no open conversation is a no-op and returns `None`.
    pub fn send(&self, content: &str) -> Option<PendingSend> {
        if content.trim().is_empty() {
            return None;
        }

        let (conversation, gateway, outgoing, view) = {
            let mut state = self.state();
            let account = state.account()?;
            let gateway = state.gateway.clone()?;
            let conv = state.conversation.as_mut()?;
            let outgoing = conv.push_outgoing(account, content.to_string());
            (conv.id, gateway, outgoing, conv.view().to_vec())
        };

        debug!(conversation = %conversation, id = %outgoing.id, "Message queued");
        self.emit(ChatEvent::ConversationUpdated {
            conversation,
            messages: view,
        });
        Some(self.spawn_delivery(conversation, gateway, outgoing))
    }

    /// Send the text currently in the composer.
    pub fn send_draft(&self) -> Option<PendingSend> {
        let draft = self.draft();
        self.send(&draft)
    }

    /// Run a failed message through the pipeline again.
    pub fn resend(&self, id: &MessageId) -> Result<PendingSend> {
        let result = (|| -> Result<_> {
            let mut state = self.state();
            let gateway = state.gateway.clone().ok_or(ClientError::NotConnected)?;
            let conv = state
                .conversation
                .as_mut()
                .ok_or(ClientError::NoActiveConversation)?;
            let conversation = conv.id;
            let outgoing = conv.restart(id, false).ok_or_else(|| {
                ChatError::InvalidInput("Only failed messages can be resent.".into())
            })?;
            state.retries.cancel(id);
            Ok((conversation, gateway, outgoing))
        })();

        let (conversation, gateway, outgoing) = self.report(result)?;
        info!(conversation = %conversation, id = %id, "Resending message");
        self.emit_status(conversation, outgoing.id, MessageStatus::Pending, None);
        Ok(self.spawn_delivery(conversation, gateway, outgoing))
    }

    fn spawn_delivery(
        &self,
        conversation: ConversationId,
        gateway: Arc<dyn ChatContract>,
        outgoing: Outgoing,
    ) -> PendingSend {
        let id = outgoing.id;
        let client = self.clone();
        let handle =
            tokio::spawn(async move { client.deliver(conversation, gateway, outgoing).await });
        PendingSend { id, handle }
    }

    async fn deliver(
        &self,
        conversation: ConversationId,
        gateway: Arc<dyn ChatContract>,
        out: Outgoing,
    ) -> std::result::Result<(), ChatError> {
        let result = async {
            gateway.preflight(&out.to).await?;
            let hash = gateway.submit_message(&out.to, &out.content).await?;
            if self.update_conversation(&conversation, |c| c.mark_sent(&out.id, hash)) {
                self.emit_status(conversation, out.id, MessageStatus::Sent, None);
            }
            gateway.wait_for_confirmation(hash).await?;
            Ok::<(), ChatError>(())
        }
        .await;

        match result {
            Ok(()) => {
                info!(conversation = %conversation, id = %out.id, "Message confirmed");
                if self.update_conversation(&conversation, |c| c.mark_confirmed(&out.id)) {
                    self.emit_status(conversation, out.id, MessageStatus::Confirmed, None);
                }
                Ok(())
            }
            Err(ChatError::ConfirmationTimeout(hash)) => {
                // Already broadcast: stays Sent and the poller absorbs it
                // once mined.
                warn!(conversation = %conversation, id = %out.id, tx = %hash, "Confirmation timed out");
                let error = ChatError::ConfirmationTimeout(hash);
                self.notify(error.notice());
                Err(error)
            }
            Err(e) => {
                self.fail(conversation, &out, &e);
                Err(e)
            }
        }
    }

    fn fail(&self, conversation: ConversationId, out: &Outgoing, error: &ChatError) {
        let kind = error.failure_kind();
        let policy = &self.inner.config.retry;

        let (retry, draft) = {
            let mut state = self.state();
            let Some(conv) = state.conversation_for(&conversation) else {
                debug!(id = %out.id, error = %error, "Send failed after conversation closed");
                return;
            };
            let Some((retries, broadcast)) = conv
                .optimistic(&out.id)
                .map(|e| (e.retries, e.message.tx_hash.is_some()))
            else {
                return;
            };
            let retry = !broadcast && policy.should_retry(error, retries);
            conv.mark_failed(&out.id, kind, !retry);
            let draft = conv.draft.clone();
            if retry {
                state.retries.schedule(
                    policy,
                    conversation,
                    out.id,
                    retries + 1,
                    tokio::time::Instant::now(),
                );
            }
            (retry.then_some(retries + 1), draft)
        };

        warn!(
            conversation = %conversation,
            id = %out.id,
            error = %error,
            kind = ?kind,
            retry = ?retry,
            "Send failed"
        );

        self.emit_status(conversation, out.id, MessageStatus::Failed, Some(kind));
        if retry.is_none() {
            if draft == out.content {
                self.emit(ChatEvent::DraftRestored {
                    conversation,
                    content: draft,
                });
            }
            self.notify(error.notice());
        }
    }

    /// Apply `f` to the conversation if it is still open, then publish
    /// the new view.
    fn update_conversation(
        &self,
        conversation: &ConversationId,
        f: impl FnOnce(&mut ConversationState) -> bool,
    ) -> bool {
        let view = {
            let mut state = self.state();
            let Some(conv) = state.conversation_for(conversation) else {
                return false;
            };
            if !f(conv) {
                return false;
            }
            conv.view().to_vec()
        };
        self.emit(ChatEvent::ConversationUpdated {
            conversation: *conversation,
            messages: view,
        });
        true
    }

    fn emit_status(
        &self,
        conversation: ConversationId,
        id: MessageId,
        status: MessageStatus,
        failure: Option<cypherchat_shared::FailureKind>,
    ) {
        self.emit(ChatEvent::MessageStatusChanged {
            conversation,
            id,
            status,
            failure,
        });
    }

    /// Drains due resends until the session token is cancelled or the
    /// client is dropped.
    fn spawn_retry_worker(&self, token: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let tick = self.inner.config.retry.tick();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ChatClient { inner }.run_due_retries();
            }
            debug!("Retry worker stopped");
        });
    }

    fn run_due_retries(&self) {
        let jobs = {
            let mut state = self.state();
            let jobs = state.retries.take_due(tokio::time::Instant::now());
            let Some(gateway) = state.gateway.clone() else {
                return;
            };
            let mut ready = Vec::new();
            for job in jobs {
                let Some(conv) = state.conversation_for(&job.conversation) else {
                    continue;
                };
                if let Some(outgoing) = conv.restart(&job.message, true) {
                    ready.push((job, outgoing));
                }
            }
            ready
                .into_iter()
                .map(|(job, outgoing)| (job, outgoing, Arc::clone(&gateway)))
                .collect::<Vec<_>>()
        };

        for (job, outgoing, gateway) in jobs {
            info!(id = %job.message, attempt = job.attempt, "Retrying message");
            self.emit_status(job.conversation, outgoing.id, MessageStatus::Pending, None);
            // Detached: the pipeline updates state on its own.
            drop(self.spawn_delivery(job.conversation, gateway, outgoing));
        }
    }

    // ------------------------------------------------------------------
    // Flags, search, export
    // ------------------------------------------------------------------

    fn active(&self) -> Result<ConversationId> {
        self.active_conversation()
            .ok_or(ClientError::NoActiveConversation)
    }

    fn require_message(&self, id: &MessageId) -> Result<ConversationId> {
        let state = self.state();
        let conv = state
            .conversation
            .as_ref()
            .ok_or(ClientError::NoActiveConversation)?;
        if conv.message(id).is_none() {
            return Err(ChatError::InvalidInput(format!("No message {id} in this conversation.")).into());
        }
        Ok(conv.id)
    }

    /// Flip `flag` on a visible message. Returns whether it is now set.
    pub fn toggle_flag(&self, id: &MessageId, flag: MessageFlag) -> Result<bool> {
        let result = (|| -> Result<_> {
            let conversation = self.require_message(id)?;
            let on = self.db().toggle_flag(&conversation, id, flag)?;
            self.apply_flag(conversation, *id, flag, on);
            Ok(on)
        })();
        self.report(result)
    }

    pub fn pin(&self, id: &MessageId) -> Result<bool> {
        self.toggle_flag(id, MessageFlag::Pinned)
    }

    pub fn star(&self, id: &MessageId) -> Result<bool> {
        self.toggle_flag(id, MessageFlag::Starred)
    }

    /// Hide a message locally. Chain data is untouched.
    pub fn delete_local(&self, id: &MessageId) -> Result<()> {
        let result = (|| -> Result<_> {
            let conversation = self.require_message(id)?;
            self.db().set_flag(&conversation, id, MessageFlag::Deleted)?;
            self.apply_flag(conversation, *id, MessageFlag::Deleted, true);
            Ok(())
        })();
        self.report(result)
    }

    fn apply_flag(&self, conversation: ConversationId, id: MessageId, flag: MessageFlag, on: bool) {
        let changed = self.update_conversation(&conversation, |c| {
            c.set_flag(flag, id, on);
            true
        });
        debug!(conversation = %conversation, id = %id, flag = %flag, on, changed, "Flag updated");
    }

    pub fn flagged(&self, flag: MessageFlag) -> Result<Vec<ChatMessage>> {
        let state = self.state();
        let conv = state
            .conversation
            .as_ref()
            .ok_or(ClientError::NoActiveConversation)?;
        Ok(conv.flagged(flag))
    }

    pub fn search(&self, query: &str) -> Result<Vec<ChatMessage>> {
        let state = self.state();
        let conv = state
            .conversation
            .as_ref()
            .ok_or(ClientError::NoActiveConversation)?;
        Ok(conv.search(query))
    }

    /// The active conversation as pretty-printed JSON.
    pub fn export(&self) -> Result<String> {
        let conversation = self.active()?;
        let messages = self.messages();
        let name = self
            .state()
            .contacts
            .find(&conversation.peer)
            .map(|c| c.name.clone());

        let export = ConversationExport {
            contact: ExportedContact {
                name,
                address: conversation.peer,
            },
            messages: &messages,
            exported_at: Utc::now(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }
}
