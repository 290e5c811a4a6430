//! Periodic re-read of the active conversation.
//!
//! One poller runs per open conversation. It stops when its token is
//! cancelled, and every result is checked against the conversation id and
//! generation before it is applied, so a slow response that lands after a
//! switch is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cypherchat_net::ChatContract;
use cypherchat_shared::{ChatError, ChatMessage, ConversationId, Page};

use crate::events::{emit_event, ChatEvent, EventSender};
use crate::state::ClientState;

/// Capped exponential backoff with jitter for failing polls.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl PollBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay after a successful poll. Resets the failure count.
    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.base
    }

    /// Delay after a failed poll: `base * 2^failures`, capped, minus up to
    /// a tenth as jitter.
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 2u32.saturating_pow(self.failures);
        let capped = self.base.saturating_mul(factor).min(self.max);
        let spread = capped.as_millis() as u64 / 10;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        capped.saturating_sub(Duration::from_millis(jitter))
    }
}

/// What a poller is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTarget {
    pub conversation: ConversationId,
    pub generation: u64,
}

/// Read one window of a conversation. Every failure comes back as
/// [`ChatError::Poll`].
pub async fn fetch_page(
    gateway: &dyn ChatContract,
    conversation: &ConversationId,
    page: Option<Page>,
) -> Result<Vec<ChatMessage>, ChatError> {
    gateway
        .get_messages(&conversation.local, &conversation.peer, page)
        .await
        .map_err(|e| match e {
            ChatError::Poll(_) => e,
            other => ChatError::Poll(other.to_string()),
        })
}

pub struct Poller {
    pub state: Arc<Mutex<ClientState>>,
    pub gateway: Arc<dyn ChatContract>,
    pub events: EventSender,
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Poller {
    /// Start polling immediately, then after every interval.
    pub fn spawn(self, target: PollTarget, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(target, token).await })
    }

    async fn run(self, target: PollTarget, token: CancellationToken) {
        let PollTarget {
            conversation,
            generation,
        } = target;
        let mut backoff = PollBackoff::new(self.interval, self.max_backoff);

        info!(conversation = %conversation, generation, "Poller started");

        loop {
            let Some(page) = self.window(target) else {
                debug!(conversation = %conversation, generation, "Conversation closed");
                break;
            };
            let fetched = tokio::select! {
                _ = token.cancelled() => break,
                r = fetch_page(self.gateway.as_ref(), &conversation, page) => r,
            };

            let delay = match fetched {
                Ok(messages) => {
                    if token.is_cancelled() || !self.apply(target, page, messages) {
                        debug!(conversation = %conversation, generation, "Discarding stale poll result");
                        break;
                    }
                    backoff.on_success()
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    warn!(
                        conversation = %conversation,
                        error = %e,
                        failures = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Poll failed, keeping current view"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(conversation = %conversation, generation, "Poller stopped");
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The window to request next, or `None` once the target is gone.
    fn window(&self, target: PollTarget) -> Option<Option<Page>> {
        let mut guard = self.lock();
        guard
            .conversation_at(&target.conversation, target.generation)
            .map(|conv| conv.page())
    }

    /// Returns `false` when the target is no longer the open conversation.
    fn apply(&self, target: PollTarget, page: Option<Page>, messages: Vec<ChatMessage>) -> bool {
        let (update, view) = {
            let mut guard = self.lock();
            let Some(conv) = guard.conversation_at(&target.conversation, target.generation) else {
                return false;
            };
            let update = conv.apply_poll(page, messages);
            let view = update.changed.then(|| conv.view().to_vec());
            (update, view)
        };

        for message in update.incoming {
            debug!(conversation = %target.conversation, id = %message.id, "Message received");
            emit_event(
                &self.events,
                ChatEvent::MessageReceived {
                    conversation: target.conversation,
                    message,
                },
            );
        }
        if let Some(messages) = view {
            emit_event(
                &self.events,
                ChatEvent::ConversationUpdated {
                    conversation: target.conversation,
                    messages,
                },
            );
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use cypherchat_net::mock::MockWallet;
    use cypherchat_net::{ChainParams, ContractGateway, GatewayOptions, SharedProvider, WalletConnector};
    use cypherchat_shared::constants::SEPOLIA_CHAIN_ID;
    use cypherchat_shared::ChainAddress;

    use super::*;
    use crate::contacts::ContactBook;
    use crate::events;
    use crate::state::{ConversationState, FlagSets};

    struct Fixture {
        wallet: Arc<MockWallet>,
        poller: Poller,
        target: PollTarget,
    }

    async fn fixture() -> Fixture {
        let wallet = Arc::new(MockWallet::new());
        let alice = wallet.add_account(0xa1);
        let bob = ChainAddress::from(Address::repeat_byte(0xb2));
        let contract = wallet.deploy_contract();
        wallet.push_message(&bob, &alice, "hi");

        let provider: SharedProvider = wallet.clone();
        let session = WalletConnector::new(
            Some(provider),
            SEPOLIA_CHAIN_ID,
            ChainParams::sepolia("https://rpc.example"),
        )
        .connect()
        .await
        .unwrap();
        let gateway = Arc::new(ContractGateway::new(&session, contract, GatewayOptions::default()));

        let conversation = ConversationId::new(alice, bob);
        let mut state = ClientState::new(ContactBook::default());
        let generation = state.next_generation();
        state.conversation = Some(ConversationState::new(conversation, generation, FlagSets::default()));

        Fixture {
            wallet,
            poller: Poller {
                state: Arc::new(Mutex::new(state)),
                gateway,
                events: events::channel(),
                interval: Duration::from_millis(20),
                max_backoff: Duration::from_millis(80),
            },
            target: PollTarget {
                conversation,
                generation,
            },
        }
    }

    #[tokio::test]
    async fn test_fetch_errors_are_poll_errors() {
        let f = fixture().await;
        let fetched = fetch_page(f.poller.gateway.as_ref(), &f.target.conversation, None).await;
        assert_eq!(fetched.unwrap().len(), 1);

        f.wallet.set_unreachable(true);
        let err = fetch_page(f.poller.gateway.as_ref(), &f.target.conversation, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Poll(_)), "got {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_apply_survives_poisoned_lock() {
        let f = fixture().await;
        let state = Arc::clone(&f.poller.state);
        let _ = std::thread::spawn(move || {
            let _guard = state.lock().unwrap();
            panic!("holding the state lock");
        })
        .join();
        assert!(f.poller.state.is_poisoned());

        let messages = fetch_page(f.poller.gateway.as_ref(), &f.target.conversation, None)
            .await
            .unwrap();
        assert_eq!(f.poller.window(f.target), Some(None));
        assert!(f.poller.apply(f.target, None, messages));
        assert_eq!(f.poller.lock().conversation.as_ref().unwrap().view().len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_peer_message_emits_event() {
        let f = fixture().await;
        let mut rx = f.poller.events.subscribe();
        let conversation = f.target.conversation;

        let first = fetch_page(f.poller.gateway.as_ref(), &conversation, None).await.unwrap();
        assert!(f.poller.apply(f.target, None, first));

        f.wallet.push_message(&conversation.peer, &conversation.local, "are you there?");
        f.wallet.push_message(&conversation.local, &conversation.peer, "yes");
        let next = fetch_page(f.poller.gateway.as_ref(), &conversation, None).await.unwrap();
        assert!(f.poller.apply(f.target, None, next));

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChatEvent::MessageReceived { message, .. } = event {
                received.push(message.content);
            }
        }
        assert_eq!(received, vec!["are you there?".to_string()]);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_secs(3);
        let max = Duration::from_secs(30);
        let mut b = PollBackoff::new(base, max);

        let first = b.on_failure();
        assert!(first <= Duration::from_secs(6) && first >= Duration::from_millis(5_400));
        let second = b.on_failure();
        assert!(second <= Duration::from_secs(12) && second >= Duration::from_millis(10_800));
        assert!(b.on_failure() <= Duration::from_secs(24));

        for _ in 0..10 {
            let d = b.on_failure();
            assert!(d <= max);
            assert!(d >= Duration::from_secs(27));
        }

        assert_eq!(b.on_success(), base);
        assert_eq!(b.failures(), 0);
    }

    #[test]
    fn test_max_never_below_base() {
        let mut b = PollBackoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert!(b.on_failure() >= Duration::from_secs(9));
    }
}
