//! Client state shared between user actions and background tasks.
//!
//! [`ClientState`] lives behind an `Arc<Mutex<>>`. Every transition below is
//! synchronous and applied under that lock; nothing awaits while holding it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use cypherchat_net::{ChatContract, WalletSession};
use cypherchat_shared::{
    ChainAddress, ChatMessage, ConversationId, FailureKind, MessageId, MessageStatus, Page,
    Registration,
};
use cypherchat_store::MessageFlag;

use crate::contacts::ContactBook;
use crate::reconcile::{reconcile, OptimisticEntry};
use crate::retry::RetryQueue;

/// Flags loaded from the store when a conversation is opened.
#[derive(Debug, Default, Clone)]
pub struct FlagSets {
    pub pinned: HashSet<MessageId>,
    pub starred: HashSet<MessageId>,
    pub deleted: HashSet<MessageId>,
}

impl FlagSets {
    fn set_mut(&mut self, flag: MessageFlag) -> &mut HashSet<MessageId> {
        match flag {
            MessageFlag::Pinned => &mut self.pinned,
            MessageFlag::Starred => &mut self.starred,
            MessageFlag::Deleted => &mut self.deleted,
        }
    }

    pub fn contains(&self, flag: MessageFlag, id: &MessageId) -> bool {
        match flag {
            MessageFlag::Pinned => self.pinned.contains(id),
            MessageFlag::Starred => self.starred.contains(id),
            MessageFlag::Deleted => self.deleted.contains(id),
        }
    }
}

/// What is needed to (re)submit an optimistic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub id: MessageId,
    pub to: ChainAddress,
    pub content: String,
}

/// Result of applying one fetch of confirmed history.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub changed: bool,
    /// Peer messages that reached the chain since the previous fetch.
    pub incoming: Vec<ChatMessage>,
}

/// One open conversation.
#[derive(Debug)]
pub struct ConversationState {
    pub id: ConversationId,
    /// Bumped on every open; poll results for another generation are stale.
    pub generation: u64,
    pub draft: String,
    confirmed: Vec<ChatMessage>,
    optimistic: Vec<OptimisticEntry>,
    view: Vec<ChatMessage>,
    flags: FlagSets,
    /// `None` reads the whole conversation on every fetch.
    page_size: Option<usize>,
    pages: usize,
    /// Set once the first fetch has been applied.
    loaded: bool,
}

impl ConversationState {
    pub fn new(id: ConversationId, generation: u64, flags: FlagSets) -> Self {
        Self {
            id,
            generation,
            draft: String::new(),
            confirmed: Vec::new(),
            optimistic: Vec::new(),
            view: Vec::new(),
            flags,
            page_size: None,
            pages: 1,
            loaded: false,
        }
    }

    /// Keep only the newest `size` confirmed messages per loaded page.
    /// Zero disables paging.
    pub fn paged(mut self, size: usize) -> Self {
        self.page_size = (size > 0).then_some(size);
        self
    }

    /// Visible messages, ascending by timestamp, locally deleted ones hidden.
    pub fn view(&self) -> &[ChatMessage] {
        &self.view
    }

    /// Window the next fetch should request.
    pub fn page(&self) -> Option<Page> {
        self.page_size
            .map(|size| Page::latest(size.saturating_mul(self.pages)))
    }

    /// Whether older confirmed messages exist outside the loaded window.
    pub fn has_more(&self) -> bool {
        self.page_size.is_some()
            && self
                .confirmed
                .iter()
                .filter_map(|m| m.id.chain_index())
                .min()
                .is_some_and(|oldest| oldest > 0)
    }

    /// Grow the window by one page and return it. `None` when unpaged.
    pub fn expand_page(&mut self) -> Option<Page> {
        self.page_size?;
        self.pages += 1;
        self.page()
    }

    /// Chain index the next confirmed message will get.
    fn next_chain_index(&self) -> u64 {
        self.confirmed
            .iter()
            .filter_map(|m| m.id.chain_index())
            .max()
            .map_or(0, |last| last + 1)
    }

    pub fn optimistic(&self, id: &MessageId) -> Option<&OptimisticEntry> {
        self.optimistic.iter().find(|e| &e.message.id == id)
    }

    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.view.iter().find(|m| &m.id == id)
    }

    pub fn flags(&self) -> &FlagSets {
        &self.flags
    }

    fn rebuild(&mut self) {
        let out = reconcile(&self.confirmed, &self.optimistic);
        self.optimistic = out.retained;
        let deleted = &self.flags.deleted;
        self.view = out
            .view
            .into_iter()
            .filter(|m| !deleted.contains(&m.id))
            .collect();
    }

    /// Replace the confirmed subset with a fresh fetch of `page`.
    ///
    /// A result fetched for a different window than the current one is
    /// ignored. Nothing counts as incoming on the first fetch.
    pub fn apply_poll(&mut self, page: Option<Page>, confirmed: Vec<ChatMessage>) -> PollUpdate {
        if page != self.page() {
            return PollUpdate::default();
        }

        let seen = self.next_chain_index();
        let incoming = if self.loaded {
            confirmed
                .iter()
                .filter(|m| m.sender == self.id.peer)
                .filter(|m| m.id.chain_index().is_some_and(|i| i >= seen))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        self.loaded = true;

        let before = std::mem::take(&mut self.view);
        self.confirmed = confirmed;
        self.rebuild();
        PollUpdate {
            changed: self.view != before,
            incoming,
        }
    }

    /// Insert a pending message and clear the composer.
    pub fn push_outgoing(&mut self, sender: ChainAddress, content: String) -> Outgoing {
        let message = ChatMessage::optimistic(sender, self.id.peer, content.clone());
        let id = message.id;
        let watermark = self.next_chain_index();
        self.optimistic.push(OptimisticEntry::new(message, watermark));
        self.draft.clear();
        self.rebuild();
        Outgoing {
            id,
            to: self.id.peer,
            content,
        }
    }

    /// Put a failed message back to pending for another attempt.
    ///
    /// It gets a fresh timestamp and watermark, as if sent now. Automatic
    /// restarts skip entries that already reached the mempool.
    pub fn restart(&mut self, id: &MessageId, automatic: bool) -> Option<Outgoing> {
        let watermark = self.next_chain_index();
        let peer = self.id.peer;
        let entry = self
            .optimistic
            .iter_mut()
            .find(|e| &e.message.id == id && e.message.status == MessageStatus::Failed)?;
        if automatic && entry.message.tx_hash.is_some() {
            return None;
        }

        entry.watermark = watermark;
        if automatic {
            entry.retries += 1;
        } else {
            entry.retries = 0;
        }
        let message = &mut entry.message;
        message.status = MessageStatus::Pending;
        message.failure = None;
        message.tx_hash = None;
        message.timestamp = Utc::now();
        let outgoing = Outgoing {
            id: *id,
            to: peer,
            content: message.content.clone(),
        };
        self.rebuild();
        Some(outgoing)
    }

    /// Record that the wallet accepted the transaction.
    pub fn mark_sent(&mut self, id: &MessageId, tx_hash: alloy_primitives::TxHash) -> bool {
        self.update(id, |m| {
            m.status = MessageStatus::Sent;
            m.tx_hash = Some(tx_hash);
        })
    }

    pub fn mark_confirmed(&mut self, id: &MessageId) -> bool {
        self.update(id, |m| m.status = MessageStatus::Confirmed)
    }

    /// Mark failed. With `restore_draft`, the text goes back to the
    /// composer unless the user already typed something new. Returns
    /// `false` when the entry is gone.
    pub fn mark_failed(&mut self, id: &MessageId, kind: FailureKind, restore_draft: bool) -> bool {
        let Some(content) = self.optimistic(id).map(|e| e.message.content.clone()) else {
            return false;
        };
        self.update(id, |m| {
            m.status = MessageStatus::Failed;
            m.failure = Some(kind);
        });
        if restore_draft && self.draft.is_empty() {
            self.draft = content;
        }
        true
    }

    fn update(&mut self, id: &MessageId, f: impl FnOnce(&mut ChatMessage)) -> bool {
        let Some(entry) = self.optimistic.iter_mut().find(|e| &e.message.id == id) else {
            return false;
        };
        f(&mut entry.message);
        self.rebuild();
        true
    }

    pub fn set_flag(&mut self, flag: MessageFlag, id: MessageId, on: bool) {
        let set = self.flags.set_mut(flag);
        if on {
            set.insert(id);
        } else {
            set.remove(&id);
        }
        if flag == MessageFlag::Deleted {
            self.rebuild();
        }
    }

    /// Visible messages carrying `flag`, in view order.
    pub fn flagged(&self, flag: MessageFlag) -> Vec<ChatMessage> {
        self.view
            .iter()
            .filter(|m| self.flags.contains(flag, &m.id))
            .cloned()
            .collect()
    }

    /// Case-insensitive search over content and sender address.
    pub fn search(&self, query: &str) -> Vec<ChatMessage> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.view
            .iter()
            .filter(|m| {
                m.content.to_lowercase().contains(&needle) || m.sender.to_hex().contains(&needle)
            })
            .cloned()
            .collect()
    }
}

/// Central client state.
#[derive(Default)]
pub struct ClientState {
    /// `None` until a wallet is connected.
    pub session: Option<WalletSession>,

    /// Contract access bound to the session account.
    pub gateway: Option<Arc<dyn ChatContract>>,

    /// Chain registration of the session account, re-read after each
    /// registration attempt.
    pub registration: Option<Registration>,

    pub conversation: Option<ConversationState>,

    pub contacts: ContactBook,

    pub retries: RetryQueue,

    /// Cancels the active conversation's poll loop.
    pub poll_cancel: Option<CancellationToken>,

    /// Cancels every task tied to the wallet session.
    pub session_cancel: Option<CancellationToken>,

    next_generation: u64,
}

impl ClientState {
    pub fn new(contacts: ContactBook) -> Self {
        Self {
            contacts,
            ..Self::default()
        }
    }

    pub fn account(&self) -> Option<ChainAddress> {
        self.session.as_ref().map(|s| s.account)
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// The open conversation, if it is still `id` at `generation`.
    pub fn conversation_at(
        &mut self,
        id: &ConversationId,
        generation: u64,
    ) -> Option<&mut ConversationState> {
        self.conversation
            .as_mut()
            .filter(|c| &c.id == id && c.generation == generation)
    }

    /// The open conversation, if it is still `id`.
    pub fn conversation_for(&mut self, id: &ConversationId) -> Option<&mut ConversationState> {
        self.conversation.as_mut().filter(|c| &c.id == id)
    }

    /// Stop the active conversation's poller.
    pub fn stop_polling(&mut self) {
        if let Some(token) = self.poll_cancel.take() {
            token.cancel();
        }
    }

    /// Drop everything tied to the wallet session. Contacts stay.
    pub fn reset_session(&mut self) {
        self.stop_polling();
        if let Some(token) = self.session_cancel.take() {
            token.cancel();
        }
        self.session = None;
        self.gateway = None;
        self.registration = None;
        self.conversation = None;
        self.retries.clear();
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, TxHash};
    use chrono::DateTime;

    use super::*;

    fn me() -> ChainAddress {
        ChainAddress::from(Address::repeat_byte(0xaa))
    }

    fn peer() -> ChainAddress {
        ChainAddress::from(Address::repeat_byte(0xbb))
    }

    fn conv() -> ConversationState {
        ConversationState::new(ConversationId::new(me(), peer()), 1, FlagSets::default())
    }

    fn chain_copy(index: u64, content: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::Chain(index),
            sender: me(),
            receiver: peer(),
            content: content.into(),
            timestamp: DateTime::from_timestamp(1_700_000_000 + index as i64, 0).unwrap(),
            status: MessageStatus::Confirmed,
            tx_hash: None,
            failure: None,
        }
    }

    fn from_peer(index: u64, content: &str) -> ChatMessage {
        ChatMessage {
            sender: peer(),
            receiver: me(),
            ..chain_copy(index, content)
        }
    }

    fn history(range: std::ops::Range<u64>) -> Vec<ChatMessage> {
        range.map(|i| from_peer(i, &format!("m{i}"))).collect()
    }

    #[test]
    fn test_send_lifecycle() {
        let mut c = conv();
        c.draft = "hello".into();
        let out = c.push_outgoing(me(), "hello".into());
        assert!(c.draft.is_empty());
        assert_eq!(c.view().len(), 1);
        assert_eq!(c.view()[0].status, MessageStatus::Pending);

        assert!(c.mark_sent(&out.id, TxHash::repeat_byte(7)));
        assert_eq!(c.view()[0].status, MessageStatus::Sent);
        assert!(c.mark_confirmed(&out.id));
        assert_eq!(c.view()[0].status, MessageStatus::Confirmed);

        assert!(c.apply_poll(None, vec![chain_copy(0, "hello")]).changed);
        assert_eq!(c.view().len(), 1);
        assert_eq!(c.view()[0].id, MessageId::Chain(0));
        assert!(!c.mark_confirmed(&out.id), "entry already absorbed");
    }

    #[test]
    fn test_failure_restores_draft_and_restart() {
        let mut c = conv();
        let out = c.push_outgoing(me(), "hi there".into());
        assert!(c.mark_failed(&out.id, FailureKind::Rejected, true));
        assert_eq!(c.draft, "hi there");
        assert_eq!(c.view()[0].failure, Some(FailureKind::Rejected));

        c.apply_poll(None, vec![chain_copy(0, "unrelated")]);
        let again = c.restart(&out.id, true).unwrap();
        assert_eq!(again.content, "hi there");
        let entry = c.optimistic(&out.id).unwrap();
        assert_eq!(entry.watermark, 1);
        assert_eq!(entry.retries, 1);
        assert_eq!(entry.message.status, MessageStatus::Pending);

        assert!(c.restart(&out.id, false).is_none(), "only failed entries restart");
    }

    #[test]
    fn test_failure_keeps_newer_draft() {
        let mut c = conv();
        let out = c.push_outgoing(me(), "first".into());
        c.draft = "typing something else".into();
        c.mark_failed(&out.id, FailureKind::Generic, true);
        assert_eq!(c.draft, "typing something else");

        let mut c = conv();
        let out = c.push_outgoing(me(), "will retry".into());
        c.mark_failed(&out.id, FailureKind::Generic, false);
        assert!(c.draft.is_empty());
    }

    #[test]
    fn test_automatic_restart_skips_broadcast_entry() {
        let mut c = conv();
        let out = c.push_outgoing(me(), "mined later".into());
        c.mark_sent(&out.id, TxHash::repeat_byte(9));
        c.mark_failed(&out.id, FailureKind::Generic, false);

        assert!(c.restart(&out.id, true).is_none());
        assert_eq!(c.optimistic(&out.id).unwrap().message.tx_hash, Some(TxHash::repeat_byte(9)));

        let again = c.restart(&out.id, false).unwrap();
        assert_eq!(again.id, out.id);
        assert!(c.optimistic(&out.id).unwrap().message.tx_hash.is_none());
    }

    #[test]
    fn test_paged_window() {
        // Eight messages on chain, three per page.
        let mut c = conv().paged(3);
        assert_eq!(c.page(), Some(Page::latest(3)));
        assert!(!c.has_more(), "nothing loaded yet");

        let page = c.page();
        c.apply_poll(page, history(5..8));
        assert_eq!(c.view().len(), 3);
        assert!(c.has_more());

        let wider = c.expand_page();
        assert_eq!(wider, Some(Page::latest(6)));
        // Fetched before the window grew.
        assert_eq!(c.apply_poll(page, history(5..8)), PollUpdate::default());

        c.apply_poll(wider, history(2..8));
        assert_eq!(c.view().len(), 6);
        assert!(c.has_more());

        let all = c.expand_page();
        c.apply_poll(all, history(0..8));
        assert_eq!(c.view().len(), 8);
        assert!(!c.has_more());

        let mut unpaged = conv().paged(0);
        assert!(unpaged.page().is_none());
        assert!(unpaged.expand_page().is_none());
        unpaged.apply_poll(None, history(3..5));
        assert!(!unpaged.has_more());
    }

    #[test]
    fn test_watermark_is_next_chain_index() {
        let mut c = conv().paged(2);
        let page = c.page();
        c.apply_poll(page, history(8..10));
        let out = c.push_outgoing(me(), "late".into());
        assert_eq!(c.optimistic(&out.id).unwrap().watermark, 10);
    }

    #[test]
    fn test_incoming_only_after_first_load() {
        let mut c = conv();
        let first = c.apply_poll(None, history(0..2));
        assert!(first.changed);
        assert!(first.incoming.is_empty(), "history is not news");

        let mut batch = history(0..3);
        batch.push(chain_copy(3, "mine"));
        let update = c.apply_poll(None, batch.clone());
        assert_eq!(update.incoming.len(), 1);
        assert_eq!(update.incoming[0].content, "m2");

        let again = c.apply_poll(None, batch);
        assert!(!again.changed);
        assert!(again.incoming.is_empty());
    }

    #[test]
    fn test_deleted_messages_hidden() {
        let mut c = conv();
        c.apply_poll(None, vec![chain_copy(0, "keep"), chain_copy(1, "hide")]);
        c.set_flag(MessageFlag::Deleted, MessageId::Chain(1), true);
        assert_eq!(c.view().len(), 1);
        c.set_flag(MessageFlag::Deleted, MessageId::Chain(1), false);
        assert_eq!(c.view().len(), 2);
    }

    #[test]
    fn test_search_and_flagged() {
        let mut c = conv();
        c.apply_poll(None, vec![chain_copy(0, "Lunch tomorrow?"), chain_copy(1, "sure")]);
        assert_eq!(c.search("LUNCH").len(), 1);
        assert_eq!(c.search(&me().to_hex()).len(), 2);
        assert!(c.search("  ").is_empty());

        c.set_flag(MessageFlag::Starred, MessageId::Chain(1), true);
        let starred = c.flagged(MessageFlag::Starred);
        assert_eq!(starred.len(), 1);
        assert_eq!(starred[0].content, "sure");
    }

    #[test]
    fn test_generation_guard() {
        let mut state = ClientState::default();
        let id = ConversationId::new(me(), peer());
        let generation = state.next_generation();
        state.conversation = Some(ConversationState::new(id, generation, FlagSets::default()));

        assert!(state.conversation_at(&id, generation).is_some());
        assert!(state.conversation_at(&id, generation + 1).is_none());
        let other = ConversationId::new(me(), me());
        assert!(state.conversation_for(&other).is_none());

        state.reset_session();
        assert!(state.conversation.is_none());
    }
}
