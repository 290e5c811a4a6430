//! Merging chain state with locally sent messages.
//!
//! [`reconcile`] is the only place where the conversation view is computed.
//! It is a pure function of the confirmed list from the latest poll and the
//! optimistic entries the client still holds, so the order in which poll
//! results and send updates arrive does not matter.

use cypherchat_shared::{ChatMessage, MessageStatus};

/// A locally originated message not yet seen in a poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticEntry {
    pub message: ChatMessage,
    /// Chain index the next confirmed message would have got when this one
    /// was sent. Only chain entries at or past it can be its confirmation.
    pub watermark: u64,
    /// Automatic resends performed so far.
    pub retries: u32,
}

impl OptimisticEntry {
    pub fn new(message: ChatMessage, watermark: u64) -> Self {
        Self {
            message,
            watermark,
            retries: 0,
        }
    }

    fn matches(&self, confirmed: &ChatMessage) -> bool {
        if let (Some(ours), Some(theirs)) = (self.message.tx_hash, confirmed.tx_hash) {
            return ours == theirs;
        }
        let index = confirmed.id.chain_index().unwrap_or(0);
        index >= self.watermark && self.message.same_payload(confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Optimistic entries that remain after matching.
    pub retained: Vec<OptimisticEntry>,
    /// `confirmed ∪ retained`, ascending by timestamp.
    pub view: Vec<ChatMessage>,
}

/// Drop every optimistic entry the chain now reflects and build the view.
///
/// Each confirmed message absorbs at most one optimistic entry, oldest
/// first. Failed entries are never absorbed: they stay visible until the
/// user resends them.
pub fn reconcile(confirmed: &[ChatMessage], optimistic: &[OptimisticEntry]) -> Reconciled {
    let mut claimed = vec![false; confirmed.len()];
    let mut retained = Vec::with_capacity(optimistic.len());

    for entry in optimistic {
        if entry.message.status == MessageStatus::Failed {
            retained.push(entry.clone());
            continue;
        }

        let found = confirmed
            .iter()
            .enumerate()
            .find(|(i, c)| !claimed[*i] && entry.matches(c))
            .map(|(i, _)| i);

        match found {
            Some(i) => claimed[i] = true,
            None => retained.push(entry.clone()),
        }
    }

    let mut view: Vec<ChatMessage> = confirmed.to_vec();
    view.extend(retained.iter().map(|e| e.message.clone()));
    // Stable: ties keep confirmed before optimistic, each in arrival order.
    view.sort_by_key(|m| m.timestamp);

    Reconciled { retained, view }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, TxHash};
    use chrono::{DateTime, Duration, Utc};
    use cypherchat_shared::{ChainAddress, FailureKind, MessageId};

    use super::*;

    fn alice() -> ChainAddress {
        ChainAddress::from(Address::repeat_byte(0xaa))
    }

    fn bob() -> ChainAddress {
        ChainAddress::from(Address::repeat_byte(0xbb))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn chain(index: u64, sender: ChainAddress, content: &str, secs: i64) -> ChatMessage {
        let receiver = if sender == alice() { bob() } else { alice() };
        ChatMessage {
            id: MessageId::Chain(index),
            sender,
            receiver,
            content: content.into(),
            timestamp: at(secs),
            status: MessageStatus::Confirmed,
            tx_hash: None,
            failure: None,
        }
    }

    fn local(content: &str, secs: i64, status: MessageStatus, watermark: u64) -> OptimisticEntry {
        let mut message = ChatMessage::optimistic(alice(), bob(), content.into());
        message.timestamp = at(secs);
        message.status = status;
        OptimisticEntry::new(message, watermark)
    }

    fn contents(view: &[ChatMessage]) -> Vec<&str> {
        view.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_confirmed_only() {
        let confirmed = vec![chain(0, alice(), "a", 1), chain(1, bob(), "b", 2)];
        let out = reconcile(&confirmed, &[]);
        assert_eq!(out.view, confirmed);
        assert!(out.retained.is_empty());
    }

    #[test]
    fn test_unmatched_in_flight_entries_are_kept() {
        let confirmed = vec![chain(0, bob(), "hey", 1)];
        let optimistic = vec![
            local("pending one", 5, MessageStatus::Pending, 1),
            local("sent one", 6, MessageStatus::Sent, 1),
            local("confirmed one", 7, MessageStatus::Confirmed, 1),
        ];
        let out = reconcile(&confirmed, &optimistic);
        assert_eq!(out.retained.len(), 3);
        assert_eq!(
            contents(&out.view),
            vec!["hey", "pending one", "sent one", "confirmed one"]
        );
    }

    #[test]
    fn test_matched_entry_is_replaced_by_chain_copy() {
        let optimistic = vec![local("hello", 10, MessageStatus::Confirmed, 0)];
        let confirmed = vec![chain(0, alice(), "hello", 12)];

        let out = reconcile(&confirmed, &optimistic);
        assert!(out.retained.is_empty());
        assert_eq!(out.view.len(), 1);
        assert_eq!(out.view[0].id, MessageId::Chain(0));
    }

    #[test]
    fn test_older_identical_message_does_not_absorb_new_send() {
        // "ok" was already on chain at index 0 before the second "ok" was sent.
        let confirmed = vec![chain(0, alice(), "ok", 1)];
        let optimistic = vec![local("ok", 5, MessageStatus::Sent, 1)];

        let out = reconcile(&confirmed, &optimistic);
        assert_eq!(out.retained.len(), 1);
        assert_eq!(contents(&out.view), vec!["ok", "ok"]);

        let confirmed = vec![chain(0, alice(), "ok", 1), chain(1, alice(), "ok", 6)];
        let out = reconcile(&confirmed, &out.retained);
        assert!(out.retained.is_empty());
        assert_eq!(out.view.len(), 2);
    }

    #[test]
    fn test_matching_is_one_to_one() {
        let optimistic = vec![
            local("again", 5, MessageStatus::Sent, 0),
            local("again", 6, MessageStatus::Sent, 0),
        ];
        let confirmed = vec![chain(0, alice(), "again", 7)];

        let out = reconcile(&confirmed, &optimistic);
        assert_eq!(out.retained.len(), 1);
        assert_eq!(out.retained[0], optimistic[1]);
        assert_eq!(out.view.len(), 2);
    }

    #[test]
    fn test_different_direction_does_not_match() {
        let optimistic = vec![local("hi", 5, MessageStatus::Sent, 0)];
        let confirmed = vec![chain(0, bob(), "hi", 6)];
        let out = reconcile(&confirmed, &optimistic);
        assert_eq!(out.retained.len(), 1);
    }

    #[test]
    fn test_transaction_hash_wins_over_payload() {
        let mut entry = local("same text", 5, MessageStatus::Sent, 0);
        entry.message.tx_hash = Some(TxHash::repeat_byte(1));

        let mut other_tx = chain(0, alice(), "same text", 6);
        other_tx.tx_hash = Some(TxHash::repeat_byte(2));
        let out = reconcile(&[other_tx.clone()], &[entry.clone()]);
        assert_eq!(out.retained.len(), 1, "different hashes must not match");

        let mut same_tx = chain(1, alice(), "same text", 7);
        same_tx.tx_hash = Some(TxHash::repeat_byte(1));
        let out = reconcile(&[other_tx, same_tx], &[entry]);
        assert!(out.retained.is_empty());
        assert_eq!(out.view.len(), 2);
    }

    #[test]
    fn test_failed_entries_always_kept() {
        let mut failed = local("hello", 5, MessageStatus::Failed, 0);
        failed.message.failure = Some(FailureKind::Generic);
        let confirmed = vec![chain(0, alice(), "hello", 6)];

        let out = reconcile(&confirmed, &[failed.clone()]);
        assert_eq!(out.retained, vec![failed]);
        assert_eq!(out.view.len(), 2);
    }

    #[test]
    fn test_view_sorted_with_stable_ties() {
        let confirmed = vec![chain(0, bob(), "first", 3), chain(1, bob(), "third", 9)];
        let optimistic = vec![
            local("second", 3, MessageStatus::Pending, 2),
            local("fourth", 12, MessageStatus::Pending, 2),
        ];
        let out = reconcile(&confirmed, &optimistic);
        assert_eq!(
            contents(&out.view),
            vec!["first", "second", "third", "fourth"]
        );
    }

    /// Replays a send through several poll ticks and checks the view after
    /// each one: every confirmed message present, no placeholder shown
    /// alongside its chain copy.
    #[test]
    fn test_poll_sequence_never_loses_or_duplicates() {
        let mut chain_state: Vec<ChatMessage> = vec![chain(0, bob(), "yo", 0)];
        let mut optimistic = vec![local("hello", 10, MessageStatus::Pending, 1)];

        let ticks = [
            None,
            Some(("sup", bob(), 11)),
            Some(("hello", alice(), 12)),
            None,
            Some(("hello", alice(), 15)),
        ];

        for (step, tick) in ticks.into_iter().enumerate() {
            if let Some((text, sender, secs)) = tick {
                let index = chain_state.len() as u64;
                chain_state.push(chain(index, sender, text, secs));
            }
            let out = reconcile(&chain_state, &optimistic);

            for c in &chain_state {
                assert!(out.view.contains(c), "step {step}: lost {c:?}");
            }
            assert_eq!(out.view.len(), chain_state.len() + out.retained.len());
            assert!(out.view.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

            let hello_count = out.view.iter().filter(|m| m.content == "hello").count();
            let chain_hello = chain_state.iter().filter(|m| m.content == "hello").count();
            assert_eq!(hello_count, chain_hello.max(1), "step {step}");

            optimistic = out.retained;
        }
    }
}
