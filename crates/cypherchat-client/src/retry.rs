//! Bounded automatic resend of transiently failed messages.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use cypherchat_shared::{ChatError, ConversationId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Automatic resends per message before it is left failed.
    pub max_attempts: u32,
    /// Delay before the first resend; doubled for each further one.
    pub interval: Duration,
}

impl RetryPolicy {
    /// `retries_done` counts automatic resends already performed.
    pub fn should_retry(&self, error: &ChatError, retries_done: u32) -> bool {
        self.enabled && retries_done < self.max_attempts && error.is_transient()
    }

    /// Delay before resend number `attempt`, starting at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.interval.saturating_mul(factor)
    }

    /// How often the queue is drained.
    pub fn tick(&self) -> Duration {
        self.interval
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(10))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryJob {
    pub conversation: ConversationId,
    pub message: MessageId,
    pub attempt: u32,
    pub due: Instant,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    jobs: VecDeque<RetryJob>,
}

impl RetryQueue {
    /// Queue resend number `attempt` of `message`. A message is queued at
    /// most once; scheduling it again replaces the earlier job.
    pub fn schedule(
        &mut self,
        policy: &RetryPolicy,
        conversation: ConversationId,
        message: MessageId,
        attempt: u32,
        now: Instant,
    ) -> Instant {
        self.cancel(&message);
        let due = now + policy.delay(attempt);
        self.jobs.push_back(RetryJob {
            conversation,
            message,
            attempt,
            due,
        });
        due
    }

    /// Remove and return every job due at `now`, in scheduling order.
    pub fn take_due(&mut self, now: Instant) -> Vec<RetryJob> {
        let (due, waiting): (Vec<_>, Vec<_>) = self.jobs.drain(..).partition(|j| j.due <= now);
        self.jobs = waiting.into();
        due
    }

    pub fn cancel(&mut self, message: &MessageId) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| &j.message != message);
        self.jobs.len() != before
    }

    /// Drop jobs belonging to other conversations.
    pub fn retain_conversation(&mut self, conversation: &ConversationId) {
        self.jobs.retain(|j| &j.conversation == conversation);
    }

    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use cypherchat_shared::{ChainAddress, Party};

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts: 3,
            interval: Duration::from_secs(5),
        }
    }

    fn conversation() -> ConversationId {
        ConversationId::new(
            ChainAddress::from(Address::repeat_byte(0xaa)),
            ChainAddress::from(Address::repeat_byte(0xbb)),
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.delay(1), Duration::from_secs(5));
        assert_eq!(p.delay(2), Duration::from_secs(10));
        assert_eq!(p.delay(3), Duration::from_secs(20));
    }

    #[test]
    fn test_attempt_cap() {
        let p = policy();
        let transient = ChatError::TransactionFailed("timed out".into());
        assert!(p.should_retry(&transient, 0));
        assert!(p.should_retry(&transient, 2));
        assert!(!p.should_retry(&transient, 3));
    }

    #[test]
    fn test_only_transient_failures_retry() {
        let p = policy();
        assert!(!p.should_retry(&ChatError::UserRejected, 0));
        assert!(!p.should_retry(&ChatError::InsufficientFunds, 0));
        assert!(!p.should_retry(&ChatError::TransactionReverted("no".into()), 0));
        assert!(!p.should_retry(
            &ChatError::NotRegistered {
                party: Party::Recipient,
                address: conversation().peer,
            },
            0
        ));

        let disabled = RetryPolicy {
            enabled: false,
            ..policy()
        };
        assert!(!disabled.should_retry(&ChatError::TransactionFailed("x".into()), 0));
    }

    #[test]
    fn test_take_due_respects_schedule() {
        let p = policy();
        let now = Instant::now();
        let mut queue = RetryQueue::default();
        let first = MessageId::new_local();
        let second = MessageId::new_local();

        queue.schedule(&p, conversation(), first, 1, now);
        queue.schedule(&p, conversation(), second, 2, now);

        assert!(queue.take_due(now).is_empty());
        let due = queue.take_due(now + Duration::from_secs(5));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, first);
        assert_eq!(queue.len(), 1);

        let due = queue.take_due(now + Duration::from_secs(10));
        assert_eq!(due[0].message, second);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reschedule_replaces() {
        let p = policy();
        let now = Instant::now();
        let mut queue = RetryQueue::default();
        let id = MessageId::new_local();

        queue.schedule(&p, conversation(), id, 1, now);
        queue.schedule(&p, conversation(), id, 2, now);
        assert_eq!(queue.len(), 1);
        assert!(queue.cancel(&id));
        assert!(!queue.cancel(&id));
    }

    #[test]
    fn test_retain_conversation() {
        let p = policy();
        let now = Instant::now();
        let mut queue = RetryQueue::default();
        let other = ConversationId::new(conversation().local, conversation().local);

        queue.schedule(&p, conversation(), MessageId::new_local(), 1, now);
        queue.schedule(&p, other, MessageId::new_local(), 1, now);
        queue.retain_conversation(&conversation());
        assert_eq!(queue.len(), 1);
    }
}
