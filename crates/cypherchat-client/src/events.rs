use serde::Serialize;
use tokio::sync::broadcast;

use cypherchat_shared::{ChainAddress, ChatMessage, ConversationId, FailureKind, MessageId, MessageStatus};

/// Capacity of the event channel. Slow subscribers skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a front-end needs to redraw.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChatEvent {
    Connected {
        account: ChainAddress,
        registered: bool,
        name: Option<String>,
    },
    Disconnected,
    Registered {
        account: ChainAddress,
        name: String,
    },
    ConversationUpdated {
        conversation: ConversationId,
        messages: Vec<ChatMessage>,
    },
    /// A peer message reached the chain while the conversation was open.
    MessageReceived {
        conversation: ConversationId,
        message: ChatMessage,
    },
    MessageStatusChanged {
        conversation: ConversationId,
        id: MessageId,
        status: MessageStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
    },
    /// Text the composer should show again after a failed send.
    DraftRestored {
        conversation: ConversationId,
        content: String,
    },
    Notice {
        message: String,
    },
}

pub type EventSender = broadcast::Sender<ChatEvent>;

pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

pub fn emit_event(events: &EventSender, event: ChatEvent) {
    if events.receiver_count() == 0 {
        tracing::trace!(?event, "No event subscribers");
        return;
    }
    if let Err(e) = events.send(event) {
        tracing::error!(error = %e, "Failed to emit event");
    }
}
