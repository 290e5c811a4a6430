//! Types shared by every CypherChat crate: chain addresses, message models,
//! the contract ABI, constants and the error taxonomy.

pub mod abi;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{ChatError, FailureKind};
pub use protocol::{ChatMessage, Page, PageAnchor, Registration};
pub use types::{ChainAddress, ConversationId, MessageId, MessageStatus, Party};
