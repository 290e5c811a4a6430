//! # cypherchat-store
//!
//! Durable local storage for the CypherChat client, backed by SQLite.
//!
//! Everything the chain does not own lives here: the user's contact list,
//! the wallet session marker used to reconnect on the next start, and the
//! pinned / starred / deleted message flags. The crate exposes a
//! synchronous [`Database`] handle wrapping a `rusqlite::Connection` with
//! typed helpers per table.

pub mod contacts;
pub mod database;
pub mod flags;
pub mod migrations;
pub mod models;
pub mod session;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
