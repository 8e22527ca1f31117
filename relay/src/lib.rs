//! Session relay core: maps sessions to live push connections and bridges
//! them with the broker subscription lifecycle.
//!
//! - [`context_store::ContextStore`] holds the per-session append-only
//!   context log replayed to newly joined connections.
//! - [`session_manager::SessionManager`] reference-counts joins/leaves and
//!   drives broker subscribe/unsubscribe at the 0→1 and 1→0 transitions.
//! - [`message_relay::SseMessageRelay`] is the dispatcher the broker layer
//!   invokes per delivered message: context append plus SSE fan-out.

pub mod context_store;
pub mod error;
pub mod message_relay;
pub mod session_manager;

pub use context_store::{ContextEntry, ContextStore, SessionContext};
pub use error::Error;
pub use message_relay::SseMessageRelay;
pub use session_manager::SessionManager;
