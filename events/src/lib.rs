//! Dispatch seam between the broker layer and the relay layer.
//!
//! The broker connection handler calls into whatever dispatcher is registered
//! on it whenever the broker delivers a message for a session topic. The
//! concrete dispatcher (the SSE message relay) lives in the `relay` crate,
//! which itself depends on `broker` for subscribe/unsubscribe calls, so the
//! trait lives here in a leaf crate to avoid a circular dependency.

use async_trait::async_trait;
use uuid::Uuid;

/// A type alias that represents a session or client identifier.
pub type Id = Uuid;

/// Receives every message the broker delivers for a subscribed session topic.
///
/// `channel` is the optional sub-routing segment of the broker topic. It is
/// recorded alongside the payload in the session context but not forwarded
/// to push clients.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, session_id: Id, payload: String, channel: Option<String>);
}
