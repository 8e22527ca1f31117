//! Server-Sent Events (SSE) push transport for the gateway.
//!
//! This crate owns the live SSE connections: a registry mapping
//! server-generated connection IDs to channel senders, a thin `Manager`
//! facade over it, and the typed events the gateway pushes to clients.
//!
//! # Message flow
//!
//! 1. A client establishes an SSE connection via the `/events` endpoint,
//!    carrying its session ID as a query parameter.
//! 2. The web layer registers the connection here and joins it to the
//!    session's relay group (owned by the `relay` crate).
//! 3. The message relay looks up the relay group and sends a
//!    `message_received` event to each member connection by ID.
//! 4. On connect, the web layer sends a single `context_set` event with the
//!    session's accumulated context log.
//!
//! Session grouping deliberately does not live here: the registry only
//! routes by connection ID, and which connections belong to which session is
//! the relay crate's concern.

pub mod connection;
pub mod manager;
pub mod message;

pub use manager::Manager;
