//! `WebSocket` connection state, client registry, protocol handling and routing.

pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
