//! # letmeknow-server
//!
//! Real-time notification relay over `WebSocket`.
//!
//! - Client registry: every open connection plus its one-time `userID`
//! - Protocol handling: `register` / `notification` validation pipeline
//! - Notification routing: exact and prefix-wildcard targets, broadcast fan-out
//! - Axum HTTP + `WebSocket` server with health, client listing and metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
