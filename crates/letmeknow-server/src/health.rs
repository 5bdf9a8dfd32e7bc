//! Liveness report served at `GET /health`.

use std::ops::ControlFlow;
use std::time::Instant;

use serde::Serialize;

use crate::websocket::registry::ClientRegistry;

/// Body of the `/health` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `"ok"` while the relay is serving.
    pub status: &'static str,
    /// Whole seconds since startup.
    pub uptime_secs: u64,
    /// Open `WebSocket` connections.
    pub connections: usize,
    /// Connections that have set a `userID`.
    pub registered: usize,
}

impl HealthReport {
    /// Count clients in a single registry pass.
    pub async fn collect(registry: &ClientRegistry, started: Instant) -> Self {
        let mut connections = 0;
        let mut registered = 0;
        registry
            .scan(|client| {
                connections += 1;
                registered += usize::from(client.is_registered());
                ControlFlow::Continue(())
            })
            .await;

        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections,
            registered,
        }
    }
}
