//! Notification targeting and fan-out.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tracing::{debug, warn};

use super::registry::{Client, ClientRegistry};
use crate::config::FanoutPolicy;

/// A recipient selector from a notification's `targets` list.
///
/// A trailing `*` turns the target into a prefix match on `userID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Matches a `userID` equal to the string.
    Exact(String),
    /// Matches any `userID` starting with the string (the `*` stripped).
    Prefix(String),
}

impl Target {
    /// Whether a registered `userID` is selected by this target.
    pub fn matches(&self, user_id: &str) -> bool {
        match self {
            Self::Exact(id) => user_id == id,
            Self::Prefix(prefix) => user_id.starts_with(prefix.as_str()),
        }
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        match raw.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_owned()),
            None => Self::Exact(raw.to_owned()),
        }
    }
}

/// Counters from one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients selected and written to (including failures).
    pub attempted: usize,
    /// Writes that were queued successfully.
    pub delivered: usize,
    /// Writes that failed.
    pub failed: usize,
    /// Whether the pass stopped early after a failure.
    pub aborted: bool,
}

/// Computes delivery sets from the registry and writes payloads to them.
pub struct NotificationRouter {
    registry: Arc<ClientRegistry>,
    policy: FanoutPolicy,
}

impl NotificationRouter {
    /// Create a router over a shared registry.
    pub fn new(registry: Arc<ClientRegistry>, policy: FanoutPolicy) -> Self {
        Self { registry, policy }
    }

    /// Fan-out policy in effect.
    pub fn policy(&self) -> FanoutPolicy {
        self.policy
    }

    /// Deliver a payload.
    ///
    /// With targets, every registered client matching any target receives it,
    /// the sender included. Without targets, every client except the sender
    /// receives it, registered or not. The registry read lock is held for the
    /// whole pass.
    pub async fn deliver(
        &self,
        payload: &Utf8Bytes,
        targets: &[Target],
        sender_id: &str,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let policy = self.policy;

        self.registry
            .scan(|client| {
                if !is_recipient(client, targets, sender_id) {
                    return ControlFlow::Continue(());
                }
                report.attempted += 1;
                let Err(e) = client.connection.write(payload.clone()) else {
                    report.delivered += 1;
                    return ControlFlow::Continue(());
                };
                report.failed += 1;
                warn!(
                    conn_id = %client.connection.id,
                    user_id = client.user_id().unwrap_or_default(),
                    error = %e,
                    "failed to write notification to client"
                );
                match policy {
                    FanoutPolicy::FailFast => {
                        report.aborted = true;
                        ControlFlow::Break(())
                    }
                    FanoutPolicy::BestEffort => ControlFlow::Continue(()),
                }
            })
            .await;

        debug!(
            sender_id,
            targets = targets.len(),
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            aborted = report.aborted,
            "notification fan-out complete"
        );
        report
    }
}

fn is_recipient(client: &Client, targets: &[Target], sender_id: &str) -> bool {
    if targets.is_empty() {
        return client.connection.id != sender_id;
    }
    client
        .user_id()
        .is_some_and(|user_id| targets.iter().any(|t| t.matches(user_id)))
}
