//! Per-message protocol handling.
//!
//! [`handle_message`] runs the validation pipeline for one inbound frame,
//! mutates the registry or invokes the router, queues the reply, and tells the
//! session loop whether to keep reading.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::connection::ClientConnection;
use super::protocol::{
    InboundRequest, NotificationRequest, RegisterRequest, ResponseError, ResponseSuccess, encode,
};
use super::registry::{ClientRegistry, Registration};
use super::router::NotificationRouter;
use crate::config::FanoutPolicy;
use crate::error::ProtocolError;
use crate::metrics::{
    DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, NOTIFICATIONS_TOTAL, PROTOCOL_ERRORS_TOTAL,
    REGISTRATIONS_TOTAL,
};

/// Shared state every session handler works against.
pub struct RelayContext {
    /// Connected clients.
    pub registry: Arc<ClientRegistry>,
    /// Notification fan-out.
    pub router: NotificationRouter,
}

impl RelayContext {
    /// Build a context around an existing registry.
    pub fn new(registry: Arc<ClientRegistry>, policy: FanoutPolicy) -> Self {
        let router = NotificationRouter::new(registry.clone(), policy);
        Self { registry, router }
    }
}

/// What the session loop does after a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next message.
    Continue,
    /// End the session.
    Close,
}

/// Handle one inbound text frame from `connection`.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn handle_message(text: &str, connection: &ClientConnection, ctx: &RelayContext) -> Flow {
    let result = match InboundRequest::parse(text) {
        Ok(InboundRequest::Register(request)) => Ok(register(request, connection, ctx).await),
        Ok(InboundRequest::Notification(request)) => notify(request, connection, ctx).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(flow) => flow,
        Err(err) => reject(&err, connection),
    }
}

async fn register(request: RegisterRequest, connection: &ClientConnection, ctx: &RelayContext) -> Flow {
    let user_id = request.user_id;
    let outcome = ctx.registry.register(&connection.id, user_id.clone()).await;
    let response = match outcome {
        Registration::Registered => {
            info!(user_id = %user_id, "client registered");
            ResponseSuccess::registered()
        }
        Registration::AlreadyRegistered => {
            warn!(user_id = %user_id, "client already registered");
            ResponseSuccess::already_registered()
        }
        Registration::UnknownConnection => {
            warn!(user_id = %user_id, "registration for connection missing from registry");
            ResponseSuccess::not_connected()
        }
    };
    let outcome_label = if outcome.succeeded() { "registered" } else { "rejected" };
    counter!(REGISTRATIONS_TOTAL, "outcome" => outcome_label).increment(1);
    ctx.registry.trace_snapshot().await;
    reply(connection, &response)
}

async fn notify(
    request: NotificationRequest,
    connection: &ClientConnection,
    ctx: &RelayContext,
) -> Result<Flow, ProtocolError> {
    if !ctx.registry.is_registered(&connection.id).await {
        return Err(ProtocolError::NotRegistered);
    }
    let data = request.data.ok_or(ProtocolError::MissingData)?;

    let payload = match encode(&data) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to serialize notification");
            return Ok(Flow::Close);
        }
    };

    let report = ctx
        .router
        .deliver(&payload, &request.targets, &connection.id)
        .await;
    counter!(NOTIFICATIONS_TOTAL).increment(1);
    counter!(DELIVERIES_TOTAL).increment(report.delivered as u64);
    counter!(DELIVERY_FAILURES_TOTAL).increment(report.failed as u64);
    info!(
        policy = %ctx.router.policy(),
        targets = request.targets.len(),
        delivered = report.delivered,
        failed = report.failed,
        aborted = report.aborted,
        "notification sent"
    );

    // The sender is told the message went out even when part of the fan-out failed.
    Ok(reply(connection, &ResponseSuccess::notification_sent()))
}

fn reject(err: &ProtocolError, connection: &ClientConnection) -> Flow {
    warn!(error = %err, detail = err.detail(), fatal = err.is_fatal(), "rejected request");
    counter!(PROTOCOL_ERRORS_TOTAL, "reason" => err.code()).increment(1);
    match reply(connection, &ResponseError::from(err)) {
        Flow::Continue if !err.is_fatal() => Flow::Continue,
        _ => Flow::Close,
    }
}

/// Serialize and queue a reply; any failure ends the session.
fn reply<T: Serialize>(connection: &ClientConnection, message: &T) -> Flow {
    let frame = match encode(message) {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            return Flow::Close;
        }
    };
    match connection.write(frame) {
        Ok(()) => Flow::Continue,
        Err(e) => {
            info!(error = %e, "failed to queue response");
            Flow::Close
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Utf8Bytes;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    struct Peer {
        connection: Arc<ClientConnection>,
        rx: mpsc::Receiver<Utf8Bytes>,
    }

    impl Peer {
        fn next_json(&mut self) -> Value {
            let frame = self.rx.try_recv().expect("expected a queued message");
            serde_json::from_str(frame.as_str()).unwrap()
        }

        fn is_idle(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }

        async fn send(&self, ctx: &RelayContext, text: &str) -> Flow {
            handle_message(text, &self.connection, ctx).await
        }
    }

    fn context() -> RelayContext {
        RelayContext::new(Arc::new(ClientRegistry::new()), FanoutPolicy::FailFast)
    }

    async fn join(ctx: &RelayContext, id: &str) -> Peer {
        let (tx, rx) = mpsc::channel(16);
        let peer = "10.0.0.1:9000".parse().unwrap();
        let connection = Arc::new(ClientConnection::new(id.into(), peer, tx));
        ctx.registry.add(connection.clone()).await;
        Peer { connection, rx }
    }

    async fn join_registered(ctx: &RelayContext, id: &str, user_id: &str) -> Peer {
        let mut peer = join(ctx, id).await;
        let text = json!({"type": "register", "userID": user_id}).to_string();
        assert_eq!(peer.send(ctx, &text).await, Flow::Continue);
        assert_eq!(peer.next_json()["succeeded"], true);
        peer
    }

    #[tokio::test]
    async fn register_then_register_again() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;

        let flow = peer.send(&ctx, r#"{"type":"register","userID":"u1"}"#).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            peer.next_json(),
            json!({"type": "register", "succeeded": true, "message": "Client registered"})
        );

        let flow = peer.send(&ctx, r#"{"type":"register","userID":"u2"}"#).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            peer.next_json(),
            json!({"type": "register", "succeeded": false, "message": "Client already registered"})
        );
        assert_eq!(ctx.registry.user_id("c1").await.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn register_from_connection_missing_from_registry() {
        let ctx = context();
        let (tx, mut rx) = mpsc::channel(4);
        let detached = ClientConnection::new("gone".into(), "10.0.0.9:9000".parse().unwrap(), tx);

        let flow = handle_message(r#"{"type":"register","userID":"u1"}"#, &detached, &ctx).await;

        assert_eq!(flow, Flow::Continue);
        let frame = rx.try_recv().unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(frame.as_str()).unwrap(),
            json!({"type": "register", "succeeded": false, "message": "Client not connected"})
        );
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_json_closes_with_detail() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;

        let flow = peer.send(&ctx, "{oops").await;
        assert_eq!(flow, Flow::Close);
        let resp = peer.next_json();
        assert_eq!(resp["type"], "error");
        assert_eq!(resp["message"], "Error parsing JSON");
        assert!(!resp["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_type_closes() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;
        assert_eq!(peer.send(&ctx, r#"{"userID":"u1"}"#).await, Flow::Close);
        assert_eq!(
            peer.next_json(),
            json!({"type": "error", "message": "Error: JSON does not contain type"})
        );
    }

    #[tokio::test]
    async fn unknown_type_closes() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;
        assert_eq!(peer.send(&ctx, r#"{"type":"ping"}"#).await, Flow::Close);
        assert_eq!(
            peer.next_json()["message"],
            "Error: JSON type is not 'register' or 'notification'"
        );
    }

    #[tokio::test]
    async fn register_without_user_id_closes() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;
        assert_eq!(peer.send(&ctx, r#"{"type":"register"}"#).await, Flow::Close);
        assert_eq!(peer.next_json()["message"], "Error: JSON does not contain userID");
        assert!(!ctx.registry.is_registered("c1").await);
    }

    #[tokio::test]
    async fn notification_before_register_keeps_connection() {
        let ctx = context();
        let mut sender = join(&ctx, "sender").await;
        let mut other = join(&ctx, "other").await;

        let flow = sender
            .send(&ctx, r#"{"type":"notification","data":{"content":"hi"}}"#)
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            sender.next_json(),
            json!({"type": "error", "message": "Error: Client not registered"})
        );
        assert!(other.is_idle());
    }

    #[tokio::test]
    async fn unregistered_check_precedes_data_check() {
        let ctx = context();
        let mut peer = join(&ctx, "c1").await;
        let flow = peer.send(&ctx, r#"{"type":"notification"}"#).await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(peer.next_json()["message"], "Error: Client not registered");
    }

    #[tokio::test]
    async fn notification_without_data_closes() {
        let ctx = context();
        let mut peer = join_registered(&ctx, "c1", "u1").await;
        let flow = peer.send(&ctx, r#"{"type":"notification","targets":["u1"]}"#).await;
        assert_eq!(flow, Flow::Close);
        assert_eq!(peer.next_json()["message"], "Error: JSON is not of type Notification");
        assert!(peer.is_idle());
    }

    #[tokio::test]
    async fn broadcast_reaches_others_then_acknowledges_sender() {
        let ctx = context();
        let mut receiver = join_registered(&ctx, "c1", "u1").await;
        let mut anonymous = join(&ctx, "c2").await;
        let mut sender = join_registered(&ctx, "c3", "u3").await;

        let flow = sender
            .send(&ctx, r#"{"type":"notification","data":{"content":"hi"}}"#)
            .await;

        assert_eq!(flow, Flow::Continue);
        let expected = json!({"type": "notification", "content": "hi"});
        assert_eq!(receiver.next_json(), expected);
        assert_eq!(anonymous.next_json(), expected);
        assert_eq!(
            sender.next_json(),
            json!({"type": "notificationSent", "succeeded": true, "message": "Message sent"})
        );
        assert!(sender.is_idle());
    }

    #[tokio::test]
    async fn wildcard_targets() {
        let ctx = context();
        let mut a1 = join_registered(&ctx, "c1", "a1").await;
        let mut a2 = join_registered(&ctx, "c2", "a2").await;
        let mut b1 = join_registered(&ctx, "c3", "b1").await;

        let flow = b1
            .send(
                &ctx,
                r#"{"type":"notification","data":{"title":"T"},"targets":["a*"]}"#,
            )
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(a1.next_json()["title"], "T");
        assert_eq!(a2.next_json()["title"], "T");
        assert_eq!(b1.next_json()["type"], "notificationSent");
        assert!(b1.is_idle());
    }

    #[tokio::test]
    async fn sender_in_targets_receives_own_notification() {
        let ctx = context();
        let mut me = join_registered(&ctx, "c1", "me").await;

        let _ = me
            .send(
                &ctx,
                r#"{"type":"notification","data":{"content":"note to self"},"targets":["me"]}"#,
            )
            .await;

        assert_eq!(me.next_json()["content"], "note to self");
        assert_eq!(me.next_json()["type"], "notificationSent");
    }

    #[tokio::test]
    async fn failed_fan_out_still_acknowledges_sender() {
        let ctx = context();
        let (tx, rx) = mpsc::channel(1);
        let stuck = Arc::new(ClientConnection::new(
            "stuck".into(),
            "10.0.0.2:9000".parse().unwrap(),
            tx,
        ));
        ctx.registry.add(stuck).await;
        drop(rx);
        let mut sender = join_registered(&ctx, "sender", "s").await;

        let flow = sender
            .send(&ctx, r#"{"type":"notification","data":{}}"#)
            .await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(sender.next_json()["succeeded"], true);
    }

    #[tokio::test]
    async fn closed_sender_channel_ends_session() {
        let ctx = context();
        let Peer { connection, rx } = join(&ctx, "c1").await;
        drop(rx);
        let flow = handle_message(r#"{"type":"register","userID":"u1"}"#, &connection, &ctx).await;
        assert_eq!(flow, Flow::Close);
    }

    #[tokio::test]
    async fn image_quirk_forwarded() {
        let ctx = context();
        let mut receiver = join(&ctx, "c1").await;
        let mut sender = join_registered(&ctx, "c2", "s").await;

        let _ = sender
            .send(&ctx, r#"{"type":"notification","data":{"image":{"alt":"x"}}}"#)
            .await;

        assert_eq!(
            receiver.next_json(),
            json!({"type": "notification", "image": {"url": ""}})
        );
    }
}
