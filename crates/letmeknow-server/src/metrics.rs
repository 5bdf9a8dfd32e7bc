//! Relay metric names and the Prometheus recorder behind `/metrics`.

use ::metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::ServerError;

/// Connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "letmeknow_ws_connections_total";
/// Connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "letmeknow_ws_disconnections_total";
/// Connections currently open (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "letmeknow_ws_connections_active";
/// Connection lifetime (histogram, seconds).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "letmeknow_ws_connection_duration_seconds";
/// Register requests (counter, label `outcome`: `registered` | `rejected`).
pub const REGISTRATIONS_TOTAL: &str = "letmeknow_registrations_total";
/// Notifications accepted for fan-out (counter).
pub const NOTIFICATIONS_TOTAL: &str = "letmeknow_notifications_total";
/// Payload copies queued to recipients (counter).
pub const DELIVERIES_TOTAL: &str = "letmeknow_deliveries_total";
/// Payload copies that could not be queued (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "letmeknow_delivery_failures_total";
/// Rejected requests (counter, label `reason`).
pub const PROTOCOL_ERRORS_TOTAL: &str = "letmeknow_protocol_errors_total";

const CONNECTION_DURATION_BUCKETS: &[f64] = &[1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 21600.0, 86400.0];

/// Install the global Prometheus recorder and describe every relay metric.
///
/// Call once, before the server starts. The returned handle renders the
/// `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = builder()?.install_recorder()?;
    describe();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

fn builder() -> Result<PrometheusBuilder, ServerError> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(WS_CONNECTION_DURATION_SECONDS.to_owned()),
        CONNECTION_DURATION_BUCKETS,
    )?;
    Ok(builder)
}

fn describe() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "WebSocket connections currently open");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "Lifetime of closed connections"
    );
    describe_counter!(REGISTRATIONS_TOTAL, "Register requests by outcome");
    describe_counter!(NOTIFICATIONS_TOTAL, "Notifications accepted for fan-out");
    describe_counter!(DELIVERIES_TOTAL, "Notification copies queued to recipients");
    describe_counter!(DELIVERY_FAILURES_TOTAL, "Notification copies that failed to queue");
    describe_counter!(PROTOCOL_ERRORS_TOTAL, "Rejected requests by reason");
}
