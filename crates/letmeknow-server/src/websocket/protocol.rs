//! Wire messages exchanged with relay clients.
//!
//! Inbound frames are parsed into [`InboundRequest`] at the boundary.
//! Optional fields are tolerant: an absent or wrong-typed optional value is
//! treated as unset rather than rejected.

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use super::router::Target;
use crate::error::ProtocolError;

/// A validated inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    /// Bind this connection to a `userID`.
    Register(RegisterRequest),
    /// Fan a notification out to other clients.
    Notification(NotificationRequest),
}

/// `{"type":"register","userID":"..."}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Identity to bind.
    pub user_id: String,
}

/// `{"type":"notification","data":{...},"targets":[...]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Payload to forward. `None` when `data` is missing or not an object;
    /// the handler rejects that only after checking the sender's registration.
    pub data: Option<Notification>,
    /// Recipient selectors. Empty means every other connection.
    pub targets: Vec<Target>,
}

impl InboundRequest {
    /// Parse and validate one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let body = match value {
            Value::Object(body) => body,
            other => {
                return Err(ProtocolError::InvalidJson(format!(
                    "expected a JSON object, found {}",
                    kind_of(&other)
                )));
            }
        };

        match body.get("type") {
            None => Err(ProtocolError::MissingType),
            Some(Value::String(t)) if t == "register" => {
                RegisterRequest::from_body(&body).map(Self::Register)
            }
            Some(Value::String(t)) if t == "notification" => {
                Ok(Self::Notification(NotificationRequest::from_body(&body)))
            }
            Some(_) => Err(ProtocolError::UnknownType),
        }
    }
}

impl RegisterRequest {
    fn from_body(body: &Map<String, Value>) -> Result<Self, ProtocolError> {
        match body.get("userID") {
            None => Err(ProtocolError::MissingUserId),
            Some(Value::String(user_id)) => Ok(Self {
                user_id: user_id.clone(),
            }),
            Some(_) => Err(ProtocolError::InvalidUserId),
        }
    }
}

impl NotificationRequest {
    fn from_body(body: &Map<String, Value>) -> Self {
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .map(Notification::from_data);
        let targets = body
            .get("targets")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Target::from)
                    .collect()
            })
            .unwrap_or_default();
        Self { data, targets }
    }
}

/// Notification payload forwarded to recipients.
///
/// Serializes as `{"type":"notification", ...}` with unset fields omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "notification")]
pub struct Notification {
    /// Headline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Secondary line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Attached image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// Image attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Image {
    /// Image location; empty when the sender gave an image without a URL.
    pub url: String,
}

impl Notification {
    fn from_data(data: &Map<String, Value>) -> Self {
        // An `image` object without a string `url` still yields an image.
        let image = data.get("image").and_then(Value::as_object).map(|image| Image {
            url: string_field(image, "url").unwrap_or_default(),
        });
        Self {
            title: string_field(data, "title"),
            subtitle: string_field(data, "subtitle"),
            content: string_field(data, "content"),
            image,
        }
    }
}

/// `{"type":..., "succeeded":..., "message":...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSuccess {
    /// `register` or `notificationSent`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Whether the request took effect.
    pub succeeded: bool,
    /// Human-readable outcome.
    pub message: &'static str,
}

impl ResponseSuccess {
    /// Reply to a fresh registration.
    pub fn registered() -> Self {
        Self {
            kind: "register",
            succeeded: true,
            message: "Client registered",
        }
    }

    /// Reply to a repeated registration.
    pub fn already_registered() -> Self {
        Self {
            kind: "register",
            succeeded: false,
            message: "Client already registered",
        }
    }

    /// Reply to a registration for a connection missing from the registry.
    pub fn not_connected() -> Self {
        Self {
            kind: "register",
            succeeded: false,
            message: "Client not connected",
        }
    }

    /// Reply after a notification has been fanned out.
    pub fn notification_sent() -> Self {
        Self {
            kind: "notificationSent",
            succeeded: true,
            message: "Message sent",
        }
    }
}

/// `{"type":"error", "message":..., "error"?:...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseError {
    /// Always `error`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Human-readable reason.
    pub message: String,
    /// Underlying parser detail, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProtocolError> for ResponseError {
    fn from(err: &ProtocolError) -> Self {
        Self {
            kind: "error",
            message: err.to_string(),
            error: err.detail().map(str::to_owned),
        }
    }
}

/// Serialize an outbound message into a text frame body.
pub fn encode<T: Serialize>(message: &T) -> Result<Utf8Bytes, serde_json::Error> {
    serde_json::to_string(message).map(Utf8Bytes::from)
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
