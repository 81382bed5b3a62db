//! Protocol messages for build-server communication.
//!
//! Defines the inbound request envelope, the single-assignment [`Response`],
//! the out-of-band [`Signal`], per-request progress/message reports, and the
//! JSON shapes they take on the wire.

use std::cell::Cell;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::SupportedVersion;
use crate::error::{Result, ServerError};

/// Decoded inbound message, before it is bound to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Requested operation
    pub request_type: String,
    /// Caller-supplied correlation token
    pub cookie: String,
    /// Every other field of the inbound object
    pub data: Value,
}

impl RequestEnvelope {
    /// Create an envelope directly
    pub fn new(request_type: &str, cookie: &str, data: Value) -> Self {
        Self {
            request_type: request_type.to_string(),
            cookie: cookie.to_string(),
            data,
        }
    }

    /// Split a wire object into type, cookie and remaining data.
    ///
    /// `type` is required; a missing `cookie` is treated as empty.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(ServerError::InvalidMessage(
                "request is not a JSON object".to_string(),
            ));
        };

        let request_type = match object.remove("type") {
            Some(Value::String(t)) if !t.is_empty() => t,
            Some(_) => {
                return Err(ServerError::InvalidMessage(
                    "\"type\" must be a non-empty string".to_string(),
                ))
            },
            None => {
                return Err(ServerError::InvalidMessage(
                    "\"type\" is missing".to_string(),
                ))
            },
        };

        let cookie = match object.remove("cookie") {
            Some(Value::String(c)) => c,
            Some(Value::Null) | None => String::new(),
            Some(_) => {
                return Err(ServerError::InvalidMessage(
                    "\"cookie\" must be a string".to_string(),
                ))
            },
        };

        Ok(Self {
            request_type,
            cookie,
            data: Value::Object(object),
        })
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }
}

/// Outbound half of a session's duplex channel.
///
/// Cloning yields another handle onto the same channel; it never owns the
/// session.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Outbox {
    /// Create an outbox and the receiver the transport drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for the transport.
    ///
    /// A closed channel means the peer is gone; the message is dropped.
    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Outbound channel closed, dropping message");
        }
    }
}

/// Incremental status sink handed to long-running engine steps.
pub trait Reporter {
    /// Report a progress counter for the in-flight request
    fn report_progress(&self, minimum: u64, current: u64, maximum: u64, message: &str);

    /// Report a free-text status line for the in-flight request
    fn report_message(&self, message: &str, title: &str);
}

/// A request bound to the session that received it.
///
/// Immutable apart from the answered flag, which exists only to catch
/// reports issued after the response was built.
#[derive(Debug)]
pub struct Request<'s> {
    request_type: String,
    cookie: String,
    data: Value,
    outbox: &'s Outbox,
    answered: Cell<bool>,
}

impl<'s> Request<'s> {
    pub(crate) fn new(envelope: RequestEnvelope, outbox: &'s Outbox) -> Self {
        Self {
            request_type: envelope.request_type,
            cookie: envelope.cookie,
            data: envelope.data,
            outbox,
            answered: Cell::new(false),
        }
    }

    /// Requested operation
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Correlation token
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Operation-specific payload
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Whether a response has already been built for this request
    pub fn is_answered(&self) -> bool {
        self.answered.get()
    }

    /// Build a sealed success response
    pub fn reply(&self, data: Value) -> Response {
        self.mark_answered();
        Response::sealed(self, Payload::Data(data))
    }

    /// Build a sealed error response
    pub fn report_error(&self, message: &str) -> Response {
        self.mark_answered();
        Response::sealed(self, Payload::Error(message.to_string()))
    }

    fn mark_answered(&self) {
        if self.answered.replace(true) {
            tracing::warn!(
                request_type = %self.request_type,
                cookie = %self.cookie,
                "Request answered more than once"
            );
        }
    }

    fn accepts_reports(&self, kind: &str) -> bool {
        if self.answered.get() {
            tracing::warn!(
                request_type = %self.request_type,
                cookie = %self.cookie,
                "Ignoring {kind} report issued after the response"
            );
            return false;
        }
        true
    }
}

impl Reporter for Request<'_> {
    fn report_progress(&self, minimum: u64, current: u64, maximum: u64, message: &str) {
        if !self.accepts_reports("progress") {
            return;
        }
        if minimum > current || current > maximum {
            tracing::warn!(
                minimum,
                current,
                maximum,
                "Ignoring progress report with out-of-range counters"
            );
            return;
        }
        self.outbox.send(ServerMessage::Progress(ProgressReport {
            in_reply_to: self.request_type.clone(),
            cookie: self.cookie.clone(),
            message: message.to_string(),
            minimum,
            current,
            maximum,
        }));
    }

    fn report_message(&self, message: &str, title: &str) {
        if !self.accepts_reports("message") {
            return;
        }
        self.outbox.send(ServerMessage::Message(MessageReport {
            in_reply_to: self.request_type.clone(),
            cookie: self.cookie.clone(),
            message: message.to_string(),
            title: title.to_string(),
        }));
    }
}

/// Response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Still being built
    Unset,
    /// Terminal failure
    Error(String),
    /// Terminal success
    Data(Value),
}

/// Reply to exactly one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    request_type: String,
    cookie: String,
    payload: Payload,
}

impl Response {
    /// Start building a response for `request`
    pub fn new(request: &Request<'_>) -> Self {
        Self {
            request_type: request.request_type.clone(),
            cookie: request.cookie.clone(),
            payload: Payload::Unset,
        }
    }

    fn sealed(request: &Request<'_>, payload: Payload) -> Self {
        Self {
            payload,
            ..Self::new(request)
        }
    }

    /// Build an error response from an envelope that never became a request
    pub(crate) fn rejected(envelope: &RequestEnvelope, message: &str) -> Self {
        Self {
            request_type: envelope.request_type.clone(),
            cookie: envelope.cookie.clone(),
            payload: Payload::Error(message.to_string()),
        }
    }

    /// Seal with data. Sealing twice is an [`ServerError::InvalidState`].
    pub fn set_data(&mut self, data: Value) -> Result<()> {
        self.finish(Payload::Data(data))
    }

    /// Seal with an error message. Sealing twice is an [`ServerError::InvalidState`].
    pub fn set_error(&mut self, message: &str) -> Result<()> {
        self.finish(Payload::Error(message.to_string()))
    }

    fn finish(&mut self, payload: Payload) -> Result<()> {
        if self.is_complete() {
            return Err(ServerError::InvalidState(format!(
                "response to \"{}\" is already sealed",
                self.request_type
            )));
        }
        self.payload = payload;
        Ok(())
    }

    /// Type of the originating request
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// Cookie of the originating request
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// Current payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// True once error or data is set
    pub fn is_complete(&self) -> bool {
        !matches!(self.payload, Payload::Unset)
    }

    /// True if sealed with an error
    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// Error message; fails unless the payload is an error
    pub fn error_message(&self) -> Result<&str> {
        match &self.payload {
            Payload::Error(message) => Ok(message),
            other => Err(ServerError::InvalidState(format!(
                "error_message() on {} response",
                payload_name(other)
            ))),
        }
    }

    /// Success data; fails unless the payload is data
    pub fn data(&self) -> Result<&Value> {
        match &self.payload {
            Payload::Data(data) => Ok(data),
            other => Err(ServerError::InvalidState(format!(
                "data() on {} response",
                payload_name(other)
            ))),
        }
    }
}

fn payload_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::Unset => "unset",
        Payload::Error(_) => "error",
        Payload::Data(_) => "data",
    }
}

/// Session-scoped notification, not tied to any request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name (e.g. "dirty")
    pub name: String,
    /// Signal payload
    pub data: Value,
}

/// Progress counter tied to an in-flight request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Type of the in-flight request
    pub in_reply_to: String,
    /// Cookie of the in-flight request
    pub cookie: String,
    /// Human-readable step description
    pub message: String,
    /// Lower bound
    pub minimum: u64,
    /// Current position
    pub current: u64,
    /// Upper bound
    pub maximum: u64,
}

/// Free-text status tied to an in-flight request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReport {
    /// Type of the in-flight request
    pub in_reply_to: String,
    /// Cookie of the in-flight request
    pub cookie: String,
    /// Message body
    pub message: String,
    /// Message title
    pub title: String,
}

/// Everything the server writes to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Greeting listing the versions this server offers
    Hello {
        /// Registered protocol versions
        supported: Vec<SupportedVersion>,
    },
    /// Terminal reply for a request
    Response(Response),
    /// Progress report for an in-flight request
    Progress(ProgressReport),
    /// Status message for an in-flight request
    Message(MessageReport),
    /// Session-scoped signal
    Signal(Signal),
}

impl ServerMessage {
    /// Wire `type` discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Hello { .. } => "hello",
            ServerMessage::Response(r) if r.is_error() => "error",
            ServerMessage::Response(_) => "reply",
            ServerMessage::Progress(_) => "progress",
            ServerMessage::Message(_) => "message",
            ServerMessage::Signal(_) => "signal",
        }
    }

    /// True for the single message that finishes a request
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::Response(_))
    }

    /// Cookie this message carries (empty for hello and signals)
    pub fn cookie(&self) -> &str {
        match self {
            ServerMessage::Response(r) => r.cookie(),
            ServerMessage::Progress(p) => &p.cookie,
            ServerMessage::Message(m) => &m.cookie,
            ServerMessage::Hello { .. } | ServerMessage::Signal(_) => "",
        }
    }

    /// Encode to the wire object.
    ///
    /// Fails on an unsealed response; the transport must never see one.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            ServerMessage::Hello { supported } => json!({
                "type": "hello",
                "supportedProtocolVersions": supported,
            }),
            ServerMessage::Response(response) => match response.payload() {
                Payload::Unset => {
                    return Err(ServerError::InvalidState(format!(
                        "unsealed response to \"{}\" reached the transport",
                        response.request_type()
                    )))
                },
                Payload::Error(message) => json!({
                    "type": "error",
                    "inReplyTo": response.request_type(),
                    "cookie": response.cookie(),
                    "errorMessage": message,
                }),
                Payload::Data(data) => {
                    let mut object = flatten_data(data);
                    object.insert("type".into(), "reply".into());
                    object.insert("inReplyTo".into(), response.request_type().into());
                    object.insert("cookie".into(), response.cookie().into());
                    Value::Object(object)
                },
            },
            ServerMessage::Progress(p) => json!({
                "type": "progress",
                "inReplyTo": p.in_reply_to,
                "cookie": p.cookie,
                "progressMessage": p.message,
                "progressMinimum": p.minimum,
                "progressCurrent": p.current,
                "progressMaximum": p.maximum,
            }),
            ServerMessage::Message(m) => json!({
                "type": "message",
                "inReplyTo": m.in_reply_to,
                "cookie": m.cookie,
                "message": m.message,
                "title": m.title,
            }),
            ServerMessage::Signal(signal) => {
                let mut object = flatten_data(&signal.data);
                object.insert("type".into(), "signal".into());
                object.insert("name".into(), signal.name.clone().into());
                object.insert("cookie".into(), "".into());
                object.insert("inReplyTo".into(), "".into());
                Value::Object(object)
            },
        };
        Ok(value)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}

/// Objects merge into the envelope; anything else nests under `data`.
fn flatten_data(data: &Value) -> Map<String, Value> {
    match data {
        Value::Object(object) => object.clone(),
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            object.insert("data".into(), other.clone());
            object
        },
    }
}
