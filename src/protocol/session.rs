//! Session management for the build-server protocol.
//!
//! A session owns the version registry and, after a successful handshake,
//! the single active [`Protocol`]. It never looks at pipeline state; that
//! belongs to the protocol.

use std::time::Instant;

use serde_json::{json, Value};

use super::message::{Outbox, Request, RequestEnvelope, Response, ServerMessage};
use super::pipeline::PipelineState;
use super::version::{negotiate, Handshake, ProtocolVersion, SupportedVersion};
use super::versioned::Protocol;
use super::TYPE_HANDSHAKE;
use crate::engine::SharedEngineFactory;
use crate::error::ServerError;

/// One client connection's protocol state
pub struct Session {
    /// Session ID
    id: String,
    /// Outbound channel shared by responses, reports and signals
    outbox: Outbox,
    /// Versions offered in hello and accepted in handshake
    registry: Vec<SupportedVersion>,
    /// Builds the engine a protocol owns
    factory: SharedEngineFactory,
    /// Active protocol after a successful handshake
    protocol: Option<Protocol>,
    /// Why negotiation or activation failed; terminal
    failure: Option<String>,
    /// Session start
    started: Instant,
    /// Requests received
    requests_received: u64,
    /// Responses sent
    responses_sent: u64,
    /// Error responses among them
    errors_sent: u64,
}

impl Session {
    /// Create a session offering stable versions only
    pub fn new(outbox: Outbox, factory: SharedEngineFactory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            outbox,
            registry: Protocol::supported_versions(false),
            factory,
            protocol: None,
            failure: None,
            started: Instant::now(),
            requests_received: 0,
            responses_sent: 0,
            errors_sent: 0,
        }
    }

    /// Also register experimental versions
    pub fn with_experimental(mut self, experimental: bool) -> Self {
        self.registry = Protocol::supported_versions(experimental);
        self
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Versions this session will negotiate
    pub fn supported_versions(&self) -> &[SupportedVersion] {
        &self.registry
    }

    /// Negotiated version, once active
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol.as_ref().map(Protocol::protocol_version)
    }

    /// Pipeline stage of the active protocol
    pub fn pipeline_state(&self) -> Option<PipelineState> {
        self.protocol.as_ref().map(Protocol::pipeline_state)
    }

    /// Whether negotiation or activation failed
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Queue the hello greeting
    pub fn hello(&self) {
        tracing::debug!(session = %self.id, versions = self.registry.len(), "Sending hello");
        self.outbox.send(ServerMessage::Hello {
            supported: self.registry.clone(),
        });
    }

    /// Turn one request into its response without sending it.
    ///
    /// Progress reports and signals raised while handling are queued on the
    /// outbox before this returns.
    pub fn handle(&mut self, envelope: RequestEnvelope) -> Response {
        let span = tracing::debug_span!("session", id = %self.id);
        let _enter = span.enter();

        self.requests_received += 1;
        tracing::debug!(
            request_type = %envelope.request_type,
            cookie = %envelope.cookie,
            "Dispatching request"
        );

        let outbox = self.outbox.clone();
        let request = Request::new(envelope, &outbox);

        if request.request_type() == TYPE_HANDSHAKE {
            return self.handshake(&request);
        }
        if let Some(protocol) = self.protocol.as_mut() {
            return protocol.process(&request);
        }
        request.report_error(&self.inactive_error().to_string())
    }

    /// Handle a request and queue its response
    pub fn dispatch(&mut self, envelope: RequestEnvelope) {
        let response = self.handle(envelope);
        self.send_response(response);
    }

    /// Decode a raw frame and dispatch it.
    ///
    /// An undecodable frame is answered with an error carrying whatever
    /// `type` and `cookie` could be recovered.
    pub fn dispatch_json(&mut self, frame: &str) {
        match RequestEnvelope::from_json(frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(err) => {
                self.requests_received += 1;
                tracing::warn!(session = %self.id, error = %err, "Rejecting malformed request");
                let response = Response::rejected(&salvage(frame), &err.to_string());
                self.send_response(response);
            },
        }
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            protocol_version: self.protocol_version(),
            requests_received: self.requests_received,
            responses_sent: self.responses_sent,
            errors_sent: self.errors_sent,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn send_response(&mut self, response: Response) {
        self.responses_sent += 1;
        if response.is_error() {
            self.errors_sent += 1;
        }
        self.outbox.send(ServerMessage::Response(response));
    }

    fn inactive_error(&self) -> ServerError {
        ServerError::NoActiveProtocol(match &self.failure {
            Some(reason) => reason.clone(),
            None => "no handshake has been performed".to_string(),
        })
    }

    fn handshake(&mut self, request: &Request<'_>) -> Response {
        if let Some(protocol) = &self.protocol {
            let err = ServerError::AlreadyActive(format!(
                "protocol {} was negotiated earlier",
                protocol.protocol_version()
            ));
            return request.report_error(&err.to_string());
        }
        if self.failure.is_some() {
            return request.report_error(&self.inactive_error().to_string());
        }

        // A malformed handshake is answered but does not end the session.
        let handshake = match Handshake::from_value(request.data()) {
            Ok(h) => h,
            Err(err) => return request.report_error(&err.to_string()),
        };

        match self.negotiate_and_activate(request, &handshake) {
            Ok(protocol) => {
                tracing::info!(
                    session = %self.id,
                    version = %protocol.protocol_version(),
                    experimental = protocol.is_experimental(),
                    "Protocol activated"
                );
                let version = protocol.protocol_version();
                self.protocol = Some(protocol);
                request.reply(json!({
                    "protocolVersion": {"major": version.major, "minor": version.minor},
                }))
            },
            Err(err) => {
                tracing::warn!(session = %self.id, error = %err, "Handshake failed");
                debug_assert!(err.is_session_fatal());
                let message = err.to_string();
                self.failure = Some(message.clone());
                request.report_error(&message)
            },
        }
    }

    fn negotiate_and_activate(
        &self,
        request: &Request<'_>,
        handshake: &Handshake,
    ) -> crate::error::Result<Protocol> {
        let chosen = negotiate(&self.registry, handshake.protocol_version.as_ref())?;
        let mut protocol = Protocol::instantiate(chosen.version()).ok_or_else(|| {
            ServerError::NegotiationFailed(format!(
                "protocol version {} is registered but not implemented",
                chosen.version()
            ))
        })?;
        protocol.activate(&self.outbox, request, self.factory.as_ref())?;
        Ok(protocol)
    }
}

/// Best-effort `type`/`cookie` recovery from a frame that failed to decode
fn salvage(frame: &str) -> RequestEnvelope {
    let value: Value = serde_json::from_str(frame).unwrap_or(Value::Null);
    let field = |name: &str| value.get(name).and_then(Value::as_str).unwrap_or("").to_string();
    RequestEnvelope::new(&field("type"), &field("cookie"), Value::Null)
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session ID
    pub session_id: String,
    /// Negotiated version, if any
    pub protocol_version: Option<ProtocolVersion>,
    /// Requests received, malformed ones included
    pub requests_received: u64,
    /// Responses sent
    pub responses_sent: u64,
    /// Error responses sent
    pub errors_sent: u64,
    /// Session uptime in seconds
    pub uptime_secs: u64,
}

impl SessionStats {
    /// Share of responses that were errors, in percent
    pub fn error_percent(&self) -> f64 {
        if self.responses_sent == 0 {
            0.0
        } else {
            self.errors_sent as f64 / self.responses_sent as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::engine::FilesystemEngineFactory;

    fn session(experimental: bool) -> (Session, UnboundedReceiver<ServerMessage>) {
        let (outbox, rx) = Outbox::channel();
        let session =
            Session::new(outbox, Arc::new(FilesystemEngineFactory)).with_experimental(experimental);
        (session, rx)
    }

    fn handshake(version: Value) -> RequestEnvelope {
        RequestEnvelope::new(
            TYPE_HANDSHAKE,
            "hs",
            json!({
                "protocolVersion": version,
                "sourceDirectory": "/src",
                "buildDirectory": "/build",
            }),
        )
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_session_handshake() {
        let (mut session, _rx) = session(false);
        assert!(session.pipeline_state().is_none());

        let response = session.handle(handshake(json!({"major": 1, "minor": 0})));
        assert!(!response.is_error());
        assert_eq!(response.cookie(), "hs");
        assert_eq!(session.protocol_version(), Some(ProtocolVersion::new(1, 0)));
        assert_eq!(session.pipeline_state(), Some(PipelineState::Active));
    }

    #[test]
    fn test_request_before_handshake() {
        let (mut session, _rx) = session(false);
        let response = session.handle(RequestEnvelope::new("configure", "c", json!({})));
        assert!(response
            .error_message()
            .unwrap()
            .starts_with("No active protocol"));
        assert!(!session.is_failed());
    }

    #[test]
    fn test_second_handshake_is_already_active() {
        let (mut session, _rx) = session(false);
        session.handle(handshake(json!({"major": 1})));
        let again = session.handle(handshake(json!({"major": 1})));
        assert!(again.error_message().unwrap().contains("already active"));
        assert_eq!(session.pipeline_state(), Some(PipelineState::Active));
    }

    #[test]
    fn test_experimental_requires_registration_and_opt_in() {
        let (mut hidden, _rx) = session(false);
        let response = hidden.handle(handshake(
            json!({"major": 1, "minor": 1, "isExperimental": true}),
        ));
        assert!(response.is_error());
        assert!(hidden.is_failed());

        let (mut no_opt_in, _rx) = session(true);
        let response = no_opt_in.handle(handshake(json!({"major": 1, "minor": 1})));
        assert!(response.error_message().unwrap().contains("negotiation failed"));

        let follow_up = no_opt_in.handle(RequestEnvelope::new("globalSettings", "g", json!({})));
        assert!(follow_up
            .error_message()
            .unwrap()
            .starts_with("No active protocol"));

        let (mut opted, _rx) = session(true);
        let response = opted.handle(handshake(
            json!({"major": 1, "minor": 1, "isExperimental": true}),
        ));
        assert!(!response.is_error());
        assert_eq!(opted.protocol_version(), Some(ProtocolVersion::new(1, 1)));
    }

    #[test]
    fn test_failed_activation_is_fatal() {
        let (mut session, _rx) = session(false);
        let response = session.handle(RequestEnvelope::new(
            TYPE_HANDSHAKE,
            "hs",
            json!({"protocolVersion": {"major": 1, "minor": 0}, "sourceDirectory": "/src"}),
        ));
        assert!(response.error_message().unwrap().contains("buildDirectory"));
        assert!(session.is_failed());
        assert!(session.pipeline_state().is_none());

        let retry = session.handle(handshake(json!({"major": 1, "minor": 0})));
        assert!(retry.error_message().unwrap().starts_with("No active protocol"));
    }

    #[test]
    fn test_malformed_handshake_is_recoverable() {
        let (mut session, _rx) = session(false);
        let response = session.handle(RequestEnvelope::new(
            TYPE_HANDSHAKE,
            "hs",
            json!({"protocolVersion": "one"}),
        ));
        assert!(response.is_error());
        assert!(!session.is_failed());

        let response = session.handle(handshake(json!({"major": 1})));
        assert!(!response.is_error());
    }

    #[test]
    fn test_hello_and_dispatch_json() {
        let (mut session, mut rx) = session(false);
        session.hello();
        session.dispatch_json(r#"{"cookie":"lost","oops":1}"#);
        session.dispatch_json("not json");

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].kind(), "hello");
        assert_eq!(sent[1].kind(), "error");
        assert_eq!(sent[1].cookie(), "lost");
        assert_eq!(sent[2].kind(), "error");

        let stats = session.stats();
        assert_eq!(stats.requests_received, 2);
        assert_eq!(stats.errors_sent, 2);
        assert!((stats.error_percent() - 100.0).abs() < f64::EPSILON);
    }
}
