//! Versioned protocol contract and activation lifecycle.
//!
//! Every protocol version is a variant of [`Protocol`]. Variants share the
//! activation rules in [`ProtocolCore`] and differ only in their handlers.

use serde_json::Value;

use super::message::{Outbox, Request, Response, ServerMessage, Signal};
use super::pipeline::{PipelineState, Protocol1_0, Protocol1_1};
use super::version::{Handshake, ProtocolVersion, SupportedVersion};
use crate::engine::{BuildEngine, EngineFactory};
use crate::error::{Result, ServerError};

/// Activation lifecycle of one protocol instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Created, never activated
    Inactive,
    /// Activated, dispatch allowed
    Active,
    /// Activation was attempted and failed; terminal
    Failed,
}

/// State every protocol version shares: the owned engine and the signal route.
pub struct ProtocolCore {
    engine: Option<Box<dyn BuildEngine>>,
    outbox: Option<Outbox>,
    activation: Activation,
}

impl Default for ProtocolCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCore {
    /// Create an inactive core without an engine
    pub fn new() -> Self {
        Self {
            engine: None,
            outbox: None,
            activation: Activation::Inactive,
        }
    }

    /// Current lifecycle stage
    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// True once activation succeeded
    pub fn is_active(&self) -> bool {
        self.activation == Activation::Active
    }

    /// The owned engine
    pub fn engine(&self) -> Result<&dyn BuildEngine> {
        self.engine
            .as_deref()
            .ok_or_else(|| ServerError::InvalidState("protocol has no build engine".into()))
    }

    /// Inactive core that already owns `engine`
    #[cfg(test)]
    pub(crate) fn with_engine(engine: Box<dyn BuildEngine>) -> Self {
        Self {
            engine: Some(engine),
            outbox: None,
            activation: Activation::Inactive,
        }
    }

    /// The owned engine, mutably
    pub fn engine_mut(&mut self) -> Result<&mut (dyn BuildEngine + 'static)> {
        self.engine
            .as_deref_mut()
            .ok_or_else(|| ServerError::InvalidState("protocol has no build engine".into()))
    }

    /// Emit a session-scoped signal. Only legal after activation.
    pub fn send_signal(&self, name: &str, data: Value) -> Result<()> {
        match (&self.outbox, self.activation) {
            (Some(outbox), Activation::Active) => {
                tracing::debug!(signal = name, "Sending signal");
                outbox.send(ServerMessage::Signal(Signal {
                    name: name.to_string(),
                    data,
                }));
                Ok(())
            },
            _ => Err(ServerError::InvalidState(format!(
                "signal \"{name}\" sent by an inactive protocol"
            ))),
        }
    }
}

/// Hooks a concrete protocol version implements.
pub trait VersionedProtocol {
    /// (major, minor) identity
    const VERSION: ProtocolVersion;
    /// Negotiable only with explicit opt-in
    const EXPERIMENTAL: bool;

    /// Shared activation state
    fn core(&self) -> &ProtocolCore;

    /// Shared activation state, mutably
    fn core_mut(&mut self) -> &mut ProtocolCore;

    /// Version-specific activation, run after the engine exists
    fn do_activate(&mut self, handshake: &Handshake) -> Result<()>;

    /// Turn one request into its response
    fn process(&mut self, request: &Request<'_>) -> Response;
}

/// The closed set of protocol versions this server implements.
pub enum Protocol {
    /// Stable 1.0 pipeline
    V1_0(Protocol1_0),
    /// Experimental 1.1: 1.0 plus cache inspection
    V1_1(Protocol1_1),
}

macro_rules! each_version {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Protocol::V1_0($p) => $body,
            Protocol::V1_1($p) => $body,
        }
    };
}

impl Protocol {
    /// Every implemented version, experimental ones included
    pub const ALL: &'static [SupportedVersion] = &[
        SupportedVersion::new(Protocol1_0::VERSION, Protocol1_0::EXPERIMENTAL),
        SupportedVersion::new(Protocol1_1::VERSION, Protocol1_1::EXPERIMENTAL),
    ];

    /// Versions to register, optionally hiding experimental ones
    pub fn supported_versions(include_experimental: bool) -> Vec<SupportedVersion> {
        Self::ALL
            .iter()
            .filter(|v| include_experimental || !v.is_experimental)
            .copied()
            .collect()
    }

    /// Fresh, inactive instance of `version`
    pub fn instantiate(version: ProtocolVersion) -> Option<Self> {
        if version == Protocol1_0::VERSION {
            Some(Protocol::V1_0(Protocol1_0::new()))
        } else if version == Protocol1_1::VERSION {
            Some(Protocol::V1_1(Protocol1_1::new()))
        } else {
            None
        }
    }

    /// (major, minor) identity
    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            Protocol::V1_0(_) => Protocol1_0::VERSION,
            Protocol::V1_1(_) => Protocol1_1::VERSION,
        }
    }

    /// Whether this version needs explicit opt-in
    pub fn is_experimental(&self) -> bool {
        match self {
            Protocol::V1_0(_) => Protocol1_0::EXPERIMENTAL,
            Protocol::V1_1(_) => Protocol1_1::EXPERIMENTAL,
        }
    }

    /// Pipeline stage of this instance
    pub fn pipeline_state(&self) -> PipelineState {
        each_version!(self, p => p.state())
    }

    fn core(&self) -> &ProtocolCore {
        each_version!(self, p => p.core())
    }

    fn core_mut(&mut self) -> &mut ProtocolCore {
        each_version!(self, p => p.core_mut())
    }

    /// Lifecycle stage
    pub fn activation(&self) -> Activation {
        self.core().activation()
    }

    /// One-time setup: bind the signal route, build the engine from the
    /// handshake, then run the version hook.
    ///
    /// Any failure leaves the instance permanently unusable.
    pub fn activate(
        &mut self,
        outbox: &Outbox,
        request: &Request<'_>,
        factory: &dyn EngineFactory,
    ) -> Result<()> {
        if self.activation() != Activation::Inactive {
            return Err(ServerError::InvalidState(format!(
                "protocol {} activated twice",
                self.protocol_version()
            )));
        }

        let result = self.try_activate(outbox, request, factory);
        let core = self.core_mut();
        match result {
            Ok(()) => {
                core.activation = Activation::Active;
                Ok(())
            },
            Err(err) => {
                core.activation = Activation::Failed;
                core.engine = None;
                core.outbox = None;
                Err(match err {
                    ServerError::ActivationFailed(_) => err,
                    other => ServerError::ActivationFailed(other.to_string()),
                })
            },
        }
    }

    fn try_activate(
        &mut self,
        outbox: &Outbox,
        request: &Request<'_>,
        factory: &dyn EngineFactory,
    ) -> Result<()> {
        let handshake = Handshake::from_value(request.data())?;
        let engine = factory.create(&handshake)?;

        let core = self.core_mut();
        core.outbox = Some(outbox.clone());
        core.engine = Some(engine);

        each_version!(self, p => p.do_activate(&handshake))
    }

    /// Dispatch a request; rejected unless activation succeeded
    pub fn process(&mut self, request: &Request<'_>) -> Response {
        if !self.core().is_active() {
            let err = ServerError::NoActiveProtocol(format!(
                "protocol {} is not active",
                self.protocol_version()
            ));
            return request.report_error(&err.to_string());
        }
        each_version!(self, p => p.process(request))
    }

    /// Emit a session-scoped signal through the bound session
    pub fn send_signal(&self, name: &str, data: Value) -> Result<()> {
        self.core().send_signal(name, data)
    }
}
