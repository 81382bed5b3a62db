//! Build-server protocol: message model, versioning and session dispatch.
//!
//! A client talks to one [`Session`] over a duplex channel. The session
//! greets with a hello listing the registered versions, negotiates one on the
//! handshake, and from then on forwards every request to the single activated
//! [`Protocol`].
//!
//! ## Message Flow
//!
//! ```text
//! Client                                 Server
//!    |<------------ hello -----------------|  supportedProtocolVersions
//!    |------------- handshake ------------>|  negotiate + activate
//!    |<------------ reply -----------------|
//!    |------------- configure ------------>|
//!    |<------------ progress ... ----------|  same cookie as the request
//!    |<------------ reply / error ---------|  exactly one per request
//!    |<------------ signal ----------------|  session scoped, empty cookie
//! ```
//!
//! ## Request Types
//!
//! | Type                | Legal in           | Since |
//! |---------------------|--------------------|-------|
//! | `handshake`         | before activation  | 1.0   |
//! | `globalSettings`    | active and later   | 1.0   |
//! | `setGlobalSettings` | active only        | 1.0   |
//! | `configure`         | active and later   | 1.0   |
//! | `compute`           | configured only    | 1.0   |
//! | `cmakeInputs`       | configured, computed | 1.0 |
//! | `codemodel`         | computed only      | 1.0   |
//! | `cache`             | configured, computed | 1.1 (experimental) |
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use buildconf::engine::FilesystemEngineFactory;
//! use buildconf::protocol::{Outbox, Session};
//!
//! let (outbox, mut rx) = Outbox::channel();
//! let mut session = Session::new(outbox, Arc::new(FilesystemEngineFactory));
//! session.hello();
//! session.dispatch_json(r#"{"type":"handshake","cookie":"1",
//!     "protocolVersion":{"major":1},
//!     "sourceDirectory":"/src","buildDirectory":"/build"}"#);
//! ```

mod message;
mod pipeline;
mod session;
mod version;
mod versioned;

pub use message::{
    MessageReport, Outbox, Payload, ProgressReport, Reporter, Request, RequestEnvelope, Response,
    ServerMessage, Signal,
};
pub use pipeline::{PipelineState, Protocol1_0, Protocol1_1, SIGNAL_DIRTY};
pub use session::{Session, SessionStats};
pub use version::{negotiate, Handshake, ProtocolVersion, SupportedVersion, VersionRequest};
pub use versioned::{Activation, Protocol, ProtocolCore, VersionedProtocol};

/// Version negotiation and activation
pub const TYPE_HANDSHAKE: &str = "handshake";
/// Read engine settings
pub const TYPE_GLOBAL_SETTINGS: &str = "globalSettings";
/// Change engine settings before configure
pub const TYPE_SET_GLOBAL_SETTINGS: &str = "setGlobalSettings";
/// Run the configure step
pub const TYPE_CONFIGURE: &str = "configure";
/// Run the compute step
pub const TYPE_COMPUTE: &str = "compute";
/// List files read by configure
pub const TYPE_CMAKE_INPUTS: &str = "cmakeInputs";
/// Fetch the computed project model
pub const TYPE_CODE_MODEL: &str = "codemodel";
/// Inspect cache entries (1.1)
pub const TYPE_CACHE: &str = "cache";
