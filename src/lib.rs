//! # buildconf - Interactive Build-Configuration Server
//!
//! A long-lived server that exposes a build system's configure, compute and
//! inspect pipeline to IDEs and editors over a versioned JSON protocol.
//!
//! ## Features
//!
//! - **Versioned protocols**: stable and experimental versions side by side,
//!   negotiated per session in the handshake
//! - **Pipeline state machine**: requests are only legal in the right stage;
//!   illegal ones are answered with an error and change nothing
//! - **Progress reporting**: long-running steps stream progress and status
//!   messages tagged with the request's cookie
//! - **Single-writer worker**: one worker per connection, requests never overlap
//! - **Framed transport**: stdio or a Unix-domain socket
//!
//! ## Protocol Overview
//!
//! ### Pipeline
//!
//! ```text
//!   handshake        configure           compute
//! [Inactive] ──> [Active] ──────> [Configured] ──────> [Computed]
//!                  │                │    ^                 │
//!                  │ setGlobal-     └────┘ configure       │ codemodel
//!                  │ Settings                              │ cmakeInputs
//! ```
//!
//! ### Outbound Messages
//!
//! | Type       | Cookie            | Purpose                              |
//! |------------|-------------------|--------------------------------------|
//! | `hello`    | none              | Lists `supportedProtocolVersions`    |
//! | `reply`    | request's         | Successful result, one per request   |
//! | `error`    | request's         | Failed result, one per request       |
//! | `progress` | request's         | min/current/max counters             |
//! | `message`  | request's         | Free-text status with a title        |
//! | `signal`   | empty             | Session event such as `dirty`        |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use buildconf::{FilesystemEngineFactory, Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default(), Arc::new(FilesystemEngineFactory));
//! let stats = buildconf::transport::serve_stdio(&server).await?;
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Messages, version negotiation, sessions and the pipeline
//! - [`engine`]: Build-engine boundary and the filesystem engine
//! - [`server`]: Single-writer session worker
//! - [`transport`]: Framing plus stdio and socket transports
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use engine::{BuildEngine, EngineFactory, FilesystemEngine, FilesystemEngineFactory};
pub use error::{Result, ServerError};
pub use protocol::{
    PipelineState, Protocol, ProtocolVersion, Request, RequestEnvelope, Response, ServerMessage,
    Session, SessionStats,
};
pub use server::{Server, ServerConfig, ServerHandle};
pub use transport::TransportKind;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
