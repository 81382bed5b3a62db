//! Single-writer request worker.
//!
//! One blocking worker owns the [`Session`](crate::protocol::Session) of a
//! connection and consumes raw request frames from a bounded queue, one at a
//! time. Requests therefore never overlap: a request's progress reports and
//! response are all queued before the next request is even decoded.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use buildconf::engine::FilesystemEngineFactory;
//! use buildconf::server::{Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::default(), Arc::new(FilesystemEngineFactory));
//! let (handle, mut outbound) = server.start();
//! handle.submit(frame).await?;
//! let stats = handle.shutdown().await?;
//! ```

mod config;
mod worker;

pub use config::ServerConfig;
pub use worker::{Server, ServerHandle};
