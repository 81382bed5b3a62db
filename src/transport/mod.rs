//! Transport layer for the build-server protocol.
//!
//! Every message travels as one JSON document wrapped in marker lines:
//!
//! ```text
//! [== "Build Server" ==[
//! {"type":"handshake","cookie":"1", ...}
//! ]== "Build Server" ==]
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────┐  requests  ┌──────────────┐
//! │ stdio / pipe │ ────────> │  connection  │ ─────────> │    worker    │
//! │              │ <──────── │   (framing)  │ <───────── │  (session)   │
//! └──────────────┘  frames   └──────────────┘  messages  └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use buildconf::transport::{serve_stdio, TransportKind};
//!
//! let stats = serve_stdio(&server).await?;
//! ```

mod connection;
mod framing;
#[cfg(unix)]
mod pipe;
mod stdio;

pub use connection::serve_connection;
pub use framing::{encode_frame, FrameDecoder, FRAME_END, FRAME_START};
#[cfg(unix)]
pub use pipe::serve_pipe;
pub use stdio::serve_stdio;

use serde::{Deserialize, Serialize};

/// Transport kind selection for the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Standard input and output (default)
    #[default]
    Stdio,
    /// Local socket at a filesystem path
    Pipe,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Pipe => "pipe",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" | "stdin" | "-" => Ok(Self::Stdio),
            "pipe" | "socket" | "unix" => Ok(Self::Pipe),
            _ => Err(format!("Unknown transport kind: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str("stdio").unwrap(), TransportKind::Stdio);
        assert_eq!(TransportKind::from_str("PIPE").unwrap(), TransportKind::Pipe);
        assert_eq!(TransportKind::from_str("unix").unwrap(), TransportKind::Pipe);
        assert!(TransportKind::from_str("tcp").is_err());
    }

    #[test]
    fn test_transport_kind_default() {
        assert_eq!(TransportKind::default(), TransportKind::Stdio);
        assert_eq!(TransportKind::Pipe.to_string(), "pipe");
    }
}
