//! Protocol version identity and handshake negotiation.
//!
//! The server advertises its registered versions in the hello message; a
//! client picks one in its handshake.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// (major, minor) version pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version, bumped on incompatible changes
    pub major: u32,
    /// Minor version, bumped on additions
    pub minor: u32,
}

impl ProtocolVersion {
    /// Create a version pair
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A registered version as listed in the hello message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Only negotiable with explicit opt-in
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_experimental: bool,
}

impl SupportedVersion {
    /// Describe a registered version
    pub const fn new(version: ProtocolVersion, is_experimental: bool) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
            is_experimental,
        }
    }

    /// The (major, minor) pair
    pub fn version(&self) -> ProtocolVersion {
        ProtocolVersion::new(self.major, self.minor)
    }
}

/// Version requested by the client in its handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRequest {
    /// Requested major version
    pub major: u32,
    /// Requested minor version; highest acceptable when absent
    #[serde(default)]
    pub minor: Option<u32>,
    /// Client accepts experimental protocols
    #[serde(default)]
    pub is_experimental: bool,
}

/// Handshake payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Requested version; lowest stable when absent
    #[serde(default)]
    pub protocol_version: Option<VersionRequest>,
    /// Directory holding the top-level build script
    #[serde(default)]
    pub source_directory: Option<String>,
    /// Directory receiving generated output
    #[serde(default)]
    pub build_directory: Option<String>,
    /// Generator name
    #[serde(default)]
    pub generator: Option<String>,
    /// Secondary (IDE project) generator name
    #[serde(default)]
    pub extra_generator: Option<String>,
}

impl Handshake {
    /// Parse handshake request data
    pub fn from_value(data: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(data.clone())
            .map_err(|e| ServerError::InvalidMessage(format!("malformed handshake: {e}")))
    }
}

/// Pick the registered version satisfying `requested`.
///
/// - no request: lowest stable version
/// - major and minor: exact match
/// - major only: highest acceptable minor of that major
///
/// Experimental versions are acceptable only when the request opts in.
pub fn negotiate(
    available: &[SupportedVersion],
    requested: Option<&VersionRequest>,
) -> Result<SupportedVersion> {
    let Some(requested) = requested else {
        return available
            .iter()
            .filter(|v| !v.is_experimental)
            .min_by_key(|v| v.version())
            .copied()
            .ok_or_else(|| {
                ServerError::NegotiationFailed("no stable protocol version is available".into())
            });
    };

    let acceptable = |v: &&SupportedVersion| !v.is_experimental || requested.is_experimental;

    match requested.minor {
        Some(minor) => {
            let wanted = ProtocolVersion::new(requested.major, minor);
            let found = available
                .iter()
                .find(|v| v.version() == wanted)
                .ok_or_else(|| {
                    ServerError::NegotiationFailed(format!(
                        "protocol version {wanted} is not supported"
                    ))
                })?;
            if !acceptable(&found) {
                return Err(ServerError::NegotiationFailed(format!(
                    "protocol version {wanted} is experimental and \"isExperimental\" was not set"
                )));
            }
            Ok(*found)
        },
        None => available
            .iter()
            .filter(|v| v.major == requested.major)
            .filter(acceptable)
            .max_by_key(|v| v.minor)
            .copied()
            .ok_or_else(|| {
                ServerError::NegotiationFailed(format!(
                    "no acceptable protocol version with major {}",
                    requested.major
                ))
            }),
    }
}
