//! Common types used across session messages.

use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::SessionState;

/// Logical render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SurfaceId {
    /// Main preview surface.
    Primary,

    /// Secondary preview surface.
    Secondary,
}

impl SurfaceId {
    /// All known render targets, in id order.
    pub const ALL: [SurfaceId; 2] = [SurfaceId::Primary, SurfaceId::Secondary];

    /// Returns the numeric id used on the engine boundary.
    pub fn index(self) -> u32 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }

    /// Returns the display name for this surface.
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A surface id outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown surface id: {0}")]
pub struct UnknownSurfaceId(pub u32);

impl TryFrom<u32> for SurfaceId {
    type Error = UnknownSurfaceId;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Primary),
            1 => Ok(Self::Secondary),
            other => Err(UnknownSurfaceId(other)),
        }
    }
}

/// Opaque, caller-owned drawing target reference.
///
/// The session never dereferences or frees the handle; it only passes it to
/// the engine. A null handle cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(NonZeroUsize);

impl SurfaceHandle {
    /// Wraps a raw handle value. Returns `None` for a null handle.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    /// Returns the raw handle value.
    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Reasons an (address, port) pair is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Address was empty or whitespace.
    #[error("address must not be empty")]
    EmptyAddress,

    /// Port outside 1..=65535.
    #[error("port {0} out of range 1-65535")]
    PortOutOfRange(u32),
}

/// A validated network destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    /// Host address (IP literal or host name).
    pub address: String,

    /// UDP port.
    pub port: u16,
}

impl Endpoint {
    /// Validates and builds an endpoint.
    pub fn new(address: &str, port: u32) -> Result<Self, EndpointError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(EndpointError::EmptyAddress);
        }

        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(EndpointError::PortOutOfRange(port))?;

        Ok(Self {
            address: address.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Session policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Issue `play` automatically when the engine first reports ready.
    pub auto_start_on_ready: bool,

    /// Reject client and broadcast changes until the session is ready.
    pub registry_requires_ready: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_start_on_ready: true,
            registry_requires_ready: false,
        }
    }
}

/// Attachment state of one render target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfaceInfo {
    /// Render target id.
    pub id: SurfaceId,

    /// Whether the presentation layer has attached a handle.
    pub attached: bool,

    /// Whether the engine currently holds a binding for the handle.
    pub bound: bool,

    /// Width in pixels of the last attach.
    pub width: u32,

    /// Height in pixels of the last attach.
    pub height: u32,
}

/// Active broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastInfo {
    /// Broadcast destination.
    pub endpoint: Endpoint,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Current lifecycle state.
    pub state: SessionState,

    /// Whether capture permission has been granted.
    pub permission_granted: bool,

    /// Render targets, in id order.
    pub surfaces: Vec<SurfaceInfo>,

    /// Unicast viewers, sorted by address then port.
    pub clients: Vec<Endpoint>,

    /// Broadcast channel, if active.
    pub broadcast: Option<BroadcastInfo>,
}
