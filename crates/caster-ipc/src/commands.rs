//! Commands sent from the presentation layer to the session.

use serde::{Deserialize, Serialize};

use crate::types::SurfaceId;

/// Commands that a presentation layer can issue to a session.
///
/// Addresses and ports are carried unvalidated; the session validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Initialize the engine, reporting the current capture permission.
    RequestInit { permission_granted: bool },

    /// Update the capture permission without initializing.
    SetPermission(bool),

    /// Set the pipeline to playing.
    Play,

    /// Set the pipeline to paused.
    Pause,

    /// Tear the session down.
    Terminate,

    /// Attach a render target.
    AttachSurface {
        id: SurfaceId,
        handle: usize,
        width: u32,
        height: u32,
    },

    /// Detach a render target.
    DetachSurface(SurfaceId),

    /// Add a unicast viewer.
    AddClient { address: String, port: u32 },

    /// Remove a unicast viewer.
    RemoveClient { address: String, port: u32 },

    /// Remove every unicast viewer.
    ClearClients,

    /// Start (or retarget) the broadcast channel.
    StartBroadcast { address: String, port: u32 },

    /// Stop the broadcast channel.
    StopBroadcast { address: String, port: u32 },
}

impl SessionCommand {
    /// Returns the command name used in logs and rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestInit { .. } => "request_init",
            Self::SetPermission(_) => "set_permission",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Terminate => "terminate",
            Self::AttachSurface { .. } => "attach_surface",
            Self::DetachSurface(_) => "detach_surface",
            Self::AddClient { .. } => "add_client",
            Self::RemoveClient { .. } => "remove_client",
            Self::ClearClients => "clear_clients",
            Self::StartBroadcast { .. } => "start_broadcast",
            Self::StopBroadcast { .. } => "stop_broadcast",
        }
    }
}
