//! Error types for the session coordinator.

use thiserror::Error;

use caster_ipc::{EndpointError, SessionState, UnknownSurfaceId};

use crate::engine::EngineError;

/// Errors returned by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Capture permission has not been granted.
    #[error("Permission denied: capture permission not granted")]
    PermissionDenied,

    /// Malformed viewer or broadcast endpoint.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// Command not allowed in the current session state.
    #[error("Command '{command}' rejected in state {state}")]
    CommandRejected {
        command: &'static str,
        state: SessionState,
    },

    /// Surface id outside the known set.
    #[error(transparent)]
    UnknownSurface(#[from] UnknownSurfaceId),

    /// Null surface handle.
    #[error("Invalid surface handle")]
    InvalidSurfaceHandle,

    /// The engine refused or failed a command.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}
