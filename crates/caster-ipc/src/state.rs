//! Session and pipeline state types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Engine not yet initialized.
    #[default]
    Uninitialized,

    /// `init` forwarded, waiting for the engine to report ready.
    Initializing,

    /// Engine is ready to accept play/pause.
    Ready,

    /// Pipeline is playing.
    Playing,

    /// Pipeline is paused.
    Paused,

    /// Teardown in progress.
    Terminating,

    /// Session has ended. Terminal.
    Terminated,
}

impl SessionState {
    /// Returns true once the engine has reported ready and the session is
    /// still running (Ready, Playing or Paused).
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }

    /// Returns true while teardown is running or has finished.
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }

    /// Returns true for the terminal state.
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Symbolic pipeline state reported by the media engine.
///
/// The numeric codes are fixed by the engine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// No pending state change.
    VoidPending,

    /// Pipeline torn down or reset.
    Null,

    /// Pipeline built and able to accept render targets.
    Ready,

    /// Pipeline prerolled but not running.
    Paused,

    /// Pipeline running.
    Playing,
}

impl PipelineState {
    /// Maps a raw engine code to a symbolic state.
    ///
    /// Returns `None` for codes outside the fixed set.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::VoidPending),
            1 => Some(Self::Null),
            2 => Some(Self::Ready),
            3 => Some(Self::Paused),
            4 => Some(Self::Playing),
            _ => None,
        }
    }

    /// Returns the raw engine code for this state.
    pub fn raw(self) -> i32 {
        match self {
            Self::VoidPending => 0,
            Self::Null => 1,
            Self::Ready => 2,
            Self::Paused => 3,
            Self::Playing => 4,
        }
    }

    /// Returns the display name used in engine logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::VoidPending => "VOID_PENDING",
            Self::Null => "NULL",
            Self::Ready => "READY",
            Self::Paused => "PAUSED",
            Self::Playing => "PLAYING",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a session reached `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Presentation layer called `terminate`.
    Requested,

    /// The engine reported a fatal failure.
    EngineFailure { reason: String },
}

impl TerminationReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Requested => "Session terminated by operator".to_string(),
            Self::EngineFailure { reason } => format!("Engine failure: {reason}"),
        }
    }
}
