//! Events sent from the session to the presentation layer.

use serde::{Deserialize, Serialize};

use crate::state::{PipelineState, TerminationReason};

/// Events a session delivers, in engine order, to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The engine is ready; play/pause are now accepted.
    SessionReady,

    /// The session reached its terminal state.
    SessionTerminated(TerminationReason),

    /// Free-form text from the engine.
    Message(String),

    /// The engine pipeline changed state.
    StateChanged(PipelineState),

    /// A command was refused.
    CommandRejected(String),
}
