//! Typed presentation<->session messages for the caster.
//!
//! This crate defines the message types exchanged between a presentation
//! layer and the stream session coordinator: commands, events, the session
//! and pipeline state enums, and the shared configuration types.

mod commands;
mod events;
mod state;
mod types;

pub use commands::SessionCommand;
pub use events::SessionEvent;
pub use state::{PipelineState, SessionState, TerminationReason};
pub use types::{
    BroadcastInfo, Endpoint, EndpointError, SessionConfig, SessionSnapshot, SurfaceHandle,
    SurfaceId, SurfaceInfo, UnknownSurfaceId,
};

use crossbeam_channel::{Receiver, Sender};

/// Creates the session event channel (Session → presentation layer).
///
/// The channel is unbounded: lifecycle events such as `SessionTerminated`
/// must never be dropped, and the session enqueues while holding its lock.
pub fn event_channel() -> (Sender<SessionEvent>, Receiver<SessionEvent>) {
    crossbeam_channel::unbounded()
}
