//! Stream session coordinator for the caster.
//!
//! A [`Session`] sits between a presentation layer and a [`MediaEngine`]. It
//! gates initialization on capture permission, tracks the session lifecycle,
//! the attached render surfaces and the viewer registry, translates engine
//! callbacks into [`SessionEvent`]s, and runs ordered teardown.

mod clients;
mod coordinator;
mod engine;
mod error;
mod permission;
mod surfaces;
mod teardown;
mod translator;

#[cfg(test)]
mod testing;

pub use coordinator::Session;
pub use engine::{EngineCallbacks, EngineError, EngineResult, MediaEngine};
pub use error::SessionError;

use std::sync::Arc;

use caster_ipc::{SessionConfig, SessionEvent};
use crossbeam_channel::Receiver;

/// Result type for session commands.
pub type SessionResult<T> = Result<T, SessionError>;

/// Create a session driving `engine`, together with the receiving end of its
/// event channel.
pub fn create_session(
    engine: Arc<dyn MediaEngine>,
    config: SessionConfig,
) -> (Session, Receiver<SessionEvent>) {
    let (event_tx, event_rx) = caster_ipc::event_channel();
    (Session::new(engine, config, event_tx), event_rx)
}
