//! The media engine boundary.
//!
//! The session depends only on [`MediaEngine`]: the commands it issues to
//! the engine. The engine reports back through [`EngineCallbacks`], a handle
//! handed over on `init` that may be used from any thread.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tracing::trace;

use caster_ipc::{Endpoint, SurfaceHandle, SurfaceId};

use crate::coordinator::SessionShared;
use crate::translator::EngineNotification;

/// Errors reported by engine commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Engine not initialized (or already finalized).
    #[error("Engine not initialized")]
    NotInitialized,

    /// Engine already initialized.
    #[error("Engine already initialized")]
    AlreadyInitialized,

    /// The engine's worker is gone.
    #[error("Engine worker disconnected")]
    Disconnected,

    /// Engine-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Result type for engine commands.
pub type EngineResult<T> = Result<T, EngineError>;

/// Commands the session issues to a media engine.
///
/// Implementations own capture, encoding and transport. Every method is
/// called with the session lock held except [`finalize`](Self::finalize),
/// so a command must not wait for a callback to be delivered, and callbacks
/// must never be invoked inline from a command on the caller's thread.
pub trait MediaEngine: Send + Sync {
    /// Build the pipeline. Readiness is reported asynchronously.
    fn init(&self, callbacks: EngineCallbacks) -> EngineResult<()>;

    /// Release every binding and socket, and stop the engine. Blocks until
    /// the release is complete.
    fn finalize(&self) -> EngineResult<()>;

    /// Set the pipeline to playing.
    fn play(&self) -> EngineResult<()>;

    /// Set the pipeline to paused.
    fn pause(&self) -> EngineResult<()>;

    /// Bind (or switch) the render target for a surface.
    fn bind_surface(&self, id: SurfaceId, handle: SurfaceHandle) -> EngineResult<()>;

    /// Drop the render target for a surface. Returns once the engine no
    /// longer references the handle.
    fn unbind_surface(&self, id: SurfaceId) -> EngineResult<()>;

    /// Start sending to a unicast viewer.
    fn add_client(&self, endpoint: &Endpoint) -> EngineResult<()>;

    /// Stop sending to a unicast viewer.
    fn remove_client(&self, endpoint: &Endpoint) -> EngineResult<()>;

    /// Stop sending to every unicast viewer.
    fn clear_clients(&self) -> EngineResult<()>;

    /// Start the broadcast channel.
    fn start_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()>;

    /// Stop the broadcast channel.
    fn stop_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()>;
}

impl<E: MediaEngine + ?Sized> MediaEngine for Arc<E> {
    fn init(&self, callbacks: EngineCallbacks) -> EngineResult<()> {
        (**self).init(callbacks)
    }

    fn finalize(&self) -> EngineResult<()> {
        (**self).finalize()
    }

    fn play(&self) -> EngineResult<()> {
        (**self).play()
    }

    fn pause(&self) -> EngineResult<()> {
        (**self).pause()
    }

    fn bind_surface(&self, id: SurfaceId, handle: SurfaceHandle) -> EngineResult<()> {
        (**self).bind_surface(id, handle)
    }

    fn unbind_surface(&self, id: SurfaceId) -> EngineResult<()> {
        (**self).unbind_surface(id)
    }

    fn add_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        (**self).add_client(endpoint)
    }

    fn remove_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        (**self).remove_client(endpoint)
    }

    fn clear_clients(&self) -> EngineResult<()> {
        (**self).clear_clients()
    }

    fn start_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        (**self).start_broadcast(endpoint)
    }

    fn stop_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        (**self).stop_broadcast(endpoint)
    }
}

/// Callback handle an engine uses to report back to its session.
///
/// Cheap to clone and safe to call from any thread. Holds only a weak
/// reference, so an engine keeping it does not keep the session alive; once
/// the session is gone every call is dropped.
#[derive(Clone)]
pub struct EngineCallbacks {
    session: Weak<SessionShared>,
}

impl EngineCallbacks {
    pub(crate) fn new(session: Weak<SessionShared>) -> Self {
        Self { session }
    }

    /// A handle that is not connected to any session.
    pub fn detached() -> Self {
        Self {
            session: Weak::new(),
        }
    }

    /// Returns true while the owning session is alive.
    pub fn is_connected(&self) -> bool {
        self.session.strong_count() > 0
    }

    /// The engine's main loop is running and accepts commands.
    pub fn on_engine_ready(&self) {
        self.notify(EngineNotification::Ready);
    }

    /// The pipeline changed state. `raw` uses the engine's fixed encoding.
    pub fn on_engine_state_changed(&self, raw: i32) {
        self.notify(EngineNotification::StateChanged(raw));
    }

    /// Free-form text from the engine.
    pub fn on_engine_message(&self, text: impl Into<String>) {
        self.notify(EngineNotification::Message(text.into()));
    }

    /// The engine failed and cannot continue.
    pub fn on_engine_fatal(&self, reason: impl Into<String>) {
        self.notify(EngineNotification::Fatal(reason.into()));
    }

    fn notify(&self, notification: EngineNotification) {
        match self.session.upgrade() {
            Some(session) => session.handle_notification(notification),
            None => trace!(?notification, "Session gone, dropping engine notification"),
        }
    }
}

impl std::fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("connected", &self.is_connected())
            .finish()
    }
}
