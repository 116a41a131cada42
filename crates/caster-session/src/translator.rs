//! Engine notification translation and event delivery.

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use caster_ipc::{PipelineState, SessionEvent};

/// A raw notification as delivered by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotification {
    /// Engine main loop is running.
    Ready,

    /// Pipeline changed state, in the engine's integer encoding.
    StateChanged(i32),

    /// Free-form engine text.
    Message(String),

    /// Unrecoverable engine failure.
    Fatal(String),
}

/// A notification after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translated {
    /// Engine ready; the session may leave `Initializing`.
    EngineReady,

    /// Recognized pipeline state.
    State(PipelineState),

    /// Engine text.
    Message(String),

    /// Engine failure.
    Fatal(String),
}

/// Normalizes engine notifications and delivers session events, in order,
/// to the presentation layer's queue.
pub struct EventTranslator {
    event_tx: Sender<SessionEvent>,
}

impl EventTranslator {
    /// Create a translator delivering to `event_tx`.
    pub fn new(event_tx: Sender<SessionEvent>) -> Self {
        Self { event_tx }
    }

    /// Map a raw notification. Unrecognized pipeline states are logged and
    /// dropped.
    pub fn translate(&self, notification: EngineNotification) -> Option<Translated> {
        match notification {
            EngineNotification::Ready => Some(Translated::EngineReady),
            EngineNotification::StateChanged(raw) => match PipelineState::from_raw(raw) {
                Some(state) => Some(Translated::State(state)),
                None => {
                    warn!(raw, "Unrecognized pipeline state, ignoring");
                    None
                }
            },
            EngineNotification::Message(text) => Some(Translated::Message(text)),
            EngineNotification::Fatal(reason) => Some(Translated::Fatal(reason)),
        }
    }

    /// Enqueue an event for the presentation layer.
    pub fn deliver(&self, event: SessionEvent) {
        debug!(?event, "Delivering session event");
        if let Err(e) = self.event_tx.send(event) {
            debug!("Presentation layer gone, dropping event: {:?}", e.into_inner());
        }
    }
}
