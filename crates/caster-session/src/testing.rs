//! Recording engine for unit tests.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use caster_ipc::{Endpoint, SurfaceHandle, SurfaceId};

use crate::engine::{EngineCallbacks, EngineError, EngineResult, MediaEngine};

/// One command received by [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Init,
    Finalize,
    Play,
    Pause,
    BindSurface(SurfaceId, usize),
    UnbindSurface(SurfaceId),
    AddClient(String, u16),
    RemoveClient(String, u16),
    ClearClients,
    StartBroadcast(String, u16),
    StopBroadcast(String, u16),
}

/// Engine that records every command and never calls back on its own.
#[derive(Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    fail_next: Mutex<Option<String>>,
    callbacks: Mutex<Option<EngineCallbacks>>,
    finalize_hold: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Make the next command fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    /// Hold the next `finalize` open. The first receiver fires once
    /// `finalize` has started; it returns when the sender fires or drops.
    pub fn hold_finalize(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *self.finalize_hold.lock() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    /// Callbacks handed over by the last `init`.
    pub fn callbacks(&self) -> EngineCallbacks {
        self.callbacks
            .lock()
            .clone()
            .expect("engine was never initialized")
    }

    fn record(&self, call: EngineCall) -> EngineResult<()> {
        if let Some(message) = self.fail_next.lock().take() {
            return Err(EngineError::Failed(message));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

fn parts(endpoint: &Endpoint) -> (String, u16) {
    (endpoint.address.clone(), endpoint.port)
}

impl MediaEngine for RecordingEngine {
    fn init(&self, callbacks: EngineCallbacks) -> EngineResult<()> {
        self.record(EngineCall::Init)?;
        *self.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    fn finalize(&self) -> EngineResult<()> {
        self.record(EngineCall::Finalize)?;

        let hold = self.finalize_hold.lock().take();
        if let Some((entered, release)) = hold {
            let _ = entered.send(());
            let _ = release.recv();
        }
        Ok(())
    }

    fn play(&self) -> EngineResult<()> {
        self.record(EngineCall::Play)
    }

    fn pause(&self) -> EngineResult<()> {
        self.record(EngineCall::Pause)
    }

    fn bind_surface(&self, id: SurfaceId, handle: SurfaceHandle) -> EngineResult<()> {
        self.record(EngineCall::BindSurface(id, handle.as_raw()))
    }

    fn unbind_surface(&self, id: SurfaceId) -> EngineResult<()> {
        self.record(EngineCall::UnbindSurface(id))
    }

    fn add_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let (address, port) = parts(endpoint);
        self.record(EngineCall::AddClient(address, port))
    }

    fn remove_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let (address, port) = parts(endpoint);
        self.record(EngineCall::RemoveClient(address, port))
    }

    fn clear_clients(&self) -> EngineResult<()> {
        self.record(EngineCall::ClearClients)
    }

    fn start_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let (address, port) = parts(endpoint);
        self.record(EngineCall::StartBroadcast(address, port))
    }

    fn stop_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let (address, port) = parts(endpoint);
        self.record(EngineCall::StopBroadcast(address, port))
    }
}
