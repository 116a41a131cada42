//! The loopback media engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use caster_ipc::{Endpoint, PipelineState, SurfaceHandle, SurfaceId};
use caster_session::{EngineCallbacks, EngineError, EngineResult, MediaEngine};

use crate::config::{CaptureSource, LoopbackConfig};
use crate::worker::{Worker, WorkerCommand};

/// Ports a network sink occupies: video on the registered port, audio on the
/// one above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkPorts {
    pub video: u16,
    pub audio: u16,
}

impl SinkPorts {
    fn for_endpoint(endpoint: &Endpoint) -> EngineResult<Self> {
        let audio = endpoint
            .port
            .checked_add(1)
            .ok_or_else(|| EngineError::Failed(format!("No audio port above {endpoint}")))?;

        Ok(Self {
            video: endpoint.port,
            audio,
        })
    }
}

#[derive(Debug, Default)]
struct Sinks {
    surfaces: BTreeMap<SurfaceId, SurfaceHandle>,
    clients: BTreeMap<Endpoint, SinkPorts>,
    broadcast: Option<(Endpoint, SinkPorts)>,
}

/// In-process media engine.
///
/// Pipeline state changes run on a worker thread and are reported through
/// the session callbacks. Render targets and network sinks are plain
/// bookkeeping, updated synchronously by each command.
pub struct LoopbackEngine {
    config: Mutex<LoopbackConfig>,
    sinks: Mutex<Sinks>,
    pipeline: Arc<Mutex<PipelineState>>,
    /// Callbacks from `init`, kept for worker restarts. Locked before
    /// `worker`.
    callbacks: Mutex<Option<EngineCallbacks>>,
    worker: Mutex<Option<Worker>>,
}

impl LoopbackEngine {
    /// Create an engine. Nothing runs until `init`.
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config: Mutex::new(config),
            sinks: Mutex::new(Sinks::default()),
            pipeline: Arc::new(Mutex::new(PipelineState::Null)),
            callbacks: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Current engine settings.
    pub fn config(&self) -> LoopbackConfig {
        self.config.lock().clone()
    }

    /// Switch the capture source.
    ///
    /// A running worker is stopped and restarted on the new source: the
    /// pipeline drops to Null, reports Ready again, then returns to the
    /// Paused or Playing state it was in. Before `init` only the setting
    /// changes.
    pub fn set_capture_source(&self, source: CaptureSource) -> EngineResult<()> {
        let config = {
            let mut config = self.config.lock();
            let candidate = LoopbackConfig {
                capture_source: source,
                ..config.clone()
            };
            if !candidate.source_available() {
                warn!(%source, "Capture source unavailable");
                return Err(EngineError::Failed(format!(
                    "Capture source unavailable: {source}"
                )));
            }
            *config = candidate.clone();
            candidate
        };

        // The worker lock must not be held across the join.
        let Some(old) = self.worker.lock().take() else {
            debug!(%source, "Engine not running, source applies on next init");
            return Ok(());
        };

        let resume = match *self.pipeline.lock() {
            state @ (PipelineState::Paused | PipelineState::Playing) => Some(state),
            _ => None,
        };
        info!(%source, ?resume, "Restarting worker on new capture source");
        old.stop()?;

        let stored = self.callbacks.lock();
        let Some(callbacks) = stored.as_ref() else {
            debug!("Engine finalized during restart");
            return Ok(());
        };

        *self.pipeline.lock() = PipelineState::Null;
        let worker = Worker::spawn(
            callbacks.clone(),
            Duration::from_millis(config.startup_delay_ms),
            Arc::clone(&self.pipeline),
            resume,
        )?;
        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Whether the worker thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Last pipeline state the worker reported.
    pub fn pipeline_state(&self) -> PipelineState {
        *self.pipeline.lock()
    }

    /// Render targets currently bound, in id order.
    pub fn bound_surfaces(&self) -> Vec<(SurfaceId, SurfaceHandle)> {
        self.sinks
            .lock()
            .surfaces
            .iter()
            .map(|(id, handle)| (*id, *handle))
            .collect()
    }

    /// Unicast sinks, sorted by endpoint.
    pub fn clients(&self) -> Vec<(Endpoint, SinkPorts)> {
        self.sinks
            .lock()
            .clients
            .iter()
            .map(|(endpoint, ports)| (endpoint.clone(), *ports))
            .collect()
    }

    /// The broadcast sink, if active.
    pub fn broadcast(&self) -> Option<(Endpoint, SinkPorts)> {
        self.sinks.lock().broadcast.clone()
    }

    /// Report `text` from the worker thread as an engine message.
    pub fn inject_message(&self, text: impl Into<String>) -> EngineResult<()> {
        self.send(WorkerCommand::Message(text.into()))
    }

    /// Report an unrecoverable failure from the worker thread.
    pub fn inject_fatal(&self, reason: impl Into<String>) -> EngineResult<()> {
        self.send(WorkerCommand::Fatal(reason.into()))
    }

    /// Report a raw pipeline state code from the worker thread. Codes
    /// outside the known range are passed through as-is.
    pub fn inject_raw_state(&self, raw: i32) -> EngineResult<()> {
        self.send(WorkerCommand::RawState(raw))
    }

    fn send(&self, command: WorkerCommand) -> EngineResult<()> {
        match self.worker.lock().as_ref() {
            Some(worker) => worker.send(command),
            None => Err(EngineError::NotInitialized),
        }
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl MediaEngine for LoopbackEngine {
    fn init(&self, callbacks: EngineCallbacks) -> EngineResult<()> {
        let mut stored = self.callbacks.lock();
        let mut worker = self.worker.lock();
        if stored.is_some() || worker.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        let config = self.config.lock().clone();
        if !config.source_available() {
            warn!(source = %config.capture_source, "Capture source unavailable");
            return Err(EngineError::Failed(format!(
                "Capture source unavailable: {}",
                config.capture_source
            )));
        }

        info!(
            source = %config.capture_source,
            startup_delay_ms = config.startup_delay_ms,
            "Starting loopback engine"
        );

        *self.pipeline.lock() = PipelineState::Null;
        *worker = Some(Worker::spawn(
            callbacks.clone(),
            Duration::from_millis(config.startup_delay_ms),
            Arc::clone(&self.pipeline),
            None,
        )?);
        *stored = Some(callbacks);
        Ok(())
    }

    fn finalize(&self) -> EngineResult<()> {
        let callbacks = self.callbacks.lock().take();
        // The worker lock must not be held across the join.
        let worker = self.worker.lock().take();

        let result = match (callbacks, worker) {
            (_, Some(worker)) => worker.stop(),
            // A source switch is between workers and will not respawn.
            (Some(_), None) => Ok(()),
            (None, None) => return Err(EngineError::NotInitialized),
        };

        let mut sinks = self.sinks.lock();
        info!(
            surfaces = sinks.surfaces.len(),
            clients = sinks.clients.len(),
            broadcast = sinks.broadcast.is_some(),
            "Releasing sinks"
        );
        *sinks = Sinks::default();
        *self.pipeline.lock() = PipelineState::Null;

        result
    }

    fn play(&self) -> EngineResult<()> {
        self.send(WorkerCommand::Play)
    }

    fn pause(&self) -> EngineResult<()> {
        self.send(WorkerCommand::Pause)
    }

    fn bind_surface(&self, id: SurfaceId, handle: SurfaceHandle) -> EngineResult<()> {
        let previous = self.sinks.lock().surfaces.insert(id, handle);
        match previous {
            Some(old) => debug!(%id, old = old.as_raw(), new = handle.as_raw(), "Render target switched"),
            None => debug!(%id, handle = handle.as_raw(), "Render target bound"),
        }
        Ok(())
    }

    fn unbind_surface(&self, id: SurfaceId) -> EngineResult<()> {
        match self.sinks.lock().surfaces.remove(&id) {
            Some(_) => {
                debug!(%id, "Render target unbound");
                Ok(())
            }
            None => Err(EngineError::Failed(format!(
                "No render target bound for {id} surface"
            ))),
        }
    }

    fn add_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let ports = SinkPorts::for_endpoint(endpoint)?;
        self.sinks.lock().clients.insert(endpoint.clone(), ports);
        debug!(%endpoint, audio_port = ports.audio, "Unicast sink added");
        Ok(())
    }

    fn remove_client(&self, endpoint: &Endpoint) -> EngineResult<()> {
        match self.sinks.lock().clients.remove(endpoint) {
            Some(_) => {
                debug!(%endpoint, "Unicast sink removed");
                Ok(())
            }
            None => Err(EngineError::Failed(format!("No unicast sink for {endpoint}"))),
        }
    }

    fn clear_clients(&self) -> EngineResult<()> {
        let mut sinks = self.sinks.lock();
        debug!(count = sinks.clients.len(), "Unicast sinks cleared");
        sinks.clients.clear();
        Ok(())
    }

    fn start_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let mut sinks = self.sinks.lock();
        if let Some((active, _)) = &sinks.broadcast {
            return Err(EngineError::Failed(format!(
                "Broadcast already active on {active}"
            )));
        }

        let ports = SinkPorts::for_endpoint(endpoint)?;
        sinks.broadcast = Some((endpoint.clone(), ports));
        debug!(%endpoint, "Broadcast sink started");
        Ok(())
    }

    fn stop_broadcast(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let mut sinks = self.sinks.lock();
        match &sinks.broadcast {
            Some((active, _)) if active == endpoint => {
                sinks.broadcast = None;
                debug!(%endpoint, "Broadcast sink stopped");
                Ok(())
            }
            _ => Err(EngineError::Failed(format!(
                "No broadcast sink for {endpoint}"
            ))),
        }
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            debug!("Engine dropped while running, stopping worker");
            if let Err(e) = worker.stop() {
                warn!("Failed to stop worker: {}", e);
            }
        }
    }
}
