//! Loopback engine worker thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use caster_ipc::PipelineState;
use caster_session::{EngineCallbacks, EngineError, EngineResult};

/// How long the worker blocks on its queue while idle.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Commands queued to the worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Play,
    Pause,
    Message(String),
    Fatal(String),
    RawState(i32),
    Shutdown,
}

/// Handle to a running worker.
pub(crate) struct Worker {
    command_tx: Sender<WorkerCommand>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Start the worker. It reports ready once `startup_delay` has elapsed,
    /// then moves the pipeline to `resume` if given.
    pub(crate) fn spawn(
        callbacks: EngineCallbacks,
        startup_delay: Duration,
        pipeline: Arc<Mutex<PipelineState>>,
        resume: Option<PipelineState>,
    ) -> EngineResult<Self> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let worker = WorkerLoop {
            command_rx,
            callbacks,
            pipeline,
            ready_at: Some(Instant::now() + startup_delay),
            resume,
        };

        let handle = thread::Builder::new()
            .name("loopback-engine".to_string())
            .spawn(move || worker.run())
            .map_err(|e| EngineError::Failed(format!("Failed to spawn engine thread: {e}")))?;

        Ok(Self { command_tx, handle })
    }

    /// Queue a command.
    pub(crate) fn send(&self, command: WorkerCommand) -> EngineResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// When called from the worker itself (a callback dropped the last
    /// session handle) the worker is only signalled.
    pub(crate) fn stop(self) -> EngineResult<()> {
        if self.command_tx.send(WorkerCommand::Shutdown).is_err() {
            debug!("Worker already exited");
        }

        if self.handle.thread().id() == thread::current().id() {
            debug!("Stop requested from worker thread, not joining");
            return Ok(());
        }

        self.handle.join().map_err(|_| {
            error!("Loopback worker panicked");
            EngineError::Failed("Engine thread panicked".to_string())
        })
    }
}

struct WorkerLoop {
    command_rx: Receiver<WorkerCommand>,
    callbacks: EngineCallbacks,
    pipeline: Arc<Mutex<PipelineState>>,
    ready_at: Option<Instant>,
    resume: Option<PipelineState>,
}

impl WorkerLoop {
    #[instrument(name = "loopback_worker", skip(self))]
    fn run(mut self) {
        info!("Loopback worker starting");
        self.report(PipelineState::Null);

        loop {
            if let Some(at) = self.ready_at {
                if Instant::now() >= at {
                    self.ready_at = None;
                    self.report(PipelineState::Ready);
                    self.callbacks.on_engine_ready();
                    if let Some(target) = self.resume.take() {
                        debug!(%target, "Resuming pipeline");
                        self.set_target(target);
                    }
                    continue;
                }
            }

            let timeout = match self.ready_at {
                Some(at) => at.saturating_duration_since(Instant::now()),
                None => IDLE_TIMEOUT,
            };

            match self.command_rx.recv_timeout(timeout) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    break;
                }
            }
        }

        info!("Loopback worker stopped");
    }

    /// Handle a command. Returns false if the worker should stop.
    fn handle_command(&mut self, command: WorkerCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            WorkerCommand::Play => self.set_target(PipelineState::Playing),
            WorkerCommand::Pause => self.set_target(PipelineState::Paused),
            WorkerCommand::Message(text) => self.callbacks.on_engine_message(text),
            WorkerCommand::Fatal(reason) => {
                *self.pipeline.lock() = PipelineState::Null;
                self.callbacks.on_engine_fatal(reason);
            }
            WorkerCommand::RawState(raw) => {
                if let Some(state) = PipelineState::from_raw(raw) {
                    *self.pipeline.lock() = state;
                }
                self.callbacks.on_engine_state_changed(raw);
            }
            WorkerCommand::Shutdown => return false,
        }

        true
    }

    /// Walk the pipeline one state at a time towards `target`, reporting
    /// every intermediate state.
    fn set_target(&mut self, target: PipelineState) {
        if self.ready_at.is_some() {
            warn!(%target, "Pipeline not ready, ignoring state change");
            return;
        }

        let mut current = *self.pipeline.lock();
        while current != target {
            let raw = if target.raw() > current.raw() {
                current.raw() + 1
            } else {
                current.raw() - 1
            };
            let Some(next) = PipelineState::from_raw(raw) else {
                break;
            };
            self.report(next);
            current = next;
        }
    }

    fn report(&self, state: PipelineState) {
        *self.pipeline.lock() = state;
        debug!(%state, "Pipeline state");
        self.callbacks.on_engine_state_changed(state.raw());
    }
}
