//! Stream session coordinator.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use caster_ipc::{
    PipelineState, SessionCommand, SessionConfig, SessionEvent, SessionSnapshot, SessionState,
    SurfaceHandle, SurfaceId, TerminationReason,
};

use crate::clients::ClientRegistry;
use crate::engine::{EngineCallbacks, MediaEngine};
use crate::error::SessionError;
use crate::permission::PermissionGate;
use crate::surfaces::SurfaceRegistry;
use crate::teardown;
use crate::translator::{EngineNotification, EventTranslator, Translated};
use crate::SessionResult;

/// Everything guarded by the session lock.
struct SessionInner {
    state: SessionState,
    permission: PermissionGate,
    surfaces: SurfaceRegistry,
    clients: ClientRegistry,
    /// `init` succeeded and `finalize` has not run yet.
    engine_live: bool,
    /// A `terminate` call is running teardown.
    teardown_running: bool,
    /// Fatal reason reported while teardown was running.
    pending_failure: Option<String>,
    /// `SessionTerminated` has been delivered.
    terminated_emitted: bool,
}

/// State shared between the session handle and engine callbacks.
pub(crate) struct SessionShared {
    engine: Arc<dyn MediaEngine>,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    teardown_done: Condvar,
    translator: EventTranslator,
}

/// Handle to a stream session.
///
/// Cloning yields another handle to the same session; commands may be
/// issued from any thread.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Create a session that owns `engine` and delivers events to `event_tx`.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: SessionConfig,
        event_tx: Sender<SessionEvent>,
    ) -> Self {
        let inner = SessionInner {
            state: SessionState::Uninitialized,
            permission: PermissionGate::new(),
            surfaces: SurfaceRegistry::new(),
            clients: ClientRegistry::new(),
            engine_live: false,
            teardown_running: false,
            pending_failure: None,
            terminated_emitted: false,
        };

        Self {
            shared: Arc::new(SessionShared {
                engine,
                config,
                inner: Mutex::new(inner),
                teardown_done: Condvar::new(),
                translator: EventTranslator::new(event_tx),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Session policy.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Point-in-time view of the session and its registries.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.inner.lock();
        SessionSnapshot {
            state: inner.state,
            permission_granted: inner.permission.is_granted(),
            surfaces: inner.surfaces.info(),
            clients: inner.clients.clients(),
            broadcast: inner.clients.broadcast(),
        }
    }

    /// Record the operator's capture permission without initializing.
    pub fn set_permission(&self, granted: bool) {
        self.shared.inner.lock().permission.set(granted);
    }

    /// Initialize the engine if permission is granted.
    ///
    /// Idempotent: while initializing or ready no further engine call is
    /// made.
    #[instrument(name = "request_init", skip(self))]
    pub fn request_init(&self, permission_granted: bool) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        inner.permission.set(permission_granted);

        match inner.state {
            SessionState::Uninitialized => {}
            SessionState::Initializing
            | SessionState::Ready
            | SessionState::Playing
            | SessionState::Paused => {
                debug!(state = %inner.state, "Already initializing or ready, ignoring init");
                return Ok(());
            }
            SessionState::Terminating | SessionState::Terminated => {
                return Err(shared.reject(&inner, "request_init"));
            }
        }

        if let Err(e) = inner.permission.check() {
            warn!("Init refused: {}", e);
            shared
                .translator
                .deliver(SessionEvent::CommandRejected(e.to_string()));
            return Err(e);
        }

        shared.transition(&mut inner, SessionState::Initializing);

        let callbacks = EngineCallbacks::new(Arc::downgrade(shared));
        match shared.engine.init(callbacks) {
            Ok(()) => {
                inner.engine_live = true;
                info!("Engine init requested");
                Ok(())
            }
            Err(e) => {
                error!("Engine init failed: {}", e);
                shared.transition(&mut inner, SessionState::Uninitialized);
                shared
                    .translator
                    .deliver(SessionEvent::Message(format!("Engine init failed: {e}")));
                Err(e.into())
            }
        }
    }

    /// Set the pipeline to playing. Rejected before the session is ready.
    pub fn play(&self) -> SessionResult<()> {
        let mut inner = self.shared.inner.lock();
        self.shared.play_locked(&mut inner)
    }

    /// Set the pipeline to paused. Rejected before the session is ready.
    pub fn pause(&self) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if !inner.state.is_ready() {
            return Err(shared.reject(&inner, "pause"));
        }

        shared.engine.pause()?;
        shared.transition(&mut inner, SessionState::Paused);
        Ok(())
    }

    /// Attach a render target. Before the session is ready the binding is
    /// queued and forwarded once the engine reports ready.
    pub fn attach_surface(
        &self,
        id: SurfaceId,
        handle: usize,
        width: u32,
        height: u32,
    ) -> SessionResult<()> {
        let handle = SurfaceHandle::from_raw(handle).ok_or(SessionError::InvalidSurfaceHandle)?;

        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if inner.state.is_shutting_down() {
            return Err(shared.reject(&inner, "attach_surface"));
        }

        if inner.surfaces.is_attached(id) {
            debug!(%id, "Surface already attached, replacing");
        }

        let forward = inner.state.is_ready();
        inner
            .surfaces
            .attach(shared.engine.as_ref(), id, handle, width, height, forward)
    }

    /// Attach a render target by its numeric id.
    pub fn attach_surface_raw(
        &self,
        id: u32,
        handle: usize,
        width: u32,
        height: u32,
    ) -> SessionResult<()> {
        self.attach_surface(SurfaceId::try_from(id)?, handle, width, height)
    }

    /// Detach a render target. Returns once the engine no longer references
    /// the handle. Unknown or detached ids are a no-op.
    pub fn detach_surface(&self, id: SurfaceId) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let was_bound = inner.surfaces.is_bound(id);
        if inner.surfaces.detach(shared.engine.as_ref(), id)? {
            debug!(%id, was_bound, "Surface detached");
        }
        Ok(())
    }

    /// Add a unicast viewer.
    pub fn add_client(&self, address: &str, port: u32) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.registry_guard("add_client")?;
        inner.clients.add(shared.engine.as_ref(), address, port)?;
        Ok(())
    }

    /// Remove a unicast viewer.
    pub fn remove_client(&self, address: &str, port: u32) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.registry_guard("remove_client")?;
        inner.clients.remove(shared.engine.as_ref(), address, port)?;
        Ok(())
    }

    /// Remove every unicast viewer.
    pub fn clear_clients(&self) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.registry_guard("clear_clients")?;
        inner.clients.clear(shared.engine.as_ref())
    }

    /// Start, or retarget, the broadcast channel.
    pub fn start_broadcast(&self, address: &str, port: u32) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.registry_guard("start_broadcast")?;
        inner
            .clients
            .start_broadcast(shared.engine.as_ref(), address, port)?;
        Ok(())
    }

    /// Stop the broadcast channel.
    pub fn stop_broadcast(&self, address: &str, port: u32) -> SessionResult<()> {
        let shared = &self.shared;
        let mut inner = shared.registry_guard("stop_broadcast")?;
        inner
            .clients
            .stop_broadcast(shared.engine.as_ref(), address, port)?;
        Ok(())
    }

    /// Tear the session down and wait for the engine to release every
    /// surface binding and socket.
    ///
    /// Always accepted. Concurrent callers coalesce: later callers wait for
    /// the running teardown instead of starting another one.
    #[instrument(name = "terminate", skip(self))]
    pub fn terminate(&self) -> SessionResult<()> {
        self.shared.terminate()
    }

    /// Run a command message.
    pub fn dispatch(&self, command: SessionCommand) -> SessionResult<()> {
        debug!(command = command.name(), "Dispatching command");

        match command {
            SessionCommand::RequestInit { permission_granted } => {
                self.request_init(permission_granted)
            }
            SessionCommand::SetPermission(granted) => {
                self.set_permission(granted);
                Ok(())
            }
            SessionCommand::Play => self.play(),
            SessionCommand::Pause => self.pause(),
            SessionCommand::Terminate => self.terminate(),
            SessionCommand::AttachSurface {
                id,
                handle,
                width,
                height,
            } => self.attach_surface(id, handle, width, height),
            SessionCommand::DetachSurface(id) => self.detach_surface(id),
            SessionCommand::AddClient { address, port } => self.add_client(&address, port),
            SessionCommand::RemoveClient { address, port } => self.remove_client(&address, port),
            SessionCommand::ClearClients => self.clear_clients(),
            SessionCommand::StartBroadcast { address, port } => {
                self.start_broadcast(&address, port)
            }
            SessionCommand::StopBroadcast { address, port } => {
                self.stop_broadcast(&address, port)
            }
        }
    }
}

impl SessionShared {
    fn transition(&self, inner: &mut SessionInner, new_state: SessionState) {
        let previous = inner.state;
        inner.state = new_state;

        debug!(
            previous = %previous,
            current = %new_state,
            "State transition"
        );
    }

    /// Log and report a command refused in the current state.
    fn reject(&self, inner: &SessionInner, command: &'static str) -> SessionError {
        let err = SessionError::CommandRejected {
            command,
            state: inner.state,
        };
        warn!("{}", err);
        self.translator
            .deliver(SessionEvent::CommandRejected(err.to_string()));
        err
    }

    /// Lock for a registry mutation, applying the registry policy.
    fn registry_guard(&self, command: &'static str) -> SessionResult<MutexGuard<'_, SessionInner>> {
        let inner = self.inner.lock();

        let allowed = if inner.state.is_shutting_down() {
            false
        } else if self.config.registry_requires_ready {
            inner.state.is_ready()
        } else {
            true
        };

        if allowed {
            Ok(inner)
        } else {
            Err(self.reject(&inner, command))
        }
    }

    fn play_locked(&self, inner: &mut SessionInner) -> SessionResult<()> {
        if !inner.state.is_ready() {
            return Err(self.reject(inner, "play"));
        }

        self.engine.play()?;
        self.transition(inner, SessionState::Playing);
        Ok(())
    }

    /// Initializing → Ready: flush queued surfaces and optionally auto-start.
    fn mark_ready(&self, inner: &mut SessionInner) {
        if inner.state != SessionState::Initializing {
            debug!(state = %inner.state, "Engine ready outside initialization, ignoring");
            return;
        }

        self.transition(inner, SessionState::Ready);
        info!("Session ready");
        self.translator.deliver(SessionEvent::SessionReady);

        for (id, e) in inner.surfaces.flush_pending(self.engine.as_ref()) {
            self.translator
                .deliver(SessionEvent::Message(format!("Failed to bind {id} surface: {e}")));
        }

        if self.config.auto_start_on_ready {
            info!("Auto-starting playback");
            if let Err(e) = self.play_locked(inner) {
                warn!("Auto-start failed: {}", e);
                self.translator
                    .deliver(SessionEvent::Message(format!("Auto-start failed: {e}")));
            }
        }
    }

    /// Entry point for engine callbacks, on the engine's thread.
    pub(crate) fn handle_notification(&self, notification: EngineNotification) {
        let Some(translated) = self.translator.translate(notification) else {
            return;
        };

        let mut inner = self.inner.lock();

        match translated {
            Translated::EngineReady => self.mark_ready(&mut inner),
            Translated::State(state) => {
                if inner.state.is_terminated() {
                    debug!(%state, "Session terminated, ignoring pipeline state");
                    return;
                }
                self.translator.deliver(SessionEvent::StateChanged(state));
                if state == PipelineState::Ready {
                    self.mark_ready(&mut inner);
                }
            }
            Translated::Message(text) => {
                debug!(%text, "Engine message");
                self.translator.deliver(SessionEvent::Message(text));
            }
            Translated::Fatal(reason) => self.fail(&mut inner, reason),
        }
    }

    fn fail(&self, inner: &mut SessionInner, reason: String) {
        error!(%reason, "Engine failure");

        match inner.state {
            SessionState::Terminated => {
                debug!("Already terminated, ignoring engine failure");
            }
            SessionState::Terminating => {
                inner.pending_failure.get_or_insert(reason);
            }
            _ => {
                self.transition(inner, SessionState::Terminated);
                self.emit_terminated(inner, TerminationReason::EngineFailure { reason });
                self.teardown_done.notify_all();
            }
        }
    }

    fn emit_terminated(&self, inner: &mut SessionInner, reason: TerminationReason) {
        if inner.terminated_emitted {
            return;
        }
        inner.terminated_emitted = true;
        info!(reason = %reason.message(), "Session terminated");
        self.translator
            .deliver(SessionEvent::SessionTerminated(reason));
    }

    fn terminate(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();

        while inner.teardown_running {
            debug!("Teardown already running, waiting");
            self.teardown_done.wait(&mut inner);
        }

        if inner.state.is_terminated() && !inner.engine_live {
            debug!("Already terminated");
            return Ok(());
        }

        // After an engine failure the session is already terminated, but
        // the engine may still hold bindings.
        let emit = !inner.state.is_terminated();
        if emit {
            self.transition(&mut inner, SessionState::Terminating);
        }
        inner.teardown_running = true;

        let engine_live = std::mem::take(&mut inner.engine_live);
        let SessionInner {
            surfaces, clients, ..
        } = &mut *inner;
        let failed = teardown::release_registries(self.engine.as_ref(), surfaces, clients);
        if failed > 0 {
            warn!(failed, "Teardown finished with failures");
        }

        let result = if engine_live {
            drop(inner);
            let result = teardown::finalize_engine(self.engine.as_ref());
            inner = self.inner.lock();
            result
        } else {
            debug!("Engine never initialized, skipping finalize");
            Ok(())
        };

        if let Err(e) = &result {
            error!("Engine finalize failed: {}", e);
        }

        if emit {
            self.transition(&mut inner, SessionState::Terminated);
            let reason = match inner.pending_failure.take() {
                Some(reason) => TerminationReason::EngineFailure { reason },
                None => TerminationReason::Requested,
            };
            self.emit_terminated(&mut inner, reason);
        }

        inner.teardown_running = false;
        self.teardown_done.notify_all();

        result.map_err(Into::into)
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let needs_teardown = {
            let inner = self.inner.get_mut();
            !inner.state.is_terminated() || inner.engine_live
        };

        if needs_teardown {
            debug!("Session dropped without terminate, tearing down");
            if let Err(e) = self.terminate() {
                warn!("Teardown on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::Receiver;

    use super::*;
    use crate::testing::{EngineCall, RecordingEngine};

    fn setup(config: SessionConfig) -> (Session, Arc<RecordingEngine>, Receiver<SessionEvent>) {
        let engine = Arc::new(RecordingEngine::new());
        let (event_tx, event_rx) = caster_ipc::event_channel();
        let session = Session::new(engine.clone(), config, event_tx);
        (session, engine, event_rx)
    }

    fn manual_config() -> SessionConfig {
        SessionConfig {
            auto_start_on_ready: false,
            ..Default::default()
        }
    }

    fn ready_session(config: SessionConfig) -> (Session, Arc<RecordingEngine>, Receiver<SessionEvent>) {
        let (session, engine, events) = setup(config);
        session.request_init(true).unwrap();
        engine.callbacks().on_engine_ready();
        events.try_iter().for_each(drop);
        (session, engine, events)
    }

    fn drain(events: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
        events.try_iter().collect()
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn_terminate(session: &Session) -> thread::JoinHandle<(SessionResult<()>, SessionState)> {
        let session = session.clone();
        thread::spawn(move || {
            let result = session.terminate();
            (result, session.state())
        })
    }

    #[test]
    fn test_request_init_twice_calls_engine_once() {
        let (session, engine, _events) = setup(manual_config());

        session.request_init(true).unwrap();
        session.request_init(true).unwrap();

        assert_eq!(session.state(), SessionState::Initializing);
        assert_eq!(engine.count(&EngineCall::Init), 1);

        engine.callbacks().on_engine_ready();
        session.request_init(true).unwrap();
        assert_eq!(engine.count(&EngineCall::Init), 1);
    }

    #[test]
    fn test_request_init_without_permission() {
        let (session, engine, events) = setup(manual_config());

        let err = session.request_init(false).unwrap_err();
        assert!(matches!(err, SessionError::PermissionDenied));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(engine.calls().is_empty());
        assert!(matches!(
            drain(&events).as_slice(),
            [SessionEvent::CommandRejected(_)]
        ));

        // Operator grants permission and retries.
        session.request_init(true).unwrap();
        assert_eq!(session.state(), SessionState::Initializing);
    }

    #[test]
    fn test_set_permission_then_init() {
        let (session, engine, _events) = setup(manual_config());

        session.set_permission(true);
        assert!(session.snapshot().permission_granted);
        session.request_init(true).unwrap();
        assert_eq!(engine.count(&EngineCall::Init), 1);
    }

    #[test]
    fn test_engine_init_failure_returns_to_uninitialized() {
        let (session, engine, _events) = setup(manual_config());

        engine.fail_next("no camera");
        assert!(matches!(
            session.request_init(true),
            Err(SessionError::Engine(_))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.request_init(true).unwrap();
        assert_eq!(engine.count(&EngineCall::Init), 1);
    }

    #[test]
    fn test_play_before_ready_rejected() {
        let (session, engine, events) = setup(manual_config());

        let err = session.play().unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandRejected {
                command: "play",
                state: SessionState::Uninitialized
            }
        ));
        assert_eq!(engine.count(&EngineCall::Play), 0);
        assert!(matches!(
            drain(&events).as_slice(),
            [SessionEvent::CommandRejected(_)]
        ));

        session.request_init(true).unwrap();
        assert!(session.pause().is_err());
        assert_eq!(engine.count(&EngineCall::Pause), 0);
    }

    #[test]
    fn test_unrecognized_state_ignored() {
        let (session, engine, events) = ready_session(manual_config());

        engine.callbacks().on_engine_state_changed(99);

        assert_eq!(session.state(), SessionState::Ready);
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_ready_play_playing_scenario() {
        let (session, engine, events) = setup(manual_config());

        session.request_init(true).unwrap();
        engine.callbacks().on_engine_state_changed(2);

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(
            drain(&events),
            vec![
                SessionEvent::StateChanged(PipelineState::Ready),
                SessionEvent::SessionReady,
            ]
        );

        session.play().unwrap();
        assert_eq!(engine.count(&EngineCall::Play), 1);
        assert_eq!(session.state(), SessionState::Playing);

        engine.callbacks().on_engine_state_changed(4);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::StateChanged(PipelineState::Playing)]
        );

        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        session.play().unwrap();
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn test_ready_reported_twice_emits_once() {
        let (session, engine, events) = setup(manual_config());

        session.request_init(true).unwrap();
        engine.callbacks().on_engine_state_changed(2);
        engine.callbacks().on_engine_ready();

        let ready_count = drain(&events)
            .iter()
            .filter(|e| **e == SessionEvent::SessionReady)
            .count();
        assert_eq!(ready_count, 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_auto_start_on_ready() {
        let (session, engine, _events) = setup(SessionConfig::default());

        session.request_init(true).unwrap();
        engine.callbacks().on_engine_ready();

        assert_eq!(engine.count(&EngineCall::Play), 1);
        assert_eq!(session.state(), SessionState::Playing);
    }

    #[test]
    fn test_auto_start_failure_reported() {
        let (session, engine, events) = setup(SessionConfig::default());

        session.request_init(true).unwrap();
        engine.fail_next("sink busy");
        engine.callbacks().on_engine_ready();

        assert_eq!(session.state(), SessionState::Ready);
        let events = drain(&events);
        assert_eq!(events.first(), Some(&SessionEvent::SessionReady));
        assert!(matches!(
            &events[1..],
            [SessionEvent::Message(text)] if text.starts_with("Auto-start failed") && text.contains("sink busy")
        ));
    }

    #[test]
    fn test_messages_pass_through() {
        let (_session, engine, events) = ready_session(manual_config());

        engine
            .callbacks()
            .on_engine_message("Error received from element vsink0: gone");
        engine.callbacks().on_engine_state_changed(1);

        assert_eq!(
            drain(&events),
            vec![
                SessionEvent::Message("Error received from element vsink0: gone".to_string()),
                SessionEvent::StateChanged(PipelineState::Null),
            ]
        );
    }

    #[test]
    fn test_surface_attached_before_ready_is_bound_on_ready() {
        let (session, engine, _events) = setup(manual_config());

        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();
        session
            .attach_surface(SurfaceId::Secondary, 0x20, 640, 360)
            .unwrap();
        assert!(engine.calls().is_empty());

        session.request_init(true).unwrap();
        engine.callbacks().on_engine_ready();

        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Init,
                EngineCall::BindSurface(SurfaceId::Primary, 0x10),
                EngineCall::BindSurface(SurfaceId::Secondary, 0x20),
            ]
        );
        assert!(session.snapshot().surfaces.iter().all(|s| s.bound));
    }

    #[test]
    fn test_attach_validation() {
        let (session, engine, _events) = ready_session(manual_config());

        assert!(matches!(
            session.attach_surface(SurfaceId::Primary, 0, 1920, 1080),
            Err(SessionError::InvalidSurfaceHandle)
        ));
        assert!(matches!(
            session.attach_surface_raw(7, 0x10, 1920, 1080),
            Err(SessionError::UnknownSurface(_))
        ));
        assert_eq!(engine.count(&EngineCall::BindSurface(SurfaceId::Primary, 0x10)), 0);

        session.attach_surface_raw(1, 0x10, 1920, 1080).unwrap();
        assert_eq!(
            engine.count(&EngineCall::BindSurface(SurfaceId::Secondary, 0x10)),
            1
        );
    }

    #[test]
    fn test_detach_is_synchronous_and_idempotent() {
        let (session, engine, _events) = ready_session(manual_config());

        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();
        session.detach_surface(SurfaceId::Primary).unwrap();
        session.detach_surface(SurfaceId::Primary).unwrap();
        session.detach_surface(SurfaceId::Secondary).unwrap();

        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Primary)), 1);
        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Secondary)), 0);
    }

    #[test]
    fn test_client_add_remove_through_session() {
        let (session, engine, _events) = setup(manual_config());

        session.add_client("10.0.0.5", 5000).unwrap();
        session.add_client("10.0.0.5", 5000).unwrap();
        session.remove_client("10.0.0.5", 5000).unwrap();

        assert!(session.snapshot().clients.is_empty());
        assert_eq!(
            engine.count(&EngineCall::AddClient("10.0.0.5".to_string(), 5000)),
            1
        );
        assert_eq!(
            engine.count(&EngineCall::RemoveClient("10.0.0.5".to_string(), 5000)),
            1
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let (session, engine, events) = setup(manual_config());

        assert!(matches!(
            session.add_client("", 5000),
            Err(SessionError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            session.add_client("10.0.0.5", 0),
            Err(SessionError::InvalidEndpoint(_))
        ));
        assert!(engine.calls().is_empty());
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn test_registry_requires_ready_policy() {
        let config = SessionConfig {
            auto_start_on_ready: false,
            registry_requires_ready: true,
            ..Default::default()
        };
        let (session, engine, _events) = setup(config);

        assert!(matches!(
            session.add_client("10.0.0.5", 5000),
            Err(SessionError::CommandRejected { .. })
        ));
        assert!(session.start_broadcast("10.0.0.255", 5000).is_err());
        assert!(engine.calls().is_empty());

        session.request_init(true).unwrap();
        engine.callbacks().on_engine_ready();
        session.add_client("10.0.0.5", 5000).unwrap();
        session.start_broadcast("10.0.0.255", 5000).unwrap();
        assert_eq!(session.snapshot().clients.len(), 1);
    }

    #[test]
    fn test_terminate_releases_everything_in_order() {
        let (session, engine, events) = ready_session(manual_config());

        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();
        session
            .attach_surface(SurfaceId::Secondary, 0x20, 640, 360)
            .unwrap();
        session.add_client("10.0.0.5", 5000).unwrap();
        session.start_broadcast("10.0.0.255", 5000).unwrap();
        session.play().unwrap();

        session.terminate().unwrap();

        let calls = engine.calls();
        let tail = &calls[calls.len() - 5..];
        assert_eq!(
            tail,
            [
                EngineCall::UnbindSurface(SurfaceId::Primary),
                EngineCall::UnbindSurface(SurfaceId::Secondary),
                EngineCall::StopBroadcast("10.0.0.255".to_string(), 5000),
                EngineCall::ClearClients,
                EngineCall::Finalize,
            ]
        );
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(TerminationReason::Requested)]
        );

        let snapshot = session.snapshot();
        assert!(snapshot.clients.is_empty());
        assert!(snapshot.broadcast.is_none());
        assert!(snapshot.surfaces.iter().all(|s| !s.attached));
    }

    #[test]
    fn test_terminate_from_uninitialized() {
        let (session, engine, events) = setup(manual_config());

        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();
        session.terminate().unwrap();

        assert!(engine.calls().is_empty());
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(TerminationReason::Requested)]
        );
    }

    #[test]
    fn test_terminate_while_initializing_aborts() {
        let (session, engine, _events) = setup(manual_config());

        session.request_init(true).unwrap();
        session.terminate().unwrap();

        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert_eq!(session.state(), SessionState::Terminated);

        // A late ready from the engine must not revive the session.
        engine.callbacks().on_engine_ready();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_terminate_twice_emits_once() {
        let (session, engine, events) = ready_session(manual_config());

        session.terminate().unwrap();
        session.terminate().unwrap();

        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        let terminated = drain(&events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::SessionTerminated(_)))
            .count();
        assert_eq!(terminated, 1);
    }

    #[test]
    fn test_concurrent_terminate_coalesces() {
        let (session, engine, events) = ready_session(SessionConfig::default());
        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || session.terminate())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Primary)), 1);
        let terminated = drain(&events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::SessionTerminated(_)))
            .count();
        assert_eq!(terminated, 1);
    }

    #[test]
    fn test_terminate_waits_for_running_teardown() {
        let (session, engine, events) = ready_session(manual_config());
        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();
        let (entered, release) = engine.hold_finalize();

        let first = spawn_terminate(&session);
        entered.recv_timeout(WAIT).unwrap();
        assert_eq!(session.state(), SessionState::Terminating);

        // Finalize is running with the session lock released.
        let second = spawn_terminate(&session);
        thread::sleep(Duration::from_millis(50));
        assert!(!second.is_finished());
        assert_eq!(session.state(), SessionState::Terminating);

        release.send(()).unwrap();
        for handle in [first, second] {
            let (result, state) = handle.join().unwrap();
            result.unwrap();
            assert_eq!(state, SessionState::Terminated);
        }

        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Primary)), 1);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(TerminationReason::Requested)]
        );
    }

    #[test]
    fn test_engine_fatal_during_teardown_reported_once() {
        let (session, engine, events) = ready_session(manual_config());
        let (entered, release) = engine.hold_finalize();

        let terminating = spawn_terminate(&session);
        entered.recv_timeout(WAIT).unwrap();

        let callbacks = engine.callbacks();
        thread::spawn(move || callbacks.on_engine_fatal("boom"))
            .join()
            .unwrap();
        assert_eq!(session.state(), SessionState::Terminating);
        assert!(drain(&events).is_empty());

        release.send(()).unwrap();
        let (result, state) = terminating.join().unwrap();
        result.unwrap();
        assert_eq!(state, SessionState::Terminated);

        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(
                TerminationReason::EngineFailure {
                    reason: "boom".to_string()
                }
            )]
        );
    }

    #[test]
    fn test_commands_rejected_after_terminate() {
        let (session, engine, _events) = ready_session(manual_config());
        session.terminate().unwrap();

        assert!(session.play().is_err());
        assert!(session.request_init(true).is_err());
        assert!(session.add_client("10.0.0.5", 5000).is_err());
        assert!(session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .is_err());
        assert_eq!(engine.count(&EngineCall::Play), 0);
    }

    #[test]
    fn test_engine_fatal_terminates() {
        let (session, engine, events) = ready_session(manual_config());
        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();

        engine.callbacks().on_engine_fatal("pipeline error");

        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(
                TerminationReason::EngineFailure {
                    reason: "pipeline error".to_string()
                }
            )]
        );

        // A later terminate still releases the engine, silently.
        session.terminate().unwrap();
        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Primary)), 1);
        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert!(drain(&events).is_empty());

        session.terminate().unwrap();
        assert_eq!(engine.count(&EngineCall::Finalize), 1);
    }

    #[test]
    fn test_state_changes_ignored_after_fatal() {
        let (session, engine, events) = ready_session(manual_config());

        engine.callbacks().on_engine_fatal("gone");
        drain(&events);
        engine.callbacks().on_engine_state_changed(4);

        assert!(drain(&events).is_empty());
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_dispatch_commands() {
        let (session, engine, _events) = setup(manual_config());

        session
            .dispatch(SessionCommand::RequestInit {
                permission_granted: true,
            })
            .unwrap();
        engine.callbacks().on_engine_ready();
        session.dispatch(SessionCommand::Play).unwrap();
        session
            .dispatch(SessionCommand::AddClient {
                address: "192.168.10.126".to_string(),
                port: 5000,
            })
            .unwrap();
        session
            .dispatch(SessionCommand::StartBroadcast {
                address: "192.168.10.255".to_string(),
                port: 5000,
            })
            .unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Playing);
        assert_eq!(snapshot.clients.len(), 1);
        assert!(snapshot.broadcast.is_some());

        session.dispatch(SessionCommand::Terminate).unwrap();
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[test]
    fn test_drop_tears_down() {
        let (session, engine, events) = ready_session(manual_config());
        session
            .attach_surface(SurfaceId::Primary, 0x10, 1920, 1080)
            .unwrap();

        drop(session);

        assert_eq!(engine.count(&EngineCall::UnbindSurface(SurfaceId::Primary)), 1);
        assert_eq!(engine.count(&EngineCall::Finalize), 1);
        assert_eq!(
            drain(&events),
            vec![SessionEvent::SessionTerminated(TerminationReason::Requested)]
        );
    }
}
