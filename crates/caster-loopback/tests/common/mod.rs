//! Shared helpers for loopback session tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

use caster_ipc::{SessionConfig, SessionEvent};
use caster_loopback::{LoopbackConfig, LoopbackEngine};
use caster_session::{create_session, Session};

/// Upper bound on waiting for any single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manual_config() -> SessionConfig {
    SessionConfig {
        auto_start_on_ready: false,
        ..Default::default()
    }
}

pub fn fast_engine() -> LoopbackConfig {
    LoopbackConfig {
        startup_delay_ms: 10,
        ..Default::default()
    }
}

pub fn start(config: SessionConfig) -> (Session, Arc<LoopbackEngine>, Receiver<SessionEvent>) {
    init_tracing();
    let engine = Arc::new(LoopbackEngine::new(fast_engine()));
    let (session, events) = create_session(engine.clone(), config);
    (session, engine, events)
}

/// Start a session and wait until it reports ready. Events up to and
/// including `SessionReady` are consumed.
pub fn start_ready(config: SessionConfig) -> (Session, Arc<LoopbackEngine>, Receiver<SessionEvent>) {
    let (session, engine, events) = start(config);
    session.request_init(true).unwrap();
    wait_for(&events, |e| *e == SessionEvent::SessionReady);
    (session, engine, events)
}

/// Collect events until one matches `done`. Panics on timeout.
pub fn wait_for(
    events: &Receiver<SessionEvent>,
    done: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut seen = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let matched = done(&event);
                seen.push(event);
                if matched {
                    return seen;
                }
            }
            Err(e) => panic!("no matching event ({e}), saw {seen:?}"),
        }
    }
}
