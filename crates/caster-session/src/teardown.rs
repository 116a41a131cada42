//! Ordered session teardown.

use tracing::{info, instrument, warn};

use crate::clients::ClientRegistry;
use crate::engine::{EngineResult, MediaEngine};
use crate::surfaces::SurfaceRegistry;

/// Teardown phases, in order.
///
/// Render bindings go first so a caller may destroy its surfaces as soon as
/// `terminate` returns; the engine itself is finalized last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownPhase {
    /// Unbind every render surface.
    UnbindSurfaces,

    /// Stop the broadcast channel.
    StopBroadcast,

    /// Remove every unicast viewer.
    ClearClients,

    /// Stop the engine and release its sockets.
    FinalizeEngine,
}

impl TeardownPhase {
    /// The first phase.
    pub fn first() -> Self {
        Self::UnbindSurfaces
    }

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::UnbindSurfaces => Some(Self::StopBroadcast),
            Self::StopBroadcast => Some(Self::ClearClients),
            Self::ClearClients => Some(Self::FinalizeEngine),
            Self::FinalizeEngine => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::UnbindSurfaces => "Unbinding surfaces",
            Self::StopBroadcast => "Stopping broadcast",
            Self::ClearClients => "Clearing clients",
            Self::FinalizeEngine => "Finalizing engine",
        }
    }
}

/// Run every phase before [`TeardownPhase::FinalizeEngine`] against a live
/// engine. Failures are logged and teardown continues.
///
/// Returns the number of phases that reported a failure.
#[instrument(name = "release_registries", skip_all)]
pub fn release_registries(
    engine: &dyn MediaEngine,
    surfaces: &mut SurfaceRegistry,
    clients: &mut ClientRegistry,
) -> usize {
    let mut failed = 0;
    let mut phase = TeardownPhase::first();

    while phase != TeardownPhase::FinalizeEngine {
        info!("Teardown phase: {}", phase.name());

        let ok = match phase {
            TeardownPhase::UnbindSurfaces => surfaces.unbind_all(engine).is_empty(),
            TeardownPhase::StopBroadcast => log_failure(phase, clients.stop_active_broadcast(engine)),
            TeardownPhase::ClearClients => {
                if clients.is_empty() {
                    true
                } else {
                    info!(clients = clients.len(), "Dropping registered clients");
                    log_failure(phase, clients.clear(engine))
                }
            }
            TeardownPhase::FinalizeEngine => true,
        };

        if !ok {
            failed += 1;
        }

        match phase.next() {
            Some(next) => phase = next,
            None => break,
        }
    }

    failed
}

/// Run [`TeardownPhase::FinalizeEngine`]. Must be called without the
/// session lock held.
#[instrument(name = "finalize_engine", skip_all)]
pub fn finalize_engine(engine: &dyn MediaEngine) -> EngineResult<()> {
    info!("Teardown phase: {}", TeardownPhase::FinalizeEngine.name());
    engine.finalize()
}

fn log_failure<E: std::fmt::Display>(phase: TeardownPhase, result: Result<(), E>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{} failed: {}", phase.name(), e);
            false
        }
    }
}
