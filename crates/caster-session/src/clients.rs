//! Unicast viewer and broadcast channel registry.

use std::collections::BTreeSet;

use tracing::{debug, info};

use caster_ipc::{BroadcastInfo, Endpoint};

use crate::engine::MediaEngine;
use crate::SessionResult;

/// Tracks unicast viewers and the single broadcast channel.
///
/// Every mutation validates its endpoint before touching the engine, and
/// only forwards to the engine when the registry actually changes.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeSet<Endpoint>,
    broadcast: Option<Endpoint>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unicast viewer. Returns false if it was already registered.
    pub fn add(&mut self, engine: &dyn MediaEngine, address: &str, port: u32) -> SessionResult<bool> {
        let endpoint = Endpoint::new(address, port)?;

        if self.clients.contains(&endpoint) {
            debug!(%endpoint, "Client already registered");
            return Ok(false);
        }

        engine.add_client(&endpoint)?;
        info!(%endpoint, "Client added");
        self.clients.insert(endpoint);
        Ok(true)
    }

    /// Remove a unicast viewer. Returns false if it was not registered.
    pub fn remove(
        &mut self,
        engine: &dyn MediaEngine,
        address: &str,
        port: u32,
    ) -> SessionResult<bool> {
        let endpoint = Endpoint::new(address, port)?;

        if !self.clients.contains(&endpoint) {
            debug!(%endpoint, "Client not registered, ignoring remove");
            return Ok(false);
        }

        engine.remove_client(&endpoint)?;
        info!(%endpoint, "Client removed");
        self.clients.remove(&endpoint);
        Ok(true)
    }

    /// Remove every unicast viewer. The engine is always told, and the
    /// registry is emptied even if the engine call fails.
    pub fn clear(&mut self, engine: &dyn MediaEngine) -> SessionResult<()> {
        let result = engine.clear_clients();
        let removed = self.clients.len();
        self.clients.clear();
        info!(removed, "Clients cleared");
        result.map_err(Into::into)
    }

    /// Start the broadcast channel, replacing an active channel with
    /// different parameters.
    ///
    /// Returns false when the identical channel is already active.
    pub fn start_broadcast(
        &mut self,
        engine: &dyn MediaEngine,
        address: &str,
        port: u32,
    ) -> SessionResult<bool> {
        let endpoint = Endpoint::new(address, port)?;

        if let Some(active) = &self.broadcast {
            if *active == endpoint {
                debug!(%endpoint, "Broadcast already active");
                return Ok(false);
            }

            engine.stop_broadcast(active)?;
            info!(previous = %active, "Broadcast stopped for retarget");
            self.broadcast = None;
        }

        engine.start_broadcast(&endpoint)?;
        info!(%endpoint, "Broadcast started");
        self.broadcast = Some(endpoint);
        Ok(true)
    }

    /// Stop the broadcast channel named by `address`/`port`.
    ///
    /// Returns false when no channel is active or the active channel has
    /// different parameters.
    pub fn stop_broadcast(
        &mut self,
        engine: &dyn MediaEngine,
        address: &str,
        port: u32,
    ) -> SessionResult<bool> {
        let endpoint = Endpoint::new(address, port)?;

        match &self.broadcast {
            Some(active) if *active == endpoint => {
                engine.stop_broadcast(active)?;
                info!(%endpoint, "Broadcast stopped");
                self.broadcast = None;
                Ok(true)
            }
            Some(active) => {
                debug!(%endpoint, active = %active, "Broadcast target mismatch, ignoring stop");
                Ok(false)
            }
            None => {
                debug!(%endpoint, "Broadcast inactive, ignoring stop");
                Ok(false)
            }
        }
    }

    /// Stop the active broadcast, whatever its parameters. Used by teardown.
    pub fn stop_active_broadcast(&mut self, engine: &dyn MediaEngine) -> SessionResult<()> {
        if let Some(active) = self.broadcast.take() {
            engine.stop_broadcast(&active)?;
            info!(endpoint = %active, "Broadcast stopped");
        }
        Ok(())
    }

    /// Number of unicast viewers.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no unicast viewers are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Unicast viewers, sorted.
    pub fn clients(&self) -> Vec<Endpoint> {
        self.clients.iter().cloned().collect()
    }

    /// The active broadcast channel, if any.
    pub fn broadcast(&self) -> Option<BroadcastInfo> {
        self.broadcast.clone().map(|endpoint| BroadcastInfo { endpoint })
    }
}
