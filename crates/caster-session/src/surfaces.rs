//! Render surface attachment tracking.

use tracing::{debug, info, warn};

use caster_ipc::{SurfaceHandle, SurfaceId, SurfaceInfo};

use crate::engine::{EngineError, MediaEngine};
use crate::SessionResult;

#[derive(Debug, Default, Clone, Copy)]
struct SurfaceSlot {
    handle: Option<SurfaceHandle>,
    width: u32,
    height: u32,
    bound: bool,
}

/// Tracks which render targets are attached and which the engine holds.
///
/// A slot can be attached but not bound: attaches made before the engine is
/// ready are queued and bound by [`flush_pending`](Self::flush_pending).
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    slots: [SurfaceSlot; SurfaceId::ALL.len()],
}

impl SurfaceRegistry {
    /// Create a registry with no surfaces attached.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: SurfaceId) -> &SurfaceSlot {
        &self.slots[id.index() as usize]
    }

    fn slot_mut(&mut self, id: SurfaceId) -> &mut SurfaceSlot {
        &mut self.slots[id.index() as usize]
    }

    /// Attach `handle` to `id`. When `forward` is false the binding is only
    /// recorded.
    ///
    /// Re-attaching the handle the engine already holds only updates the
    /// dimensions; a different handle makes the engine switch targets.
    pub fn attach(
        &mut self,
        engine: &dyn MediaEngine,
        id: SurfaceId,
        handle: SurfaceHandle,
        width: u32,
        height: u32,
        forward: bool,
    ) -> SessionResult<()> {
        let slot = *self.slot(id);

        if slot.bound && slot.handle == Some(handle) {
            debug!(%id, width, height, "Surface resized, binding unchanged");
            let slot = self.slot_mut(id);
            slot.width = width;
            slot.height = height;
            return Ok(());
        }

        let bound = if forward {
            engine.bind_surface(id, handle)?;
            info!(%id, width, height, "Surface bound");
            true
        } else {
            debug!(%id, width, height, "Surface attach queued until ready");
            false
        };

        *self.slot_mut(id) = SurfaceSlot {
            handle: Some(handle),
            width,
            height,
            bound,
        };
        Ok(())
    }

    /// Detach `id`, unbinding it at the engine first if it is bound.
    ///
    /// Returns false when nothing was attached.
    pub fn detach(&mut self, engine: &dyn MediaEngine, id: SurfaceId) -> SessionResult<bool> {
        let slot = *self.slot(id);
        if slot.handle.is_none() {
            debug!(%id, "Surface not attached, ignoring detach");
            return Ok(false);
        }

        if slot.bound {
            engine.unbind_surface(id)?;
            info!(%id, "Surface unbound");
        }

        *self.slot_mut(id) = SurfaceSlot::default();
        Ok(true)
    }

    /// Bind every attached-but-unbound surface.
    ///
    /// Failures leave the slot queued and are returned to the caller.
    pub fn flush_pending(&mut self, engine: &dyn MediaEngine) -> Vec<(SurfaceId, EngineError)> {
        let mut failures = Vec::new();

        for id in SurfaceId::ALL {
            let slot = self.slot_mut(id);
            let Some(handle) = slot.handle else {
                continue;
            };
            if slot.bound {
                continue;
            }

            match engine.bind_surface(id, handle) {
                Ok(()) => {
                    slot.bound = true;
                    info!(%id, "Queued surface bound");
                }
                Err(e) => {
                    warn!(%id, "Failed to bind queued surface: {}", e);
                    failures.push((id, e));
                }
            }
        }

        failures
    }

    /// Unbind every bound surface and forget all attachments.
    pub fn unbind_all(&mut self, engine: &dyn MediaEngine) -> Vec<(SurfaceId, EngineError)> {
        let mut failures = Vec::new();

        for id in SurfaceId::ALL {
            if self.slot(id).bound {
                if let Err(e) = engine.unbind_surface(id) {
                    warn!(%id, "Failed to unbind surface: {}", e);
                    failures.push((id, e));
                }
            }
            *self.slot_mut(id) = SurfaceSlot::default();
        }

        failures
    }

    /// Whether `id` has an attached handle.
    pub fn is_attached(&self, id: SurfaceId) -> bool {
        self.slot(id).handle.is_some()
    }

    /// Whether the engine holds a binding for `id`.
    pub fn is_bound(&self, id: SurfaceId) -> bool {
        self.slot(id).bound
    }

    /// Attachment state of every surface, in id order.
    pub fn info(&self) -> Vec<SurfaceInfo> {
        SurfaceId::ALL
            .iter()
            .map(|&id| {
                let slot = self.slot(id);
                SurfaceInfo {
                    id,
                    attached: slot.handle.is_some(),
                    bound: slot.bound,
                    width: slot.width,
                    height: slot.height,
                }
            })
            .collect()
    }
}
