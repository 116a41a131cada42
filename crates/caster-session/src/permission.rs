//! Capture permission gate.

use tracing::debug;

use crate::error::SessionError;
use crate::SessionResult;

/// Guards entry into initialization: capture permission must be granted.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionGate {
    granted: bool,
}

impl PermissionGate {
    /// Create a gate with permission not yet granted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the operator's current permission.
    pub fn set(&mut self, granted: bool) {
        if self.granted != granted {
            debug!(granted, "Capture permission changed");
        }
        self.granted = granted;
    }

    /// Whether permission has been granted.
    pub fn is_granted(&self) -> bool {
        self.granted
    }

    /// Fails with `PermissionDenied` unless permission has been granted.
    pub fn check(&self) -> SessionResult<()> {
        if self.granted {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied)
        }
    }
}
