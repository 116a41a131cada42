//! Loopback engine configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the loopback engine pretends to capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureSource {
    /// A camera device by index.
    Camera { device: u32 },

    /// A generated test pattern; always available.
    TestPattern,
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::Camera { device: 0 }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera { device } => write!(f, "camera {device}"),
            Self::TestPattern => write!(f, "test pattern"),
        }
    }
}

/// Loopback engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Simulated time between `init` and the engine reporting ready (ms).
    pub startup_delay_ms: u64,

    /// Capture source to open on `init`.
    pub capture_source: CaptureSource,

    /// Number of camera devices present. Opening a camera index at or
    /// beyond this fails `init`.
    pub camera_count: u32,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 50,
            capture_source: CaptureSource::default(),
            camera_count: 1,
        }
    }
}

impl LoopbackConfig {
    /// Returns true if the configured capture source can be opened.
    pub fn source_available(&self) -> bool {
        match self.capture_source {
            CaptureSource::Camera { device } => device < self.camera_count,
            CaptureSource::TestPattern => true,
        }
    }
}
