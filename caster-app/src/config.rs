//! Application configuration.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use caster_ipc::SessionConfig;
use caster_loopback::{CaptureSource, LoopbackConfig};

use crate::Args;

/// Everything the console needs to build a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session policy.
    pub session: SessionConfig,

    /// Loopback engine settings.
    pub loopback: LoopbackConfig,
}

impl AppConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build the effective configuration: the config file if one was given,
    /// then command line overrides.
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => {
                info!(path = %path.display(), "Loading config");
                Self::load(path)?
            }
            None => Self::default(),
        };

        config.apply(args);
        Ok(config)
    }

    fn apply(&mut self, args: &Args) {
        if args.manual_start {
            self.session.auto_start_on_ready = false;
        }
        if args.registry_requires_ready {
            self.session.registry_requires_ready = true;
        }
        if let Some(ms) = args.startup_delay_ms {
            self.loopback.startup_delay_ms = ms;
        }
        if let Some(device) = args.camera {
            self.loopback.capture_source = CaptureSource::Camera { device };
        }
        if args.test_pattern {
            self.loopback.capture_source = CaptureSource::TestPattern;
        }
    }
}
