//! In-process loopback media engine for the caster.
//!
//! [`LoopbackEngine`] implements the session's [`MediaEngine`] contract
//! without capturing or sending anything: pipeline state changes run on a
//! worker thread and are reported back through the session callbacks, while
//! render targets and network sinks are tracked as plain bookkeeping.
//!
//! [`MediaEngine`]: caster_session::MediaEngine

mod config;
mod engine;
mod worker;

pub use config::{CaptureSource, LoopbackConfig};
pub use engine::{LoopbackEngine, SinkPorts};
