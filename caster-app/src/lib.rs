//! Caster console application library.

mod config;
mod console;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use caster_loopback::LoopbackEngine;

pub use config::AppConfig;
pub use console::{
    format_event, format_settings, format_snapshot, parse_line, Console, Flow, Input,
};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "caster", about = "Drive a stream session from the console")]
pub struct Args {
    /// JSON config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print events and status as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Start with capture permission already granted.
    #[arg(long)]
    pub grant: bool,

    /// Do not start playback automatically when the session becomes ready.
    #[arg(long)]
    pub manual_start: bool,

    /// Reject client and broadcast changes until the session is ready.
    #[arg(long)]
    pub registry_requires_ready: bool,

    /// Simulated engine startup time (ms).
    #[arg(long)]
    pub startup_delay_ms: Option<u64>,

    /// Capture from this camera device index.
    #[arg(long, conflicts_with = "test_pattern")]
    pub camera: Option<u32>,

    /// Capture a generated test pattern.
    #[arg(long)]
    pub test_pattern: bool,
}

/// Initialize logging. Logs go to stderr so stdout carries only console
/// output.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "caster=debug,caster_lib=debug,caster_session=debug,caster_loopback=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Read stdin lines on a background thread.
fn spawn_stdin_reader() -> anyhow::Result<Receiver<String>> {
    let (line_tx, line_rx) = crossbeam_channel::unbounded();

    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    Ok(line_rx)
}

/// Run the console until the session ends.
pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();
    info!("Caster starting");

    let config = AppConfig::resolve(&args)?;
    let engine = Arc::new(LoopbackEngine::new(config.loopback.clone()));
    let (session, events) = caster_session::create_session(engine.clone(), config.session.clone());

    let lines = spawn_stdin_reader()?;
    let mut console = Console::new(session, engine, events, io::stdout(), args.json, args.grant);
    console.run(lines)?;

    info!("Caster stopped");
    Ok(())
}
