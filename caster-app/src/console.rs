//! Line-oriented console driving a session.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::{select, Receiver};
use tracing::{debug, info, warn};

use caster_ipc::{SessionCommand, SessionConfig, SessionEvent, SessionSnapshot, SurfaceId};
use caster_loopback::{CaptureSource, LoopbackConfig, LoopbackEngine};
use caster_session::Session;

const HELP: &str = "\
commands:
  grant | deny                         set capture permission
  init                                 initialize the engine
  play | pause                         pipeline control
  attach <primary|secondary> <handle> <width> <height>
  detach <primary|secondary>
  add <address> <port>                 add a unicast viewer
  remove <address> <port>              remove a unicast viewer
  clear                                remove every unicast viewer
  broadcast <address> <port>           start the broadcast channel
  unbroadcast <address> <port>         stop the broadcast channel
  source <test|camera <index>>         switch the capture source
  status                               show the session
  quit                                 terminate and exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Initialize with the console's current permission.
    Init,

    /// A session command.
    Command(SessionCommand),

    /// Switch the engine's capture source.
    Source(CaptureSource),

    /// Print the session snapshot.
    Status,

    /// Print the command list.
    Help,

    /// Terminate and exit.
    Quit,
}

/// Whether the console keeps running after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match (verb, args.as_slice()) {
        ("init", []) => Input::Init,
        ("grant", []) => Input::Command(SessionCommand::SetPermission(true)),
        ("deny", []) => Input::Command(SessionCommand::SetPermission(false)),
        ("play", []) => Input::Command(SessionCommand::Play),
        ("pause", []) => Input::Command(SessionCommand::Pause),
        ("attach", [id, handle, width, height]) => Input::Command(SessionCommand::AttachSurface {
            id: parse_surface(id)?,
            handle: parse_handle(handle)?,
            width: parse_number(width, "width")?,
            height: parse_number(height, "height")?,
        }),
        ("detach", [id]) => Input::Command(SessionCommand::DetachSurface(parse_surface(id)?)),
        ("add", [address, port]) => Input::Command(SessionCommand::AddClient {
            address: address.to_string(),
            port: parse_number(port, "port")?,
        }),
        ("remove", [address, port]) => Input::Command(SessionCommand::RemoveClient {
            address: address.to_string(),
            port: parse_number(port, "port")?,
        }),
        ("clear", []) => Input::Command(SessionCommand::ClearClients),
        ("broadcast", [address, port]) => Input::Command(SessionCommand::StartBroadcast {
            address: address.to_string(),
            port: parse_number(port, "port")?,
        }),
        ("unbroadcast", [address, port]) => Input::Command(SessionCommand::StopBroadcast {
            address: address.to_string(),
            port: parse_number(port, "port")?,
        }),
        ("source", ["test"]) => Input::Source(CaptureSource::TestPattern),
        ("source", ["camera", device]) => Input::Source(CaptureSource::Camera {
            device: parse_number(device, "camera index")?,
        }),
        ("status", []) => Input::Status,
        ("help", []) => Input::Help,
        ("quit" | "exit", []) => Input::Quit,
        (
            "init" | "grant" | "deny" | "play" | "pause" | "attach" | "detach" | "add" | "remove"
            | "clear" | "broadcast" | "unbroadcast" | "source" | "status" | "help" | "quit"
            | "exit",
            _,
        ) => bail!("Wrong arguments for '{verb}', try 'help'"),
        _ => bail!("Unknown command '{verb}', try 'help'"),
    };

    Ok(Some(input))
}

fn parse_surface(text: &str) -> anyhow::Result<SurfaceId> {
    match text {
        "primary" => Ok(SurfaceId::Primary),
        "secondary" => Ok(SurfaceId::Secondary),
        _ => {
            let raw: u32 = parse_number(text, "surface id")?;
            Ok(SurfaceId::try_from(raw)?)
        }
    }
}

fn parse_handle(text: &str) -> anyhow::Result<usize> {
    match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16)
            .with_context(|| format!("Invalid surface handle '{text}'")),
        None => parse_number(text, "surface handle"),
    }
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> anyhow::Result<T> {
    text.parse()
        .map_err(|_| anyhow!("Invalid {what} '{text}'"))
}

/// Render an event for the console.
pub fn format_event(event: &SessionEvent, json: bool) -> anyhow::Result<String> {
    if json {
        return serde_json::to_string(event).context("Failed to encode event");
    }

    Ok(match event {
        SessionEvent::SessionReady => "session ready".to_string(),
        SessionEvent::SessionTerminated(reason) => {
            format!("session terminated: {}", reason.message())
        }
        SessionEvent::Message(text) => format!("engine: {text}"),
        SessionEvent::StateChanged(state) => format!("pipeline state: {state}"),
        SessionEvent::CommandRejected(reason) => format!("rejected: {reason}"),
    })
}

/// Render a snapshot for the console.
pub fn format_snapshot(snapshot: &SessionSnapshot, json: bool) -> anyhow::Result<String> {
    if json {
        return serde_json::to_string(snapshot).context("Failed to encode snapshot");
    }

    let mut lines = vec![format!(
        "state: {} (permission {})",
        snapshot.state,
        if snapshot.permission_granted {
            "granted"
        } else {
            "not granted"
        }
    )];

    for surface in &snapshot.surfaces {
        let status = match (surface.attached, surface.bound) {
            (false, _) => "detached".to_string(),
            (true, false) => format!("queued {}x{}", surface.width, surface.height),
            (true, true) => format!("bound {}x{}", surface.width, surface.height),
        };
        lines.push(format!("surface {}: {status}", surface.id));
    }

    for client in &snapshot.clients {
        lines.push(format!("client {client}"));
    }

    if let Some(broadcast) = &snapshot.broadcast {
        lines.push(format!("broadcast {}", broadcast.endpoint));
    }

    Ok(lines.join("\n"))
}

/// Render the session policy and engine settings for the console.
pub fn format_settings(session: &SessionConfig, loopback: &LoopbackConfig) -> String {
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    format!(
        "capture: {}\nauto start: {}, registry requires ready: {}",
        loopback.capture_source,
        on_off(session.auto_start_on_ready),
        on_off(session.registry_requires_ready),
    )
}

/// Console session driver.
pub struct Console<W: Write> {
    session: Session,
    engine: Arc<LoopbackEngine>,
    events: Receiver<SessionEvent>,
    out: W,
    json: bool,
    permission: bool,
    terminated: bool,
}

impl<W: Write> Console<W> {
    /// Create a console writing to `out`. `permission` is the operator's
    /// initial capture permission.
    pub fn new(
        session: Session,
        engine: Arc<LoopbackEngine>,
        events: Receiver<SessionEvent>,
        out: W,
        json: bool,
        permission: bool,
    ) -> Self {
        session.set_permission(permission);
        Self {
            session,
            engine,
            events,
            out,
            json,
            permission,
            terminated: false,
        }
    }

    /// Whether `SessionTerminated` has been printed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Process lines until `quit`, end of input, or session termination.
    pub fn run(&mut self, lines: Receiver<String>) -> anyhow::Result<()> {
        let events = self.events.clone();

        loop {
            select! {
                recv(lines) -> line => match line {
                    Ok(line) => {
                        if self.handle_line(&line)? == Flow::Exit {
                            break;
                        }
                    }
                    Err(_) => {
                        debug!("Input closed");
                        break;
                    }
                },
                recv(events) -> event => match event {
                    Ok(event) => self.print_event(&event)?,
                    Err(_) => break,
                },
            }

            if self.terminated {
                break;
            }
        }

        self.shutdown()
    }

    /// Handle one input line, then print any pending events.
    pub fn handle_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        let input = match parse_line(line) {
            Ok(Some(input)) => input,
            Ok(None) => return Ok(Flow::Continue),
            Err(e) => {
                writeln!(self.out, "error: {e:#}")?;
                return Ok(Flow::Continue);
            }
        };

        match input {
            Input::Quit => return Ok(Flow::Exit),
            Input::Help => writeln!(self.out, "{HELP}")?,
            Input::Status => {
                let text = format_snapshot(&self.session.snapshot(), self.json)?;
                writeln!(self.out, "{text}")?;
                if !self.json {
                    let settings = format_settings(self.session.config(), &self.engine.config());
                    writeln!(self.out, "{settings}")?;
                }
            }
            Input::Source(source) => {
                if let Err(e) = self.engine.set_capture_source(source) {
                    debug!(%source, "Source switch failed: {}", e);
                    writeln!(self.out, "error: {e}")?;
                }
            }
            Input::Init => self.dispatch(SessionCommand::RequestInit {
                permission_granted: self.permission,
            })?,
            Input::Command(command) => {
                if let SessionCommand::SetPermission(granted) = command {
                    self.permission = granted;
                }
                self.dispatch(command)?;
            }
        }

        self.drain_events()?;
        Ok(if self.terminated {
            Flow::Exit
        } else {
            Flow::Continue
        })
    }

    /// Terminate the session and print the remaining events.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        info!("Shutting down session");
        if let Err(e) = self.session.terminate() {
            warn!("Terminate failed: {}", e);
            writeln!(self.out, "error: {e}")?;
        }
        self.drain_events()?;
        self.out.flush()?;
        Ok(())
    }

    fn dispatch(&mut self, command: SessionCommand) -> anyhow::Result<()> {
        let name = command.name();
        if let Err(e) = self.session.dispatch(command) {
            debug!(command = name, "Command failed: {}", e);
            writeln!(self.out, "error: {e}")?;
        }
        Ok(())
    }

    fn drain_events(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.events.try_recv() {
            self.print_event(&event)?;
        }
        Ok(())
    }

    fn print_event(&mut self, event: &SessionEvent) -> anyhow::Result<()> {
        if matches!(event, SessionEvent::SessionTerminated(_)) {
            self.terminated = true;
        }
        let text = format_event(event, self.json)?;
        writeln!(self.out, "{text}")?;
        Ok(())
    }
}
