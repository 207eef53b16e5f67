//! The simulator task and its operator handle.
//!
//! Everything that touches simulation state runs on one task: serial bytes,
//! operator commands and the behavior tick are multiplexed through a single
//! `select!` loop, which is what makes the register bank safe without
//! locks. The handle talks to the task over an mpsc channel with oneshot
//! replies and exposes the event stream as a broadcast subscription.

use crate::dispatch::Simulator;
use crate::serial::{open_serial, SerialConfig};
use fieldsim_core::frame::FrameAssembler;
use fieldsim_device::event::{Event, Severity};
use fieldsim_device::persist::{
    self, default_roster, load_memory, load_roster, MemorySnapshot, Roster,
};
use fieldsim_device::profile::{DeviceKind, SimMode};
use fieldsim_device::registry::{DeviceInfo, RegistryError};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;
const READ_CHUNK: usize = 256;

pub trait LinkIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIo for T {}

/// The byte pipe the simulator serves: a serial port in production, any
/// in-memory duplex in tests.
pub type BoxedLink = Box<dyn LinkIo>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("server task has shut down")]
    Shutdown,
}

/// Where the roster and register snapshots live.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub roster: PathBuf,
    pub memory: PathBuf,
}

impl StatePaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            roster: dir.join("roster.json"),
            memory: dir.join("registers.json"),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        port: String,
        baud: u32,
        reply: Reply<Result<(), ServerError>>,
    },
    Attach {
        link: BoxedLink,
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    AddDevice {
        unit_id: u8,
        kind: DeviceKind,
        reply: Reply<Result<DeviceInfo, RegistryError>>,
    },
    RemoveDevice {
        unit_id: u8,
        reply: Reply<Result<(), RegistryError>>,
    },
    SetKind {
        unit_id: u8,
        kind: DeviceKind,
        reply: Reply<Result<DeviceInfo, RegistryError>>,
    },
    SetEnabled {
        unit_id: u8,
        enabled: bool,
        reply: Reply<Result<DeviceInfo, RegistryError>>,
    },
    SetSimMode {
        unit_id: u8,
        mode: SimMode,
        reply: Reply<Result<DeviceInfo, RegistryError>>,
    },
    SetRegister {
        unit_id: u8,
        address: u16,
        value: u16,
        reply: Reply<Result<(), RegistryError>>,
    },
    GetRegister {
        unit_id: u8,
        address: u16,
        reply: Reply<Result<u16, RegistryError>>,
    },
    ListDevices {
        reply: Reply<Vec<DeviceInfo>>,
    },
    GetDeviceState {
        unit_id: u8,
        reply: Reply<Result<DeviceInfo, RegistryError>>,
    },
}

/// Cloneable operator handle to a running simulator task.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
}

impl ServerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ServerError::Shutdown)?;
        rx.await.map_err(|_| ServerError::Shutdown)
    }

    /// Open `port` at `baud` (8N1) and begin answering requests.
    pub async fn start(&self, port: &str, baud: u32) -> Result<(), ServerError> {
        let port = port.to_string();
        self.request(|reply| Command::Start { port, baud, reply })
            .await?
    }

    /// Serve an already-open byte pipe instead of a serial port.
    pub async fn attach(&self, link: BoxedLink) -> Result<(), ServerError> {
        self.request(|reply| Command::Attach { link, reply }).await
    }

    pub async fn stop(&self) -> Result<(), ServerError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn add_device(
        &self,
        unit_id: u8,
        kind: DeviceKind,
    ) -> Result<DeviceInfo, ServerError> {
        Ok(self
            .request(|reply| Command::AddDevice {
                unit_id,
                kind,
                reply,
            })
            .await??)
    }

    pub async fn remove_device(&self, unit_id: u8) -> Result<(), ServerError> {
        Ok(self
            .request(|reply| Command::RemoveDevice { unit_id, reply })
            .await??)
    }

    pub async fn set_kind(&self, unit_id: u8, kind: DeviceKind) -> Result<DeviceInfo, ServerError> {
        Ok(self
            .request(|reply| Command::SetKind {
                unit_id,
                kind,
                reply,
            })
            .await??)
    }

    pub async fn set_enabled(&self, unit_id: u8, enabled: bool) -> Result<DeviceInfo, ServerError> {
        Ok(self
            .request(|reply| Command::SetEnabled {
                unit_id,
                enabled,
                reply,
            })
            .await??)
    }

    pub async fn set_sim_mode(&self, unit_id: u8, mode: SimMode) -> Result<DeviceInfo, ServerError> {
        Ok(self
            .request(|reply| Command::SetSimMode {
                unit_id,
                mode,
                reply,
            })
            .await??)
    }

    pub async fn set_register(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<(), ServerError> {
        Ok(self
            .request(|reply| Command::SetRegister {
                unit_id,
                address,
                value,
                reply,
            })
            .await??)
    }

    pub async fn get_register(&self, unit_id: u8, address: u16) -> Result<u16, ServerError> {
        Ok(self
            .request(|reply| Command::GetRegister {
                unit_id,
                address,
                reply,
            })
            .await??)
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>, ServerError> {
        self.request(|reply| Command::ListDevices { reply }).await
    }

    pub async fn device_state(&self, unit_id: u8) -> Result<DeviceInfo, ServerError> {
        Ok(self
            .request(|reply| Command::GetDeviceState { unit_id, reply })
            .await??)
    }
}

/// Launch the simulator task. Persisted state is loaded from `paths` when
/// given; a missing or unreadable roster falls back to the built-in
/// default roster (persistence problems are never fatal).
pub fn spawn(paths: Option<StatePaths>) -> ServerHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

    let mut sim = Simulator::new(event_tx.clone());
    let (roster, memory) = load_state(paths.as_ref());
    sim.restore(&roster, memory.as_ref());

    let task = ServerTask {
        sim,
        commands: command_rx,
        events: event_tx.clone(),
        paths,
        link: None,
        assembler: FrameAssembler::new(),
    };
    tokio::spawn(task.run());

    ServerHandle {
        commands: command_tx,
        events: event_tx,
    }
}

fn load_state(paths: Option<&StatePaths>) -> (Roster, Option<MemorySnapshot>) {
    let Some(paths) = paths else {
        return (default_roster(), None);
    };
    let roster = match load_roster(&paths.roster) {
        Ok(Some(roster)) => roster,
        Ok(None) => default_roster(),
        Err(err) => {
            warn!(error = %err, path = %paths.roster.display(), "roster load failed, using defaults");
            default_roster()
        }
    };
    let memory = match load_memory(&paths.memory) {
        Ok(memory) => memory,
        Err(err) => {
            warn!(error = %err, path = %paths.memory.display(), "register snapshot load failed");
            None
        }
    };
    (roster, memory)
}

struct ServerTask {
    sim: Simulator,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    paths: Option<StatePaths>,
    link: Option<BoxedLink>,
    assembler: FrameAssembler,
}

/// Read from the link when there is one; park forever otherwise so the
/// select loop only wakes for commands and ticks.
async fn read_link(link: Option<&mut BoxedLink>, buf: &mut [u8]) -> io::Result<usize> {
    match link {
        Some(io) => io.read(buf).await,
        None => std::future::pending().await,
    }
}

impl ServerTask {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
                _ = tick.tick() => {
                    // The behavior engine only runs while the bus is up.
                    if self.link.is_some() {
                        self.sim.tick();
                    }
                }
                read = read_link(self.link.as_mut(), &mut chunk) => {
                    match read {
                        Ok(0) => {
                            self.log(Severity::Warn, "serial link closed by peer".to_string());
                            self.close_link();
                        }
                        Ok(n) => self.pump(&chunk[..n]).await,
                        Err(err) => {
                            self.log(Severity::Err, format!("serial read failed: {err}"));
                            self.close_link();
                        }
                    }
                }
            }
        }
        debug!("simulator task finished");
    }

    fn log(&self, severity: Severity, text: String) {
        let _ = self.events.send(Event::Log { severity, text });
    }

    fn attach_link(&mut self, link: BoxedLink) {
        self.assembler.clear();
        self.link = Some(link);
        let _ = self.events.send(Event::ServerStatus { running: true });
    }

    fn close_link(&mut self) {
        if self.link.take().is_some() {
            self.assembler.clear();
            let _ = self.events.send(Event::ServerStatus { running: false });
        }
    }

    /// Feed received bytes through the assembler and answer every frame
    /// before touching the next, draining each response to the link.
    async fn pump(&mut self, bytes: &[u8]) {
        let extracted = self.assembler.feed(bytes);
        if extracted.overflowed {
            self.log(
                Severity::Warn,
                "input buffer overflowed without a valid frame, discarded".to_string(),
            );
        }
        for frame in extracted.frames {
            self.log(Severity::Rx, hex(frame.as_bytes()));
            let Some(response) = self.sim.handle_frame(&frame, Instant::now()) else {
                continue;
            };
            self.log(Severity::Tx, hex(&response));
            if let Err(err) = self.send(&response).await {
                self.log(Severity::Err, format!("serial write failed: {err}"));
                self.close_link();
                break;
            }
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        link.write_all(bytes).await?;
        link.flush().await
    }

    /// Roster mutations snapshot on success; operator mistakes (duplicate
    /// add, unknown id) are logged as well as returned inline.
    fn after_roster_mutation<T>(
        &self,
        result: Result<T, RegistryError>,
        what: &str,
    ) -> Result<T, RegistryError> {
        match &result {
            Ok(_) => self.save_roster_state(),
            Err(err) => self.log(Severity::Warn, format!("{what}: {err}")),
        }
        result
    }

    fn save_roster_state(&self) {
        let Some(paths) = &self.paths else { return };
        if let Err(err) = persist::save_roster(&paths.roster, &self.sim.roster()) {
            warn!(error = %err, "roster snapshot failed");
            self.log(Severity::Err, format!("roster snapshot failed: {err}"));
        }
    }

    fn save_memory_state(&mut self) {
        let Some(paths) = self.paths.clone() else { return };
        let snapshot = self.sim.memory_snapshot();
        if let Err(err) = persist::save_memory(&paths.memory, &snapshot) {
            warn!(error = %err, "register snapshot failed");
            self.log(Severity::Err, format!("register snapshot failed: {err}"));
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { port, baud, reply } => {
                match open_serial(&port, baud, &SerialConfig::default()) {
                    Ok(stream) => {
                        self.attach_link(Box::new(stream));
                        self.log(
                            Severity::Info,
                            format!("server started on {port} at {baud} baud"),
                        );
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        self.log(Severity::Err, format!("cannot open {port}: {err}"));
                        let _ = reply.send(Err(err.into()));
                    }
                }
            }
            Command::Attach { link, reply } => {
                self.attach_link(link);
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.close_link();
                self.log(Severity::Info, "server stopped".to_string());
                let _ = reply.send(());
            }
            Command::AddDevice {
                unit_id,
                kind,
                reply,
            } => {
                let result = self.sim.add_device(unit_id, kind);
                let result = self.after_roster_mutation(result, "add device failed");
                let _ = reply.send(result);
            }
            Command::RemoveDevice { unit_id, reply } => {
                let result = self.sim.remove_device(unit_id);
                let result = self.after_roster_mutation(result, "remove device failed");
                let _ = reply.send(result);
            }
            Command::SetKind {
                unit_id,
                kind,
                reply,
            } => {
                let result = self.sim.set_kind(unit_id, kind);
                let result = self.after_roster_mutation(result, "set device kind failed");
                let _ = reply.send(result);
            }
            Command::SetEnabled {
                unit_id,
                enabled,
                reply,
            } => {
                let result = self.sim.set_enabled(unit_id, enabled);
                let result = self.after_roster_mutation(result, "enable/disable failed");
                let _ = reply.send(result);
            }
            Command::SetSimMode {
                unit_id,
                mode,
                reply,
            } => {
                let result = self.sim.set_sim_mode(unit_id, mode);
                let result = self.after_roster_mutation(result, "set sim mode failed");
                let _ = reply.send(result);
            }
            Command::SetRegister {
                unit_id,
                address,
                value,
                reply,
            } => {
                let result = self.sim.set_register(unit_id, address, value, Instant::now());
                match &result {
                    // Operator edits persist; master-driven writes do not,
                    // they would thrash the disk at bus rates.
                    Ok(()) => self.save_memory_state(),
                    Err(err) => {
                        self.log(Severity::Warn, format!("set register failed: {err}"));
                    }
                }
                let _ = reply.send(result);
            }
            Command::GetRegister {
                unit_id,
                address,
                reply,
            } => {
                let _ = reply.send(self.sim.get_register(unit_id, address));
            }
            Command::ListDevices { reply } => {
                let _ = reply.send(self.sim.list_devices());
            }
            Command::GetDeviceState { unit_id, reply } => {
                let _ = reply.send(self.sim.device_state(unit_id));
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
