//! Request dispatch against the device roster.
//!
//! `Simulator` owns all mutable simulation state (roster, register
//! memories, unlock clocks) and is driven from a single task, so none of
//! it is locked. A CRC-validated frame goes in; zero or one response frames
//! come out. Unknown and disabled slaves produce nothing at all, matching a
//! device that is absent from the bus.

use fieldsim_core::frame::Frame;
use fieldsim_core::pdu::{
    exception_response, read_response, write_multiple_response, ExceptionCode, Request,
};
use fieldsim_device::bank::RegisterBank;
use fieldsim_device::behavior::{self, WriteHook};
use fieldsim_device::event::{Event, Severity};
use fieldsim_device::persist::{MemorySnapshot, Roster, RosterEntry};
use fieldsim_device::profile::{DeviceKind, SimMode};
use fieldsim_device::registry::{DeviceInfo, DeviceRegistry, RegistryError};
use fieldsim_device::validator::{self, PasswordOutcome, PASSWORD_REGISTER, PROTECTION_REGISTER};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;

pub struct Simulator {
    registry: DeviceRegistry,
    bank: RegisterBank,
    events: broadcast::Sender<Event>,
}

impl Simulator {
    pub fn new(events: broadcast::Sender<Event>) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            bank: RegisterBank::new(),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine; the stream is advisory.
        let _ = self.events.send(event);
    }

    fn log(&self, severity: Severity, text: String) {
        self.emit(Event::Log { severity, text });
    }

    /// Seed roster and register state from persisted snapshots. Runs before
    /// the bus is up, so no events or hooks fire.
    pub fn restore(&mut self, roster: &Roster, memory: Option<&MemorySnapshot>) {
        for entry in &roster.devices {
            if self.registry.add(entry.unit_id, entry.kind).is_err() {
                continue;
            }
            if let Ok(device) = self.registry.get_mut(entry.unit_id) {
                device.enabled = entry.enabled;
                device.sim_mode = entry.sim_mode;
            }
        }
        let Some(memory) = memory else { return };
        for (unit_id, registers) in &memory.devices {
            // Memory for ids the roster does not know is stale; skip it.
            let Some(device) = self.registry.get(*unit_id) else {
                continue;
            };
            let kind = device.kind;
            for (address, value) in registers {
                self.bank.write(*unit_id, kind, *address, *value);
            }
        }
    }

    // ---- operator surface -------------------------------------------------

    pub fn add_device(
        &mut self,
        unit_id: u8,
        kind: DeviceKind,
    ) -> Result<DeviceInfo, RegistryError> {
        let info = self.registry.add(unit_id, kind)?;
        self.log(Severity::Info, format!("device {unit_id} added ({kind})"));
        self.emit(Event::DeviceAdded { device: info });
        Ok(info)
    }

    pub fn remove_device(&mut self, unit_id: u8) -> Result<(), RegistryError> {
        self.registry.remove(unit_id)?;
        self.bank.drop_device(unit_id);
        self.log(Severity::Info, format!("device {unit_id} removed"));
        self.emit(Event::DeviceRemoved { unit_id });
        Ok(())
    }

    /// Destroy-and-recreate under a new kind; only the enabled flag
    /// survives, and the memory restarts from the new kind's defaults.
    pub fn set_kind(&mut self, unit_id: u8, kind: DeviceKind) -> Result<DeviceInfo, RegistryError> {
        let info = self.registry.set_kind(unit_id, kind)?;
        self.bank.drop_device(unit_id);
        self.log(Severity::Info, format!("device {unit_id} is now a {kind}"));
        self.emit(Event::DeviceUpdated { device: info });
        Ok(info)
    }

    pub fn set_enabled(&mut self, unit_id: u8, enabled: bool) -> Result<DeviceInfo, RegistryError> {
        let info = self.registry.set_enabled(unit_id, enabled)?;
        self.emit(Event::DeviceUpdated { device: info });
        Ok(info)
    }

    pub fn set_sim_mode(&mut self, unit_id: u8, mode: SimMode) -> Result<DeviceInfo, RegistryError> {
        let info = self.registry.set_sim_mode(unit_id, mode)?;
        self.emit(Event::DeviceUpdated { device: info });
        Ok(info)
    }

    /// Operator register write: no protection rules, but reactive hooks run
    /// so a control command typed into the GUI behaves like one from the
    /// bus. The password intercept does not apply; the operator edits the
    /// stored password directly.
    pub fn set_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let kind = self.registry.info(unit_id)?.kind;
        self.store_and_react(unit_id, kind, address, value, now);
        Ok(())
    }

    pub fn get_register(&mut self, unit_id: u8, address: u16) -> Result<u16, RegistryError> {
        let kind = self.registry.info(unit_id)?.kind;
        Ok(self.bank.read(unit_id, kind, address))
    }

    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let devices = self.registry.list();
        self.emit(Event::DevicesList {
            devices: devices.clone(),
        });
        devices
    }

    pub fn device_state(&self, unit_id: u8) -> Result<DeviceInfo, RegistryError> {
        self.registry.info(unit_id)
    }

    pub fn roster(&self) -> Roster {
        Roster {
            devices: self
                .registry
                .list()
                .into_iter()
                .map(|d| RosterEntry {
                    unit_id: d.unit_id,
                    kind: d.kind,
                    enabled: d.enabled,
                    sim_mode: d.sim_mode,
                })
                .collect(),
        }
    }

    pub fn memory_snapshot(&mut self) -> MemorySnapshot {
        let mut snapshot = MemorySnapshot::default();
        for info in self.registry.list() {
            let sparse = self.bank.non_zero(info.unit_id, info.kind);
            snapshot
                .devices
                .insert(info.unit_id, sparse.into_iter().collect());
        }
        snapshot
    }

    // ---- bus dispatch -----------------------------------------------------

    /// Handle one validated request frame. `now` drives the unlock clock.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> Option<Vec<u8>> {
        let unit_id = frame.unit_id();
        let device = self.registry.get(unit_id)?;
        if !device.enabled {
            self.log(
                Severity::Info,
                format!("slave {unit_id}: request ignored, device disabled"),
            );
            return None;
        }
        let kind = device.kind;
        let function = frame.function();

        let request = match Request::decode(function, frame.body()) {
            Ok(request) => request,
            Err(err) => {
                self.log(
                    Severity::Warn,
                    format!("slave {unit_id}: malformed request: {err}"),
                );
                return Some(exception_response(
                    unit_id,
                    function,
                    ExceptionCode::IllegalDataValue,
                ));
            }
        };

        debug!(unit_id, function, "dispatching request");
        match request {
            Request::ReadHolding(read) | Request::ReadInput(read) => {
                if read.window().is_none() {
                    self.log(
                        Severity::Warn,
                        format!(
                            "slave {unit_id}: read of {} registers at 0x{:04X} rejected",
                            read.count, read.start
                        ),
                    );
                    return Some(exception_response(
                        unit_id,
                        function,
                        ExceptionCode::IllegalDataValue,
                    ));
                }
                let values = self.bank.read_many(unit_id, kind, read.start, read.count);
                Some(read_response(unit_id, request.function(), &values))
            }

            Request::WriteSingle(write) => {
                self.expire_unlock(unit_id, now);
                if let Err(code) = self.admit_write(unit_id, kind, write.address, write.value) {
                    self.log(
                        Severity::Warn,
                        format!(
                            "slave {unit_id}: write 0x{:04X} = {} rejected ({:?})",
                            write.address, write.value, code
                        ),
                    );
                    return Some(exception_response(unit_id, function, code));
                }
                self.master_write(unit_id, kind, write.address, write.value, now);
                // A successful FC06 echoes the request bytes unchanged.
                Some(frame.as_bytes().to_vec())
            }

            Request::WriteMultiple(write) => {
                if write.window().is_none() {
                    self.log(
                        Severity::Warn,
                        format!(
                            "slave {unit_id}: block write of {} registers at 0x{:04X} rejected",
                            write.count(),
                            write.start
                        ),
                    );
                    return Some(exception_response(
                        unit_id,
                        function,
                        ExceptionCode::IllegalDataValue,
                    ));
                }
                self.expire_unlock(unit_id, now);
                // Validate the whole batch against the pre-write state; a
                // single rejection leaves every register untouched.
                for (address, value) in write.entries() {
                    if let Err(code) = self.admit_write(unit_id, kind, address, value) {
                        self.log(
                            Severity::Warn,
                            format!(
                                "slave {unit_id}: block write aborted at 0x{address:04X} ({code:?})"
                            ),
                        );
                        return Some(exception_response(unit_id, function, code));
                    }
                }
                for (address, value) in write.entries() {
                    self.master_write(unit_id, kind, address, value, now);
                }
                Some(write_multiple_response(unit_id, write.start, write.count()))
            }
        }
    }

    /// One tick of the behavior engine: drift telemetry on every enabled
    /// device simulating on its own.
    pub fn tick(&mut self) {
        let meters: Vec<u8> = self
            .registry
            .list()
            .into_iter()
            .filter(|d| d.enabled && d.sim_mode == SimMode::Random && d.kind == DeviceKind::EnergyMeter)
            .map(|d| d.unit_id)
            .collect();
        let mut rng = rand::rng();
        for unit_id in meters {
            let updates = behavior::energy_meter_tick(&mut rng);
            for (address, value) in &updates {
                self.bank
                    .write(unit_id, DeviceKind::EnergyMeter, *address, *value);
            }
            self.emit(Event::RegistersChanged { unit_id, updates });
        }
    }

    // ---- write plumbing ---------------------------------------------------

    fn expire_unlock(&mut self, unit_id: u8, now: Instant) {
        let expired = match self.registry.get_mut(unit_id) {
            Ok(device) => validator::expire_unlock(&mut device.unlock, now),
            Err(_) => false,
        };
        if expired {
            self.log(
                Severity::Info,
                format!("slave {unit_id}: parameter access re-locked after idle timeout"),
            );
        }
    }

    fn admit_write(
        &mut self,
        unit_id: u8,
        kind: DeviceKind,
        address: u16,
        value: u16,
    ) -> Result<(), ExceptionCode> {
        let protection_on = self.bank.read(unit_id, kind, PROTECTION_REGISTER) == 1;
        let unlock = self
            .registry
            .get(unit_id)
            .map(|d| d.unlock)
            .unwrap_or_default();
        validator::check_write(kind, protection_on, &unlock, address, value)
    }

    /// An admitted master write. Password-register writes on inverters are
    /// intercepted: an entry attempt must not clobber the stored password.
    fn master_write(&mut self, unit_id: u8, kind: DeviceKind, address: u16, value: u16, now: Instant) {
        if kind == DeviceKind::Inverter && address == PASSWORD_REGISTER {
            let stored = self.bank.read(unit_id, kind, PASSWORD_REGISTER);
            let outcome = match self.registry.get_mut(unit_id) {
                Ok(device) => validator::apply_password(stored, value, &mut device.unlock, now),
                Err(_) => return,
            };
            match outcome {
                PasswordOutcome::PasswordSet => {
                    self.bank.write(unit_id, kind, address, value);
                    self.log(Severity::Info, format!("slave {unit_id}: password set"));
                    self.emit(Event::RegisterChanged {
                        unit_id,
                        address,
                        value,
                    });
                }
                PasswordOutcome::Unlocked => {
                    self.log(
                        Severity::Info,
                        format!("slave {unit_id}: parameter access unlocked"),
                    );
                }
                PasswordOutcome::Mismatch => {
                    self.log(
                        Severity::Warn,
                        format!("slave {unit_id}: password mismatch, still locked"),
                    );
                }
            }
            return;
        }
        self.store_and_react(unit_id, kind, address, value, now);
    }

    /// Store a value and run the reactive hooks shared by master and
    /// operator writes.
    fn store_and_react(&mut self, unit_id: u8, kind: DeviceKind, address: u16, value: u16, now: Instant) {
        self.bank.write(unit_id, kind, address, value);
        if let Ok(device) = self.registry.get_mut(unit_id) {
            validator::note_write(&mut device.unlock, now);
        }
        self.emit(Event::RegisterChanged {
            unit_id,
            address,
            value,
        });

        match behavior::hook_for(kind, address) {
            Some(WriteHook::ControlCommand) => {
                if let Some(updates) = behavior::control_command_updates(unit_id, value) {
                    for (addr, val) in &updates {
                        self.bank.write(unit_id, kind, *addr, *val);
                    }
                    self.log(
                        Severity::Info,
                        format!("slave {unit_id}: control command {value}, telemetry re-seeded"),
                    );
                    self.emit(Event::RegistersChanged { unit_id, updates });
                }
            }
            Some(WriteHook::ParameterReport(name)) => {
                self.log(
                    Severity::Info,
                    format!(
                        "slave {unit_id}: {}",
                        behavior::describe_parameter(name, address, value)
                    ),
                );
            }
            // Password writes never reach here via the master path, and the
            // operator edits the stored value directly.
            Some(WriteHook::PasswordWrite) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsim_core::frame::FrameAssembler;
    use std::time::Duration;

    fn simulator_with(devices: &[(u8, DeviceKind)]) -> (Simulator, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(512);
        let mut sim = Simulator::new(tx);
        for (unit_id, kind) in devices {
            sim.add_device(*unit_id, *kind).unwrap();
        }
        (sim, rx)
    }

    fn frame(bytes: &[u8]) -> Frame {
        let mut asm = FrameAssembler::new();
        let mut out = asm.feed(bytes);
        assert_eq!(out.frames.len(), 1, "test frame must be valid: {bytes:02X?}");
        out.frames.remove(0)
    }

    fn dispatch(sim: &mut Simulator, bytes: &[u8]) -> Option<Vec<u8>> {
        sim.handle_frame(&frame(bytes), Instant::now())
    }

    #[test]
    fn read_default_frequency_block() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let response = dispatch(
            &mut sim,
            &[0x01, 0x03, 0x30, 0x00, 0x00, 0x02, 0xCB, 0x0B],
        );
        assert_eq!(
            response.unwrap(),
            [0x01, 0x03, 0x04, 0x13, 0x88, 0x00, 0x00, 0x7E, 0x9D]
        );
    }

    #[test]
    fn fc04_reads_the_same_store_via_the_mirror() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let response = dispatch(
            &mut sim,
            &[0x01, 0x04, 0x03, 0x00, 0x00, 0x02, 0x71, 0x8F],
        )
        .unwrap();
        // fc 04 echoed, mirror register 0x0300 carries the same 5000.
        assert_eq!(response[..5], [0x01, 0x04, 0x04, 0x13, 0x88]);
    }

    #[test]
    fn unknown_slave_gets_nothing() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        assert!(dispatch(&mut sim, &[0x02, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x39]).is_none());
    }

    #[test]
    fn disabled_slave_gets_nothing() {
        let (mut sim, _rx) = simulator_with(&[(2, DeviceKind::Inverter)]);
        sim.set_enabled(2, false).unwrap();
        assert!(dispatch(&mut sim, &[0x02, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x39]).is_none());
        sim.set_enabled(2, true).unwrap();
        assert!(dispatch(&mut sim, &[0x02, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x39]).is_some());
    }

    #[test]
    fn zero_count_read_is_an_illegal_value() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let response = dispatch(
            &mut sim,
            &[0x01, 0x03, 0x30, 0x00, 0x00, 0x00, 0x4A, 0xCA],
        );
        assert_eq!(response.unwrap(), [0x01, 0x83, 0x03, 0x01, 0x31]);
    }

    #[test]
    fn run_command_echoes_and_reseeds_telemetry() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let request = [0x01, 0x06, 0x20, 0x00, 0x00, 0x01, 0x43, 0xCA];
        let response = dispatch(&mut sim, &request).unwrap();
        assert_eq!(response, request);

        // Frequency becomes id * 1000 in both the primary and mirror block.
        let response = dispatch(&mut sim, &[0x01, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x0A]);
        assert_eq!(
            response.unwrap(),
            [0x01, 0x03, 0x02, 0x03, 0xE8, 0xB8, 0xFA]
        );
        assert_eq!(sim.get_register(1, 0x0300).unwrap(), 1000);
        assert_eq!(sim.get_register(1, 0x3002).unwrap(), 1100);

        // Stop zeroes the block again.
        dispatch(&mut sim, &[0x01, 0x06, 0x20, 0x00, 0x00, 0x05, 0x42, 0x09]).unwrap();
        assert_eq!(sim.get_register(1, 0x3000).unwrap(), 0);
        assert_eq!(sim.get_register(1, 0x0305).unwrap(), 0);
    }

    #[test]
    fn read_only_register_write_is_rejected() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let response = dispatch(
            &mut sim,
            &[0x01, 0x06, 0x30, 0x00, 0x00, 0xFF, 0xC6, 0x8A],
        );
        assert_eq!(response.unwrap(), [0x01, 0x86, 0x02, 0xC3, 0xA1]);
        assert_eq!(sim.get_register(1, 0x3000).unwrap(), 5000);
    }

    #[test]
    fn flowmeter_takes_writes_an_inverter_would_refuse() {
        let (mut sim, _rx) = simulator_with(&[(110, DeviceKind::FlowMeter)]);
        let request = fieldsim_core::frame::seal_frame(110, &[0x06, 0x30, 0x00, 0x00, 0xFF]);
        let response = dispatch(&mut sim, &request).unwrap();
        assert_eq!(response, request);
        assert_eq!(sim.get_register(110, 0x3000).unwrap(), 0xFF);
    }

    #[test]
    fn block_write_applies_all_registers() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let response = dispatch(
            &mut sim,
            &[
                0x01, 0x10, 0x20, 0x01, 0x00, 0x02, 0x04, 0x75, 0x30, 0x01, 0xF4, 0xB1, 0xB6,
            ],
        );
        assert_eq!(
            response.unwrap(),
            [0x01, 0x10, 0x20, 0x01, 0x00, 0x02, 0x1B, 0xC8]
        );
        assert_eq!(sim.get_register(1, 0x2001).unwrap(), 30000);
        assert_eq!(sim.get_register(1, 0x2002).unwrap(), 500);
    }

    #[test]
    fn block_write_is_atomic_on_rejection() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        // 0x20FF is writable, 0x2100 is read-only: the batch must die whole.
        let response = dispatch(
            &mut sim,
            &[
                0x01, 0x10, 0x20, 0xFF, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x05, 0xB4, 0xA9,
            ],
        );
        assert_eq!(response.unwrap(), [0x01, 0x90, 0x02, 0xCD, 0xC1]);
        assert_eq!(sim.get_register(1, 0x20FF).unwrap(), 0);
        assert_eq!(sim.get_register(1, 0x2100).unwrap(), 0);
    }

    #[test]
    fn password_protection_lifecycle_on_the_wire() {
        let (mut sim, _rx) = simulator_with(&[(1, DeviceKind::Inverter)]);
        let start = Instant::now();

        // Operator provisions a password and arms protection.
        sim.set_register(1, 0x0000, 1234, start).unwrap();
        sim.set_register(1, 0x0002, 1, start).unwrap();

        // Locked: an ordinary parameter write fails with 0x04.
        let request = frame(&[0x01, 0x06, 0x0B, 0x15, 0x00, 0x32, 0x1B, 0xFF]);
        let response = sim.handle_frame(&request, start).unwrap();
        assert_eq!(response, [0x01, 0x86, 0x04, 0x43, 0xA3]);
        assert_eq!(sim.get_register(1, 0x0B15).unwrap(), 45);

        // Wrong password leaves it locked and keeps the stored value.
        let bad = frame(&fieldsim_core::frame::seal_frame(1, &[0x06, 0x00, 0x00, 0x11, 0x11]));
        sim.handle_frame(&bad, start).unwrap();
        assert_eq!(sim.get_register(1, 0x0000).unwrap(), 1234);
        let retry = frame(&[0x01, 0x06, 0x0B, 0x15, 0x00, 0x32, 0x1B, 0xFF]);
        assert_eq!(
            sim.handle_frame(&retry, start).unwrap()[..3],
            [0x01, 0x86, 0x04]
        );

        // Correct password unlocks; the parameter write now echoes.
        let unlock = frame(&[0x01, 0x06, 0x00, 0x00, 0x04, 0xD2, 0x0B, 0x57]);
        sim.handle_frame(&unlock, start).unwrap();
        let write = frame(&[0x01, 0x06, 0x0B, 0x15, 0x00, 0x32, 0x1B, 0xFF]);
        let response = sim.handle_frame(&write, start).unwrap();
        assert_eq!(response, [0x01, 0x06, 0x0B, 0x15, 0x00, 0x32, 0x1B, 0xFF]);
        assert_eq!(sim.get_register(1, 0x0B15).unwrap(), 50);

        // Five idle minutes later the device has re-locked.
        let late = start + Duration::from_secs(301);
        let write = frame(&[0x01, 0x06, 0x0B, 0x15, 0x00, 0x3C, 0x9A, 0x3B]);
        let response = sim.handle_frame(&write, late).unwrap();
        assert_eq!(response[..3], [0x01, 0x86, 0x04]);
        assert_eq!(sim.get_register(1, 0x0B15).unwrap(), 50);
    }

    #[test]
    fn energymeter_drifts_on_tick_and_manual_mode_freezes_it() {
        let (mut sim, mut rx) = simulator_with(&[(7, DeviceKind::EnergyMeter)]);
        sim.tick();
        // Phase A voltage MSW holds a float around 220.
        let msw = sim.get_register(7, 0).unwrap();
        let lsw = sim.get_register(7, 1).unwrap();
        let volts = f32::from_bits((u32::from(msw) << 16) | u32::from(lsw));
        assert!((210.0..=230.0).contains(&volts), "volts {volts}");

        let mut saw_batch = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::RegistersChanged { unit_id: 7, .. }) {
                saw_batch = true;
            }
        }
        assert!(saw_batch);

        sim.set_sim_mode(7, SimMode::Manual).unwrap();
        sim.set_register(7, 0, 0xAAAA, Instant::now()).unwrap();
        sim.tick();
        assert_eq!(sim.get_register(7, 0).unwrap(), 0xAAAA);
    }

    #[test]
    fn inverters_and_flowmeters_do_not_drift() {
        let (mut sim, _rx) =
            simulator_with(&[(1, DeviceKind::Inverter), (110, DeviceKind::FlowMeter)]);
        sim.tick();
        assert_eq!(sim.get_register(1, 0x3000).unwrap(), 5000);
        assert_eq!(sim.get_register(110, 778).unwrap(), 0);
    }

    #[test]
    fn roster_snapshot_restores_attributes_and_registers() {
        let (mut sim, _rx) = simulator_with(&[
            (1, DeviceKind::Inverter),
            (7, DeviceKind::EnergyMeter),
            (110, DeviceKind::FlowMeter),
        ]);
        sim.set_enabled(7, false).unwrap();
        sim.set_sim_mode(110, SimMode::Manual).unwrap();
        sim.set_register(1, 0x2001, 250, Instant::now()).unwrap();

        let roster = sim.roster();
        let memory = sim.memory_snapshot();

        let (mut restored, _rx) = {
            let (tx, rx) = broadcast::channel(64);
            (Simulator::new(tx), rx)
        };
        restored.restore(&roster, Some(&memory));

        assert_eq!(restored.list_devices(), sim.list_devices());
        assert_eq!(restored.get_register(1, 0x2001).unwrap(), 250);
        assert_eq!(restored.get_register(1, 0x3000).unwrap(), 5000);
        assert_eq!(restored.get_register(110, 774).unwrap(), 0x0403);
    }

    #[test]
    fn restore_ignores_memory_for_unknown_ids() {
        let (tx, _rx) = broadcast::channel(64);
        let mut sim = Simulator::new(tx);
        let roster = Roster {
            devices: vec![RosterEntry {
                unit_id: 1,
                kind: DeviceKind::Inverter,
                enabled: true,
                sim_mode: SimMode::Random,
            }],
        };
        let mut memory = MemorySnapshot::default();
        memory.devices.entry(9).or_default().insert(0x0100, 42);
        sim.restore(&roster, Some(&memory));
        assert!(sim.get_register(9, 0x0100).is_err());
    }

    #[test]
    fn set_kind_recreates_memory_with_new_defaults() {
        let (mut sim, _rx) = simulator_with(&[(3, DeviceKind::Inverter)]);
        sim.set_register(3, 0x2001, 123, Instant::now()).unwrap();
        sim.set_enabled(3, false).unwrap();

        let info = sim.set_kind(3, DeviceKind::FlowMeter).unwrap();
        assert!(!info.enabled);
        assert_eq!(sim.get_register(3, 0x2001).unwrap(), 0);
        assert_eq!(sim.get_register(3, 774).unwrap(), 0x0403);
    }
}
