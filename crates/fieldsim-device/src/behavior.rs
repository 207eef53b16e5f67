//! Reactive and periodic device behaviors.
//!
//! Reactive hooks fire when specific registers are written: the inverter
//! control command re-seeds the telemetry block, and a handful of
//! communication parameters report their new value by name. Periodic
//! behavior runs on the shared 1 Hz tick and currently only drifts the
//! energy-meter electrical quantities; inverter and flow-meter telemetry
//! move only in response to writes.

use crate::profile::{f32_words_msw_first, DeviceKind};
use rand::Rng;

/// What a write to a hooked register means. A tagged set keeps hook
/// dispatch exhaustive, unlike a table of closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteHook {
    /// 0x2000: run/stop/jog command, re-seeds telemetry.
    ControlCommand,
    /// Communication parameter; the name is reported in the change event.
    ParameterReport(&'static str),
    /// 0x0000: password entry/establishment, intercepted by the validator.
    PasswordWrite,
}

/// Hook lookup for `(kind, address)`. Only inverters have hooked registers.
pub fn hook_for(kind: DeviceKind, address: u16) -> Option<WriteHook> {
    if kind != DeviceKind::Inverter {
        return None;
    }
    match address {
        0x0000 => Some(WriteHook::PasswordWrite),
        0x2000 => Some(WriteHook::ControlCommand),
        0x8000 => Some(WriteHook::ParameterReport("user password")),
        0x8001 => Some(WriteHook::ParameterReport("run command source")),
        0x8006 => Some(WriteHook::ParameterReport("main frequency source")),
        0x8200 => Some(WriteHook::ParameterReport("start command mode")),
        0x840A => Some(WriteHook::ParameterReport("device address")),
        _ => None,
    }
}

/// Human-readable rendering of a reported parameter value, e.g.
/// `0x8200 = 2` reads as "RS485/Comm".
pub fn describe_parameter(name: &'static str, address: u16, value: u16) -> String {
    let rendered = match (address, value) {
        (0x8200 | 0x8001, 0) => "Keypad".to_string(),
        (0x8200 | 0x8001, 1) => "Terminal".to_string(),
        (0x8200 | 0x8001, 2) => "RS485/Comm".to_string(),
        _ => value.to_string(),
    };
    format!("{name} (0x{address:04X}) set to {rendered}")
}

/// Telemetry registers re-seeded by a control command, primary block and
/// its 0x0300 mirror, in register order: frequency, voltage, current,
/// power, speed, energy.
const CONTROL_TELEMETRY: [u16; 6] = [0x3000, 0x3002, 0x3003, 0x3004, 0x3005, 0x3023];
const MIRROR_OFFSET: u16 = 0x2D00;

/// Register updates triggered by writing `command` to 0x2000, or `None`
/// for command values with no telemetry effect. Run values derive from the
/// slave id so a master exercising several slaves can tell their telemetry
/// apart.
pub fn control_command_updates(unit_id: u8, command: u16) -> Option<Vec<(u16, u16)>> {
    let running = match command {
        0 | 5 | 6 => false,
        1..=4 => true,
        _ => return None,
    };
    let id = u32::from(unit_id);
    let values: [u16; 6] = if running {
        [
            (id * 1000) as u16,        // frequency, 0.01 Hz
            ((100 + 10 * id) * 10) as u16, // voltage, 0.1 V
            (id * 10) as u16,          // current, 0.1 A
            (id * 10) as u16,          // power, 0.1 kW
            (id * 100) as u16,         // speed, rpm
            id as u16,                 // energy, kWh
        ]
    } else {
        [0; 6]
    };

    let mut updates = Vec::with_capacity(CONTROL_TELEMETRY.len() * 2);
    for (addr, value) in CONTROL_TELEMETRY.iter().zip(values) {
        updates.push((*addr, value));
        updates.push((*addr - MIRROR_OFFSET, value));
    }
    Some(updates)
}

/// Energy-meter telemetry block, float pairs with the MSW at the base
/// address, per the ADL400 map.
pub const EM_VOLTAGE: [u16; 3] = [0, 2, 4];
pub const EM_CURRENT: [u16; 3] = [6, 8, 10];
pub const EM_PHASE_POWER: [u16; 3] = [12, 14, 16];
pub const EM_TOTAL_POWER: u16 = 18;
pub const EM_FREQUENCY: u16 = 26;

fn push_f32(updates: &mut Vec<(u16, u16)>, base: u16, value: f32) {
    let [msw, lsw] = f32_words_msw_first(value);
    updates.push((base, msw));
    updates.push((base + 1, lsw));
}

/// One tick of simulated mains for an energy meter: per-phase voltage
/// jittered around 220 V, current uniform in 5..10 A, active power derived
/// from them, frequency around 50 Hz.
pub fn energy_meter_tick(rng: &mut impl Rng) -> Vec<(u16, u16)> {
    let mut updates = Vec::with_capacity(22);
    let mut total_power = 0.0f32;
    for phase in 0..3 {
        let volts = 220.0 * rng.random_range(0.98..=1.02f32);
        let amps = rng.random_range(5.0..=10.0f32);
        let power = volts * amps;
        total_power += power;
        push_f32(&mut updates, EM_VOLTAGE[phase], volts);
        push_f32(&mut updates, EM_CURRENT[phase], amps);
        push_f32(&mut updates, EM_PHASE_POWER[phase], power);
    }
    push_f32(&mut updates, EM_TOTAL_POWER, total_power);
    push_f32(&mut updates, EM_FREQUENCY, 50.0 + rng.random_range(-0.1..=0.1f32));
    updates
}
