//! Device kinds and their factory register layouts.
//!
//! The three profiles reproduce the register maps of the field devices the
//! simulator stands in for: an FR500-class inverter (scaled integers, a
//! mirrored status block at 0x0300), an electromagnetic flow meter (floats
//! in CDAB word order) and an ADL400-class three-phase energy meter (floats
//! with the most significant word at the base address). The word-order
//! asymmetry between the flow meter and the other two is a real device
//! quirk and is preserved bit for bit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Inverter,
    FlowMeter,
    EnergyMeter,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inverter => "inverter",
            Self::FlowMeter => "flowmeter",
            Self::EnergyMeter => "energymeter",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inverter" => Ok(Self::Inverter),
            "flowmeter" => Ok(Self::FlowMeter),
            "energymeter" => Ok(Self::EnergyMeter),
            other => Err(format!("unknown device kind: {other}")),
        }
    }
}

/// Whether the behavior engine mutates the device's telemetry on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimMode {
    Random,
    Manual,
}

impl FromStr for SimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown sim mode: {other}")),
        }
    }
}

/// Split a float into `[msw, lsw]`: most significant word at the lower
/// address. Used by the inverter and energy-meter maps.
pub fn f32_words_msw_first(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

/// Split a float into `[lsw, msw]`: least significant word at the lower
/// address (CDAB). Used by the flow-meter map only.
pub fn f32_words_cdab(value: f32) -> [u16; 2] {
    let [msw, lsw] = f32_words_msw_first(value);
    [lsw, msw]
}

fn push_f32(regs: &mut Vec<(u16, u16)>, base: u16, words: [u16; 2]) {
    regs.push((base, words[0]));
    regs.push((base + 1, words[1]));
}

/// Factory values applied once when a device's memory is materialised.
/// Addresses not listed read as zero.
pub fn default_registers(kind: DeviceKind) -> Vec<(u16, u16)> {
    match kind {
        DeviceKind::Inverter => {
            // Status block (U00) plus its legacy mirror at 0x0300, then the
            // parameter registers the masters commonly probe.
            let status: [(u16, u16); 8] = [
                (0x3000, 5000), // output frequency, 0.01 Hz
                (0x3002, 2200), // output voltage, 0.1 V
                (0x3003, 50),   // output current, 0.1 A
                (0x3004, 11),   // output power, 0.1 kW
                (0x3005, 1450), // motor speed, rpm
                (0x3006, 3100), // bus voltage, 0.1 V
                (0x3017, 350),  // heatsink temperature, 0.1 C
                (0x3023, 999),  // accumulated energy, kWh
            ];
            let mut regs = Vec::with_capacity(status.len() * 2 + 2);
            for (addr, val) in status {
                regs.push((addr, val));
                regs.push((addr - 0x2D00, val));
            }
            regs.push((0x840A, 1)); // device address parameter
            regs.push((0x0B15, 45)); // temperature set point
            regs
        }
        DeviceKind::FlowMeter => {
            let mut regs = vec![(774, 0x0403)]; // unit code
            push_f32(&mut regs, 261, f32_words_cdab(424.0)); // flow range, m3/h
            push_f32(&mut regs, 281, f32_words_cdab(100.0)); // alarm high
            push_f32(&mut regs, 284, f32_words_cdab(10.0)); // alarm low
            regs
        }
        DeviceKind::EnergyMeter => vec![
            // Per-phase power factor 1.0, MSW only; LSW stays zero.
            (0x082E, 0x3F80),
            (0x0830, 0x3F80),
            (0x0832, 0x3F80),
            (0x0834, 0x0032),
            (0x008D, 0x0001),
            (0x008E, 0x0001),
        ],
    }
}
