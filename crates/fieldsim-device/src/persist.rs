//! Durable state: the device roster and each device's non-zero registers,
//! as two human-readable JSON files. Writes go to a sibling temp file first
//! and are renamed into place so a crash mid-write leaves the previous
//! snapshot intact.

use crate::profile::{DeviceKind, SimMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed snapshot: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub unit_id: u8,
    pub kind: DeviceKind,
    pub enabled: bool,
    pub sim_mode: SimMode,
}

/// The persisted device roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub devices: Vec<RosterEntry>,
}

/// The roster a fresh installation starts with: five inverters on the low
/// ids and the two flow meters the bus masters poll at 110/111.
pub fn default_roster() -> Roster {
    let mut devices: Vec<RosterEntry> = (1..=5)
        .map(|unit_id| RosterEntry {
            unit_id,
            kind: DeviceKind::Inverter,
            enabled: true,
            sim_mode: SimMode::Random,
        })
        .collect();
    for unit_id in [110, 111] {
        devices.push(RosterEntry {
            unit_id,
            kind: DeviceKind::FlowMeter,
            enabled: true,
            sim_mode: SimMode::Random,
        });
    }
    Roster { devices }
}

/// Sparse register memory per device: only non-zero registers are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub devices: BTreeMap<u8, BTreeMap<u16, u16>>,
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

pub fn save_roster(path: &Path, roster: &Roster) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(roster)?;
    write_atomic(path, &json)?;
    Ok(())
}

/// Load the roster, `Ok(None)` when no snapshot exists yet.
pub fn load_roster(path: &Path) -> Result<Option<Roster>, PersistError> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn save_memory(path: &Path, memory: &MemorySnapshot) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(memory)?;
    write_atomic(path, &json)?;
    Ok(())
}

pub fn load_memory(path: &Path) -> Result<Option<MemorySnapshot>, PersistError> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
