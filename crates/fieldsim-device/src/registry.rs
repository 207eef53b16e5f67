//! The device roster: which slave ids exist on the simulated bus and how
//! each one is configured.

use crate::profile::{DeviceKind, SimMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slave id {0} is already registered")]
    DuplicateId(u8),
    #[error("slave id {0} is not registered")]
    UnknownId(u8),
    #[error("slave id {0} is outside the valid range 1..=247")]
    InvalidId(u8),
}

/// Parameter-protection unlock state. Only inverters ever leave the locked
/// default; it is deliberately not persisted, so a restart re-locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnlockState {
    pub unlocked: bool,
    pub last_activity: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub kind: DeviceKind,
    pub enabled: bool,
    pub sim_mode: SimMode,
    pub unlock: UnlockState,
}

/// Roster row, as reported to the operator and carried in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub unit_id: u8,
    pub kind: DeviceKind,
    pub enabled: bool,
    pub sim_mode: SimMode,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<u8, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, unit_id: u8, kind: DeviceKind) -> Result<DeviceInfo, RegistryError> {
        if !(1..=247).contains(&unit_id) {
            return Err(RegistryError::InvalidId(unit_id));
        }
        if self.devices.contains_key(&unit_id) {
            return Err(RegistryError::DuplicateId(unit_id));
        }
        let device = Device {
            kind,
            enabled: true,
            sim_mode: SimMode::Random,
            unlock: UnlockState::default(),
        };
        self.devices.insert(unit_id, device);
        Ok(info(unit_id, &device))
    }

    pub fn remove(&mut self, unit_id: u8) -> Result<(), RegistryError> {
        self.devices
            .remove(&unit_id)
            .map(|_| ())
            .ok_or(RegistryError::UnknownId(unit_id))
    }

    /// Change a device's kind. The caller must also drop its memory: a kind
    /// change is destroy-and-recreate, only the enabled flag carries over.
    pub fn set_kind(&mut self, unit_id: u8, kind: DeviceKind) -> Result<DeviceInfo, RegistryError> {
        let device = self.get_mut(unit_id)?;
        device.kind = kind;
        device.sim_mode = SimMode::Random;
        device.unlock = UnlockState::default();
        let device = *device;
        Ok(info(unit_id, &device))
    }

    pub fn set_enabled(&mut self, unit_id: u8, enabled: bool) -> Result<DeviceInfo, RegistryError> {
        let device = self.get_mut(unit_id)?;
        device.enabled = enabled;
        let device = *device;
        Ok(info(unit_id, &device))
    }

    pub fn set_sim_mode(&mut self, unit_id: u8, mode: SimMode) -> Result<DeviceInfo, RegistryError> {
        let device = self.get_mut(unit_id)?;
        device.sim_mode = mode;
        let device = *device;
        Ok(info(unit_id, &device))
    }

    pub fn get(&self, unit_id: u8) -> Option<&Device> {
        self.devices.get(&unit_id)
    }

    pub fn get_mut(&mut self, unit_id: u8) -> Result<&mut Device, RegistryError> {
        self.devices
            .get_mut(&unit_id)
            .ok_or(RegistryError::UnknownId(unit_id))
    }

    pub fn info(&self, unit_id: u8) -> Result<DeviceInfo, RegistryError> {
        self.devices
            .get(&unit_id)
            .map(|d| info(unit_id, d))
            .ok_or(RegistryError::UnknownId(unit_id))
    }

    pub fn list(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(|(id, d)| info(*id, d)).collect()
    }

    pub fn unit_ids(&self) -> Vec<u8> {
        self.devices.keys().copied().collect()
    }
}

fn info(unit_id: u8, device: &Device) -> DeviceInfo {
    DeviceInfo {
        unit_id,
        kind: device.kind,
        enabled: device.enabled,
        sim_mode: device.sim_mode,
    }
}
