//! Multi-slave register storage.
//!
//! Each slave owns a flat 65536-word store so any address a master probes
//! reads something sensible. Stores are materialised lazily on first access
//! and seeded with the device kind's factory profile at that moment, which
//! keeps a large roster of idle slaves from costing 128 KiB each up front.

use crate::profile::{default_registers, DeviceKind};
use std::collections::HashMap;

const BANK_WORDS: usize = 1 << 16;

/// Per-slave 16-bit register memories, keyed by unit id.
#[derive(Debug, Default)]
pub struct RegisterBank {
    stores: HashMap<u8, Vec<u16>>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_mut(&mut self, unit_id: u8, kind: DeviceKind) -> &mut Vec<u16> {
        self.stores.entry(unit_id).or_insert_with(|| {
            let mut words = vec![0u16; BANK_WORDS];
            for (addr, value) in default_registers(kind) {
                words[usize::from(addr)] = value;
            }
            words
        })
    }

    pub fn read(&mut self, unit_id: u8, kind: DeviceKind, address: u16) -> u16 {
        self.store_mut(unit_id, kind)[usize::from(address)]
    }

    /// Read `count` consecutive registers starting at `address`. The caller
    /// is responsible for window validation; addresses past the end of the
    /// store read as zero rather than panicking.
    pub fn read_many(&mut self, unit_id: u8, kind: DeviceKind, address: u16, count: u16) -> Vec<u16> {
        let store = self.store_mut(unit_id, kind);
        let start = usize::from(address);
        (0..usize::from(count))
            .map(|i| store.get(start + i).copied().unwrap_or(0))
            .collect()
    }

    pub fn write(&mut self, unit_id: u8, kind: DeviceKind, address: u16, value: u16) {
        self.store_mut(unit_id, kind)[usize::from(address)] = value;
    }

    /// Release a removed device's memory.
    pub fn drop_device(&mut self, unit_id: u8) {
        self.stores.remove(&unit_id);
    }

    /// Non-zero registers of one device, for the sparse persistence
    /// snapshot. Materialises the store so factory defaults are captured
    /// even for devices no master has touched yet.
    pub fn non_zero(&mut self, unit_id: u8, kind: DeviceKind) -> Vec<(u16, u16)> {
        self.store_mut(unit_id, kind)
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(addr, v)| (addr as u16, *v))
            .collect()
    }
}
