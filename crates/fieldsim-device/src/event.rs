//! Events pushed from the core to operator-facing observers.

use crate::registry::DeviceInfo;
use serde::Serialize;

/// Log lane. `Rx`/`Tx` carry hex dumps of bus traffic; the rest mirror
/// ordinary log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Err,
    Rx,
    Tx,
}

/// State changes and observations streamed to the operator. The stream is
/// advisory: consumers that fall behind lose the oldest entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    ServerStatus {
        running: bool,
    },
    DeviceAdded {
        device: DeviceInfo,
    },
    DeviceRemoved {
        unit_id: u8,
    },
    DeviceUpdated {
        device: DeviceInfo,
    },
    DevicesList {
        devices: Vec<DeviceInfo>,
    },
    RegisterChanged {
        unit_id: u8,
        address: u16,
        value: u16,
    },
    /// Batched form, one per control command or telemetry tick.
    RegistersChanged {
        unit_id: u8,
        updates: Vec<(u16, u16)>,
    },
    Log {
        severity: Severity,
        text: String,
    },
}
