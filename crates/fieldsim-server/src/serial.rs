//! Serial port opening for the RS-485 link.

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Line settings. Modbus RTU on these devices is 8N1 with no flow control;
/// baud is the only thing operators change in practice.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

pub fn open_serial(
    path: &str,
    baud: u32,
    config: &SerialConfig,
) -> tokio_serial::Result<SerialStream> {
    tokio_serial::new(path, baud)
        .data_bits(config.data_bits)
        .parity(config.parity)
        .stop_bits(config.stop_bits)
        .flow_control(config.flow_control)
        .open_native_async()
}
