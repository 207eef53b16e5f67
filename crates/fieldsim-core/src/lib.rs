//! Modbus RTU framing and PDU codec for the fieldsim slave simulator.
//!
//! `fieldsim-core` knows nothing about devices: it turns a raw serial byte
//! stream into CRC-validated frames, decodes the request PDUs the simulator
//! supports (FC 03, 04, 06, 16) and builds sealed response frames.

#![forbid(unsafe_code)]

pub mod crc;
pub mod error;
pub mod frame;
pub mod pdu;

pub use error::PduError;
pub use frame::{seal_frame, Frame, FrameAssembler};
pub use pdu::{ExceptionCode, FunctionCode, Request};
