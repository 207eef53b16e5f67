//! Request decoding and response building for the supported function codes.
//!
//! The simulator answers FC 03/04 (read), FC 06 (write single) and FC 16
//! (write multiple). Holding and input registers are served from one flat
//! store, so 03 and 04 decode to the same request shape and only differ in
//! the echoed function code.

use crate::error::PduError;
use crate::frame::seal_frame;

/// Register-read ceiling per request, from the Modbus application spec.
pub const MAX_READ_COUNT: u16 = 125;
/// Register-write ceiling for FC16.
pub const MAX_WRITE_COUNT: u16 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleRegisters => 0x10,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, PduError> {
        match value {
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x06 => Ok(Self::WriteSingleRegister),
            0x10 => Ok(Self::WriteMultipleRegisters),
            other => Err(PduError::UnsupportedFunction(other)),
        }
    }
}

/// Modbus exception reasons the simulator can raise.
///
/// 0x04 doubles as the "parameter protection locked" reply; Modbus has no
/// dedicated code for a locked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    DeviceFailure,
}

impl ExceptionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::DeviceFailure => 0x04,
        }
    }
}

/// FC 03 / FC 04 request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub start: u16,
    pub count: u16,
}

impl ReadRequest {
    /// The request window stays inside the 16-bit address space and the
    /// protocol read ceiling. Violations answer with exception 0x03.
    pub fn window(&self) -> Option<std::ops::Range<usize>> {
        if self.count == 0 || self.count > MAX_READ_COUNT {
            return None;
        }
        let start = usize::from(self.start);
        let end = start.checked_add(usize::from(self.count))?;
        (end <= 1 << 16).then_some(start..end)
    }
}

/// FC 06 request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRequest {
    pub address: u16,
    pub value: u16,
}

/// FC 16 request with borrowed register payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRequest<'a> {
    pub start: u16,
    values: &'a [u8],
}

impl<'a> WriteMultipleRequest<'a> {
    pub fn count(&self) -> u16 {
        (self.values.len() / 2) as u16
    }

    pub fn value(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.values.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// `(address, value)` pairs in ascending address order.
    pub fn entries(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        (0..usize::from(self.count())).map(|i| {
            let addr = self.start.wrapping_add(i as u16);
            (addr, self.value(i).unwrap_or(0))
        })
    }

    /// The write window stays inside the address space and write ceiling.
    pub fn window(&self) -> Option<std::ops::Range<usize>> {
        let count = self.count();
        if count == 0 || count > MAX_WRITE_COUNT {
            return None;
        }
        let start = usize::from(self.start);
        let end = start.checked_add(usize::from(count))?;
        (end <= 1 << 16).then_some(start..end)
    }
}

/// A decoded request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    ReadHolding(ReadRequest),
    ReadInput(ReadRequest),
    WriteSingle(WriteSingleRequest),
    WriteMultiple(WriteMultipleRequest<'a>),
}

impl<'a> Request<'a> {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadHolding(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInput(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingle(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultiple(_) => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Decode a request from a function code and the frame body (the bytes
    /// between the function code and the CRC).
    pub fn decode(function: u8, body: &'a [u8]) -> Result<Self, PduError> {
        let function = FunctionCode::from_u8(function)?;
        match function {
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let (start, count) = two_be_u16(body)?;
                let read = ReadRequest { start, count };
                Ok(match function {
                    FunctionCode::ReadHoldingRegisters => Self::ReadHolding(read),
                    _ => Self::ReadInput(read),
                })
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = two_be_u16(body)?;
                Ok(Self::WriteSingle(WriteSingleRequest { address, value }))
            }
            FunctionCode::WriteMultipleRegisters => {
                if body.len() < 5 {
                    return Err(PduError::UnexpectedEof);
                }
                let start = u16::from_be_bytes([body[0], body[1]]);
                let count = u16::from_be_bytes([body[2], body[3]]);
                let byte_count = usize::from(body[4]);
                let values = &body[5..];
                if values.len() != byte_count {
                    return Err(PduError::UnexpectedEof);
                }
                if byte_count != usize::from(count) * 2 {
                    return Err(PduError::CountMismatch);
                }
                Ok(Self::WriteMultiple(WriteMultipleRequest { start, values }))
            }
        }
    }
}

fn two_be_u16(body: &[u8]) -> Result<(u16, u16), PduError> {
    match body.len() {
        0..=3 => Err(PduError::UnexpectedEof),
        4 => Ok((
            u16::from_be_bytes([body[0], body[1]]),
            u16::from_be_bytes([body[2], body[3]]),
        )),
        _ => Err(PduError::TrailingBytes),
    }
}

/// `[id][fc][byte_count][values…][crc]` for FC 03 / FC 04.
pub fn read_response(unit_id: u8, function: FunctionCode, values: &[u16]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(2 + values.len() * 2);
    pdu.push(function.as_u8());
    pdu.push((values.len() * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
    seal_frame(unit_id, &pdu)
}

/// `[id][fc][start][count][crc]` for FC 16.
pub fn write_multiple_response(unit_id: u8, start: u16, count: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FunctionCode::WriteMultipleRegisters.as_u8());
    pdu.extend_from_slice(&start.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    seal_frame(unit_id, &pdu)
}

/// `[id][fc | 0x80][code][crc]`.
pub fn exception_response(unit_id: u8, function: u8, code: ExceptionCode) -> Vec<u8> {
    seal_frame(unit_id, &[function | 0x80, code.as_u8()])
}
