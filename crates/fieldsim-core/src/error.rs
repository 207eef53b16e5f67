use core::fmt;

/// Errors raised while decoding a request PDU out of a CRC-validated frame.
///
/// The frame parser only admits the four supported function codes, so most
/// of these are unreachable on the serial path; they matter when the decoder
/// is fed arbitrary bodies directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduError {
    /// The body ended before the fields the function code requires.
    UnexpectedEof,
    /// The function code is not one of 03, 04, 06, 16.
    UnsupportedFunction(u8),
    /// FC16 byte count disagrees with the register count.
    CountMismatch,
    /// Bytes remained after the last field of the request.
    TrailingBytes,
}

impl fmt::Display for PduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("request body ended early"),
            Self::UnsupportedFunction(fc) => write!(f, "unsupported function code 0x{fc:02X}"),
            Self::CountMismatch => f.write_str("byte count does not match register count"),
            Self::TrailingBytes => f.write_str("trailing bytes after request"),
        }
    }
}

impl std::error::Error for PduError {}
