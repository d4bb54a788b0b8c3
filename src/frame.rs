//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2),
//! restricted to the subset this crate speaks.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16)              |
//! |N|V|V|V|       |S|             |   (64-bit form not supported) |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |   Masking-key, if MASK set to 1                               |
//! +---------------------------------------------------------------+
//! :                     Payload Data ...                          :
//! +---------------------------------------------------------------+
//! ```
//!
//! Only two opcodes carry meaning here:
//!
//! - `OpCode::Text`: surfaced to the application as a UTF-8 string.
//! - `OpCode::Close`: ends the session. The payload (status code and reason) is not parsed.
//!
//! Everything else decodes to [`Decoded::Ignored`].

/// Largest payload that fits in the 16-bit extended length field.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// WebSocket operation code (OpCode) that determines the semantic meaning of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// Reserved values (0x3-0x7 and 0xB-0xF) are kept as `Other` rather than rejected,
/// since non-text frames are ignored anyway.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Other(u8),
}

impl From<u8> for OpCode {
    /// Interprets the low nibble of the first header byte.
    fn from(value: u8) -> Self {
        match value & 0x0F {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Other(other),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
            OpCode::Other(value) => value & 0x0F,
        }
    }
}

/// A decoded text frame.
///
/// Only text frames are ever surfaced, so the payload is held as the already
/// validated, unmasked `String`; `mask` records the key the peer used so callers can
/// still tell whether the frame arrived masked.
///
/// # Fields
/// - `fin`: Final fragment flag. Fragmentation is not supported, so inbound text frames
///   are treated as complete messages regardless.
/// - `reserved`: RSV1..RSV3. Always zero on decoded frames.
/// - `opcode`: Frame type.
/// - `mask`: Masking key, present iff the frame was masked on the wire.
/// - `payload`: Payload text, `payload.len()` equals the declared payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub reserved: [bool; 3],
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: String,
}

impl Frame {
    /// Creates a new `Frame` with all reserved bits cleared.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: String) -> Self {
        Self {
            fin,
            reserved: [false; 3],
            opcode,
            mask,
            payload,
        }
    }

    /// Consumes the frame and returns its text.
    #[inline]
    pub fn into_text(self) -> String {
        self.payload
    }
}

/// Outcome of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A text frame whose payload is valid UTF-8.
    Text(Frame),
    /// The peer sent a close frame.
    Close,
    /// Continuation, binary, ping, pong or reserved opcode. Deliberately skipped.
    Ignored,
}
