//! # Header
//!
//! The base framing header of [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! ```
//!
//! A header is 2 bytes, plus 2 or 8 bytes of extended length, plus 4 bytes of masking key when
//! the payload is masked. Lengths on the wire are always big-endian.
use bytes::{Buf, BufMut, BytesMut};

use crate::{WebSocketError, MAX_PAYLOAD_LEN};

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LEN_BITS: u8 = 0b0111_1111;

/// Length indicator announcing a 16-bit extended length.
const LEN_16: u8 = 126;
/// Length indicator announcing a 64-bit extended length.
const LEN_64: u8 = 127;

const MASK_LEN: usize = 4;

/// Largest possible header: 2 bytes, 8 bytes of extended length and a masking key.
pub const MAX_HEADER_LEN: usize = 14;

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// Every other value is kept as `Reserved` so that a header can be parsed before the frame is
/// rejected as unsupported.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame.
    ///
    /// Control frames cannot be fragmented and are handled as soon as they arrive, even in the
    /// middle of a fragmented message.
    pub fn is_control(&self) -> bool {
        match *self {
            OpCode::Close | OpCode::Ping | OpCode::Pong => true,
            OpCode::Reserved(value) => value & 0x8 != 0,
            _ => false,
        }
    }
}

impl From<u8> for OpCode {
    /// Interprets the low nibble of `value`.
    fn from(value: u8) -> Self {
        match value & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
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
            OpCode::Reserved(value) => value & OPCODE_BITS,
        }
    }
}

/// Header of a single WebSocket frame.
///
/// `payload_len` never exceeds [`MAX_PAYLOAD_LEN`]: parsing a larger declared length fails with
/// [`WebSocketError::FrameTooLarge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates if this is the final fragment of a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// Length of the payload that follows the header.
    pub payload_len: u64,
    /// The masking key, present on every frame a client sends.
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Creates an outbound header with a freshly generated masking key.
    pub fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin,
            opcode,
            payload_len,
            mask: Some(rand::random()),
        }
    }

    /// Number of bytes this header occupies on the wire.
    #[inline]
    pub fn len(&self) -> usize {
        Self::calc_header_len(self.payload_len, self.mask.is_some())
    }

    /// Wire length of a header announcing `payload_len` bytes.
    pub fn calc_header_len(payload_len: u64, has_mask: bool) -> usize {
        let extended = if payload_len < LEN_16 as u64 {
            0
        } else if payload_len <= u16::MAX as u64 {
            2
        } else {
            8
        };

        2 + extended + if has_mask { MASK_LEN } else { 0 }
    }

    /// Serializes the header into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.len());

        let fin = if self.fin { FIN_BIT } else { 0 };
        dst.put_u8(fin | u8::from(self.opcode));

        let mask = if self.mask.is_some() { MASK_BIT } else { 0 };
        if self.payload_len < LEN_16 as u64 {
            dst.put_u8(mask | self.payload_len as u8);
        } else if self.payload_len <= u16::MAX as u64 {
            dst.put_u8(mask | LEN_16);
            dst.put_u16(self.payload_len as u16);
        } else {
            dst.put_u8(mask | LEN_64);
            dst.put_u64(self.payload_len);
        }

        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }

    /// Attempts to parse a header from the start of `buf`.
    ///
    /// # Returns
    /// - `Ok(Some((header, consumed)))` once the whole header is available, `consumed` being its
    ///   wire length.
    /// - `Ok(None)` when more bytes are needed. This is never an error: the caller waits for the
    ///   next read.
    /// - `Err(WebSocketError)` when reserved bits are set or the declared length exceeds
    ///   [`MAX_PAYLOAD_LEN`]. The size check only happens once the full length is available.
    pub fn try_parse(buf: &[u8]) -> Result<Option<(Self, usize)>, WebSocketError> {
        if buf.len() < 2 {
            return Ok(None);
        }

        if buf[0] & RSV_BITS != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        let fin = buf[0] & FIN_BIT != 0;
        let opcode = OpCode::from(buf[0]);
        let masked = buf[1] & MASK_BIT != 0;
        let length_code = buf[1] & LEN_BITS;

        let extra = match length_code {
            LEN_16 => 2,
            LEN_64 => 8,
            _ => 0,
        };
        let header_len = 2 + extra + if masked { MASK_LEN } else { 0 };
        if buf.len() < header_len {
            return Ok(None);
        }

        let mut src = &buf[2..header_len];
        let payload_len = match extra {
            2 => u64::from(src.get_u16()),
            8 => src.get_u64(),
            _ => u64::from(length_code),
        };

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(WebSocketError::FrameTooLarge);
        }

        let mask = if masked {
            Some(src.get_u32().to_be_bytes())
        } else {
            None
        };

        Ok(Some((
            Self {
                fin,
                opcode,
                payload_len,
                mask,
            },
            header_len,
        )))
    }

    /// Merges the header of a continuation frame into the header of a fragmented message.
    ///
    /// Only legal on a non-final header and with a `Continuation` header. The merged header takes
    /// the continuation's final bit and accumulates its payload length.
    pub(crate) fn add(&mut self, continuation: &FrameHeader) -> Result<(), WebSocketError> {
        if self.fin {
            return Err(WebSocketError::InvalidFragment);
        }

        if continuation.opcode != OpCode::Continuation {
            return Err(WebSocketError::InvalidContinuationFrame);
        }

        let payload_len = self.payload_len + continuation.payload_len;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(WebSocketError::FrameTooLarge);
        }

        self.fin = continuation.fin;
        self.payload_len = payload_len;

        Ok(())
    }
}

impl std::fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FrameHeader: final={}, opcode={:?}, payload-length={}, mask=",
            self.fin, self.opcode, self.payload_len
        )?;
        match self.mask {
            Some([a, b, c, d]) => write!(f, "{a:02X}-{b:02X}-{c:02X}-{d:02X}"),
            None => write!(f, "null"),
        }
    }
}
