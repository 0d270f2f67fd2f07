//! # Frame
//!
//! The `frame` module implements the six WebSocket frame variants of
//! [RFC 6455 Section 5](https://datatracker.ietf.org/doc/html/rfc6455#section-5) on top of the
//! [`FrameHeader`] codec.
//!
//! - **Data Frames**: `Text` (UTF-8), `Binary` (opaque bytes) and `Continuation` (a fragment of a
//!   text or binary message, never handed to the application directly).
//! - **Control Frames**: `Close` (status code plus optional reason), `Ping` and `Pong`.
//!
//! A [`Frame`] either comes from this side, built with one of the constructors and serialized
//! with [`Frame::write_to`] (always masked, as a client must), or is materialized from a parsed
//! header and the raw payload bytes with [`Frame::from_parts`], which unmasks the payload.
//!
//! ## Fragmentation
//!
//! A non-final Text or Binary frame holds an incomplete payload. Each following Continuation frame
//! is merged with [`Frame::append`]; once a final continuation arrives the fragments are
//! concatenated in arrival order and the frame becomes a complete `Text` or `Binary` frame.
//!
//! ```rust
//! use tickws::frame::{Frame, Payload};
//! use tickws::CloseCode;
//!
//! let text = Frame::text("Hello, WebSocket!");
//! let ping = Frame::ping("are you there");
//! let close = Frame::close(CloseCode::Normal, "bye");
//! assert!(matches!(text.payload(), Some(Payload::Text(_))));
//! ```
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    close::CloseCode,
    header::{FrameHeader, OpCode},
    mask::apply_mask,
    WebSocketError, MAX_PAYLOAD_LEN,
};

/// Control frame payloads are limited to 125 bytes; 2 of them hold the close code.
const MAX_CLOSE_REASON: usize = 123;

/// Reason sent with the Close frame of a graceful close.
pub(crate) const NORMAL_CLOSE_REASON: &str = "Normal Close";

/// Interpreted payload of a complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A fragment of a fragmented message, already unmasked.
    Continuation(Bytes),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Binary(Bytes),
    /// Close status code and reason.
    Close { code: CloseCode, reason: String },
    /// Keepalive probe.
    Ping(Bytes),
    /// Answer to a ping, echoing its payload.
    Pong(Bytes),
}

impl Payload {
    /// Interprets unmasked payload bytes according to `opcode`.
    fn decode(opcode: OpCode, data: Bytes) -> Result<Self, WebSocketError> {
        Ok(match opcode {
            OpCode::Continuation => Self::Continuation(data),
            OpCode::Text => Self::Text(
                String::from_utf8(data.to_vec()).map_err(|_| WebSocketError::InvalidUTF8)?,
            ),
            OpCode::Binary => Self::Binary(data),
            OpCode::Close => match data.len() {
                0 => Self::Close {
                    code: CloseCode::NoStatus,
                    reason: String::new(),
                },
                1 => return Err(WebSocketError::InvalidCloseFrame),
                _ => {
                    let code = CloseCode::from(u16::from_be_bytes([data[0], data[1]]));
                    let reason = std::str::from_utf8(&data[2..])
                        .map_err(|_| WebSocketError::InvalidUTF8)?
                        .to_owned();
                    Self::Close { code, reason }
                }
            },
            OpCode::Ping => Self::Ping(data),
            OpCode::Pong => Self::Pong(data),
            OpCode::Reserved(value) => return Err(WebSocketError::InvalidOpCode(value)),
        })
    }

    /// The opcode that carries this payload.
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Continuation(_) => OpCode::Continuation,
            Self::Text(_) => OpCode::Text,
            Self::Binary(_) => OpCode::Binary,
            Self::Close { .. } => OpCode::Close,
            Self::Ping(_) => OpCode::Ping,
            Self::Pong(_) => OpCode::Pong,
        }
    }

    /// Number of bytes the payload occupies on the wire.
    fn encoded_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Close { reason, .. } => 2 + reason.len(),
            Self::Continuation(data) | Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => {
                data.len()
            }
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Text(text) => dst.put_slice(text.as_bytes()),
            Self::Close { code, reason } => {
                dst.put_u16(u16::from(*code));
                dst.put_slice(reason.as_bytes());
            }
            Self::Continuation(data) | Self::Binary(data) | Self::Ping(data) | Self::Pong(data) => {
                dst.put_slice(data)
            }
        }
    }

    /// Ping and Pong payloads read as UTF-8, when they are.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Ping(data) | Self::Pong(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

/// Body of a frame: complete, or the first fragment of a message plus the continuations merged
/// so far.
#[derive(Debug)]
enum Body {
    Complete(Payload),
    Partial {
        head: Bytes,
        continuations: Vec<Frame>,
    },
}

/// A single WebSocket frame: header plus payload.
#[derive(Debug)]
pub struct Frame {
    header: FrameHeader,
    body: Body,
}

impl Frame {
    fn outbound(payload: Payload) -> Self {
        Self {
            header: FrameHeader::new(true, payload.opcode(), payload.encoded_len() as u64),
            body: Body::Complete(payload),
        }
    }

    /// Creates a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::outbound(Payload::Text(text.into()))
    }

    /// Creates a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::outbound(Payload::Binary(data.into()))
    }

    /// Creates a continuation frame carrying the next fragment of a message.
    pub fn continuation(data: impl Into<Bytes>) -> Self {
        Self::outbound(Payload::Continuation(data.into()))
    }

    /// Creates the first, non-final frame of a fragmented Text or Binary message. The remaining
    /// fragments follow as [`Frame::continuation`] frames, the last one final.
    pub fn first_fragment(opcode: OpCode, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            header: FrameHeader::new(false, opcode, data.len() as u64),
            body: Body::Partial {
                head: data,
                continuations: Vec::new(),
            },
        }
    }

    /// Creates a close frame with a status code and reason.
    ///
    /// The reason is cut at a character boundary so the payload fits in a control frame. Codes
    /// that must not appear on the wire ([`CloseCode::is_sendable`]) are sent as `Normal`.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        let code = if code.is_sendable() {
            code
        } else {
            CloseCode::Normal
        };

        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            let mut end = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }

        Self::outbound(Payload::Close { code, reason })
    }

    /// Creates the close frame answering `error`, carrying its mapped status code.
    pub fn close_for(error: &WebSocketError) -> Self {
        Self::close(error.close_code(), error.to_string())
    }

    /// Creates a ping frame.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::outbound(Payload::Ping(data.into()))
    }

    /// Creates a pong frame.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::outbound(Payload::Pong(data.into()))
    }

    /// Creates the pong answering `ping`, echoing its payload.
    pub fn pong_for(ping: &Frame) -> Self {
        let data = match ping.payload() {
            Some(Payload::Ping(data)) => data.clone(),
            _ => Bytes::new(),
        };
        Self::pong(data)
    }

    /// Sets the final-fragment flag, to send a message in several frames.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.header.fin = fin;
        self
    }

    /// Materializes a received frame from its parsed header and the raw payload bytes.
    ///
    /// `raw` must hold exactly `header.payload_len` bytes. The payload is copied out and
    /// unmasked with the header's key, if any.
    pub fn from_parts(header: FrameHeader, raw: &[u8]) -> Result<Self, WebSocketError> {
        if let OpCode::Reserved(value) = header.opcode {
            return Err(WebSocketError::InvalidOpCode(value));
        }

        if header.opcode.is_control() && !header.fin {
            return Err(WebSocketError::ControlFrameFragmented);
        }

        if raw.len() as u64 > MAX_PAYLOAD_LEN {
            return Err(WebSocketError::FrameTooLarge);
        }

        let mut data = BytesMut::from(raw);
        if let Some(mask) = header.mask {
            apply_mask(&mut data, mask);
        }
        let data = data.freeze();

        let body = if header.fin || header.opcode == OpCode::Continuation {
            Body::Complete(Payload::decode(header.opcode, data)?)
        } else {
            Body::Partial {
                head: data,
                continuations: Vec::new(),
            }
        };

        Ok(Self { header, body })
    }

    /// The frame header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The frame opcode.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    /// Whether this frame ends its message.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.header.fin
    }

    /// The interpreted payload, or `None` while a fragmented message is incomplete.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            Body::Complete(payload) => Some(payload),
            Body::Partial { .. } => None,
        }
    }

    /// Consumes the frame, returning its payload if complete.
    pub fn into_payload(self) -> Option<Payload> {
        match self.body {
            Body::Complete(payload) => Some(payload),
            Body::Partial { .. } => None,
        }
    }

    /// Raw bytes of a continuation fragment.
    fn fragment_bytes(&self) -> &[u8] {
        match &self.body {
            Body::Complete(Payload::Continuation(data)) => data,
            _ => &[],
        }
    }

    /// Merges a continuation frame into this fragmented message.
    ///
    /// Continuations accumulate in arrival order. When the merged header becomes final, the
    /// incomplete payload and every fragment are concatenated and interpreted as this frame's
    /// variant. Each fragment was unmasked on receipt, so the assembled bytes are not unmasked
    /// again.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidContinuationFrame`] if this frame is not a pending fragmented
    ///   message, or `continuation` is not a continuation frame.
    /// - [`WebSocketError::FrameTooLarge`] if the assembled message exceeds [`MAX_PAYLOAD_LEN`].
    pub fn append(&mut self, continuation: Frame) -> Result<(), WebSocketError> {
        let Body::Partial {
            head,
            continuations,
        } = &mut self.body
        else {
            return Err(WebSocketError::InvalidContinuationFrame);
        };

        self.header.add(&continuation.header)?;
        continuations.push(continuation);

        if !self.header.fin {
            return Ok(());
        }

        let total = head.len()
            + continuations
                .iter()
                .map(|frame| frame.fragment_bytes().len())
                .sum::<usize>();
        if total as u64 > MAX_PAYLOAD_LEN {
            return Err(WebSocketError::FrameTooLarge);
        }

        let mut assembled = BytesMut::with_capacity(total);
        assembled.extend_from_slice(head);
        for frame in continuations.drain(..) {
            assembled.extend_from_slice(frame.fragment_bytes());
        }

        let payload = Payload::decode(self.header.opcode, assembled.freeze())?;
        self.body = Body::Complete(payload);

        Ok(())
    }

    /// Serializes the header followed by the payload, masked with the header's key.
    pub fn write_to(&self, dst: &mut BytesMut) {
        self.header.encode(dst);

        let start = dst.len();
        match &self.body {
            Body::Complete(payload) => payload.encode(dst),
            Body::Partial { head, .. } => dst.put_slice(head),
        }

        if let Some(mask) = self.header.mask {
            apply_mask(&mut dst[start..], mask);
        }
    }
}
