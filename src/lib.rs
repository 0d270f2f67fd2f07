//! # tickws
//! Client-side implementation of the WebSocket protocol (RFC 6455) over a raw TCP (or TLS) socket,
//! driven by an explicit, tick-based connection state machine.
//!
//! The crate is split in two layers:
//!
//! - A pure codec layer: [`header::FrameHeader`] (the 2-to-14 byte frame header), [`frame::Frame`]
//!   (payload variants, masking and fragment reassembly), [`buffer::ReceiveBuffer`] (partial reads
//!   and frame boundaries) and [`handshake`] (the HTTP Upgrade exchange).
//! - A connection layer: [`WebSocket`], a handle to a single connection whose state moves through
//!   `Closed → Connecting → Handshaking → Open → Closing → Closed`. Every state carries a deadline
//!   that is checked on each tick of a [`Scheduler`].
//!
//! # Driving model
//! A connection never blocks the caller. At most one socket operation (connect, handshake read or
//! frame read) is in flight at any time, and a registered [`scheduler::RepeatingWork`] checks on
//! every tick whether it has completed. Events are delivered through a [`Handler`] on the tick
//! that observed them.
//!
//! # Client Example
//! ```no_run
//! use tickws::{Handler, WebSocket};
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     fn on_open(&self, ws: &WebSocket) {
//!         ws.send_text("hello");
//!     }
//!
//!     fn on_message(&self, _ws: &WebSocket, text: String) {
//!         println!("{text}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tickws::Result<()> {
//!     let ws = WebSocket::builder().build(Printer);
//!     ws.open("ws://echo.websocket.org", Default::default())?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     ws.close();
//!     Ok(())
//! }
//! ```
//!
//! # Keepalive
//! A Ping is sent on the `Open` deadline when [`Options::keepalive_interval`] is configured, or
//! when the host signals [`WebSocket::resume`] after the process was suspended. Data received
//! while `Open` pushes the deadline back by the keepalive interval, or clears it when none is
//! set. Once a Ping is out, only a Pong does that, and a Ping not answered within
//! [`Options::ping_timeout`] closes the connection.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod buffer;
pub mod close;
pub mod frame;
pub mod handshake;
pub mod header;
pub mod headers;
pub mod scheduler;

mod client;
mod mask;
mod stream;

use thiserror::Error;

pub use client::*;
pub use close::CloseCode;
pub use frame::{Frame, Payload};
pub use header::{FrameHeader, OpCode};
pub use headers::{HeaderProvider, HeaderTable};
pub use scheduler::{RepeatingWork, Scheduler, Step, TokioScheduler};
pub use stream::tls_connector;

/// The largest payload this implementation accepts, declared or reassembled (`2^31 - 1`).
pub const MAX_PAYLOAD_LEN: u64 = i32::MAX as u64;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Broad classification of a [`WebSocketError`].
///
/// The connection state machine decides how to react to a failure from its kind: failures before
/// the connection is `Open` abort the attempt, protocol failures while `Open` are answered with a
/// Close frame, and socket failures tear the connection down immediately.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectFailure,
    HandshakeFailure,
    ProtocolError,
    TooLarge,
    Unsupported,
    Timeout,
    SocketFailure,
    UncleanClose,
}

/// Represents errors that can occur during WebSocket operations.
///
/// Each variant documents the condition that raises it. Use [`WebSocketError::kind`] to
/// classify it and [`WebSocketError::close_code`] to obtain the status code carried by the
/// Close frame sent in response.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The TCP connection (or the TLS session on top of it) could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Returned when attempting to establish a WebSocket connection with an invalid URL scheme.
    /// Only "ws://" and "wss://" schemes are valid.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// [`WebSocket::open`] was called on a connection that is not `Closed`.
    #[error("connection is {0}, not Closed")]
    NotClosed(State),

    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,

    /// The host name could not be used as a TLS server name.
    #[error("invalid dns name: {0}")]
    InvalidDnsName(String),

    /// The first line of the handshake response is not `HTTP/1.1 <code> <reason>`.
    #[error("Invalid HTTP status-line: {0}")]
    InvalidStatusLine(String),

    /// Returned when receiving an HTTP status code that is not valid for WebSocket handshake.
    /// Only 101 (Switching Protocols) is accepted.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Indicates that the HTTP "Upgrade" header is either missing or does not contain
    /// the required "websocket" value during connection handshake.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the HTTP "Connection" header is either missing or does not contain
    /// the required "upgrade" value during connection handshake.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The server's `Sec-WebSocket-Accept` does not match the key this side generated.
    #[error("Handshake failed: invalid Sec-WebSocket-Accept")]
    InvalidAcceptKey,

    /// The handshake response headers did not fit in the receive buffer.
    #[error("Too large response header")]
    ResponseHeaderTooLarge,

    /// Occurs when receiving a WebSocket fragment that violates RFC 6455,
    /// such as receiving a new fragment before completing the previous one.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Indicates that reserved bits in the WebSocket frame header are set.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame (ping, pong, or close) was received with the FIN bit clear.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A close frame payload of exactly one byte.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A text frame or close frame reason contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// A declared or reassembled payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("Frame too large")]
    FrameTooLarge,

    /// Receipt of a frame with a reserved opcode.
    #[error("Unsupported opcode (byte={0})")]
    InvalidOpCode(u8),

    /// The deadline of the named connection state elapsed.
    #[error("{0} timed out")]
    Timeout(State),

    /// The peer closed the socket without completing the Close frame exchange.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl WebSocketError {
    /// Classifies the error into the connection's failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailed(_)
            | Self::InvalidHttpScheme
            | Self::MissingHost
            | Self::InvalidDnsName(_)
            | Self::NotClosed(_)
            | Self::UrlParseError(_) => ErrorKind::ConnectFailure,
            Self::InvalidStatusLine(_)
            | Self::InvalidStatusCode(_)
            | Self::InvalidUpgradeHeader
            | Self::InvalidConnectionHeader
            | Self::InvalidAcceptKey
            | Self::ResponseHeaderTooLarge => ErrorKind::HandshakeFailure,
            Self::InvalidFragment
            | Self::InvalidContinuationFrame
            | Self::ReservedBitsNotZero
            | Self::ControlFrameFragmented
            | Self::InvalidCloseFrame
            | Self::InvalidUTF8 => ErrorKind::ProtocolError,
            Self::FrameTooLarge => ErrorKind::TooLarge,
            Self::InvalidOpCode(_) => ErrorKind::Unsupported,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::IoError(_) => ErrorKind::SocketFailure,
            Self::ConnectionClosed => ErrorKind::UncleanClose,
        }
    }

    /// Status code of the Close frame sent in response to this error.
    pub fn close_code(&self) -> CloseCode {
        match self.kind() {
            ErrorKind::ProtocolError if matches!(self, Self::InvalidUTF8) => {
                CloseCode::InvalidPayload
            }
            ErrorKind::ProtocolError => CloseCode::ProtocolError,
            ErrorKind::TooLarge => CloseCode::TooLarge,
            ErrorKind::Unsupported => CloseCode::Unsupported,
            ErrorKind::UncleanClose => CloseCode::UncleanClose,
            ErrorKind::ConnectFailure
            | ErrorKind::HandshakeFailure
            | ErrorKind::Timeout
            | ErrorKind::SocketFailure => CloseCode::ClientError,
        }
    }

    /// Whether the socket is unusable after this error, so no Close frame can be sent.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SocketFailure | ErrorKind::UncleanClose | ErrorKind::ConnectFailure
        )
    }
}
