//! # Close
//!
//! Status codes carried by Close frames ([RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4)).
//!
//! A Close frame payload is a 2-byte big-endian status code followed by an optional UTF-8
//! reason. [`CloseCode::UncleanClose`] is reported locally when the socket went away without a
//! Close frame exchange and is never written on the wire.

/// Status code of a Close frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal,
    /// The endpoint is going away (1001).
    Away,
    /// The peer violated the protocol (1002).
    ProtocolError,
    /// The peer sent a frame this side cannot handle, such as a reserved opcode (1003).
    Unsupported,
    /// A Close frame arrived without a status code (1005).
    NoStatus,
    /// The connection ended without a Close frame exchange (1006).
    UncleanClose,
    /// A text payload was not valid UTF-8 (1007).
    InvalidPayload,
    /// A declared or reassembled payload exceeded the size limit (1009).
    TooLarge,
    /// Generic failure on this side of the connection (1011).
    ClientError,
    /// Any code without a name here.
    Other(u16),
}

impl CloseCode {
    /// Whether the code may be written into a Close frame sent by this side.
    pub fn is_sendable(&self) -> bool {
        !matches!(self, Self::NoStatus | Self::UncleanClose)
    }
}

impl From<u16> for CloseCode {
    fn from(value: u16) -> Self {
        match value {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::ProtocolError,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::UncleanClose,
            1007 => Self::InvalidPayload,
            1009 => Self::TooLarge,
            1011 => Self::ClientError,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(value: CloseCode) -> Self {
        match value {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::UncleanClose => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::TooLarge => 1009,
            CloseCode::ClientError => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "{code}"),
            named => write!(f, "{named:?}({})", u16::from(*named)),
        }
    }
}
