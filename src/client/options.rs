use std::time::Duration;

use http::HeaderValue;
use tokio_rustls::TlsConnector;

/// Default deadline of the `Connecting` state.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default deadline of the `Handshaking` state.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default time a Ping waits for its Pong.
pub const PING_TIMEOUT: Duration = Duration::from_millis(3000);
/// Default deadline of the `Closing` state.
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Default number of frames the write queue holds.
pub const WRITE_QUEUE_CAPACITY: usize = 128;

/// Configuration options for a WebSocket connection.
///
/// `Options` sets the deadline of each connection state, the keepalive policy and the defaults of
/// the Upgrade request. Values are changed with the consuming `with_*` methods:
///
/// ```rust
/// use std::time::Duration;
/// use tickws::Options;
///
/// let options = Options::default()
///     .with_connect_timeout(Duration::from_secs(2))
///     .with_keepalive_interval(Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct Options {
    /// Time allowed to open the TCP connection (and the TLS session for `wss`).
    ///
    /// Default: 5 seconds.
    pub connect_timeout: Duration,

    /// Time allowed for the server to answer the Upgrade request.
    ///
    /// Default: 5 seconds.
    pub response_timeout: Duration,

    /// Time a Ping sent while `Open` waits for a Pong before the connection is closed with a
    /// timeout error.
    ///
    /// Default: 3 seconds.
    pub ping_timeout: Duration,

    /// Time allowed for the Close frame exchange to complete.
    ///
    /// Default: 5 seconds.
    pub close_timeout: Duration,

    /// Time without incoming data after which an `Open` connection sends a Ping. Every read
    /// restarts the interval, unless a Ping is already waiting for its Pong.
    ///
    /// When `None`, Pings are only sent on [`WebSocket::resume`](crate::WebSocket::resume) and
    /// by the application.
    ///
    /// Default: `None`
    pub keepalive_interval: Option<Duration>,

    /// Frames waiting to be written. When the peer stops reading and the queue fills up, sends
    /// return `false` until it drains.
    ///
    /// Default: 128
    pub write_queue_capacity: usize,

    /// Sets `TCP_NODELAY` on the socket.
    ///
    /// Default: `true`
    pub no_delay: bool,

    /// `User-Agent` sent unless the request headers already set one.
    pub user_agent: HeaderValue,

    /// `Origin` sent unless the request headers already set one.
    pub origin: HeaderValue,

    /// TLS connector for `wss` URLs. When `None`, a connector trusting the webpki roots is built
    /// on each connection.
    pub connector: Option<TlsConnector>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
            keepalive_interval: None,
            write_queue_capacity: WRITE_QUEUE_CAPACITY,
            no_delay: true,
            user_agent: HeaderValue::from_static("tickws"),
            origin: HeaderValue::from_static("null"),
            connector: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("close_timeout", &self.close_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("write_queue_capacity", &self.write_queue_capacity)
            .field("no_delay", &self.no_delay)
            .field("user_agent", &self.user_agent)
            .field("origin", &self.origin)
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

impl Options {
    /// Sets the `Connecting` deadline.
    pub fn with_connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            ..self
        }
    }

    /// Sets the `Handshaking` deadline.
    pub fn with_response_timeout(self, timeout: Duration) -> Self {
        Self {
            response_timeout: timeout,
            ..self
        }
    }

    /// Sets how long a Ping waits for its Pong.
    pub fn with_ping_timeout(self, timeout: Duration) -> Self {
        Self {
            ping_timeout: timeout,
            ..self
        }
    }

    /// Sets the `Closing` deadline.
    pub fn with_close_timeout(self, timeout: Duration) -> Self {
        Self {
            close_timeout: timeout,
            ..self
        }
    }

    /// Sends a Ping after `interval` without incoming data while `Open`.
    pub fn with_keepalive_interval(self, interval: Duration) -> Self {
        Self {
            keepalive_interval: Some(interval),
            ..self
        }
    }

    /// Sets how many frames may wait in the write queue. Zero is treated as one.
    pub fn with_write_queue_capacity(self, capacity: usize) -> Self {
        Self {
            write_queue_capacity: capacity,
            ..self
        }
    }

    /// Disables or enables `TCP_NODELAY`.
    pub fn with_no_delay(self, no_delay: bool) -> Self {
        Self { no_delay, ..self }
    }

    /// Sets the default `User-Agent`.
    pub fn with_user_agent(self, user_agent: HeaderValue) -> Self {
        Self { user_agent, ..self }
    }

    /// Sets the default `Origin`.
    pub fn with_origin(self, origin: HeaderValue) -> Self {
        Self { origin, ..self }
    }

    /// Sets a custom TLS connector for secure WebSocket connections.
    ///
    /// This allows for customized TLS settings when connecting to wss:// URLs, such as custom
    /// certificate validation, client certificates, or specific cipher suites.
    pub fn with_connector(self, connector: TlsConnector) -> Self {
        Self {
            connector: Some(connector),
            ..self
        }
    }
}
