//! The connection handle and its event surface.
mod builder;
mod connection;
mod options;

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use http::{header, HeaderMap};
use tokio::{runtime::Handle, sync::mpsc::UnboundedSender};
use url::Url;

pub use builder::WebSocketBuilder;
pub use options::*;

use crate::{
    close::CloseCode,
    frame::Frame,
    handshake::Request,
    header::OpCode,
    headers::HeaderProvider,
    scheduler::{RepeatingWork, Scheduler, Step},
    Result, WebSocketError,
};
use connection::Connection;

/// Lifecycle state of a connection.
///
/// `Closed → Connecting → Handshaking → Open → Closing → Closed`. Any state may jump straight to
/// `Closed` when the attempt fails.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Connecting,
    Handshaking,
    Open,
    Closing,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Receives the events of a connection.
///
/// Every method has an empty default body. Events observed by a scheduler tick (socket progress,
/// frames, deadlines) are delivered on that tick. Events caused directly by a call on the handle,
/// such as the `Connecting` state change of [`WebSocket::open`] or the `Closing` state change of
/// [`WebSocket::close`], are delivered on the caller's thread before that call returns.
///
/// Either way callbacks run after the connection lock is released, so they may call back into the
/// [`WebSocket`] (for example to send a reply or close). A panic inside a callback is logged and
/// does not affect the connection.
pub trait Handler: Send + Sync + 'static {
    /// The connection entered `state`.
    fn on_state_change(&self, ws: &WebSocket, state: State) {
        let _ = (ws, state);
    }

    /// The handshake completed and the connection is `Open`.
    fn on_open(&self, ws: &WebSocket) {
        let _ = ws;
    }

    /// A complete text message arrived.
    fn on_message(&self, ws: &WebSocket, text: String) {
        let _ = (ws, text);
    }

    /// A complete binary message arrived.
    fn on_binary(&self, ws: &WebSocket, data: Bytes) {
        let _ = (ws, data);
    }

    /// The connection hit an error. `on_close` follows once the connection is torn down.
    fn on_error(&self, ws: &WebSocket, error: WebSocketError) {
        let _ = (ws, error);
    }

    /// The connection reached `Closed`. Fires once per open attempt.
    fn on_close(&self, ws: &WebSocket, was_clean: bool, code: CloseCode, reason: String) {
        let _ = (ws, was_clean, code, reason);
    }
}

impl Handler for () {}

/// A connection event, for hosts that prefer a channel over callbacks.
///
/// ```no_run
/// use tickws::{Event, WebSocket};
///
/// # async fn run() -> tickws::Result<()> {
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let ws = WebSocket::builder().build(tx);
/// ws.open("ws://localhost:9001", Default::default())?;
///
/// while let Some(event) = rx.recv().await {
///     match event {
///         Event::Message(text) => println!("{text}"),
///         Event::Close { .. } => break,
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub enum Event {
    StateChange(State),
    Open,
    Message(String),
    Binary(Bytes),
    Error(WebSocketError),
    Close {
        was_clean: bool,
        code: CloseCode,
        reason: String,
    },
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::StateChange(_) => "on_state_change",
            Self::Open => "on_open",
            Self::Message(_) => "on_message",
            Self::Binary(_) => "on_binary",
            Self::Error(_) => "on_error",
            Self::Close { .. } => "on_close",
        }
    }
}

impl Handler for UnboundedSender<Event> {
    fn on_state_change(&self, _ws: &WebSocket, state: State) {
        let _ = self.send(Event::StateChange(state));
    }

    fn on_open(&self, _ws: &WebSocket) {
        let _ = self.send(Event::Open);
    }

    fn on_message(&self, _ws: &WebSocket, text: String) {
        let _ = self.send(Event::Message(text));
    }

    fn on_binary(&self, _ws: &WebSocket, data: Bytes) {
        let _ = self.send(Event::Binary(data));
    }

    fn on_error(&self, _ws: &WebSocket, error: WebSocketError) {
        let _ = self.send(Event::Error(error));
    }

    fn on_close(&self, _ws: &WebSocket, was_clean: bool, code: CloseCode, reason: String) {
        let _ = self.send(Event::Close {
            was_clean,
            code,
            reason,
        });
    }
}

struct Shared {
    conn: Mutex<Connection>,
    handler: Box<dyn Handler>,
    scheduler: Arc<dyn Scheduler>,
    header_provider: Option<Arc<dyn HeaderProvider>>,
    runtime: Option<Handle>,
}

/// Handle to a client WebSocket connection.
///
/// Cloning the handle is cheap; every clone refers to the same connection. A connection starts
/// `Closed`, is driven by the [`Scheduler`] it was built with once [`WebSocket::open`] is called,
/// and may be opened again after it closed.
///
/// # Sending
/// The `send_*` methods queue a frame and return `true` while the connection is `Open`, and
/// return `false` without writing anything otherwise, or when the write queue is full because
/// the peer stopped reading.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("state", &self.state())
            .field("url", &self.url())
            .finish()
    }
}

impl WebSocket {
    /// Starts configuring a connection.
    pub fn builder() -> WebSocketBuilder {
        WebSocketBuilder::new()
    }

    /// Creates a connection with default options, driven by a [`TokioScheduler`](crate::TokioScheduler).
    pub fn new(handler: impl Handler) -> Self {
        Self::builder().build(handler)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.shared
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.lock().state()
    }

    /// URL of the current or last open attempt.
    pub fn url(&self) -> Option<Url> {
        self.lock().url().cloned()
    }

    /// Options the connection was built with.
    pub fn options(&self) -> Options {
        self.lock().options().clone()
    }

    /// Starts connecting to `url`.
    ///
    /// The Upgrade request carries the header provider's headers for `url`, then `headers`, which
    /// override them. Progress is reported through the [`Handler`].
    ///
    /// # Errors
    /// Fails without firing any callback when the URL does not parse, its scheme is not `ws` or
    /// `wss`, no tokio runtime is available, or the connection is not `Closed`.
    pub fn open(&self, url: &str, headers: HeaderMap) -> Result<()> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WebSocketError::InvalidHttpScheme);
        }

        let runtime = match &self.shared.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|err| {
                WebSocketError::ConnectFailed(io::Error::new(io::ErrorKind::Other, err))
            })?,
        };

        let provided = self
            .shared
            .header_provider
            .as_ref()
            .map(|provider| provider.headers_for(&url))
            .unwrap_or_default();

        let options = self.options();
        let request = Request::new(&url)?
            .with_headers(provided)
            .with_headers(headers)
            .with_default(header::ORIGIN, options.origin)
            .with_default(header::USER_AGENT, options.user_agent);

        log::debug!("opening {url}");

        let mut events = Vec::new();
        let generation = self.lock().start(url, request, runtime, &mut events)?;

        self.shared.scheduler.register(Box::new(Driver {
            ws: self.clone(),
            generation,
        }));
        self.dispatch(events);

        Ok(())
    }

    /// Sends a text message.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(Frame::text(text))
    }

    /// Sends a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send_frame(Frame::binary(data))
    }

    /// Sends a Ping. The connection closes with a timeout error if no Pong arrives within
    /// [`Options::ping_timeout`].
    pub fn ping(&self, data: impl Into<Bytes>) -> bool {
        self.send_frame(Frame::ping(data))
    }

    /// Sends any frame, such as a fragment built with [`Frame::with_fin`]. Sending a Close frame
    /// moves the connection to `Closing`.
    pub fn send_frame(&self, frame: Frame) -> bool {
        self.send_frames(vec![frame])
    }

    /// Sends `payload` as a message split into frames of at most `fragment_size` bytes.
    ///
    /// `opcode` must be [`OpCode::Text`] or [`OpCode::Binary`]; text is split on byte
    /// boundaries, the receiver reassembles it before decoding.
    ///
    /// The message is queued whole or not at all: it is dropped, and `false` returned, when the
    /// write queue lacks room for every fragment.
    pub fn send_fragmented(&self, opcode: OpCode, payload: Bytes, fragment_size: usize) -> bool {
        if !matches!(opcode, OpCode::Text | OpCode::Binary) {
            return false;
        }

        let fragment_size = fragment_size.max(1);
        let chunks: Vec<Bytes> = if payload.is_empty() {
            vec![payload]
        } else {
            (0..payload.len())
                .step_by(fragment_size)
                .map(|start| payload.slice(start..payload.len().min(start + fragment_size)))
                .collect()
        };

        let last = chunks.len() - 1;
        let frames = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let frame = if i == 0 {
                    Frame::first_fragment(opcode, chunk)
                } else {
                    Frame::continuation(chunk)
                };
                frame.with_fin(i == last)
            })
            .collect();

        self.send_frames(frames)
    }

    fn send_frames(&self, frames: Vec<Frame>) -> bool {
        let mut events = Vec::new();
        let sent = self.lock().send(frames, &mut events);
        self.dispatch(events);
        sent
    }

    /// Closes the connection.
    ///
    /// While `Open`, sends a Close frame and waits for the peer's. While connecting, tears the
    /// attempt down. Otherwise does nothing.
    pub fn close(&self) {
        let mut events = Vec::new();
        self.lock().close(&mut events);
        self.dispatch(events);
    }

    /// Signals that the host process resumed from suspension.
    ///
    /// On the next tick an `Open` connection sends a Ping, so a stalled socket is detected within
    /// [`Options::ping_timeout`] instead of waiting for the next keepalive.
    pub fn resume(&self) {
        self.lock().resume();
    }

    fn dispatch(&self, events: Vec<Event>) {
        let handler = &*self.shared.handler;
        for event in events {
            let name = event.name();
            let result = panic::catch_unwind(AssertUnwindSafe(|| match event {
                Event::StateChange(state) => handler.on_state_change(self, state),
                Event::Open => handler.on_open(self),
                Event::Message(text) => handler.on_message(self, text),
                Event::Binary(data) => handler.on_binary(self, data),
                Event::Error(error) => handler.on_error(self, error),
                Event::Close {
                    was_clean,
                    code,
                    reason,
                } => handler.on_close(self, was_clean, code, reason),
            }));

            if result.is_err() {
                log::error!("{name} handler panicked");
            }
        }
    }
}

/// Ticks one open attempt until it closes or a newer attempt replaces it.
struct Driver {
    ws: WebSocket,
    generation: u64,
}

impl RepeatingWork for Driver {
    fn run(&mut self) -> Step {
        let mut events = Vec::new();
        let step = {
            let mut conn = self.ws.lock();
            if conn.generation() != self.generation {
                return Step::Done;
            }

            conn.tick(&mut events);
            if conn.state() == State::Closed {
                Step::Done
            } else {
                Step::Continue
            }
        };

        self.ws.dispatch(events);
        step
    }
}
