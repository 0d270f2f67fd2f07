//! The connection state machine.
//!
//! A [`Connection`] owns the socket halves, the receive buffer and the in-flight socket operation
//! of one [`WebSocket`](super::WebSocket). It never blocks: [`Connection::tick`] checks whether
//! the outstanding operation (connect or read) has finished, handles its result, issues the next
//! one and otherwise enforces the deadline of the current state. Everything the application must
//! hear about is pushed into an event list that the caller dispatches after releasing its lock.
use std::{
    io,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{task::noop_waker_ref, FutureExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use url::Url;

use super::{Event, Options, State};
use crate::{
    buffer::ReceiveBuffer,
    close::CloseCode,
    frame::{Frame, Payload, NORMAL_CLOSE_REASON},
    handshake::{self, Request, Response},
    header::OpCode,
    stream::{self, MaybeTlsStream},
    Result, WebSocketError,
};

type Reader = ReadHalf<MaybeTlsStream>;

/// What a read task hands back: the reader and buffer it borrowed, and the read result.
struct ReadOutcome {
    reader: Reader,
    buffer: ReceiveBuffer,
    result: io::Result<usize>,
}

/// The single socket operation in flight.
enum Operation {
    Connect(JoinHandle<io::Result<MaybeTlsStream>>),
    Read(JoinHandle<ReadOutcome>),
}

impl Operation {
    fn abort(&self) {
        match self {
            Self::Connect(task) => task.abort(),
            Self::Read(task) => task.abort(),
        }
    }
}

enum Completion {
    Connected(io::Result<MaybeTlsStream>),
    Read(ReadOutcome),
    Lost(io::Error),
}

/// Outbound half: frames are queued to a task that writes them in order. The queue holds at most
/// [`Options::write_queue_capacity`] frames.
struct Writer {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<io::Result<()>>,
}

async fn write_loop(
    mut half: WriteHalf<MaybeTlsStream>,
    mut rx: mpsc::Receiver<Bytes>,
) -> io::Result<()> {
    while let Some(bytes) = rx.recv().await {
        half.write_all(&bytes).await?;
        half.flush().await?;
    }
    half.shutdown().await
}

async fn read_into(mut reader: Reader, mut buffer: ReceiveBuffer) -> ReadOutcome {
    let result = reader.read(buffer.spare_mut()).await;
    ReadOutcome {
        reader,
        buffer,
        result,
    }
}

/// Returns the task output if it already finished, without waiting.
fn poll_task<T>(task: &mut JoinHandle<T>) -> Option<io::Result<T>> {
    if !task.is_finished() {
        return None;
    }

    let mut cx = Context::from_waker(noop_waker_ref());
    match task.poll_unpin(&mut cx) {
        Poll::Ready(Ok(output)) => Some(Ok(output)),
        Poll::Ready(Err(err)) => Some(Err(io::Error::new(io::ErrorKind::Other, err))),
        Poll::Pending => None,
    }
}

pub(crate) struct Connection {
    options: Options,
    state: State,
    deadline: Option<Instant>,
    generation: u64,
    url: Option<Url>,
    runtime: Option<Handle>,
    request: Bytes,
    key: String,
    operation: Option<Operation>,
    writer: Option<Writer>,
    /// First fragment of a message whose continuations are still arriving.
    incomplete: Option<Frame>,
    /// The Close frame this side sent or received first.
    close_frame: Option<(CloseCode, String)>,
    peer_closed: bool,
    failure: Option<String>,
    awaiting_pong: bool,
    resumed: bool,
}

impl Connection {
    pub(crate) fn new(options: Options) -> Self {
        Self {
            options,
            state: State::Closed,
            deadline: None,
            generation: 0,
            url: None,
            runtime: None,
            request: Bytes::new(),
            key: String::new(),
            operation: None,
            writer: None,
            incomplete: None,
            close_frame: None,
            peer_closed: false,
            failure: None,
            awaiting_pong: false,
            resumed: false,
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    /// Begins an open attempt and returns its generation.
    pub(crate) fn start(
        &mut self,
        url: Url,
        request: Request,
        runtime: Handle,
        events: &mut Vec<Event>,
    ) -> Result<u64> {
        if self.state != State::Closed {
            return Err(WebSocketError::NotClosed(self.state));
        }

        self.request = request.encode()?;
        self.key = request.key().to_owned();
        self.generation += 1;
        self.runtime = Some(runtime);
        self.close_frame = None;
        self.failure = None;

        let connect = stream::connect(
            url.clone(),
            self.options.connector.clone(),
            self.options.no_delay,
        );
        self.url = Some(url);
        self.transition(State::Connecting, events);
        self.operation = Some(Operation::Connect(self.spawn(connect)));

        Ok(self.generation)
    }

    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => runtime.spawn(future),
            None => tokio::spawn(future),
        }
    }

    /// One step of the state machine.
    pub(crate) fn tick(&mut self, events: &mut Vec<Event>) {
        if self.state == State::Closed {
            return;
        }

        if let Some(completion) = self.poll_operation() {
            match completion {
                Completion::Connected(Ok(stream)) => self.on_connected(stream, events),
                Completion::Connected(Err(err)) => {
                    self.fail(WebSocketError::ConnectFailed(err), events)
                }
                Completion::Read(outcome) => self.on_read(outcome, events),
                Completion::Lost(err) => self.fail(err.into(), events),
            }
            return;
        }

        if let Some(err) = self.poll_writer() {
            self.fail(err.into(), events);
            return;
        }

        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            self.on_deadline(events);
            return;
        }

        if std::mem::take(&mut self.resumed) && self.state == State::Open {
            log::debug!("resumed, sending ping");
            self.write_frame(Frame::ping(Bytes::new()));
        }
    }

    fn poll_operation(&mut self) -> Option<Completion> {
        let completion = match self.operation.as_mut()? {
            Operation::Connect(task) => {
                Completion::Connected(poll_task(task)?.and_then(std::convert::identity))
            }
            Operation::Read(task) => match poll_task(task)? {
                Ok(outcome) => Completion::Read(outcome),
                Err(err) => Completion::Lost(err),
            },
        };

        self.operation = None;
        Some(completion)
    }

    /// Returns the reason the writer task stopped, if it did.
    fn poll_writer(&mut self) -> Option<io::Error> {
        let result = poll_task(&mut self.writer.as_mut()?.task)?;
        self.writer = None;

        Some(match result.and_then(std::convert::identity) {
            Ok(()) => io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"),
            Err(err) => err,
        })
    }

    fn on_connected(&mut self, stream: MaybeTlsStream, events: &mut Vec<Event>) {
        let (reader, writer) = tokio::io::split(stream);

        let (tx, rx) = mpsc::channel(self.options.write_queue_capacity.max(1));
        let task = self.spawn(write_loop(writer, rx));
        self.writer = Some(Writer { tx, task });

        self.transition(State::Handshaking, events);

        let request = std::mem::take(&mut self.request);
        log::debug!(
            "sending handshake request:\n{}",
            String::from_utf8_lossy(&request)
        );
        if let Some(writer) = &self.writer {
            if writer.tx.try_send(request).is_err() {
                self.fail(
                    io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped").into(),
                    events,
                );
                return;
            }
        }

        self.issue_read(reader, ReceiveBuffer::new());
    }

    fn issue_read(&mut self, reader: Reader, buffer: ReceiveBuffer) {
        let task = self.spawn(read_into(reader, buffer));
        self.operation = Some(Operation::Read(task));
    }

    fn on_read(&mut self, outcome: ReadOutcome, events: &mut Vec<Event>) {
        let ReadOutcome {
            reader,
            mut buffer,
            result,
        } = outcome;

        let n = match result {
            Ok(n) => n,
            Err(err) => return self.fail(err.into(), events),
        };

        if n == 0 {
            return self.on_eof(events);
        }

        buffer.commit(n);
        log::trace!("read {n} bytes");

        if self.state == State::Open && !self.awaiting_pong {
            self.deadline = self.keepalive_deadline();
        }

        if self.state == State::Handshaking {
            match self.finish_handshake(&mut buffer) {
                Ok(true) => {
                    self.transition(State::Open, events);
                    events.push(Event::Open);
                }
                Ok(false) if buffer.is_full() => {
                    return self.fail(WebSocketError::ResponseHeaderTooLarge, events)
                }
                Ok(false) => return self.issue_read(reader, buffer),
                Err(err) => return self.fail(err, events),
            }
        }

        loop {
            let frame = match buffer.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    buffer.reset();
                    self.fail(err, events);
                    break;
                }
            };

            if let Err(err) = self.on_frame(frame, events) {
                buffer.reset();
                self.fail(err, events);
                break;
            }

            if self.state == State::Closed {
                return;
            }
        }

        if matches!(self.state, State::Open | State::Closing) {
            self.issue_read(reader, buffer);
        }
    }

    /// Validates the response head once it is complete. Bytes after it stay in `buffer`.
    fn finish_handshake(&mut self, buffer: &mut ReceiveBuffer) -> Result<bool> {
        let Some(end) = handshake::find_header_end(buffer.unread()) else {
            return Ok(false);
        };

        let response = Response::parse(&buffer.unread()[..end])?;
        log::debug!(
            "handshake response: {} {} ({} headers)",
            response.status,
            response.reason,
            response.headers.len()
        );
        response.verify(&self.key)?;

        buffer.consume(end);
        Ok(true)
    }

    fn on_eof(&mut self, events: &mut Vec<Event>) {
        log::debug!("socket closed by peer");
        let close_sent = self.state == State::Closing && self.close_frame.is_some();
        if self.peer_closed || close_sent {
            self.teardown(None, events);
        } else {
            self.fail(WebSocketError::ConnectionClosed, events);
        }
    }

    fn on_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<()> {
        log::trace!("received {}", frame.header());

        match frame.opcode() {
            OpCode::Text | OpCode::Binary if !frame.is_final() => {
                if self.incomplete.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }
                self.incomplete = Some(frame);
            }
            OpCode::Text | OpCode::Binary => {
                if self.incomplete.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }
                deliver(frame, events);
            }
            OpCode::Continuation => {
                let mut message = self
                    .incomplete
                    .take()
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;
                message.append(frame)?;
                if message.is_final() {
                    deliver(message, events);
                } else {
                    self.incomplete = Some(message);
                }
            }
            OpCode::Ping => {
                if self.state == State::Open {
                    self.write_frame(Frame::pong_for(&frame));
                }
            }
            OpCode::Pong => {
                if self.state == State::Open {
                    self.awaiting_pong = false;
                    self.deadline = self.keepalive_deadline();
                }
            }
            OpCode::Close => self.on_close_frame(frame, events),
            OpCode::Reserved(value) => return Err(WebSocketError::InvalidOpCode(value)),
        }

        Ok(())
    }

    fn on_close_frame(&mut self, frame: Frame, events: &mut Vec<Event>) {
        let (code, reason) = match frame.into_payload() {
            Some(Payload::Close { code, reason }) => (code, reason),
            _ => (CloseCode::NoStatus, String::new()),
        };
        log::debug!("received close frame: {code} {reason:?}");

        self.peer_closed = true;
        match self.state {
            State::Open => {
                self.close_frame.get_or_insert((code, reason));
                self.write_frame(Frame::close(CloseCode::Normal, NORMAL_CLOSE_REASON));
                self.transition(State::Closing, events);
            }
            State::Closing => self.teardown(None, events),
            _ => {}
        }
    }

    fn on_deadline(&mut self, events: &mut Vec<Event>) {
        match self.state {
            State::Open if !self.awaiting_pong => {
                log::debug!("keepalive ping");
                self.write_frame(Frame::ping(Bytes::new()));
            }
            state => self.fail(WebSocketError::Timeout(state), events),
        }
    }

    fn keepalive_deadline(&self) -> Option<Instant> {
        self.options
            .keepalive_interval
            .map(|interval| Instant::now() + interval)
    }

    /// Serializes `frame` and queues it on the writer.
    fn write_frame(&mut self, frame: Frame) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };

        let mut dst =
            BytesMut::with_capacity(frame.header().len() + frame.header().payload_len as usize);
        frame.write_to(&mut dst);
        match writer.tx.try_send(dst.freeze()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("write queue full, dropping {}", frame.header());
                return false;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("writer stopped, dropping {}", frame.header());
                return false;
            }
        }
        log::trace!("sent {}", frame.header());

        match frame.opcode() {
            OpCode::Ping if self.state == State::Open => {
                self.awaiting_pong = true;
                self.deadline = Some(Instant::now() + self.options.ping_timeout);
            }
            OpCode::Close if self.close_frame.is_none() => {
                if let Some(Payload::Close { code, reason }) = frame.into_payload() {
                    self.close_frame = Some((code, reason));
                }
            }
            _ => {}
        }

        true
    }

    /// Sends frames back to back while `Open`. A Close frame moves the connection to `Closing`.
    pub(crate) fn send(&mut self, frames: Vec<Frame>, events: &mut Vec<Event>) -> bool {
        if self.state != State::Open {
            return false;
        }

        if let Some(err) = self.poll_writer() {
            self.fail(err.into(), events);
            return false;
        }

        // a fragmented message is queued whole or not at all
        match &self.writer {
            Some(writer) if writer.tx.capacity() >= frames.len() => {}
            _ => {
                log::warn!("write queue full, dropping {} frames", frames.len());
                return false;
            }
        }

        for frame in frames {
            let is_close = frame.opcode() == OpCode::Close;
            if !self.write_frame(frame) {
                return false;
            }
            if is_close {
                self.transition(State::Closing, events);
                break;
            }
        }

        true
    }

    /// Graceful close while `Open`, teardown while connecting, nothing otherwise.
    pub(crate) fn close(&mut self, events: &mut Vec<Event>) {
        match self.state {
            State::Open => {
                self.write_frame(Frame::close(CloseCode::Normal, NORMAL_CLOSE_REASON));
                self.transition(State::Closing, events);
            }
            State::Connecting | State::Handshaking => self.teardown(None, events),
            State::Closing | State::Closed => {}
        }
    }

    pub(crate) fn resume(&mut self) {
        self.resumed = true;
    }

    /// Handles `error` according to the current state.
    ///
    /// While `Open`, anything but a socket failure is answered with a Close frame carrying the
    /// error's close code. In every other state the connection is torn down.
    fn fail(&mut self, error: WebSocketError, events: &mut Vec<Event>) {
        match self.state {
            State::Closed => log::debug!("ignoring error on closed connection: {error}"),
            State::Open if !error.is_fatal() => {
                log::warn!("closing connection: {error}");
                self.failure = Some(error.to_string());
                self.incomplete = None;
                self.write_frame(Frame::close_for(&error));
                events.push(Event::Error(error));
                self.transition(State::Closing, events);
            }
            state => {
                log::warn!("{state} failed: {error}");
                self.failure = Some(error.to_string());
                self.teardown(Some(error), events);
            }
        }
    }

    /// Releases the socket and reports the close. Runs once per open attempt.
    fn teardown(&mut self, error: Option<WebSocketError>, events: &mut Vec<Event>) {
        if self.state == State::Closed {
            return;
        }

        if let Some(operation) = self.operation.take() {
            operation.abort();
        }

        let failure = self.failure.take();
        if let Some(writer) = self.writer.take() {
            // queued frames still drain on a clean close
            if failure.is_some() {
                writer.task.abort();
            }
        }

        self.incomplete = None;
        self.peer_closed = false;
        self.awaiting_pong = false;
        self.resumed = false;

        let was_clean = self.close_frame.is_some() && failure.is_none();
        let (code, reason) = match self.close_frame.take() {
            Some(frame) => frame,
            None => (CloseCode::UncleanClose, failure.unwrap_or_default()),
        };

        self.transition(State::Closed, events);
        log::debug!("closed: clean={was_clean} code={code} reason={reason:?}");

        if let Some(error) = error {
            events.push(Event::Error(error));
        }
        events.push(Event::Close {
            was_clean,
            code,
            reason,
        });
    }

    fn transition(&mut self, state: State, events: &mut Vec<Event>) {
        let now = Instant::now();
        self.deadline = match state {
            State::Connecting => Some(now + self.options.connect_timeout),
            State::Handshaking => Some(now + self.options.response_timeout),
            State::Open => self.keepalive_deadline(),
            State::Closing => Some(now + self.options.close_timeout),
            State::Closed => None,
        };
        if state == State::Open {
            self.awaiting_pong = false;
        }

        log::debug!(
            "state: {} -> {state}, timeout: {:?}",
            self.state,
            self.deadline
                .map(|deadline| deadline.saturating_duration_since(now))
        );

        self.state = state;
        events.push(Event::StateChange(state));
    }
}

fn deliver(frame: Frame, events: &mut Vec<Event>) {
    match frame.into_payload() {
        Some(Payload::Text(text)) => events.push(Event::Message(text)),
        Some(Payload::Binary(data)) => events.push(Event::Binary(data)),
        _ => {}
    }
}
