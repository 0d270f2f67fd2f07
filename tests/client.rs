//! Drives a real client against an in-process server speaking raw RFC 6455.
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
    time::timeout,
};

use tickws::{
    buffer::ReceiveBuffer,
    handshake::{accept_key, find_header_end},
    CloseCode, Event, Frame, FrameHeader, HeaderTable, OpCode, Options, Payload, State,
    TokioScheduler, WebSocket, WebSocketError,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Server {
    listener: TcpListener,
}

impl Server {
    async fn bind() -> anyhow::Result<(Self, String)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/chat?room=1", listener.local_addr()?);
        Ok((Self { listener }, url))
    }

    async fn accept(&self) -> anyhow::Result<(Peer, String)> {
        let (stream, _) = timeout(TIMEOUT, self.listener.accept()).await??;
        let mut peer = Peer {
            stream,
            buffer: ReceiveBuffer::new(),
        };
        let request = peer.read_request().await?;
        Ok((peer, request))
    }
}

/// Server side of one connection.
struct Peer {
    stream: TcpStream,
    buffer: ReceiveBuffer,
}

impl Peer {
    async fn fill(&mut self) -> anyhow::Result<usize> {
        let n = timeout(TIMEOUT, self.stream.read(self.buffer.spare_mut())).await??;
        self.buffer.commit(n);
        Ok(n)
    }

    async fn read_request(&mut self) -> anyhow::Result<String> {
        loop {
            if let Some(end) = find_header_end(self.buffer.unread()) {
                let request = String::from_utf8_lossy(&self.buffer.unread()[..end]).into_owned();
                self.buffer.consume(end);
                return Ok(request);
            }
            if self.fill().await? == 0 {
                bail!("client closed during handshake");
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    async fn send(&mut self, opcode: OpCode, fin: bool, payload: &[u8]) -> anyhow::Result<()> {
        self.write(&server_frame(opcode, fin, payload)).await
    }

    async fn recv(&mut self) -> anyhow::Result<Frame> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }
            if self.fill().await? == 0 {
                bail!("client closed the socket");
            }
        }
    }

    /// Fails if the client sends anything within a short window.
    async fn expect_silence(&mut self) -> anyhow::Result<()> {
        self.expect_silence_for(Duration::from_millis(150)).await
    }

    async fn expect_silence_for(&mut self, window: Duration) -> anyhow::Result<()> {
        if let Some(frame) = self.buffer.next_frame()? {
            bail!("unexpected {}", frame.header());
        }

        match timeout(window, self.stream.read(self.buffer.spare_mut())).await
        {
            Err(_) | Ok(Ok(0)) => Ok(()),
            Ok(Ok(n)) => bail!("unexpected {n} bytes"),
            Ok(Err(err)) => Err(err.into()),
        }
    }
}

/// Unmasked frame, as a server sends it.
fn server_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        fin,
        opcode,
        payload_len: payload.len() as u64,
        mask: None,
    };
    let mut dst = BytesMut::new();
    header.encode(&mut dst);
    dst.extend_from_slice(payload);
    dst.to_vec()
}

fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

fn response(request: &str) -> anyhow::Result<String> {
    let key = request
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_owned())
        })
        .context("request has no Sec-WebSocket-Key")?;

    Ok(format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(&key)
    ))
}

fn client(options: Options) -> (WebSocket, UnboundedReceiver<Event>) {
    let (tx, rx) = unbounded_channel();
    let ws = WebSocket::builder()
        .with_options(options)
        .with_scheduler(TokioScheduler::new().with_period(Duration::from_millis(1)))
        .build(tx);
    (ws, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<Event>) -> anyhow::Result<Event> {
    timeout(TIMEOUT, rx.recv())
        .await?
        .ok_or_else(|| anyhow!("event channel closed"))
}

/// Skips events until one matches.
async fn wait_for(
    rx: &mut UnboundedReceiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> anyhow::Result<Event> {
    loop {
        let event = next_event(rx).await?;
        if pred(&event) {
            return Ok(event);
        }
    }
}

async fn wait_for_close(rx: &mut UnboundedReceiver<Event>) -> anyhow::Result<(bool, CloseCode, String)> {
    match wait_for(rx, |event| matches!(event, Event::Close { .. })).await? {
        Event::Close {
            was_clean,
            code,
            reason,
        } => Ok((was_clean, code, reason)),
        _ => unreachable!(),
    }
}

async fn connected(
    options: Options,
) -> anyhow::Result<(WebSocket, UnboundedReceiver<Event>, Peer)> {
    let (server, url) = Server::bind().await?;
    let (ws, mut rx) = client(options);
    ws.open(&url, HeaderMap::new())?;

    let (mut peer, request) = server.accept().await?;
    peer.write(response(&request)?.as_bytes()).await?;

    wait_for(&mut rx, |event| matches!(event, Event::Open)).await?;
    assert_eq!(ws.state(), State::Open);
    Ok((ws, rx, peer))
}

fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Debug);
}

#[tokio::test]
async fn test_handshake_request() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let table = HeaderTable::new();
    table.set_global(
        HeaderName::from_static("x-token"),
        Some(HeaderValue::from_static("table")),
    );
    table.set_for_host(
        "127.0.0.1",
        HeaderName::from_static("x-scoped"),
        Some(HeaderValue::from_static("host")),
    );

    let (tx, mut rx) = unbounded_channel();
    let ws = WebSocket::builder()
        .with_header_provider(table)
        .with_scheduler(TokioScheduler::new().with_period(Duration::from_millis(1)))
        .build(tx);

    let mut overrides = HeaderMap::new();
    overrides.insert("x-token", HeaderValue::from_static("caller"));
    ws.open(&url, overrides)?;
    assert!(matches!(
        next_event(&mut rx).await?,
        Event::StateChange(State::Connecting)
    ));

    let (mut peer, request) = server.accept().await?;
    let lower = request.to_lowercase();
    assert!(lower.starts_with("get /chat?room=1 http/1.1\r\n"));
    assert!(lower.contains("upgrade: websocket\r\n"));
    assert!(lower.contains("connection: upgrade\r\n"));
    assert!(lower.contains("sec-websocket-version: 13\r\n"));
    assert!(lower.contains("origin: null\r\n"));
    assert!(lower.contains("user-agent: tickws\r\n"));
    assert!(lower.contains("x-token: caller\r\n"));
    assert!(lower.contains("x-scoped: host\r\n"));

    assert!(matches!(
        next_event(&mut rx).await?,
        Event::StateChange(State::Handshaking)
    ));

    peer.write(response(&request)?.as_bytes()).await?;
    assert!(matches!(
        next_event(&mut rx).await?,
        Event::StateChange(State::Open)
    ));
    assert!(matches!(next_event(&mut rx).await?, Event::Open));

    Ok(())
}

#[tokio::test]
async fn test_text_and_binary_exchange() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    assert!(ws.send_text("hello"));
    let frame = peer.recv().await?;
    assert!(frame.header().mask.is_some());
    assert_eq!(frame.payload(), Some(&Payload::Text("hello".into())));

    assert!(ws.send_binary(vec![1u8, 2, 3]));
    let frame = peer.recv().await?;
    assert_eq!(
        frame.into_payload(),
        Some(Payload::Binary(Bytes::from_static(&[1, 2, 3])))
    );

    peer.send(OpCode::Text, true, b"world").await?;
    match next_event(&mut rx).await? {
        Event::Message(text) => assert_eq!(text, "world"),
        other => bail!("unexpected event {other:?}"),
    }

    peer.send(OpCode::Binary, true, &[0xFF, 0x00]).await?;
    match next_event(&mut rx).await? {
        Event::Binary(data) => assert_eq!(&data[..], &[0xFF, 0x00]),
        other => bail!("unexpected event {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_frames_in_handshake_read() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let (ws, mut rx) = client(Options::default());
    ws.open(&url, HeaderMap::new())?;

    let (mut peer, request) = server.accept().await?;
    let mut bytes = response(&request)?.into_bytes();
    bytes.extend(server_frame(OpCode::Text, true, b"early"));
    bytes.extend(server_frame(OpCode::Text, true, b"bird"));
    peer.write(&bytes).await?;

    wait_for(&mut rx, |event| matches!(event, Event::Open)).await?;
    match next_event(&mut rx).await? {
        Event::Message(text) => assert_eq!(text, "early"),
        other => bail!("unexpected event {other:?}"),
    }
    match next_event(&mut rx).await? {
        Event::Message(text) => assert_eq!(text, "bird"),
        other => bail!("unexpected event {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_peer_close_is_echoed_once() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Close, true, &close_payload(1000, "bye")).await?;

    let echo = peer.recv().await?;
    assert_eq!(echo.opcode(), OpCode::Close);
    assert!(matches!(
        echo.payload(),
        Some(Payload::Close {
            code: CloseCode::Normal,
            ..
        })
    ));

    wait_for(&mut rx, |event| {
        matches!(event, Event::StateChange(State::Closing))
    })
    .await?;
    peer.expect_silence().await?;
    drop(peer);

    let (was_clean, code, reason) = wait_for_close(&mut rx).await?;
    assert!(was_clean);
    assert_eq!(code, CloseCode::Normal);
    assert_eq!(reason, "bye");
    assert_eq!(ws.state(), State::Closed);

    Ok(())
}

#[tokio::test]
async fn test_ping_gets_one_pong() -> anyhow::Result<()> {
    init_logger();
    let (_ws, _rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Ping, true, b"abc").await?;
    let pong = peer.recv().await?;
    assert_eq!(
        pong.into_payload(),
        Some(Payload::Pong(Bytes::from_static(b"abc")))
    );
    peer.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_send_while_not_open() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let (ws, _rx) = client(Options::default());
    assert!(!ws.send_text("too early"));

    ws.open(&url, HeaderMap::new())?;
    assert!(!ws.send_text("still too early"));
    assert!(!ws.ping("nope"));

    let (mut peer, request) = server.accept().await?;
    assert!(peer.buffer.unread().is_empty());
    assert!(request.starts_with("GET "));
    peer.expect_silence().await?;

    Ok(())
}

#[tokio::test]
async fn test_double_close() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    ws.close();
    ws.close();
    assert_eq!(ws.state(), State::Closing);
    assert!(!ws.send_text("after close"));

    let close = peer.recv().await?;
    assert_eq!(
        close.payload(),
        Some(&Payload::Close {
            code: CloseCode::Normal,
            reason: "Normal Close".into()
        })
    );
    peer.expect_silence().await?;

    peer.send(OpCode::Close, true, &close_payload(1000, "")).await?;

    let (was_clean, code, reason) = wait_for_close(&mut rx).await?;
    assert!(was_clean);
    assert_eq!(code, CloseCode::Normal);
    assert_eq!(reason, "Normal Close");

    ws.close();
    assert_eq!(ws.state(), State::Closed);

    Ok(())
}

#[tokio::test]
async fn test_invalid_accept_key() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let (ws, mut rx) = client(Options::default());
    ws.open(&url, HeaderMap::new())?;

    let (mut peer, _request) = server.accept().await?;
    peer.write(
        b"HTTP/1.1 101 Switching Protocols\r\n\
          Upgrade: websocket\r\n\
          Connection: Upgrade\r\n\
          Sec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\r\n",
    )
    .await?;

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::InvalidAcceptKey)
    ));

    let (was_clean, code, _) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);
    assert_eq!(code, CloseCode::UncleanClose);
    assert_eq!(ws.state(), State::Closed);

    Ok(())
}

#[tokio::test]
async fn test_rejected_upgrade() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let (ws, mut rx) = client(Options::default());
    ws.open(&url, HeaderMap::new())?;

    let (mut peer, _request) = server.accept().await?;
    peer.write(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n").await?;

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::InvalidStatusCode(403))
    ));

    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    let (ws, mut rx) = client(Options::default().with_response_timeout(Duration::from_millis(200)));
    ws.open(&url, HeaderMap::new())?;

    let (_peer, _request) = server.accept().await?;

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::Timeout(State::Handshaking))
    ));

    let (was_clean, code, reason) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);
    assert_eq!(code, CloseCode::UncleanClose);
    assert_eq!(reason, "Handshaking timed out");

    Ok(())
}

#[tokio::test]
async fn test_connect_failure() -> anyhow::Result<()> {
    init_logger();

    let (server, url) = Server::bind().await?;
    drop(server);

    let (ws, mut rx) = client(Options::default());
    ws.open(&url, HeaderMap::new())?;

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::ConnectFailed(_))
    ));
    let (was_clean, _, _) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);

    Ok(())
}

#[tokio::test]
async fn test_fragmented_message() -> anyhow::Result<()> {
    init_logger();
    let (_ws, mut rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Text, false, b"Hel").await?;
    peer.send(OpCode::Continuation, false, b"lo, ").await?;
    peer.send(OpCode::Ping, true, b"between").await?;
    peer.send(OpCode::Continuation, true, b"world").await?;

    match wait_for(&mut rx, |event| matches!(event, Event::Message(_))).await? {
        Event::Message(text) => assert_eq!(text, "Hello, world"),
        _ => unreachable!(),
    }

    let pong = peer.recv().await?;
    assert_eq!(pong.opcode(), OpCode::Pong);

    Ok(())
}

#[tokio::test]
async fn test_send_fragmented() -> anyhow::Result<()> {
    init_logger();
    let (ws, _rx, mut peer) = connected(Options::default()).await?;

    assert!(ws.send_fragmented(OpCode::Text, Bytes::from_static(b"Hello, world"), 5));

    let mut message = peer.recv().await?;
    assert_eq!(message.opcode(), OpCode::Text);
    assert!(!message.is_final());

    while !message.is_final() {
        message.append(peer.recv().await?)?;
    }
    assert_eq!(
        message.into_payload(),
        Some(Payload::Text("Hello, world".into()))
    );

    Ok(())
}

#[tokio::test]
async fn test_large_binary() -> anyhow::Result<()> {
    init_logger();
    let (_ws, mut rx, mut peer) = connected(Options::default()).await?;

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    peer.send(OpCode::Binary, true, &payload).await?;
    peer.send(OpCode::Text, true, b"after").await?;

    match next_event(&mut rx).await? {
        Event::Binary(data) => assert_eq!(&data[..], &payload[..]),
        other => bail!("unexpected event {other:?}"),
    }
    match next_event(&mut rx).await? {
        Event::Message(text) => assert_eq!(text, "after"),
        other => bail!("unexpected event {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_protocol_error_sends_close() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Continuation, true, b"orphan").await?;

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::InvalidContinuationFrame)
    ));

    let close = peer.recv().await?;
    assert!(matches!(
        close.payload(),
        Some(Payload::Close {
            code: CloseCode::ProtocolError,
            ..
        })
    ));
    assert_eq!(ws.state(), State::Closing);

    peer.send(OpCode::Close, true, &close_payload(1002, "")).await?;

    let (was_clean, code, reason) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);
    assert_eq!(code, CloseCode::ProtocolError);
    assert_eq!(reason, "Invalid continuation frame");

    Ok(())
}

#[tokio::test]
async fn test_invalid_utf8_closes_with_invalid_payload() -> anyhow::Result<()> {
    init_logger();
    let (_ws, mut rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Text, true, &[0xC3, 0x28]).await?;

    let close = peer.recv().await?;
    assert!(matches!(
        close.payload(),
        Some(Payload::Close {
            code: CloseCode::InvalidPayload,
            ..
        })
    ));
    wait_for(&mut rx, |event| {
        matches!(event, Event::Error(WebSocketError::InvalidUTF8))
    })
    .await?;

    Ok(())
}

#[tokio::test]
async fn test_peer_drops_socket() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, peer) = connected(Options::default()).await?;

    drop(peer);

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::ConnectionClosed)
    ));

    let (was_clean, code, _) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);
    assert_eq!(code, CloseCode::UncleanClose);
    assert_eq!(ws.state(), State::Closed);

    Ok(())
}

#[tokio::test]
async fn test_keepalive_and_pong_timeout() -> anyhow::Result<()> {
    init_logger();
    let options = Options::default()
        .with_keepalive_interval(Duration::from_millis(50))
        .with_ping_timeout(Duration::from_millis(200));
    let (ws, mut rx, mut peer) = connected(options).await?;

    let ping = peer.recv().await?;
    assert_eq!(ping.opcode(), OpCode::Ping);
    peer.send(OpCode::Pong, true, b"").await?;

    let ping = peer.recv().await?;
    assert_eq!(ping.opcode(), OpCode::Ping);

    let close = peer.recv().await?;
    assert!(matches!(
        close.payload(),
        Some(Payload::Close {
            code: CloseCode::ClientError,
            ..
        })
    ));

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::Timeout(State::Open))
    ));
    assert_eq!(ws.state(), State::Closing);

    Ok(())
}

#[tokio::test]
async fn test_resume_sends_ping() -> anyhow::Result<()> {
    init_logger();
    let (ws, _rx, mut peer) = connected(Options::default()).await?;

    peer.expect_silence().await?;
    ws.resume();

    let ping = peer.recv().await?;
    assert_eq!(ping.opcode(), OpCode::Ping);

    Ok(())
}

#[tokio::test]
async fn test_close_timeout() -> anyhow::Result<()> {
    init_logger();
    let options = Options::default().with_close_timeout(Duration::from_millis(100));
    let (ws, mut rx, mut peer) = connected(options).await?;

    ws.close();
    assert_eq!(peer.recv().await?.opcode(), OpCode::Close);

    let error = wait_for(&mut rx, |event| matches!(event, Event::Error(_))).await?;
    assert!(matches!(
        error,
        Event::Error(WebSocketError::Timeout(State::Closing))
    ));

    let (was_clean, code, _) = wait_for_close(&mut rx).await?;
    assert!(!was_clean);
    assert_eq!(code, CloseCode::Normal);

    Ok(())
}

#[tokio::test]
async fn test_reopen_after_close() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    peer.send(OpCode::Close, true, &close_payload(1001, "restart")).await?;
    peer.recv().await?;
    drop(peer);
    let (was_clean, code, _) = wait_for_close(&mut rx).await?;
    assert!(was_clean);
    assert_eq!(code, CloseCode::Away);

    let (server, url) = Server::bind().await?;
    ws.open(&url, HeaderMap::new())?;
    assert!(matches!(
        ws.open(&url, HeaderMap::new()),
        Err(WebSocketError::NotClosed(State::Connecting))
    ));

    let (mut peer, request) = server.accept().await?;
    peer.write(response(&request)?.as_bytes()).await?;
    wait_for(&mut rx, |event| matches!(event, Event::Open)).await?;
    assert_eq!(ws.url().map(|url| url.to_string()), Some(url));

    Ok(())
}

#[tokio::test]
async fn test_peer_drops_socket_after_close() -> anyhow::Result<()> {
    init_logger();
    let (ws, mut rx, mut peer) = connected(Options::default()).await?;

    ws.close();
    assert_eq!(peer.recv().await?.opcode(), OpCode::Close);
    drop(peer);

    let (was_clean, code, reason) = wait_for_close(&mut rx).await?;
    assert!(was_clean);
    assert_eq!(code, CloseCode::Normal);
    assert_eq!(reason, "Normal Close");

    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, Event::Error(_)), "unexpected {event:?}");
    }
    assert_eq!(ws.state(), State::Closed);

    Ok(())
}

#[tokio::test]
async fn test_stalled_peer_fills_write_queue() -> anyhow::Result<()> {
    init_logger();
    let options = Options::default().with_write_queue_capacity(4);
    let (ws, _rx, _peer) = connected(options).await?;

    let chunk = Bytes::from(vec![0u8; 1 << 20]);
    let accepted = (0..256)
        .take_while(|_| ws.send_binary(chunk.clone()))
        .count();

    assert!(accepted < 256, "every send was queued");
    assert!(!ws.send_binary(chunk.clone()));
    assert!(!ws.send_fragmented(OpCode::Binary, chunk, 1 << 18));
    assert_eq!(ws.state(), State::Open);

    Ok(())
}

#[tokio::test]
async fn test_incoming_data_postpones_keepalive() -> anyhow::Result<()> {
    init_logger();
    let options = Options::default().with_keepalive_interval(Duration::from_millis(200));
    let (_ws, mut rx, mut peer) = connected(options).await?;

    for i in 0..10 {
        peer.send(OpCode::Text, true, format!("tick {i}").as_bytes())
            .await?;
        match next_event(&mut rx).await? {
            Event::Message(text) => assert_eq!(text, format!("tick {i}")),
            other => bail!("unexpected event {other:?}"),
        }
        peer.expect_silence_for(Duration::from_millis(50)).await?;
    }

    let ping = peer.recv().await?;
    assert_eq!(ping.opcode(), OpCode::Ping);

    Ok(())
}
