//! # Handshake
//!
//! The HTTP/1.1 Upgrade exchange of [RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4),
//! written directly on the socket before it switches to binary framing.
//!
//! The client sends a [`Request`]:
//!
//! ```text
//! GET /chat?room=1 HTTP/1.1
//! Host: example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! Origin: null
//! ```
//!
//! and reads until [`find_header_end`] locates the blank line ending the response. The head is
//! parsed with [`Response::parse`] and checked with [`Response::verify`]: the status must be
//! `101`, `Upgrade` must be `websocket`, `Connection` must list `upgrade`, and
//! `Sec-WebSocket-Accept` must equal [`accept_key`] of the key that was sent.
use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue};
use sha1::{Digest, Sha1};
use url::Url;

use crate::{Result, WebSocketError};

/// Magic value appended to the key before hashing.
const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Computes the `Sec-WebSocket-Accept` value the server must answer for `key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID);
    BASE64_STANDARD.encode(&sha1.finalize()[..])
}

/// The Upgrade request for one connection attempt.
#[derive(Debug, Clone)]
pub struct Request {
    target: String,
    host: String,
    key: String,
    headers: HeaderMap,
}

impl Request {
    /// Creates a request for `url` with a fresh key.
    ///
    /// # Errors
    /// [`WebSocketError::MissingHost`] if the URL has no host.
    pub fn new(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or(WebSocketError::MissingHost)?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };

        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_owned(),
        };

        Ok(Self {
            target,
            host,
            key: generate_key(),
            headers: HeaderMap::new(),
        })
    }

    /// Merges `headers` into the request, replacing entries with the same name.
    ///
    /// Apply the header provider's headers first and the caller's overrides second, so that the
    /// overrides win.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets `name` unless a merged header already did.
    pub fn with_default(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.entry(name).or_insert(value);
        self
    }

    /// The `Sec-WebSocket-Key` sent with this request.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The request line target: path plus query.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Final header set, with the protocol headers replacing any merged value.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = self.headers.clone();
        headers.insert(
            header::HOST,
            HeaderValue::from_str(&self.host)
                .map_err(|_| WebSocketError::InvalidDnsName(self.host.clone()))?,
        );
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_str(&self.key).map_err(|_| WebSocketError::InvalidAcceptKey)?,
        );
        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        Ok(headers)
    }

    /// Serializes the request line, the headers and the terminating blank line.
    pub fn encode(&self) -> Result<Bytes> {
        let headers = self.headers()?;

        let mut dst = BytesMut::with_capacity(256);
        dst.put_slice(b"GET ");
        dst.put_slice(self.target.as_bytes());
        dst.put_slice(b" HTTP/1.1\r\n");
        for (name, value) in &headers {
            dst.put_slice(canonical_name(name).as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        Ok(dst.freeze())
    }
}

/// `sec-websocket-key` becomes `Sec-WebSocket-Key`; other names are title-cased per word.
fn canonical_name(name: &HeaderName) -> String {
    if *name == header::SEC_WEBSOCKET_KEY {
        return "Sec-WebSocket-Key".to_owned();
    }
    if *name == header::SEC_WEBSOCKET_VERSION {
        return "Sec-WebSocket-Version".to_owned();
    }

    name.as_str()
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Progress through the `\r\n\r\n` terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Cr1,
    Lf1,
    Cr2,
    Lf2,
}

/// Returns the length of the response head, terminator included, if `buf` holds all of it.
///
/// Any byte after that length belongs to the first frames of the connection.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    let mut state = Scan::Cr1;
    for (i, &byte) in buf.iter().enumerate() {
        state = match (state, byte) {
            (Scan::Lf2, b'\n') => return Some(i + 1),
            (Scan::Cr1, b'\r') => Scan::Lf1,
            (Scan::Lf1, b'\n') => Scan::Cr2,
            (Scan::Cr2, b'\r') => Scan::Lf2,
            (_, b'\r') => Scan::Lf1,
            _ => Scan::Cr1,
        };
    }
    None
}

/// A parsed handshake response head.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

impl Response {
    /// Parses the status line and header lines of `head`.
    ///
    /// Header names are case-folded. Lines that are not `name: value` pairs are skipped.
    ///
    /// # Errors
    /// [`WebSocketError::InvalidStatusLine`] if the first line is not `HTTP/<version> <code>
    /// [reason]`.
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let invalid = || WebSocketError::InvalidStatusLine(status_line.to_owned());

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(invalid());
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(invalid)?;
        let reason = parts.next().unwrap_or_default().to_owned();

        let mut headers = HeaderMap::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                log::debug!("skipping response header line {line:?}");
                continue;
            };

            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => log::debug!("skipping response header line {line:?}"),
            }
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// Checks that the response accepts the upgrade requested with `key`.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(WebSocketError::InvalidStatusCode(self.status));
        }

        if !self
            .headers
            .get(header::UPGRADE)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.trim().eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        {
            return Err(WebSocketError::InvalidUpgradeHeader);
        }

        if !self
            .headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return Err(WebSocketError::InvalidConnectionHeader);
        }

        let expected = accept_key(key);
        if !self
            .headers
            .get(header::SEC_WEBSOCKET_ACCEPT)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.trim().eq_ignore_ascii_case(&expected))
            .unwrap_or(false)
        {
            return Err(WebSocketError::InvalidAcceptKey);
        }

        Ok(())
    }
}
