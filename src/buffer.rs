//! # Receive buffer
//!
//! [`ReceiveBuffer`] accumulates bytes read from the socket and cuts them into frames. Reads land
//! in [`ReceiveBuffer::spare_mut`] and are published with [`ReceiveBuffer::commit`]; after each
//! read the connection drains [`ReceiveBuffer::next_frame`] until it returns `None`.
//!
//! Frames are parsed from a read cursor:
//!
//! - When only part of a frame is available and the whole frame fits in the default capacity,
//!   the unconsumed bytes move to the front of the buffer and the next read appends to them.
//! - When the frame is larger than the default capacity, the buffer is swapped for one sized
//!   exactly to the payload. Following reads fill it, and the frame is built once it is full.
//! - Once every byte is consumed the buffer returns to its default size.
//!
//! During the handshake the same storage holds the HTTP response; see [`ReceiveBuffer::unread`]
//! and [`ReceiveBuffer::consume`].
use crate::{frame::Frame, header::FrameHeader, WebSocketError};

/// Size of the buffer between frames.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Socket read buffer that yields complete frames.
#[derive(Debug)]
pub struct ReceiveBuffer {
    capacity: usize,
    buf: Vec<u8>,
    filled: usize,
    cursor: usize,
    /// Header of an oversized frame whose payload is being read into a dedicated buffer.
    pending: Option<FrameHeader>,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    /// Creates a buffer with [`DEFAULT_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a buffer with a custom default capacity.
    ///
    /// The capacity must hold at least a full frame header.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(crate::header::MAX_HEADER_LEN);
        Self {
            capacity,
            buf: vec![0; capacity],
            filled: 0,
            cursor: 0,
            pending: None,
        }
    }

    /// Free space the next read may write into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Publishes `n` bytes written into [`Self::spare_mut`].
    pub fn commit(&mut self, n: usize) {
        self.filled = (self.filled + n).min(self.buf.len());
    }

    /// Whether no free space remains.
    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// Bytes received but not consumed yet.
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.cursor..self.filled]
    }

    /// Marks `n` unread bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.filled);
        if self.cursor == self.filled && self.pending.is_none() {
            self.reset();
        }
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    ///
    /// # Errors
    /// Propagates header and payload validation failures from [`FrameHeader::try_parse`] and
    /// [`Frame::from_parts`].
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WebSocketError> {
        if let Some(header) = self.pending.take() {
            if !self.is_full() {
                self.pending = Some(header);
                return Ok(None);
            }

            let frame = Frame::from_parts(header, &self.buf[..self.filled]);
            self.reset();
            return frame.map(Some);
        }

        let available = &self.buf[self.cursor..self.filled];
        let Some((header, header_len)) = FrameHeader::try_parse(available)? else {
            self.compact();
            return Ok(None);
        };

        let payload_len = header.payload_len as usize;
        let frame_len = header_len + payload_len;

        if available.len() >= frame_len {
            let frame = Frame::from_parts(header, &available[header_len..frame_len])?;
            self.consume(frame_len);
            return Ok(Some(frame));
        }

        if frame_len <= self.capacity {
            self.compact();
            return Ok(None);
        }

        let received = available.len() - header_len;
        let mut payload = vec![0; payload_len];
        payload[..received].copy_from_slice(&available[header_len..]);

        log::trace!("receiving {payload_len} byte payload into a dedicated buffer");

        self.buf = payload;
        self.filled = received;
        self.cursor = 0;
        self.pending = Some(header);

        Ok(None)
    }

    /// Moves the unread bytes to the front of the buffer.
    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buf.copy_within(self.cursor..self.filled, 0);
            self.filled -= self.cursor;
            self.cursor = 0;
        }
    }

    /// Discards all contents and restores the default size.
    pub fn reset(&mut self) {
        if self.buf.len() != self.capacity {
            self.buf = vec![0; self.capacity];
        }
        self.filled = 0;
        self.cursor = 0;
        self.pending = None;
    }
}
