//! Incremental decoder for the platform's watch body.
//!
//! The body is a sequence of JSON objects written back-to-back with no outer
//! array. Bytes are buffered until one complete value is available. A framing
//! fault (malformed JSON, truncation, oversize, read error, unknown event
//! type) ends the sequence. A well-formed frame whose object does not convert
//! is reported and skipped.

use std::fmt::Display;
use std::pin::Pin;

use bytes::{Buf, Bytes, BytesMut};
use esk_core::{ChangeEvent, EventKind};
use futures::{Stream, StreamExt};
use serde::Deserialize;

/// Largest pending frame accepted before the stream is abandoned.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed watch frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("watch stream ended inside a frame ({pending_bytes} bytes pending)")]
    Truncated { pending_bytes: usize },
    #[error("watch frame exceeds {limit} bytes ({pending_bytes} bytes pending)")]
    Oversized { pending_bytes: usize, limit: usize },
    #[error("watch body read failed: {0}")]
    Read(String),
    #[error("unsupported watch event type {kind}: {message}")]
    UnknownType { kind: String, message: String },
    #[error("skipping {kind:?} event with invalid object: {source}")]
    Object { kind: EventKind, source: serde_json::Error },
}

impl DecodeError {
    /// Whether the sequence ends after this error. Only `Object` is skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DecodeError::Object { .. })
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: serde_json::Value,
}

/// Tracks how far into the pending buffer the current top-level object has
/// been scanned, so each byte is looked at once.
#[derive(Debug, Default)]
struct Scanner {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Length of the first complete object in `buf`, if it is complete.
    /// `buf` must start with `{`.
    fn complete_len(&mut self, buf: &[u8]) -> Option<usize> {
        while self.pos < buf.len() {
            let b = buf[self.pos];
            self.pos += 1;
            if self.in_string {
                match b {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Split one complete frame off the front of `buf`. `Ok(None)` means more
/// bytes are needed.
fn next_frame(buf: &mut BytesMut, scan: &mut Scanner) -> Result<Option<Frame>, serde_json::Error> {
    if scan.pos == 0 {
        let ws = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        buf.advance(ws);
    }
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'{' {
        // Not an object: let the parser name the fault, or wait for more bytes.
        let (res, used) = {
            let mut it = serde_json::Deserializer::from_slice(&buf[..]).into_iter::<Frame>();
            let res = it.next();
            (res, it.byte_offset())
        };
        return match res {
            Some(Ok(frame)) => {
                buf.advance(used);
                Ok(Some(frame))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        };
    }
    let Some(len) = scan.complete_len(&buf[..]) else {
        return Ok(None);
    };
    *scan = Scanner::default();
    let frame = serde_json::from_slice::<Frame>(&buf[..len]);
    buf.advance(len);
    frame.map(Some)
}

fn into_event(frame: Frame) -> Result<ChangeEvent, DecodeError> {
    let Some(kind) = EventKind::from_wire(&frame.kind) else {
        // ERROR frames carry a Status object; keep its message for the log line.
        let message = frame.object.get("message").and_then(|m| m.as_str()).unwrap_or_default().to_string();
        return Err(DecodeError::UnknownType { kind: frame.kind, message });
    };
    let resource = serde_json::from_value(frame.object).map_err(|source| DecodeError::Object { kind, source })?;
    Ok(ChangeEvent { kind, resource })
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    buf: BytesMut,
    scan: Scanner,
    limit: usize,
    done: bool,
}

/// Turn a byte stream into a lazy sequence of change events.
///
/// Ends at clean EOF or right after yielding the first fatal error.
pub fn decode<S, E>(stream: S) -> impl Stream<Item = Result<ChangeEvent, DecodeError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    decode_with_limit(stream, MAX_FRAME_BYTES)
}

/// [`decode`] with an explicit cap on the bytes buffered for one frame.
pub fn decode_with_limit<S, E>(stream: S, limit: usize) -> impl Stream<Item = Result<ChangeEvent, DecodeError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let state = DecodeState { inner: Box::pin(stream), buf: BytesMut::new(), scan: Scanner::default(), limit, done: false };
    futures::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            match next_frame(&mut st.buf, &mut st.scan) {
                Ok(Some(frame)) => {
                    let item = into_event(frame);
                    st.done = matches!(&item, Err(e) if e.is_fatal());
                    return Some((item, st));
                }
                Ok(None) => {}
                Err(e) => {
                    st.done = true;
                    return Some((Err(DecodeError::Json(e)), st));
                }
            }
            if st.buf.len() > st.limit {
                st.done = true;
                let err = DecodeError::Oversized { pending_bytes: st.buf.len(), limit: st.limit };
                return Some((Err(err), st));
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(DecodeError::Read(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    // next_frame already dropped leading whitespace.
                    if st.buf.is_empty() {
                        return None;
                    }
                    let pending_bytes = st.buf.len();
                    return Some((Err(DecodeError::Truncated { pending_bytes }), st));
                }
            }
        }
    })
}
