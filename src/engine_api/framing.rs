//! The engine's multiplexed stdout/stderr stream format.
//!
//! Each frame is `[stream, 0, 0, 0, len(4 bytes BE)]` followed by `len`
//! bytes of payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const HEADER_LEN: usize = 8;

/// Content type the engine uses for multiplexed and raw log streams.
pub const RAW_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.raw-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamKind,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown stream tag {0}")]
    UnknownStream(u8),
    #[error("payload of {0} bytes does not fit a frame")]
    TooLarge(usize),
}

/// Appends one frame. An empty payload still produces a header.
pub fn encode_into(buf: &mut BytesMut, stream: StreamKind, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;
    buf.reserve(HEADER_LEN + payload.len());
    buf.put_u8(stream as u8);
    buf.put_slice(&[0, 0, 0]);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(())
}

pub fn encode(stream: StreamKind, payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_into(&mut buf, stream, payload)?;
    Ok(buf.freeze())
}

/// Pops one complete frame off the front of `buf`, or returns `None` when
/// more bytes are needed.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let stream = StreamKind::from_tag(buf[0]).ok_or(FrameError::UnknownStream(buf[0]))?;
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();
    Ok(Some(Frame { stream, payload }))
}

/// Decodes every complete frame in `data`; trailing partial bytes are ignored.
pub fn decode_all(data: &[u8]) -> Result<Vec<Frame>, FrameError> {
    let mut buf = BytesMut::from(data);
    let mut frames = Vec::new();
    while let Some(frame) = decode(&mut buf)? {
        frames.push(frame);
    }
    Ok(frames)
}
