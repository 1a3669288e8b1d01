//! Wire framing for the feed.
//!
//! Every JSON message travels as a little-endian `u32` byte count followed by
//! the message body. The codec yields bodies only; it never looks inside them.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 4;

/// Largest body accepted by default. A full-depth snapshot of a busy book fits
/// comfortably.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Codec splitting the byte stream into message bodies.
#[derive(Debug, Clone)]
pub struct FeedFrameCodec {
    max_frame_size: usize,
}

impl FeedFrameCodec {
    /// Bodies longer than `max_frame_size` are refused in both directions.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> io::Result<()> {
        if len <= self.max_frame_size {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("feed frame of {len} bytes over the {} byte limit", self.max_frame_size),
        ))
    }
}

impl Default for FeedFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FeedFrameCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = src.get(..HEADER_LEN) else {
            return Ok(None);
        };
        let mut header = header;
        let body_len = header.get_u32_le() as usize;
        // Refuse before buffering, so a bad length cannot grow the buffer.
        self.check_len(body_len)?;

        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(body_len)))
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FeedFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.as_ref();
        self.check_len(body.len())?;
        let len = u32::try_from(body.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "feed frame over 4 GiB"))?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32_le(len);
        dst.put_slice(body);
        Ok(())
    }
}
