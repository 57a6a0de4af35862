use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::wire::Frame;

/// Upper bound on a single frame. A gossip payload covering a few thousand
/// peers still fits comfortably.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// A [`Decoder`] and [`Encoder`] implementation that splits the TCP byte
/// stream into JSON objects, one frame per object.
///
/// The scan tracks brace depth, skipping braces that appear inside JSON
/// strings, and remembers how far it got so that a frame arriving in several
/// reads is not re-scanned from the start. This framing interoperates with
/// peers that simply write one JSON object per send and read into a
/// fixed-size buffer.
///
/// [`Decoder`]: tokio_util::codec::Decoder
/// [`Encoder`]: tokio_util::codec::Encoder
#[derive(Clone, Debug)]
pub struct FrameCodec {
    // Next index to examine, so partial frames are scanned once.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    max_length: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    /// A codec that rejects frames longer than `max_length` bytes. Without a
    /// bound, a peer that never balances its braces would grow the read
    /// buffer without limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            max_length,
        }
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    // Malformed objects are reported per frame so the caller can decide to
    // drop the connection; I/O and length errors terminate the stream.
    type Item = Result<Frame, FrameCodecError>;
    type Error = FrameCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.depth == 0 {
            // Not inside an object: drop anything before the next `{`.
            match buf.iter().position(|b| *b == b'{') {
                Some(0) => (),
                Some(junk) => buf.advance(junk),
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
            self.scanned = 0;
        }

        for offset in 0..buf.len() - self.scanned {
            let idx = self.scanned + offset;
            let byte = buf[idx];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let object = buf.split_to(idx + 1);
                        self.reset();
                        return Ok(Some(
                            serde_json::from_slice(&object).map_err(FrameCodecError::Malformed),
                        ));
                    }
                }
                _ => (),
            }
        }

        if buf.len() > self.max_length {
            return Err(FrameCodecError::FrameTooLong(self.max_length));
        }

        // No complete object yet; resume scanning here next time.
        self.scanned = buf.len();
        Ok(None)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameCodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = serde_json::to_vec(&item).map_err(FrameCodecError::Malformed)?;
        dst.reserve(bytes.len());
        dst.put(bytes.as_slice());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum FrameCodecError {
    #[error("frame exceeds the maximum length of {0} bytes")]
    FrameTooLong(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
