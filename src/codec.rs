//! Wire framing: one UTF-8 string per frame, prefixed with a u16
//! big-endian byte length.

use std::{fmt, io, str};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const LEN_PREFIX: usize = 2;

/// The largest payload the length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Codec for length-prefixed UTF-8 string frames. Every logical message
/// on the wire, the client's name and each chat line, is one frame.
#[derive(Clone, Debug)]
pub struct StringCodec {
    max_frame_length: usize,
}

impl StringCodec {
    pub fn new() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LEN,
        }
    }

    /// Caps decoded and encoded payloads at `max_frame_length` bytes.
    /// A peer that claims a longer frame is faulted without waiting for
    /// the rest of the frame to arrive.
    pub fn new_with_max_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(MAX_FRAME_LEN),
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for StringCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StringCodec {
    type Item = String;
    type Error = StringCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, StringCodecError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len > self.max_frame_length {
            return Err(StringCodecError::FrameTooLong);
        }
        if src.len() < LEN_PREFIX + len {
            // partial frame, reserve room for the rest of it
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        let frame = str::from_utf8(&payload).map_err(|_| {
            StringCodecError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame was not valid utf-8",
            ))
        })?;
        Ok(Some(frame.to_owned()))
    }
}

impl<T: AsRef<str>> Encoder<T> for StringCodec {
    type Error = StringCodecError;

    fn encode(&mut self, frame: T, dst: &mut BytesMut) -> Result<(), StringCodecError> {
        let frame = frame.as_ref();
        if frame.len() > self.max_frame_length {
            return Err(StringCodecError::FrameTooLong);
        }
        dst.reserve(LEN_PREFIX + frame.len());
        dst.put_u16(frame.len() as u16);
        dst.put_slice(frame.as_bytes());
        Ok(())
    }
}

#[derive(Debug)]
pub enum StringCodecError {
    /// A frame's length prefix exceeded the configured maximum.
    FrameTooLong,
    Io(io::Error),
}

impl fmt::Display for StringCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringCodecError::FrameTooLong => write!(f, "frame length exceeds maximum"),
            StringCodecError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StringCodecError {
    fn from(err: io::Error) -> Self {
        StringCodecError::Io(err)
    }
}

impl std::error::Error for StringCodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StringCodecError::FrameTooLong => None,
            StringCodecError::Io(err) => Some(err),
        }
    }
}
