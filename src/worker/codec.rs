//! NDJSON codec for the worker's standard streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! runaway worker cannot make the bridge buffer an unbounded line. The
//! codec's internal buffer is the partial-line buffer: bytes after the last
//! newline stay there until the rest of the line arrives, however the
//! stream happens to be chunked. A trailing `\r` is stripped, so both
//! `\n` and `\r\n` terminators are accepted.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use taqeem_bridge::worker::codec::WorkerCodec;
//!
//! let lines = FramedRead::new(child_stdout, WorkerCodec::new());
//! ```

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum inbound line length accepted from the worker: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for the worker protocol.
///
/// # Decoder
///
/// Lines longer than [`MAX_LINE_BYTES`] and lines that are not valid UTF-8
/// are logged and dropped here, and decoding continues with whatever is
/// already buffered. They must not surface as decoder errors: `FramedRead`
/// pauses decoding after one until new bytes arrive. Only I/O errors are
/// returned, as [`AppError::Io`].
#[derive(Debug)]
pub struct WorkerCodec(LinesCodec);

impl WorkerCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for WorkerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WorkerCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`, or `Ok(None)` while the
    /// buffered bytes contain no newline yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Ok(line) => return Ok(line),
                Err(err) => drop_line(err)?,
            }
        }
    }

    /// Flush whatever remains when the worker closes its stdout.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Ok(line) => return Ok(line),
                Err(err) => drop_line(err)?,
            }
        }
    }
}

/// Log a recoverable line error; the offending bytes are already consumed.
fn drop_line(err: LinesCodecError) -> Result<()> {
    match map_codec_error(err) {
        AppError::Protocol(reason) => {
            warn!(%reason, "worker codec: dropping line");
            Ok(())
        }
        other => Err(other),
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) if io_err.kind() == ErrorKind::InvalidData => {
            AppError::Protocol(format!("line is not valid utf-8: {io_err}"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
