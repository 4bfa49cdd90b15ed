//! Worker reader task.
//!
//! Reads newline-delimited JSON from the worker's stdout through
//! [`FramedRead`] backed by [`WorkerCodec`], decodes each line with
//! [`parse_inbound_line`], and hands every message to a dispatch callback
//! in arrival order.
//!
//! The callback runs inline on the read loop, so it must not block. Lines
//! that fail to parse are logged and dropped; they never stop the loop,
//! which tolerates stray debug output interleaved on stdout.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::codec::WorkerCodec;
use crate::worker::protocol::{parse_inbound_line, WorkerMessage};

/// Why the reader loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The worker closed its stdout.
    Eof,
    /// The underlying stream failed.
    StreamError(String),
    /// The cancellation token fired.
    Cancelled,
}

/// Reader task. Frames `stdout` and dispatches each decoded message.
///
/// Returns when the stream reaches EOF, fails with an I/O error, or
/// `cancel` fires. On a stream error `cancel` is triggered so that the
/// process monitor force-terminates a worker whose stdout is unusable.
pub async fn run_reader<R, F>(stdout: R, mut dispatch: F, cancel: CancellationToken) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
    F: FnMut(WorkerMessage) + Send,
{
    let mut framed = FramedRead::new(stdout, WorkerCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("worker reader: cancellation received, stopping");
                return ReaderExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("worker reader: EOF detected");
                        return ReaderExit::Eof;
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "worker reader: stream error, stopping");
                        cancel.cancel();
                        return ReaderExit::StreamError(e.to_string());
                    }

                    Some(Ok(line)) => match parse_inbound_line(&line) {
                        Ok(Some(message)) => dispatch(message),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, raw_line = %line, "worker reader: parse error, skipping line");
                        }
                    },
                }
            }
        }
    }
}
