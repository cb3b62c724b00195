//! Output relay: republishes process output chunks as events.
//!
//! Chunks follow OS stream delivery. They are never line-buffered or merged,
//! so one read from the pipe becomes one event.

use crate::events::{EventChannel, EventHub};
use crate::process::ProcessRole;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

const READ_CAPACITY: usize = 1024;

/// Decodes whatever bytes are available into text.
///
/// An incomplete multi-byte sequence at the end of a read is held back until
/// the rest arrives; invalid sequences are replaced rather than failing the
/// stream.
#[derive(Debug, Default)]
pub struct Utf8ChunkCodec;

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let end = src.len() - truncated_tail(src);
        if end == 0 {
            return Ok(None);
        }

        let out = String::from_utf8_lossy(&src[..end]).into_owned();
        src.advance(end);
        Ok(Some(out))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let out = String::from_utf8_lossy(src).into_owned();
        src.clear();
        Ok(Some(out))
    }
}

/// Length of an incomplete multi-byte sequence at the very end of `bytes`.
///
/// Invalid bytes earlier in the buffer do not count; they are replaced when
/// decoded.
fn truncated_tail(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(invalid) => rest = &rest[e.valid_up_to() + invalid..],
            },
        }
    }
}

/// Republish every chunk read from `io` on `channel` until end of stream.
///
/// A read fault ends the relay for this stream: the pipe cannot be reopened
/// without restarting the process. The fault is published as one error event
/// rather than propagated, so the session that owns the process keeps running
/// and its commands still reach the debugger.
pub async fn relay<R: AsyncRead + Unpin>(io: R, hub: EventHub, channel: EventChannel) {
    let mut frames = FramedRead::with_capacity(io, Utf8ChunkCodec, READ_CAPACITY);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(text) => hub.publish(channel, text),
            Err(e) => {
                warn!(channel = channel.event_name(), error = %e, "Output relay read failed");
                hub.error(format!(
                    "{} stream closed after read failure: {e}",
                    channel.event_name()
                ));
                return;
            }
        }
    }

    debug!(channel = channel.event_name(), "Output relay reached end of stream");
}

/// Drain a tool's output into the log without publishing it.
///
/// Keeps the pipe empty so the process never blocks on a full buffer.
pub async fn drain_to_log<R: AsyncRead + Unpin>(io: R, role: ProcessRole) {
    let mut frames = FramedRead::with_capacity(io, Utf8ChunkCodec, READ_CAPACITY);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    debug!(target: "gdbridge::adapter", role = %role, "{line}");
                }
            }
            Err(e) => {
                warn!(role = %role, error = %e, "Failed to read tool output");
                return;
            }
        }
    }
}
