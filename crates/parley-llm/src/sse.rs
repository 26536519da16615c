//! Server-sent-event framing shared by the streaming adapters.
//!
//! Network chunks do not respect line boundaries, so bytes are buffered until
//! a `\n` arrives. Lines are decoded individually, which keeps multi-byte
//! characters that straddle two chunks intact.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;

use futures::future::ready;
use futures::stream::{self, Stream, StreamExt};
use parley_core::{ChatError, Provider};
use tracing::{debug, warn};

use crate::client::FragmentStream;

/// Terminator frame sent by OpenAI-compatible streams.
pub const DONE: &str = "[DONE]";

type Body<B, E> = Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>;

struct LineReader<B, E> {
    body: Body<B, E>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<B, E> LineReader<B, E> {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.ready.push_back(decode_line(&line));
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.ready.push_back(decode_line(&rest));
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Splits a byte stream into text lines, flushing an unterminated last line.
///
/// A body error is yielded once as `ChatError::Transport` and ends the stream.
pub fn lines<S, B, E>(body: S) -> impl Stream<Item = Result<String, ChatError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let reader = LineReader {
        body: Box::pin(body),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(line) = reader.ready.pop_front() {
                return Some((Ok(line), reader));
            }
            if reader.finished {
                return None;
            }
            match reader.body.next().await {
                Some(Ok(chunk)) => reader.push(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.finished = true;
                    reader.buffer.clear();
                    return Some((Err(ChatError::Transport(e.to_string())), reader));
                }
                None => {
                    reader.finished = true;
                    reader.flush();
                }
            }
        }
    })
}

/// Returns the payload of a `data:` line, or `None` for any other line.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
}

/// Yields the payload of each `data:` line until the `[DONE]` terminator.
pub fn data_frames<S, B, E>(body: S) -> impl Stream<Item = Result<String, ChatError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    lines(body)
        .filter_map(|line| {
            ready(match line {
                Ok(line) => data_payload(&line).map(|data| Ok(data.to_string())),
                Err(e) => Some(Err(e)),
            })
        })
        .take_while(|frame| ready(!matches!(frame, Ok(data) if data.as_str() == DONE)))
}

/// Why a frame produced no fragment.
pub(crate) enum FrameError {
    /// Not the expected JSON shape; skipped.
    Malformed(serde_json::Error),
    /// The vendor reported a failure inside the stream; fatal.
    Vendor(ChatError),
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::Malformed(err)
    }
}

/// Extracts the fragment text from one frame payload.
pub(crate) type Extract = fn(&str) -> Result<Option<String>, FrameError>;

/// Maps frames to fragments, skipping malformed frames and empty deltas.
pub(crate) fn fragment_stream<S>(provider: Provider, frames: S, extract: Extract) -> FragmentStream
where
    S: Stream<Item = Result<String, ChatError>> + Send + 'static,
{
    let fragments = frames.filter_map(move |frame| {
        let item = match frame {
            Err(e) => Some(Err(e)),
            Ok(data) => match extract(&data) {
                Ok(Some(text)) if !text.is_empty() => {
                    debug!(provider = provider.tag(), len = text.len(), "fragment");
                    Some(Ok(text))
                }
                Ok(_) => None,
                Err(FrameError::Malformed(e)) => {
                    warn!(provider = provider.tag(), "Skipping malformed {} frame: {}", provider, e);
                    None
                }
                Err(FrameError::Vendor(e)) => Some(Err(e)),
            },
        };
        ready(item)
    });

    Box::pin(stop_after_error(fragments))
}

/// Ends the stream right after the first error it yields.
pub fn stop_after_error<S, T>(stream: S) -> impl Stream<Item = Result<T, ChatError>> + Send
where
    S: Stream<Item = Result<T, ChatError>> + Send,
    T: Send,
{
    stream.scan(false, |failed, item| {
        if *failed {
            return ready(None);
        }
        *failed = item.is_err();
        ready(Some(item))
    })
}
