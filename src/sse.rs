//! Line-delimited `data:` stream processing for streaming chat completions.
//!
//! The gateway answers a streaming request with newline-separated lines.  Lines
//! that start with `data: ` carry either a JSON chunk or the `[DONE]` sentinel;
//! every other line is ignored.  A payload that is not valid JSON is skipped so
//! keep-alive and comment lines never abort a stream.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{STREAM_BYTES, STREAM_CHUNKS, STREAM_SKIPPED_LINES};
use crate::types::ChatCompletionChunk;
use crate::Result;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// What a single line of the body means.
#[derive(Debug, PartialEq)]
enum Line {
    Chunk(ChatCompletionChunk),
    Done,
    Ignored,
}

/// Process a stream of bytes into a stream of completion chunks.
///
/// The returned stream ends at `[DONE]`, at the end of the body, or right after
/// yielding a transport error.  Lines may be split arbitrarily across network
/// frames.
pub fn process_data_lines<S>(byte_stream: S) -> impl Stream<Item = Result<ChatCompletionChunk>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    // Bytes, not a String, so a multi-byte character split across frames survives.
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, false),
        move |(mut stream, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                while let Some(line) = take_line(&mut buffer) {
                    match parse_line(&line) {
                        Line::Chunk(chunk) => return Some((Ok(chunk), (stream, buffer, false))),
                        Line::Done => return None,
                        Line::Ignored => {}
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A final line without a trailing newline still counts.
                        let line = std::mem::take(&mut buffer);
                        return match parse_line(&line) {
                            Line::Chunk(chunk) => Some((Ok(chunk), (stream, buffer, true))),
                            Line::Done | Line::Ignored => None,
                        };
                    }
                }
            }
        },
    )
}

/// Removes and returns the first complete line (without its terminator).
fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let newline = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=newline).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

fn parse_line(line: &[u8]) -> Line {
    let Ok(line) = std::str::from_utf8(line) else {
        STREAM_SKIPPED_LINES.click();
        tracing::debug!("skipping line that is not UTF-8");
        return Line::Ignored;
    };
    let Some(payload) = line.strip_prefix(DATA_PREFIX).map(str::trim) else {
        return Line::Ignored;
    };
    if payload == DONE_SENTINEL {
        return Line::Done;
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => {
            STREAM_CHUNKS.click();
            Line::Chunk(chunk)
        }
        Err(err) => {
            STREAM_SKIPPED_LINES.click();
            tracing::debug!(error = %err, "skipping unparseable data line");
            Line::Ignored
        }
    }
}
