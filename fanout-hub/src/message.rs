//! Text shaping for chat lines: what comes in off a frame and what goes out in a batch.

use std::sync::Arc;

const LINE_TERMINATOR: char = '\n';

/// Decodes a frame payload, collapses embedded newlines to spaces and trims
/// surrounding whitespace.
pub fn normalize(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .replace(LINE_TERMINATOR, " ")
        .trim()
        .to_string()
}

/// Prefixes a message body with its sender's display name.
pub fn chat_line(name: &str, body: &str) -> String {
    format!("{name}: {body}")
}

/// Joins queued lines into one frame body, each line followed by a terminator.
pub fn frame_batch<I>(first: Arc<str>, rest: I) -> String
where
    I: IntoIterator<Item = Arc<str>>,
{
    let mut batch = String::with_capacity(first.len() + 1);
    batch.push_str(&first);
    batch.push(LINE_TERMINATOR);
    for line in rest {
        batch.push_str(&line);
        batch.push(LINE_TERMINATOR);
    }
    batch
}
