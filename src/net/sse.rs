//! Server-Sent Events (SSE) framing.
//!
//! Splits a byte stream into events. Payload interpretation (JSON deltas,
//! completion sentinels) is left to the caller.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project_lite::pin_project;

/// Payload OpenAI-compatible servers send as the final event.
pub const DONE_SENTINEL: &str = "[DONE]";

pin_project! {
    /// Consumes a stream of byte chunks and yields parsed SSE events.
    pub struct SseStream<S> {
        #[pin]
        byte_stream: S,
        buffer: String,
        pending_events: VecDeque<SseEvent>,
    }
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether this event is the completion sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

impl<S, E> SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    pub fn new(byte_stream: S) -> Self {
        Self {
            byte_stream,
            buffer: String::new(),
            pending_events: VecDeque::new(),
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending_events.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let chunk = match ready!(this.byte_stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    // Connection closed; whatever is buffered is the last event.
                    let tail = std::mem::take(this.buffer);
                    return Poll::Ready(parse_block(&tail).map(Ok));
                }
            };

            let text = String::from_utf8_lossy(&chunk);
            if text.contains('\r') {
                this.buffer.push_str(&text.replace("\r\n", "\n"));
            } else {
                this.buffer.push_str(&text);
            }
            split_complete(this.buffer, this.pending_events);
        }
    }
}

/// Move every blank-line-terminated block out of `buffer`.
fn split_complete(buffer: &mut String, out: &mut VecDeque<SseEvent>) {
    while let Some(end) = buffer.find("\n\n") {
        let event = parse_block(&buffer[..end]);
        buffer.replace_range(..end + 2, "");
        out.extend(event);
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent {
        event: None,
        data: String::new(),
        id: None,
    };

    for line in block.lines() {
        // Comment lines (": keep-alive") have an empty field name.
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => {
                if !event.data.is_empty() {
                    event.data.push('\n');
                }
                event.data.push_str(value);
            }
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if event.data.is_empty() && event.event.is_none() && event.id.is_none() {
        return None;
    }
    Some(event)
}
