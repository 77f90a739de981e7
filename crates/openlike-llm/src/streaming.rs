use std::collections::VecDeque;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

use openlike_core::error::{OpenlikeError, Result};

/// Parse a raw SSE byte stream into individual events.
/// SSE format: `event: <type>\ndata: <json>\n\n`
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed text into the parser and extract complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        // Split on double newlines (event boundaries)
        while let Some(pos) = self.buffer.find("\n\n") {
            let block = self.buffer[..pos].to_string();
            self.buffer = self.buffer[pos + 2..].to_string();
            events.extend(parse_block(&block));
        }

        events
    }

    /// Flush whatever remains once the underlying body has ended.
    ///
    /// A body that never contained an event boundary (for example a plain
    /// JSON error page) comes back as a single event with the raw text.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        parse_block(&rest).or_else(|| {
            Some(SseEvent {
                event_type: None,
                data: rest.trim().to_string(),
            })
        })
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(val) = line.strip_prefix("event: ") {
            event_type = Some(val.to_string());
        } else if let Some(val) = line.strip_prefix("data: ") {
            data_lines.push(val.to_string());
        } else if let Some(val) = line.strip_prefix("data:") {
            // data with no space after colon
            data_lines.push(val.to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}

/// A stream of SSE events from raw bytes.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    utf8_tail: Vec<u8>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            utf8_tail: Vec::new(),
            finished: false,
        }
    }
}

/// Decode as much UTF-8 as possible, keeping an incomplete trailing sequence.
fn decode_utf8(tail: &mut Vec<u8>, bytes: &[u8]) -> String {
    tail.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(tail) {
        Ok(_) => tail.len(),
        // Invalid bytes, not a split sequence
        Err(e) if e.error_len().is_some() => tail.len(),
        Err(e) => e.valid_up_to(),
    };
    let text = String::from_utf8_lossy(&tail[..valid]).into_owned();
    tail.drain(..valid);
    text
}

impl<S> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            // Return pending events first
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let text = decode_utf8(&mut this.utf8_tail, &bytes);
                    this.pending.extend(this.parser.feed(&text));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(OpenlikeError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.pending.extend(this.parser.finish());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Blocking counterpart of [`SseStream`] over any reader.
pub struct SseReader<R> {
    inner: R,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    utf8_tail: Vec<u8>,
    finished: bool,
}

impl<R: Read> SseReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            utf8_tail: Vec::new(),
            finished: false,
        }
    }
}

impl<R: Read> Iterator for SseReader<R> {
    type Item = Result<SseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }

            match self.inner.read(&mut buf) {
                Ok(0) => {
                    self.finished = true;
                    self.pending.extend(self.parser.finish());
                }
                Ok(n) => {
                    let text = decode_utf8(&mut self.utf8_tail, &buf[..n]);
                    self.pending.extend(self.parser.feed(&text));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(OpenlikeError::LlmStream(e.to_string())));
                }
            }
        }
    }
}
