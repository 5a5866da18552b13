//! Streaming response parsing for chat-completions endpoints.
//!
//! The body is a line-oriented event stream: `data: {json}` records, blank
//! separator lines, and a final `data: [DONE]`. Transport chunks do not line
//! up with record boundaries, so bytes are buffered until a full line exists.

use serde_json::Value;

/// Literal payload that ends the stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Classification of one line of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'a> {
    /// Blank line, comment, `event:`/`id:` field, or anything else without data.
    Ignored,
    /// The `[DONE]` terminator.
    Done,
    /// JSON payload of a `data:` line.
    Data(&'a str),
}

/// Classify one line (without its trailing newline).
pub fn parse_record(line: &str) -> Record<'_> {
    let line = line.trim_end_matches('\r');
    let Some(rest) = line.strip_prefix("data:") else {
        return Record::Ignored;
    };
    let payload = rest.trim();
    if payload.is_empty() {
        Record::Ignored
    } else if payload == DONE_MARKER {
        Record::Done
    } else {
        Record::Data(payload)
    }
}

/// Reassembles lines from arbitrary byte chunks.
///
/// Works on bytes, so a multi-byte UTF-8 character split across two chunks
/// is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// The unterminated tail left when the body ends, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Pull the text fragments out of one streamed record.
///
/// `choices[0].delta.content` is either a string or an array of parts; parts
/// are strings or objects with a `text` field. Empty fragments are dropped.
/// A record with no content (e.g. the opening role-only delta) yields nothing.
pub fn extract_deltas(payload: &str) -> Result<Vec<String>, serde_json::Error> {
    let json: Value = serde_json::from_str(payload)?;
    let content = &json["choices"][0]["delta"]["content"];
    Ok(text_fragments(content))
}

/// Pull the reply out of a complete (non-streaming) response body.
///
/// Returns `None` when `choices[0].message.content` is missing or not text.
pub fn extract_message_content(body: &Value) -> Option<String> {
    let content = body.get("choices")?.get(0)?.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(_) => Some(text_fragments(content).concat()),
        _ => None,
    }
}

fn text_fragments(content: &Value) -> Vec<String> {
    match content {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) => part.get("text").and_then(Value::as_str),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// What the decoder found in the bytes fed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// Turns raw body chunks into ordered deltas.
///
/// Malformed records are counted and skipped; one corrupt line must not end
/// an otherwise healthy stream. Nothing is produced after `Done`.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    lines: LineBuffer,
    done: bool,
    skipped: usize,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let lines = self.lines.push(chunk);
        self.decode_lines(lines)
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let tail = self.lines.finish().into_iter().collect();
        self.decode_lines(tail)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of malformed records skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_lines(&mut self, lines: Vec<String>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in lines {
            if self.done {
                break;
            }
            match parse_record(&line) {
                Record::Ignored => {}
                Record::Done => {
                    self.done = true;
                    events.push(StreamEvent::Done);
                }
                Record::Data(payload) => match extract_deltas(payload) {
                    Ok(deltas) => events.extend(deltas.into_iter().map(StreamEvent::Delta)),
                    Err(e) => {
                        self.skipped += 1;
                        log::warn!(
                            "[LLM] Skipping malformed stream record: {} (raw: {})",
                            e,
                            preview(payload, 120)
                        );
                    }
                },
            }
        }
        events
    }
}

/// At most `max_chars` characters of `text`, cut on a char boundary.
fn preview(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(i, _)| &text[..i])
}

/// Strip markdown code fences from model output.
///
/// Models often wrap a rewritten passage in ``` fences despite being told not to.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_open = match trimmed.find('\n') {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        };
        let stripped = after_open.trim_end();
        if let Some(inner) = stripped.strip_suffix("```") {
            inner.trim().to_string()
        } else {
            after_open.trim().to_string()
        }
    } else {
        trimmed.to_string()
    }
}
