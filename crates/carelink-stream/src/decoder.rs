use carelink_core::StreamEvent;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
const THOUGHT_OPEN: &str = "<think>";
const THOUGHT_CLOSE: &str = "</think>";

/// Reconstructs typed events and visible text from a chunked reply stream.
///
/// Chunk boundaries are arbitrary: they may split a UTF-8 codepoint, a line,
/// or a JSON object. One decoder instance is one-shot — a new decode uses a
/// fresh instance.
pub struct StreamTokenDecoder {
    carry: Vec<u8>,
    line_buf: String,
    raw: String,
    visible: String,
    finished: bool,
}

impl StreamTokenDecoder {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            line_buf: String::new(),
            raw: String::new(),
            visible: String::new(),
            finished: false,
        }
    }

    /// Consume one chunk, returning the events it completed, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        self.decode_chunk(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            self.process_line(&line, &mut events);
            if self.finished {
                break;
            }
        }
        events
    }

    /// The accumulated reply with hidden thought segments stripped.
    pub fn visible_text(&self) -> &str {
        &self.visible
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Append the chunk's decodable prefix to the line buffer, carrying an
    /// incomplete multi-byte tail over to the next chunk.
    fn decode_chunk(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(s) => {
                    self.line_buf.push_str(s);
                    self.carry.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&self.carry[..valid]) {
                        self.line_buf.push_str(s);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            self.line_buf.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            self.carry.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        let Some(payload) = line.trim().strip_prefix(DATA_PREFIX) else {
            return;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            self.finished = true;
            events.push(StreamEvent::Done);
            return;
        }

        let frame: StreamEvent = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("dropping unparseable frame: {err}");
                return;
            }
        };

        match &frame {
            StreamEvent::Token { content } => {
                self.raw.push_str(content);
                self.visible = scrub_thoughts(&self.raw);
            }
            StreamEvent::Error { message } => {
                self.raw.push_str("\n[error: ");
                self.raw.push_str(message);
                self.raw.push_str("]\n");
                self.visible = scrub_thoughts(&self.raw);
            }
            StreamEvent::Done => {
                self.finished = true;
            }
            StreamEvent::Status { .. } | StreamEvent::Metadata { .. } => {}
            StreamEvent::Unrecognized => {
                tracing::debug!("unrecognized frame type in: {payload}");
            }
        }
        events.push(frame);
    }
}

impl Default for StreamTokenDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip every complete `<think>...</think>` region; an unterminated opening
/// tag truncates the result at the tag so partial thoughts are never revealed.
fn scrub_thoughts(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find(THOUGHT_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + THOUGHT_OPEN.len()..];
        match after.find(THOUGHT_CLOSE) {
            Some(close) => rest = &after[close + THOUGHT_CLOSE.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}
