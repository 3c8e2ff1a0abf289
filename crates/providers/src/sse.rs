//! Incremental server-sent-event decoder.
//!
//! All three backends stream line-delimited event frames over one HTTP
//! response body. The decoder is pull-based: feed it raw byte chunks as
//! they arrive, get back every frame completed so far. Partial-line state
//! lives in the decoder, never in the adapter loop.

/// One complete SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The `event:` field, if the backend sends typed events.
    pub event: Option<String>,

    /// The `data:` payload. Multi-line data fields are joined with `\n`.
    pub data: String,
}

/// Decoder state: the unterminated tail of the byte stream plus the
/// fields of the frame currently being assembled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every frame completed by it.
    ///
    /// Invalid UTF-8 is replaced rather than erroring: a delta split
    /// mid-codepoint across TCP segments is the stream's problem to
    /// re-assemble at frame granularity, not ours to reject.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else if let Some(event) = line.strip_prefix("event:") {
                self.event = Some(event.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            }
            // unknown fields (id:, retry:) are ignored
        }
        frames
    }

    /// Flush a trailing frame when the stream closes without a final
    /// blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        // A dangling non-empty buffer line is an unterminated field; SSE
        // requires a newline before a field counts, so it is dropped.
        self.buffer.clear();
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(frame)
    }
}
