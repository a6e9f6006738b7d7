//! Wire framing for the tutor event stream.
//!
//! A frame is the literal text `event: <name>\ndata: <payload>\n\n`. The blank
//! line is the only frame terminator, so a reader fed arbitrary network reads
//! must hold on to everything after the last terminator until more bytes
//! arrive. [`FrameDecoder`] does that buffering.

use std::borrow::Cow;

use serde_json::Value;
use tracing::{debug, warn};

const TERMINATOR: &[u8] = b"\n\n";
const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";

/// The event vocabulary understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEvent {
    /// Stream opened; carries diagnostic info only.
    Ready,
    /// One JSON payload to merge into the aggregate.
    Chunk,
    /// A human-readable error message.
    Error,
    /// Terminal marker.
    Done,
}

impl FrameEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameEvent::Ready => "ready",
            FrameEvent::Chunk => "chunk",
            FrameEvent::Error => "error",
            FrameEvent::Done => "done",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ready" => Some(FrameEvent::Ready),
            "chunk" => Some(FrameEvent::Chunk),
            "error" => Some(FrameEvent::Error),
            "done" => Some(FrameEvent::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for FrameEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded `event` + `data` unit.
///
/// `event` is `None` when the frame had no `event:` line; consumers skip such
/// frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn new(event: FrameEvent, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.as_str().to_string()),
            data: data.into(),
        }
    }

    /// Build a frame whose data is `payload` in its wire form: strings are
    /// carried raw, everything else as compact JSON.
    pub fn json(event: FrameEvent, payload: &Value) -> Self {
        Self::new(event, payload_text(payload))
    }

    /// The recognized event, if any.
    pub fn kind(&self) -> Option<FrameEvent> {
        self.event.as_deref().and_then(FrameEvent::parse)
    }

    /// Serialize to the wire form. Always a single `data:` line.
    pub fn encode(&self) -> Vec<u8> {
        let data = single_line(&self.data);
        let mut out = String::with_capacity(data.len() + 32);
        if let Some(event) = &self.event {
            out.push_str(EVENT_PREFIX);
            out.push(' ');
            out.push_str(&single_line(event));
            out.push('\n');
        }
        out.push_str(DATA_PREFIX);
        out.push(' ');
        out.push_str(&data);
        out.push_str("\n\n");
        out.into_bytes()
    }
}

/// Encode a frame for `event` carrying `data`.
///
/// `Value::String` payloads are written as-is; any other value is written as
/// compact JSON.
pub fn encode_frame(event: &str, data: &Value) -> Vec<u8> {
    Frame {
        event: Some(event.to_string()),
        data: payload_text(data),
    }
    .encode()
}

/// Result of splitting a buffer into frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Every complete frame, in buffer order.
    pub frames: Vec<Frame>,
    /// Trailing bytes after the last terminator.
    pub remainder: Vec<u8>,
}

/// Split `bytes` on the frame terminator.
///
/// Segments that contain nothing but whitespace (e.g. stray blank lines) do
/// not produce frames.
pub fn decode_buffer(bytes: &[u8]) -> Decoded {
    let mut frames = Vec::new();
    let mut rest = bytes;

    while let Some(pos) = find_terminator(rest) {
        let (raw, tail) = rest.split_at(pos);
        if !raw.iter().all(u8::is_ascii_whitespace) {
            frames.push(decode_frame(&String::from_utf8_lossy(raw)));
        }
        rest = &tail[TERMINATOR.len()..];
    }

    Decoded {
        frames,
        remainder: rest.to_vec(),
    }
}

/// Decode the text of a single frame (without its terminator).
///
/// The last `event:` line wins. `data:` lines are trimmed and joined with
/// `\n`. Any other line is ignored.
pub fn decode_frame(text: &str) -> Frame {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
            data.push(rest.trim());
        }
    }

    Frame {
        event,
        data: data.join("\n"),
    }
}

/// Default cap on bytes buffered for a single unfinished frame.
pub const DEFAULT_MAX_PENDING: usize = 8 * 1024 * 1024;

/// Incremental decoder for a byte stream of frames.
///
/// Reads may be split anywhere, including inside the terminator or inside a
/// multi-byte UTF-8 sequence; nothing is decoded until its terminator has
/// arrived. Each byte is searched for a terminator once.
///
/// A frame that grows past the pending limit is discarded up to its
/// terminator; decoding resumes with the next frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no terminator.
    scanned: usize,
    max_pending: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_pending,
            discarding: false,
        }
    }

    /// Append `chunk` and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        // A terminator may straddle the previous read boundary.
        let from = self.scanned.saturating_sub(TERMINATOR.len() - 1);
        let Some(pos) = find_terminator(&self.buffer[from..]) else {
            self.scanned = self.buffer.len();
            self.enforce_limit();
            return Vec::new();
        };

        if self.discarding {
            self.buffer.drain(..from + pos + TERMINATOR.len());
            self.discarding = false;
        }
        let Decoded { frames, remainder } = decode_buffer(&self.buffer);
        self.buffer = remainder;
        self.scanned = self.buffer.len();
        self.enforce_limit();
        frames
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Flush at end of stream. Returns the trailing frame only if the peer
    /// closed without the final blank line and the fragment names an event.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        let frame = decode_frame(&String::from_utf8_lossy(&rest));
        if frame.event.is_none() {
            debug!(bytes = rest.len(), "dropping unterminated fragment at end of stream");
            return None;
        }
        Some(frame)
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() <= self.max_pending {
            return;
        }
        if !self.discarding {
            warn!(
                bytes = self.buffer.len(),
                limit = self.max_pending,
                "frame exceeds pending limit; discarding it"
            );
        }
        // Keep the tail that could be the start of a terminator.
        let keep = TERMINATOR.len() - 1;
        self.buffer.drain(..self.buffer.len() - keep);
        self.scanned = self.buffer.len();
        self.discarding = true;
    }
}

fn find_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// Line breaks inside a payload would split it across lines (or frames).
fn single_line(text: &str) -> Cow<'_, str> {
    if !text.contains(['\n', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut in_break = false;
    for ch in text.chars() {
        if ch == '\n' || ch == '\r' {
            if !in_break {
                out.push(' ');
            }
            in_break = true;
        } else {
            out.push(ch);
            in_break = false;
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn frame(event: &str, data: &str) -> Frame {
        Frame {
            event: Some(event.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn encodes_literal_wire_form() {
        let bytes = encode_frame("chunk", &json!({"title": "Phishing"}));
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            "event: chunk\ndata: {\"title\":\"Phishing\"}\n\n"
        );
    }

    #[test]
    fn plain_strings_are_not_json_quoted() {
        let bytes = encode_frame("error", &json!("Backend error 500: boom"));
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            "event: error\ndata: Backend error 500: boom\n\n"
        );
    }

    #[test]
    fn multiline_strings_stay_on_one_data_line() {
        let bytes = encode_frame("error", &json!("line one\r\n\r\nline two\nthree"));
        let decoded = decode_buffer(&bytes);
        assert_eq!(
            decoded.frames,
            vec![frame("error", "line one line two three")]
        );
        assert!(decoded.remainder.is_empty());
    }

    #[test]
    fn decoder_joins_multiple_data_lines() {
        let decoded = decode_buffer(b"event: chunk\ndata: {\"a\":\ndata:  1}\n\n");
        assert_eq!(decoded.frames, vec![frame("chunk", "{\"a\":\n1}")]);
    }

    #[test]
    fn decoder_ignores_unknown_lines_and_keeps_remainder() {
        let decoded = decode_buffer(b": comment\nid: 7\nevent: ready \ndata: x\n\nevent: do");
        assert_eq!(decoded.frames, vec![frame("ready", "x")]);
        assert_eq!(decoded.remainder, b"event: do".to_vec());
    }

    #[test]
    fn frame_without_event_line_decodes_with_no_event() {
        let decoded = decode_buffer(b"data: orphan\n\n");
        assert_eq!(
            decoded.frames,
            vec![Frame {
                event: None,
                data: "orphan".to_string()
            }]
        );
        assert_eq!(decoded.frames[0].kind(), None);
    }

    #[test]
    fn stray_blank_lines_produce_no_frames() {
        let decoded = decode_buffer(b"\n\n\n\nevent: done\ndata: {}\n\n\n\n");
        assert_eq!(decoded.frames, vec![frame("done", "{}")]);
    }

    #[test]
    fn decoder_waits_for_split_terminator() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"event: done\ndata: {}\n").is_empty());
        assert_eq!(decoder.pending(), b"event: done\ndata: {}\n");
        assert_eq!(decoder.push(b"\n"), vec![frame("done", "{}")]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn decoder_survives_split_utf8_sequence() {
        let bytes = encode_frame("chunk", &json!({"title": "Hameçonnage 釣り"}));
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &bytes {
            frames.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(
            frames,
            vec![frame("chunk", "{\"title\":\"Hameçonnage 釣り\"}")]
        );
    }

    #[test]
    fn finish_flushes_unterminated_named_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"event: done\ndata: {}").is_empty());
        assert_eq!(decoder.finish(), Some(frame("done", "{}")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn finish_drops_anonymous_fragment() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: half");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn large_frame_in_tiny_reads_decodes_once_complete() {
        let payload = "x".repeat(64 * 1024);
        let wire = encode_frame("chunk", &Value::String(payload.clone()));
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in wire.chunks(3) {
            frames.extend(decoder.push(byte));
        }
        assert_eq!(frames, vec![frame("chunk", &payload)]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn oversized_frame_is_skipped_and_decoding_resumes() {
        let mut decoder = FrameDecoder::with_max_pending(32);
        assert!(decoder.push(b"event: chunk\ndata: ").is_empty());
        assert!(decoder.push(&[b'x'; 40]).is_empty());
        assert!(decoder.pending().len() <= 32);
        assert!(decoder.push(&[b'y'; 40]).is_empty());

        let frames = decoder.push(b"yyy\n\nevent: done\ndata: {}\n\n");
        assert_eq!(frames, vec![frame("done", "{}")]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn oversized_frame_split_at_its_terminator_is_skipped() {
        let mut decoder = FrameDecoder::with_max_pending(8);
        assert!(decoder.push(b"event: chunk\ndata: too long\n").is_empty());
        let frames = decoder.push(b"\nevent: ready\ndata: {}\n\n");
        assert_eq!(frames, vec![frame("ready", "{}")]);
    }

    #[test]
    fn finish_drops_a_discarded_frame() {
        let mut decoder = FrameDecoder::with_max_pending(8);
        decoder.push(b"event: chunk\ndata: too long");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn event_names_round_trip() {
        for event in [
            FrameEvent::Ready,
            FrameEvent::Chunk,
            FrameEvent::Error,
            FrameEvent::Done,
        ] {
            assert_eq!(FrameEvent::parse(event.as_str()), Some(event));
            assert_eq!(Frame::new(event, "x").kind(), Some(event));
        }
        assert_eq!(FrameEvent::parse("message"), None);
    }

    fn json_payload() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,16}".prop_map(Value::from),
            "\\PC{0,8}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
        .prop_filter("strings are carried raw", |value| !value.is_string())
    }

    fn frame_sequence() -> impl Strategy<Value = Vec<(String, Value)>> {
        prop::collection::vec(("[a-z_]{1,12}", json_payload()), 1..6)
    }

    proptest! {
        #[test]
        fn encoded_frame_decodes_to_itself(event in "[a-z_]{1,12}", payload in json_payload()) {
            let decoded = decode_buffer(&encode_frame(&event, &payload));
            prop_assert_eq!(decoded.frames, vec![frame(&event, &payload.to_string())]);
            prop_assert!(decoded.remainder.is_empty());
        }

        #[test]
        fn chunking_does_not_change_decoded_frames(
            sequence in frame_sequence(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12),
        ) {
            let wire: Vec<u8> = sequence
                .iter()
                .flat_map(|(event, payload)| encode_frame(event, payload))
                .collect();
            let whole = decode_buffer(&wire).frames;

            let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(wire.len() + 1)).collect();
            offsets.push(0);
            offsets.push(wire.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut decoder = FrameDecoder::new();
            let mut incremental = Vec::new();
            for bounds in offsets.windows(2) {
                incremental.extend(decoder.push(&wire[bounds[0]..bounds[1]]));
            }

            prop_assert_eq!(incremental, whole.clone());
            prop_assert_eq!(whole.len(), sequence.len());
            prop_assert!(decoder.pending().is_empty());
        }
    }
}
