//! Turns a byte stream of frames into transcript and aggregate updates.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use tutor_protocol::{AggregatedResponse, Frame, FrameDecoder, FrameEvent};

use crate::error::{Error, Result};
use crate::transcript::{Slot, Transcript};

/// The caller-owned state a stream writes into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub transcript: Transcript,
    pub aggregate: AggregatedResponse,
}

/// Whether to keep feeding the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A `done` frame was applied; later bytes are ignored.
    Done,
}

/// How a consumed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The terminal `done` frame arrived.
    Done,
    /// The transport closed without a `done` frame.
    Eof,
}

/// Incremental frame interpreter for one request.
///
/// Holds the decode buffer and the assistant slot. The slot is allocated
/// lazily on the first frame that writes to the transcript, unless the
/// caller reserved one up front with [`StreamConsumer::with_slot`].
#[derive(Debug, Default)]
pub struct StreamConsumer {
    decoder: FrameDecoder,
    slot: Option<Slot>,
    finished: bool,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(slot: Slot) -> Self {
        Self {
            slot: Some(slot),
            ..Self::default()
        }
    }

    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one read from the transport and apply every frame it completes,
    /// in order.
    pub fn push(&mut self, bytes: &[u8], state: &mut SessionState) -> Flow {
        if self.finished {
            return Flow::Done;
        }
        for frame in self.decoder.push(bytes) {
            if self.apply(&frame, state) == Flow::Done {
                self.finished = true;
                return Flow::Done;
            }
        }
        Flow::Continue
    }

    /// The transport closed. Applies a trailing unterminated frame if there
    /// is one.
    pub fn finish(&mut self, state: &mut SessionState) -> Completion {
        if !self.finished
            && let Some(frame) = self.decoder.finish()
            && self.apply(&frame, state) == Flow::Done
        {
            self.finished = true;
        }
        if self.finished {
            Completion::Done
        } else {
            Completion::Eof
        }
    }

    /// Apply one decoded frame.
    pub fn apply(&mut self, frame: &Frame, state: &mut SessionState) -> Flow {
        let Some(event) = frame.kind() else {
            debug!(event = ?frame.event, "skipping frame without a known event");
            return Flow::Continue;
        };

        match event {
            FrameEvent::Ready => {
                debug!(info = %frame.data, "stream ready");
            }
            FrameEvent::Chunk => {
                state.aggregate.apply_chunk(parse_chunk(&frame.data));
                let text = state.aggregate.display_text();
                let slot = self.ensure_slot(&mut state.transcript);
                state.transcript.write(slot, text);
            }
            FrameEvent::Error => {
                warn!(message = %frame.data, "error frame");
                let slot = self.ensure_slot(&mut state.transcript);
                state.transcript.write(slot, format!("Error: {}", frame.data));
            }
            FrameEvent::Done => return Flow::Done,
        }
        Flow::Continue
    }

    fn ensure_slot(&mut self, transcript: &mut Transcript) -> Slot {
        *self
            .slot
            .get_or_insert_with(|| transcript.reserve_assistant())
    }
}

/// Drive a whole byte stream into `state`.
///
/// Only a transport read error is returned as `Err`; error frames and
/// malformed chunks are written into the transcript instead.
pub async fn consume<S, B, E>(body: S, state: &mut SessionState) -> Result<Completion>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut consumer = StreamConsumer::new();
    let mut body = std::pin::pin!(body);
    while let Some(read) = body.next().await {
        let bytes = read.map_err(|err| Error::Stream(err.to_string()))?;
        if consumer.push(bytes.as_ref(), state) == Flow::Done {
            return Ok(Completion::Done);
        }
    }
    Ok(consumer.finish(state))
}

fn parse_chunk(data: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            warn!(payload = %other, "chunk payload is not an object; treating as empty");
            Map::new()
        }
        Err(err) => {
            warn!(error = %err, "malformed chunk payload; treating as empty");
            Map::new()
        }
    }
}
