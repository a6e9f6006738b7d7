//! One chat session: at most one "ask" in flight, every write guarded by a
//! request generation.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tutor_protocol::{AggregatedResponse, AskRequest, ChatTurn, DEFAULT_USER_ID};

use crate::client::ProxyClient;
use crate::consumer::{Flow, SessionState, StreamConsumer};
use crate::error::{Error, Result};
use crate::transcript::{Slot, Transcript};

/// Written into an assistant slot that was still empty when its request was
/// aborted.
pub const ABORTED_TEXT: &str = "Request aborted.";

/// Lifecycle of the most recent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    /// Request issued, no response yet.
    Sending,
    /// Proxy accepted the request; frames are being applied.
    Streaming,
    Done,
    /// Transport failure; the slot carries the failure text.
    Failed,
    Aborted,
}

impl RequestPhase {
    pub fn is_loading(self) -> bool {
        matches!(self, RequestPhase::Sending | RequestPhase::Streaming)
    }

    pub fn is_settled(self) -> bool {
        matches!(
            self,
            RequestPhase::Done | RequestPhase::Failed | RequestPhase::Aborted
        )
    }
}

/// Per-session request fields other than the message and history.
#[derive(Debug, Clone, PartialEq)]
pub struct AskOptions {
    pub strict_mode: bool,
    pub user_id: String,
    pub ui_topic: Option<String>,
    pub optional_artifacts: Option<Value>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            user_id: DEFAULT_USER_ID.into(),
            ui_topic: None,
            optional_artifacts: None,
        }
    }
}

struct Shared {
    state: SessionState,
    generation: u64,
    phase: RequestPhase,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

struct ActiveRequest {
    generation: u64,
    slot: Slot,
    cancel: CancellationToken,
    task: JoinHandle<RequestPhase>,
}

/// Orchestrates asks against the proxy and owns the session state.
///
/// Requests run on spawned tasks, so `submit` must be called from within a
/// Tokio runtime. Dropping the session cancels the request in flight.
pub struct Session {
    client: ProxyClient,
    options: AskOptions,
    shared: Arc<Mutex<Shared>>,
    active: Option<ActiveRequest>,
}

impl Session {
    pub fn new(client: ProxyClient) -> Self {
        Self {
            client,
            options: AskOptions::default(),
            shared: Arc::new(Mutex::new(Shared {
                state: SessionState::default(),
                generation: 0,
                phase: RequestPhase::Idle,
            })),
            active: None,
        }
    }

    pub fn with_options(mut self, options: AskOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options_mut(&mut self) -> &mut AskOptions {
        &mut self.options
    }

    pub fn phase(&self) -> RequestPhase {
        self.shared.lock().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase().is_loading()
    }

    /// Generation of the most recent request (0 before the first one).
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn transcript(&self) -> Transcript {
        self.shared.lock().state.transcript.clone()
    }

    pub fn aggregate(&self) -> AggregatedResponse {
        self.shared.lock().state.aggregate.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Start an ask. Rejected while another request is loading.
    ///
    /// Returns the request's generation.
    pub fn submit(&mut self, text: &str) -> Result<u64> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if self.is_loading() {
            return Err(Error::Busy);
        }
        Ok(self.start(text))
    }

    /// Start an ask, aborting whatever request is in flight first.
    pub fn submit_superseding(&mut self, text: &str) -> Result<u64> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        self.abort();
        Ok(self.start(text))
    }

    /// Abort the request in flight, if any. Returns whether one was loading.
    ///
    /// After this returns, the aborted request can no longer touch session
    /// state. Its slot keeps whatever it already shows, or [`ABORTED_TEXT`]
    /// if it was still empty.
    pub fn abort(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.cancel.cancel();

        let mut shared = self.shared.lock();
        let was_loading = shared.is_current(active.generation) && shared.phase.is_loading();
        if !was_loading {
            return false;
        }

        // Retire the generation so late writes from the task are dropped.
        shared.generation += 1;
        shared.phase = RequestPhase::Aborted;
        if shared.state.transcript.content(active.slot) == Some("") {
            shared.state.transcript.write(active.slot, ABORTED_TEXT);
        }
        info!(generation = active.generation, "request aborted");
        true
    }

    /// Wait for the request in flight to settle and return its phase.
    ///
    /// Cancel-safe: if the returned future is dropped early the request stays
    /// active and can still be aborted.
    pub async fn join(&mut self) -> RequestPhase {
        let Some(active) = self.active.as_mut() else {
            return self.phase();
        };
        let joined = (&mut active.task).await;
        self.active = None;
        match joined {
            Ok(phase) => phase,
            Err(err) => {
                warn!(error = %err, "request task did not complete");
                self.phase()
            }
        }
    }

    /// Abort any request and forget the conversation.
    pub fn clear(&mut self) {
        self.abort();
        let mut shared = self.shared.lock();
        shared.generation += 1;
        shared.state = SessionState::default();
        shared.phase = RequestPhase::Idle;
    }

    fn start(&mut self, text: &str) -> u64 {
        let (generation, slot, request) = {
            let mut shared = self.shared.lock();
            shared.generation += 1;
            let history = shared.state.transcript.history();
            shared.state.transcript.push_user(text);
            shared.state.aggregate = AggregatedResponse::default();
            let slot = shared.state.transcript.reserve_assistant();
            shared.phase = RequestPhase::Sending;
            (shared.generation, slot, self.build_request(text, history))
        };
        debug!(generation, slot = slot.index(), "request started");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_request(
            self.client.clone(),
            Arc::clone(&self.shared),
            generation,
            slot,
            request,
            cancel.clone(),
        ));

        self.active = Some(ActiveRequest {
            generation,
            slot,
            cancel,
            task,
        });
        generation
    }

    fn build_request(&self, text: &str, history: Vec<ChatTurn>) -> AskRequest {
        AskRequest::new(text)
            .with_history(history)
            .with_strict_mode(self.options.strict_mode)
            .with_user_id(self.options.user_id.clone())
            .with_topic(self.options.ui_topic.clone())
            .with_artifacts(self.options.optional_artifacts.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Request task
// ---------------------------------------------------------------------------

async fn run_request(
    client: ProxyClient,
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    slot: Slot,
    request: AskRequest,
    cancel: CancellationToken,
) -> RequestPhase {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return RequestPhase::Aborted,
        opened = client.open(&request) => opened,
    };
    let response = match opened {
        Ok(response) => response,
        Err(err) => return settle_failed(&shared, generation, slot, &err),
    };

    {
        let mut guard = shared.lock();
        if !guard.is_current(generation) {
            return RequestPhase::Aborted;
        }
        guard.phase = RequestPhase::Streaming;
    }

    let mut consumer = StreamConsumer::with_slot(slot);
    let mut body = Box::pin(response.bytes_stream());
    loop {
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return RequestPhase::Aborted,
            read = body.next() => read,
        };

        match read {
            Some(Ok(bytes)) => {
                let mut guard = shared.lock();
                if !guard.is_current(generation) {
                    return RequestPhase::Aborted;
                }
                if consumer.push(&bytes, &mut guard.state) == Flow::Done {
                    guard.phase = RequestPhase::Done;
                    debug!(generation, "stream done");
                    return RequestPhase::Done;
                }
            }
            Some(Err(err)) => return settle_failed(&shared, generation, slot, &Error::from(err)),
            None => {
                let mut guard = shared.lock();
                if !guard.is_current(generation) {
                    return RequestPhase::Aborted;
                }
                let completion = consumer.finish(&mut guard.state);
                guard.phase = RequestPhase::Done;
                debug!(generation, ?completion, "stream closed");
                return RequestPhase::Done;
            }
        }
    }
}

fn settle_failed(
    shared: &Mutex<Shared>,
    generation: u64,
    slot: Slot,
    err: &Error,
) -> RequestPhase {
    let mut guard = shared.lock();
    if !guard.is_current(generation) {
        return RequestPhase::Aborted;
    }
    warn!(generation, error = %err, "stream failed");
    guard
        .state
        .transcript
        .write(slot, format!("Stream failed: {err}"));
    guard.phase = RequestPhase::Failed;
    RequestPhase::Failed
}
