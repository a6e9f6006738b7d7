//! # tutor-protocol
//!
//! Shared vocabulary of the tutor streaming pipeline:
//!
//! - [`frame`]: the `event:`/`data:` wire framing and an incremental decoder.
//! - [`merge`]: the deep-merge law used to fold partial payloads together.
//! - [`response`]: the aggregated tutor response and its typed view.
//! - [`chat`]: chat turns and the request body sent on both hops.

pub mod chat;
pub mod display;
pub mod frame;
pub mod merge;
pub mod response;

pub use chat::{AskRequest, ChatTurn, DEFAULT_USER_ID, Role};
pub use display::{DEFAULT_DISPLAY_TEXT, display_text, display_text_from_fields};
pub use frame::{
    DEFAULT_MAX_PENDING, Decoded, Frame, FrameDecoder, FrameEvent, decode_buffer, decode_frame, encode_frame,
};
pub use merge::{merge, merge_into};
pub use response::{
    AggregatedResponse, Diagram, Practice, Source, TEXT_DELTA_FIELD, TutorExplanation,
    TutorResponse, TutorStep,
};
