//! Short display text for the assistant turn.
//!
//! The transcript shows a synopsis while the full payload is rendered by the
//! panels, so the derivation is a pure function of the payload: the same
//! payload always produces the same line.

use serde_json::{Map, Value};

/// Shown when the payload has nothing suitable to summarize.
pub const DEFAULT_DISPLAY_TEXT: &str = "View explanation and diagram.";

const SYNOPSIS_SENTENCES: usize = 2;

pub fn display_text(payload: &Value) -> String {
    match payload {
        Value::Object(fields) => display_text_from_fields(fields),
        _ => DEFAULT_DISPLAY_TEXT.to_string(),
    }
}

/// First sentences of `summary`, else of `tutor.final_answer_text`, else the
/// `title`, else [`DEFAULT_DISPLAY_TEXT`].
pub fn display_text_from_fields(fields: &Map<String, Value>) -> String {
    let summary = non_blank(fields.get("summary"));
    let final_answer = non_blank(
        fields
            .get("tutor")
            .and_then(|tutor| tutor.get("final_answer_text")),
    );
    if let Some(text) = summary.or(final_answer) {
        return synopsis(text, SYNOPSIS_SENTENCES);
    }
    if let Some(title) = non_blank(fields.get("title")) {
        return title.to_string();
    }
    DEFAULT_DISPLAY_TEXT.to_string()
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn synopsis(text: &str, max_sentences: usize) -> String {
    let mut seen = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        // "3.5" or "e.g." mid-word is not a sentence end.
        let at_boundary = chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            seen += 1;
            if seen == max_sentences {
                return text[..idx + ch.len_utf8()].to_string();
            }
        }
    }
    text.to_string()
}
