//! The aggregated tutor response.
//!
//! The backend schema has drifted across revisions, so the aggregate is kept
//! as an open JSON object built by [`merge_into`]. [`TutorResponse`] is the
//! typed view of the fields the UI knows about; anything else rides along in
//! its `extra` map.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::display::display_text_from_fields;
use crate::merge::merge_into;

/// Chunk field carrying a text fragment to append to
/// [`AggregatedResponse::streamed_text`] instead of being merged.
pub const TEXT_DELTA_FIELD: &str = "text_delta";

/// Deep merge of every chunk received for the current request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedResponse {
    fields: Map<String, Value>,
    streamed_text: String,
}

impl AggregatedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.streamed_text.is_empty()
    }

    /// Fold one chunk payload in.
    ///
    /// A string `text_delta` is appended to the streamed text; every other
    /// field goes through the replace/merge law.
    pub fn apply_chunk(&mut self, mut partial: Map<String, Value>) {
        if let Some(Value::String(delta)) = partial.get(TEXT_DELTA_FIELD) {
            self.streamed_text.push_str(delta);
            partial.remove(TEXT_DELTA_FIELD);
        }
        merge_into(&mut self.fields, &partial);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn streamed_text(&self) -> &str {
        &self.streamed_text
    }

    /// Text for the assistant transcript slot.
    pub fn display_text(&self) -> String {
        if !self.streamed_text.is_empty() {
            return self.streamed_text.clone();
        }
        display_text_from_fields(&self.fields)
    }

    /// Typed view of the recognized fields. Only fails if the aggregate
    /// itself cannot be read as an object.
    pub fn typed(&self) -> Result<TutorResponse, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

/// Typed view of the recognized fields.
///
/// Every recognized field is read leniently: a value whose shape does not
/// match becomes `None` and the rest of the view survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorResponse {
    #[serde(deserialize_with = "lenient")]
    pub topic: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub summary: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub diagram: Option<Diagram>,
    #[serde(deserialize_with = "lenient")]
    pub steps: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient")]
    pub sources: Option<Vec<Source>>,
    /// Lab artifacts and highlights; shape varies by case.
    pub lab: Option<Value>,
    #[serde(deserialize_with = "lenient")]
    pub practice: Option<Practice>,
    #[serde(deserialize_with = "lenient")]
    pub tutor: Option<TutorExplanation>,
    #[serde(deserialize_with = "lenient")]
    pub strict_evidence_used: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub kb_coverage: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagram {
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub code: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub section: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub snippet: Option<String>,
    #[serde(rename = "ref", deserialize_with = "lenient")]
    pub reference: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Practice {
    #[serde(deserialize_with = "lenient")]
    pub question: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub hint: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub answer: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub choices: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient")]
    pub correct_index: Option<i64>,
    /// Knowledge-base references; plain ids or richer objects.
    pub evidence_ids: Option<Vec<Value>>,
    #[serde(deserialize_with = "lenient")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorExplanation {
    #[serde(deserialize_with = "lenient")]
    pub final_answer_text: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub steps: Option<Vec<TutorStep>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorStep {
    #[serde(deserialize_with = "lenient")]
    pub step: Option<String>,
    /// Plain ids or `{id, quote}` objects, depending on the backend revision.
    pub evidence: Option<Vec<Value>>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            debug!(error = %err, "ignoring field with unexpected shape");
            Ok(None)
        }
    }
}
