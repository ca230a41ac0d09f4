//! Interpretation of the accumulated model answer.

use serde_json::{Map, Value};

use crate::models::ImageDescription;

/// What the model's answer turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutput {
    /// A JSON object with `description` / `keywords`
    Structured(ImageDescription),
    /// Anything else, kept verbatim (after fence stripping)
    PlainText(String),
}

impl ModelOutput {
    pub fn is_structured(&self) -> bool {
        matches!(self, ModelOutput::Structured(_))
    }

    /// Payload for `image_complete`: plain text becomes the description.
    pub fn into_description(self) -> ImageDescription {
        match self {
            ModelOutput::Structured(description) => description,
            ModelOutput::PlainText(text) => ImageDescription::new(text, ""),
        }
    }
}

/// Trim and remove code-fence markup the model was asked not to send.
pub fn clean_model_output(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parse cleaned model text.
///
/// Missing or null fields become empty strings; arrays of strings are joined
/// with ", "; other non-string values keep their JSON text.
pub fn parse_model_output(text: &str) -> ModelOutput {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => ModelOutput::Structured(ImageDescription {
            description: field_text(&fields, "description"),
            keywords: field_text(&fields, "keywords"),
        }),
        _ => ModelOutput::PlainText(text.to_string()),
    }
}

fn field_text(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}
