use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

/// Fallback media type for files whose extension is unknown or not an image.
pub const GENERIC_MEDIA_TYPE: &str = "application/octet-stream";

/// Kind of a task event; also the SSE `event:` field.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Status,
    Token,
    ImageComplete,
    Error,
    End,
}

/// One unit of progress pushed into a task's channel.
///
/// `image_id` is `None` for batch-global events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<Uuid>,
    pub data: String,
}

impl TaskEvent {
    fn new(kind: EventKind, image_id: Option<Uuid>, data: impl Into<String>) -> Self {
        Self {
            kind,
            image_id,
            data: data.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::new(EventKind::Status, None, message)
    }

    pub fn image_status(image_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(EventKind::Status, Some(image_id), message)
    }

    pub fn token(image_id: Uuid, fragment: impl Into<String>) -> Self {
        Self::new(EventKind::Token, Some(image_id), fragment)
    }

    pub fn image_complete(image_id: Uuid, description: &ImageDescription) -> Self {
        Self::new(EventKind::ImageComplete, Some(image_id), description.to_payload())
    }

    pub fn image_error(image_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, Some(image_id), message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, None, message)
    }

    pub fn end() -> Self {
        Self::new(EventKind::End, None, "")
    }

    /// `end` closes the task's stream.
    pub fn is_terminal(&self) -> bool {
        self.kind == EventKind::End
    }

    /// `image_complete` or image-scoped `error`: no further events for that image.
    pub fn is_image_terminal(&self) -> bool {
        self.image_id.is_some() && matches!(self.kind, EventKind::ImageComplete | EventKind::Error)
    }
}

/// Final result for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageDescription {
    pub description: String,
    pub keywords: String,
}

impl ImageDescription {
    pub fn new(description: impl Into<String>, keywords: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            keywords: keywords.into(),
        }
    }

    /// JSON text carried in the `image_complete` event data.
    pub fn to_payload(&self) -> String {
        serde_json::json!({
            "description": self.description,
            "keywords": self.keywords,
        })
        .to_string()
    }
}

/// A file part received by the upload route.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl IncomingFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            bytes: bytes.into(),
        }
    }

    /// Declared content type starts with `image/`.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

/// One persisted image waiting for the batch processor.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image_id: Uuid,
    pub file_path: PathBuf,
    pub filename: String,
    pub media_type: String,
}

impl ImageItem {
    pub fn new(image_id: Uuid, file_path: PathBuf, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let media_type = media_type_for(&filename);
        Self {
            image_id,
            file_path,
            filename,
            media_type,
        }
    }
}

/// Image media type guessed from the filename extension, or
/// [`GENERIC_MEDIA_TYPE`] when unknown or not an image.
pub fn media_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| GENERIC_MEDIA_TYPE.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadedImage {
    pub image_id: Uuid,
    pub filename: String,
}

/// Response of `POST /upload`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub task_id: Uuid,
    pub uploaded_images: Vec<UploadedImage>,
}

/// Body of a rejected upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"error": "No valid image files uploaded."}))]
pub struct UploadRejection {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::ImageComplete.as_ref(), "image_complete");
        assert_eq!(EventKind::End.to_string(), "end");
        assert_eq!(EventKind::from_str("token").unwrap(), EventKind::Token);
        assert_eq!(
            serde_json::to_string(&EventKind::ImageComplete).unwrap(),
            "\"image_complete\""
        );
    }

    #[test]
    fn test_image_complete_payload_is_structured_json() {
        let image_id = Uuid::new_v4();
        let event = TaskEvent::image_complete(image_id, &ImageDescription::new("un gato", "gato, mascota"));

        assert_eq!(event.kind, EventKind::ImageComplete);
        assert_eq!(event.image_id, Some(image_id));
        assert!(event.is_image_terminal());
        assert!(!event.is_terminal());

        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["description"], "un gato");
        assert_eq!(payload["keywords"], "gato, mascota");
    }

    #[test]
    fn test_payload_keeps_non_ascii_unescaped() {
        let payload = ImageDescription::new("árbol", "niño").to_payload();
        assert!(payload.contains("árbol"));
        assert!(payload.contains("niño"));
    }

    #[test]
    fn test_global_events_have_no_image_id() {
        assert_eq!(TaskEvent::status("Processing 2 images...").image_id, None);
        assert_eq!(TaskEvent::error("boom").image_id, None);

        let end = TaskEvent::end();
        assert!(end.is_terminal());
        assert_eq!(end.data, "");
        assert!(!TaskEvent::error("boom").is_image_terminal());
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for("cat.png"), "image/png");
        assert_eq!(media_type_for("CAT.JPG"), "image/jpeg");
        assert_eq!(media_type_for("notes.txt"), GENERIC_MEDIA_TYPE);
        assert_eq!(media_type_for("no_extension"), GENERIC_MEDIA_TYPE);
    }

    #[test]
    fn test_incoming_file_is_image() {
        let png = IncomingFile::new("a.png", Some("image/png".into()), vec![1u8]);
        let txt = IncomingFile::new("a.txt", Some("text/plain".into()), vec![1u8]);
        let unknown = IncomingFile::new("a.png", None, vec![1u8]);
        assert!(png.is_image());
        assert!(!txt.is_image());
        assert!(!unknown.is_image());
    }
}
