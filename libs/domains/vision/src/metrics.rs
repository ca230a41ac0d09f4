//! Prometheus metrics for the upload pipeline.
//!
//! Recorded through the `metrics` facade; the exporter is installed by the app.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// How one image's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Model answered with the expected JSON object
    Complete,
    /// Model answered with plain text
    Fallback,
    ReadError,
    ModelError,
    /// Skipped because the stream consumer left
    Cancelled,
}

impl ImageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Fallback => "fallback",
            Self::ReadError => "read_error",
            Self::ModelError => "model_error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VisionMetrics;

impl VisionMetrics {
    pub fn upload_accepted(&self, images: usize) {
        counter!("vision_uploads_total", "status" => "accepted").increment(1);
        counter!("vision_images_uploaded_total").increment(images as u64);
    }

    pub fn upload_rejected(&self, reason: &'static str) {
        counter!("vision_uploads_total", "status" => "rejected", "reason" => reason).increment(1);
    }

    pub fn image_processed(&self, outcome: ImageOutcome, duration: Duration) {
        counter!("vision_images_processed_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("vision_image_duration_seconds", "outcome" => outcome.as_str())
            .record(duration.as_secs_f64());
    }

    pub fn tokens_streamed(&self, count: u64) {
        counter!("vision_model_tokens_total").increment(count);
    }

    pub fn live_tasks(&self, count: usize) {
        gauge!("vision_live_tasks").set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ImageOutcome::Complete.as_str(), "complete");
        assert_eq!(ImageOutcome::Fallback.as_str(), "fallback");
        assert_eq!(ImageOutcome::ReadError.as_str(), "read_error");
        assert_eq!(ImageOutcome::ModelError.as_str(), "model_error");
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = VisionMetrics;
        metrics.upload_accepted(3);
        metrics.upload_rejected("no_valid_images");
        metrics.image_processed(ImageOutcome::Complete, Duration::from_millis(250));
        metrics.live_tasks(0);
    }
}
