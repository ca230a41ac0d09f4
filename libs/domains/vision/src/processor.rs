//! Sequential per-batch image pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::ModelResult;
use crate::gateway::{ModelGateway, VisionRequest, prompts};
use crate::metrics::{ImageOutcome, VisionMetrics};
use crate::models::{ImageItem, TaskEvent};
use crate::output::{clean_model_output, parse_model_output};
use crate::registry::{EventSender, TaskHandle};
use crate::storage::TempStorage;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub system_prompt: String,
    /// Pause after status events; zero disables pacing
    pub status_delay: Duration,
}

impl ProcessorSettings {
    pub fn new(language: &str) -> Self {
        Self {
            system_prompt: prompts::system_prompt(language),
            status_delay: Duration::ZERO,
        }
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }
}

/// Runs one batch start to finish, one image at a time.
pub struct BatchProcessor {
    gateway: Arc<dyn ModelGateway>,
    storage: TempStorage,
    settings: ProcessorSettings,
    metrics: VisionMetrics,
}

impl BatchProcessor {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        storage: TempStorage,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            gateway,
            storage,
            settings,
            metrics: VisionMetrics,
        }
    }

    /// Describe every image and push progress into the task's channel.
    ///
    /// Ends with a completion `status` and `end`, unless the task is cancelled,
    /// in which case the remaining files are discarded and nothing more is sent.
    #[instrument(skip_all, fields(task_id = %handle.task_id, images = images.len()))]
    pub async fn run(&self, handle: TaskHandle, images: Vec<ImageItem>) {
        let TaskHandle { events, cancel, .. } = handle;

        events.emit(TaskEvent::status(format!(
            "Processing {} images...",
            images.len()
        )));
        self.pace().await;

        let mut pending = images.into_iter();
        while let Some(image) = pending.next() {
            if cancel.is_cancelled() {
                self.discard(std::iter::once(image).chain(pending)).await;
                return;
            }

            let started = Instant::now();
            let outcome = self.process_image(&events, &cancel, &image).await;
            self.storage.remove(&image.file_path).await;
            self.metrics.image_processed(outcome, started.elapsed());
            debug!(image_id = %image.image_id, outcome = outcome.as_str(), "Image done");
        }

        if cancel.is_cancelled() {
            info!("Batch cancelled after last image");
            return;
        }

        events.emit(TaskEvent::status("Process completed for all images."));
        events.emit(TaskEvent::end());
        info!("Batch completed");
    }

    #[instrument(skip_all, fields(image_id = %image.image_id, filename = %image.filename))]
    async fn process_image(
        &self,
        events: &EventSender,
        cancel: &CancellationToken,
        image: &ImageItem,
    ) -> ImageOutcome {
        let id = image.image_id;
        events.emit(TaskEvent::image_status(
            id,
            format!("Extracting features from {}...", image.filename),
        ));
        self.pace().await;

        let bytes = match self.storage.read(&image.file_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to read temporary file");
                events.emit(TaskEvent::image_error(
                    id,
                    format!("Error reading image {}: {}", image.filename, e),
                ));
                return ImageOutcome::ReadError;
            }
        };

        let request = VisionRequest::new(
            self.settings.system_prompt.as_str(),
            prompts::USER_INSTRUCTION,
            &image.media_type,
            &bytes,
        );
        drop(bytes);

        events.emit(TaskEvent::image_status(
            id,
            format!("Sending {} to model...", image.filename),
        ));

        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Task cancelled during model call");
                return ImageOutcome::Cancelled;
            }
            answer = self.collect_answer(events, image, request) => answer,
        };

        match answer {
            Ok(raw) => {
                let output = parse_model_output(&clean_model_output(&raw));
                let outcome = if output.is_structured() {
                    ImageOutcome::Complete
                } else {
                    debug!("Model answer is not JSON, using plain-text description");
                    ImageOutcome::Fallback
                };
                events.emit(TaskEvent::image_complete(id, &output.into_description()));
                outcome
            }
            Err(e) => {
                warn!(error = %e, model = %self.gateway.model_name(), "Model call failed");
                events.emit(TaskEvent::image_error(
                    id,
                    format!("Model error for {}: {}", image.filename, e),
                ));
                ImageOutcome::ModelError
            }
        }
    }

    /// Stream fragments into `token` events and return the whole answer.
    async fn collect_answer(
        &self,
        events: &EventSender,
        image: &ImageItem,
        request: VisionRequest,
    ) -> ModelResult<String> {
        let mut tokens = self.gateway.stream_completion(request).await?;

        let mut answer = String::new();
        let mut count = 0u64;
        let result = loop {
            match tokens.next().await {
                Some(Ok(fragment)) if fragment.is_empty() => {}
                Some(Ok(fragment)) => {
                    answer.push_str(&fragment);
                    count += 1;
                    events.emit(TaskEvent::token(image.image_id, fragment));
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(answer),
            }
        };

        self.metrics.tokens_streamed(count);
        result
    }

    async fn discard(&self, images: impl Iterator<Item = ImageItem>) {
        let mut skipped = 0usize;
        for image in images {
            self.storage.remove(&image.file_path).await;
            self.metrics
                .image_processed(ImageOutcome::Cancelled, Duration::ZERO);
            skipped += 1;
        }
        info!(skipped, "Task cancelled, discarded remaining images");
    }

    async fn pace(&self) {
        if !self.settings.status_delay.is_zero() {
            tokio::time::sleep(self.settings.status_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::gateway::{MockModelGateway, TokenStream};
    use crate::models::EventKind;
    use crate::registry::{Subscription, TaskRegistry};
    use futures::stream;
    use uuid::Uuid;

    fn scripted(fragments: &[&str]) -> TokenStream {
        let items: Vec<ModelResult<String>> =
            fragments.iter().map(|f| Ok(f.to_string())).collect();
        Box::pin(stream::iter(items))
    }

    fn gateway_answering(fragments: &'static [&'static str]) -> MockModelGateway {
        let mut gateway = MockModelGateway::new();
        gateway
            .expect_stream_completion()
            .returning(move |_| Ok(scripted(fragments)));
        gateway.expect_model_name().return_const("test-model".to_string());
        gateway
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: TempStorage,
        registry: Arc<TaskRegistry>,
        task_id: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let storage = TempStorage::new(dir.path());
            Self {
                _dir: dir,
                storage,
                registry: Arc::new(TaskRegistry::new()),
                task_id: Uuid::new_v4(),
            }
        }

        async fn image(&self, filename: &str) -> ImageItem {
            let image_id = Uuid::new_v4();
            let path = self
                .storage
                .persist(self.task_id, image_id, filename, b"\x89PNG fake")
                .await
                .unwrap();
            ImageItem::new(image_id, path, filename)
        }

        fn processor(&self, gateway: MockModelGateway) -> BatchProcessor {
            BatchProcessor::new(
                Arc::new(gateway),
                self.storage.clone(),
                ProcessorSettings::new("English"),
            )
        }

        async fn start(&self) -> (TaskHandle, Subscription) {
            let handle = self.registry.register(self.task_id).unwrap();
            let subscription = self.registry.attach(self.task_id, None).await.unwrap();
            (handle, subscription)
        }
    }

    async fn drain(mut subscription: Subscription) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscription.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_structured_answer_produces_image_complete() {
        let fixture = Fixture::new();
        let image = fixture.image("cat.png").await;
        let path = image.file_path.clone();
        let processor = fixture.processor(gateway_answering(&[
            "```json\n{\"description\": \"a cat\", ",
            "\"keywords\": \"cat, pet\"}\n```",
        ]));

        let (handle, subscription) = fixture.start().await;
        processor.run(handle, vec![image.clone()]).await;
        let events = drain(subscription).await;

        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Status,
                EventKind::Status,
                EventKind::Status,
                EventKind::Token,
                EventKind::Token,
                EventKind::ImageComplete,
                EventKind::Status,
                EventKind::End,
            ]
        );
        assert_eq!(events[0].data, "Processing 1 images...");
        assert_eq!(events[1].data, "Extracting features from cat.png...");
        assert_eq!(events[2].data, "Sending cat.png to model...");
        assert_eq!(events[5].image_id, Some(image.image_id));

        let payload: serde_json::Value = serde_json::from_str(&events[5].data).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"description": "a cat", "keywords": "cat, pet"})
        );
        assert_eq!(events[6].data, "Process completed for all images.");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_extension_is_sent_as_octet_stream() {
        let fixture = Fixture::new();
        let image = fixture.image("photo.bin").await;

        let mut gateway = MockModelGateway::new();
        gateway
            .expect_stream_completion()
            .withf(|request| {
                request
                    .image_url
                    .starts_with("data:application/octet-stream;base64,")
            })
            .times(1)
            .returning(|_| Ok(scripted(&["{\"description\": \"a photo\", \"keywords\": \"photo\"}"])));
        gateway.expect_model_name().return_const("test-model".to_string());
        let processor = fixture.processor(gateway);

        let (handle, subscription) = fixture.start().await;
        processor.run(handle, vec![image]).await;
        let events = drain(subscription).await;

        let complete = events
            .iter()
            .find(|e| e.kind == EventKind::ImageComplete)
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&complete.data).unwrap();
        assert_eq!(payload["description"], "a photo");
    }

    #[tokio::test]
    async fn test_plain_text_answer_falls_back() {
        let fixture = Fixture::new();
        let image = fixture.image("dog.jpg").await;
        let processor = fixture.processor(gateway_answering(&["no JSON ", "here"]));

        let (handle, subscription) = fixture.start().await;
        processor.run(handle, vec![image]).await;
        let events = drain(subscription).await;

        let complete = events
            .iter()
            .find(|e| e.kind == EventKind::ImageComplete)
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&complete.data).unwrap();
        assert_eq!(payload["description"], "no JSON here");
        assert_eq!(payload["keywords"], "");
    }

    #[tokio::test]
    async fn test_model_error_is_scoped_to_image_and_batch_continues() {
        let fixture = Fixture::new();
        let first = fixture.image("a.png").await;
        let second = fixture.image("b.png").await;

        let mut gateway = MockModelGateway::new();
        let mut calls = 0;
        gateway.expect_stream_completion().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ModelError::Status {
                    status: 503,
                    body: "busy".into(),
                })
            } else {
                Ok(scripted(&[r#"{"description":"b","keywords":"k"}"#]))
            }
        });
        gateway.expect_model_name().return_const("test-model".to_string());
        let processor = fixture.processor(gateway);

        let (handle, subscription) = fixture.start().await;
        processor
            .run(handle, vec![first.clone(), second.clone()])
            .await;
        let events = drain(subscription).await;

        let terminals: Vec<&TaskEvent> = events.iter().filter(|e| e.is_image_terminal()).collect();
        assert_eq!(terminals.len(), 2);
        assert_eq!(terminals[0].kind, EventKind::Error);
        assert_eq!(terminals[0].image_id, Some(first.image_id));
        assert_eq!(
            terminals[0].data,
            "Model error for a.png: model backend returned HTTP 503: busy"
        );
        assert_eq!(terminals[1].kind, EventKind::ImageComplete);
        assert_eq!(terminals[1].image_id, Some(second.image_id));
        assert_eq!(events.last().unwrap().kind, EventKind::End);
        assert!(!first.file_path.exists());
        assert!(!second.file_path.exists());
    }

    #[tokio::test]
    async fn test_error_mid_stream_stops_tokens() {
        let fixture = Fixture::new();
        let image = fixture.image("a.png").await;

        let mut gateway = MockModelGateway::new();
        gateway.expect_stream_completion().returning(|_| {
            let items: Vec<ModelResult<String>> = vec![
                Ok("partial".into()),
                Err(ModelError::MalformedChunk("{oops".into())),
                Ok("never".into()),
            ];
            Ok(Box::pin(stream::iter(items)) as TokenStream)
        });
        gateway.expect_model_name().return_const("test-model".to_string());
        let processor = fixture.processor(gateway);

        let (handle, subscription) = fixture.start().await;
        processor.run(handle, vec![image]).await;
        let events = drain(subscription).await;

        let tokens: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Token)
            .map(|e| e.data.as_str())
            .collect();
        assert_eq!(tokens, vec!["partial"]);
        assert!(events.iter().all(|e| e.kind != EventKind::ImageComplete));
        assert!(events.iter().any(|e| e.is_image_terminal() && e.kind == EventKind::Error));
    }

    #[tokio::test]
    async fn test_missing_file_reports_read_error_without_model_call() {
        let fixture = Fixture::new();
        let image = fixture.image("gone.png").await;
        tokio::fs::remove_file(&image.file_path).await.unwrap();

        let mut gateway = MockModelGateway::new();
        gateway.expect_stream_completion().never();
        let processor = fixture.processor(gateway);

        let (handle, subscription) = fixture.start().await;
        processor.run(handle, vec![image.clone()]).await;
        let events = drain(subscription).await;

        let error = events.iter().find(|e| e.kind == EventKind::Error).unwrap();
        assert_eq!(error.image_id, Some(image.image_id));
        assert!(error.data.starts_with("Error reading image gone.png: "));
        assert_eq!(events.last().unwrap().kind, EventKind::End);
    }

    #[tokio::test]
    async fn test_cancelled_task_discards_remaining_images() {
        let fixture = Fixture::new();
        let first = fixture.image("a.png").await;
        let second = fixture.image("b.png").await;

        let mut gateway = MockModelGateway::new();
        gateway.expect_stream_completion().never();
        let processor = fixture.processor(gateway);

        let handle = fixture.registry.register(fixture.task_id).unwrap();
        let subscription = fixture.registry.attach(fixture.task_id, None).await.unwrap();
        handle.cancel.cancel();
        processor
            .run(handle, vec![first.clone(), second.clone()])
            .await;
        let events = drain(subscription).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "Processing 2 images...");
        assert!(!first.file_path.exists());
        assert!(!second.file_path.exists());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_model_call() {
        let fixture = Fixture::new();
        let image = fixture.image("slow.png").await;

        let mut gateway = MockModelGateway::new();
        gateway
            .expect_stream_completion()
            .returning(|_| Ok(Box::pin(stream::pending::<ModelResult<String>>()) as TokenStream));
        let processor = fixture.processor(gateway);

        let (handle, subscription) = fixture.start().await;
        let cancel = handle.cancel.clone();
        let path = image.file_path.clone();
        let run = tokio::spawn(async move { processor.run(handle, vec![image]).await });

        tokio::task::yield_now().await;
        cancel.cancel();
        run.await.unwrap();

        let events = drain(subscription).await;
        assert!(events.iter().all(|e| !e.is_terminal() && !e.is_image_terminal()));
        assert!(!path.exists());
    }
}
