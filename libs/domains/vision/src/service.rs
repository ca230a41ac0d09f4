use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::VisionConfig;
use crate::error::{VisionError, VisionResult};
use crate::gateway::ModelGateway;
use crate::metrics::VisionMetrics;
use crate::models::{ImageItem, IncomingFile, UploadResponse, UploadedImage};
use crate::processor::{BatchProcessor, ProcessorSettings};
use crate::registry::{TaskHandle, TaskRegistry};
use crate::storage::TempStorage;

/// Accepts uploads and runs their batches in the background.
pub struct VisionService {
    registry: Arc<TaskRegistry>,
    processor: Arc<BatchProcessor>,
    storage: TempStorage,
    unclaimed_task_ttl: Option<Duration>,
    metrics: VisionMetrics,
}

impl VisionService {
    pub fn new(
        registry: Arc<TaskRegistry>,
        gateway: Arc<dyn ModelGateway>,
        config: &VisionConfig,
    ) -> Self {
        let storage = TempStorage::new(&config.temp_dir);
        let settings = ProcessorSettings::new(&config.response_language)
            .with_status_delay(config.status_delay);

        Self {
            processor: Arc::new(BatchProcessor::new(gateway, storage.clone(), settings)),
            registry,
            storage,
            unclaimed_task_ttl: config.unclaimed_task_ttl,
            metrics: VisionMetrics,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &TempStorage {
        &self.storage
    }

    /// Store the image parts of an upload and start describing them.
    ///
    /// Returns as soon as the task is registered; non-image parts are skipped.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn submit_batch(&self, files: Vec<IncomingFile>) -> VisionResult<UploadResponse> {
        if files.is_empty() {
            self.metrics.upload_rejected("no_files");
            return Err(VisionError::NoFiles);
        }

        let task_id = Uuid::new_v4();
        let mut images = Vec::with_capacity(files.len());

        for file in files {
            if !file.is_image() {
                info!(
                    filename = %file.filename,
                    content_type = file.content_type.as_deref().unwrap_or("none"),
                    "Skipping non-image file"
                );
                continue;
            }

            let image_id = Uuid::new_v4();
            match self
                .storage
                .persist(task_id, image_id, &file.filename, &file.bytes)
                .await
            {
                Ok(path) => images.push(ImageItem::new(image_id, path, file.filename)),
                Err(e) => {
                    warn!(filename = %file.filename, error = %e, "Failed to store upload, dropping file");
                }
            }
        }

        if images.is_empty() {
            self.metrics.upload_rejected("no_valid_images");
            return Err(VisionError::NoValidImages);
        }

        let handle = match self.registry.register(task_id) {
            Ok(handle) => handle,
            Err(e) => {
                for image in &images {
                    self.storage.remove(&image.file_path).await;
                }
                return Err(e.into());
            }
        };

        let response = UploadResponse {
            task_id,
            uploaded_images: images
                .iter()
                .map(|image| UploadedImage {
                    image_id: image.image_id,
                    filename: image.filename.clone(),
                })
                .collect(),
        };

        self.metrics.upload_accepted(images.len());
        self.spawn_batch(handle, images);
        info!(%task_id, response = ?response, "Upload accepted");

        Ok(response)
    }

    fn spawn_batch(&self, handle: TaskHandle, images: Vec<ImageItem>) {
        let processor = Arc::clone(&self.processor);
        let registry = Arc::clone(&self.registry);
        let ttl = self.unclaimed_task_ttl;
        let task_id = handle.task_id;

        tokio::spawn(async move {
            processor.run(handle, images).await;

            if let Some(ttl) = ttl {
                tokio::time::sleep(ttl).await;
                registry.release_if_unattached(task_id);
            }
        });
    }

    /// Cancel running batches and empty the temp directory.
    pub async fn shutdown(&self) {
        self.registry.cancel_all();
        match self.storage.purge().await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Removed leftover temporary files"),
            Err(e) => warn!(error = %e, "Failed to purge temporary directory"),
        }
    }
}
