//! End-to-end pipeline tests: upload, background batch, and event stream
//! wired together without HTTP.

mod common;

use common::*;
use domain_vision::*;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use test_utils::assertions::assert_in_order;
use test_utils::{TestDataBuilder, TestTempDir};
use uuid::Uuid;

fn images(builder: &TestDataBuilder, count: usize) -> Vec<IncomingFile> {
    (0..count)
        .map(|i| {
            IncomingFile::new(
                builder.filename(&format!("image-{}", i), "png"),
                Some("image/png".to_string()),
                builder.png_bytes(),
            )
        })
        .collect()
}

async fn collect_events(service: &VisionService, task_id: Uuid) -> Vec<TaskEvent> {
    task_events(Arc::clone(service.registry()), task_id, None)
        .collect()
        .await
}

/// Kinds of the events scoped to `image_id`, in order.
fn kinds_for(events: &[TaskEvent], image_id: Uuid) -> Vec<EventKind> {
    events
        .iter()
        .filter(|e| e.image_id == Some(image_id))
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn test_each_image_gets_one_terminal_event_then_end() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::json("a thing", "thing")));
    let service = vision_service(dir.path(), gateway.clone());
    let builder = TestDataBuilder::from_test_name("pipeline_terminals");

    let upload = service.submit_batch(images(&builder, 4)).await.unwrap();
    let events = collect_events(&service, upload.task_id).await;

    let terminals: Vec<&TaskEvent> = events.iter().filter(|e| e.is_image_terminal()).collect();
    assert_eq!(terminals.len(), 4);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(gateway.calls(), 4);

    let uploaded: Vec<Uuid> = upload.uploaded_images.iter().map(|i| i.image_id).collect();
    let finished: Vec<Uuid> = terminals.iter().filter_map(|e| e.image_id).collect();
    assert_eq!(finished, uploaded);
}

#[tokio::test]
async fn test_per_image_event_order() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(
        ScriptedGateway::new(Script::json("ok", "k")).then(Script::Fail(500)),
    );
    let service = vision_service(dir.path(), gateway);
    let builder = TestDataBuilder::from_test_name("pipeline_order");

    let upload = service.submit_batch(images(&builder, 3)).await.unwrap();
    let events = collect_events(&service, upload.task_id).await;

    for (index, image) in upload.uploaded_images.iter().enumerate() {
        let kinds = kinds_for(&events, image.image_id);
        let terminal = kinds.last().copied().unwrap();
        if index == 0 {
            assert_eq!(terminal, EventKind::Error);
        } else {
            assert_eq!(terminal, EventKind::ImageComplete);
        }

        let first_token = kinds.iter().position(|k| *k == EventKind::Token);
        let last_status = kinds.iter().rposition(|k| *k == EventKind::Status).unwrap();
        if let Some(first_token) = first_token {
            assert!(last_status < first_token, "status after token: {:?}", kinds);
        }
        assert_eq!(
            kinds.iter().filter(|k| **k != EventKind::Status && **k != EventKind::Token).count(),
            1,
            "exactly one terminal event: {:?}",
            kinds
        );
    }

    // Images are processed strictly one after another.
    let terminal_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_image_terminal())
        .map(|(i, _)| i)
        .collect();
    let first_status_of_second = events
        .iter()
        .position(|e| e.image_id == Some(upload.uploaded_images[1].image_id))
        .unwrap();
    assert!(terminal_positions[0] < first_status_of_second);
}

#[tokio::test]
async fn test_model_error_message_names_file() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::Fail(503)));
    let service = vision_service(dir.path(), gateway);
    let builder = TestDataBuilder::from_test_name("pipeline_model_error");

    let upload = service.submit_batch(images(&builder, 1)).await.unwrap();
    let events = collect_events(&service, upload.task_id).await;

    let error = events.iter().find(|e| e.is_image_terminal()).unwrap();
    assert_eq!(error.kind, EventKind::Error);
    assert_eq!(
        error.data,
        format!(
            "Model error for {}: model backend returned HTTP 503: scripted failure",
            upload.uploaded_images[0].filename
        )
    );

    let messages: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
    assert_in_order(
        &messages,
        &["Processing 1 images...", "Process completed for all images.", ""],
        "batch status messages",
    );
}

#[tokio::test]
async fn test_temp_files_removed_on_success_and_failure() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(
        ScriptedGateway::new(Script::answer(&["plain words"])).then(Script::Fail(502)),
    );
    let service = vision_service(dir.path(), gateway);
    let builder = TestDataBuilder::from_test_name("pipeline_cleanup");

    let upload = service.submit_batch(images(&builder, 2)).await.unwrap();
    assert_eq!(dir.files().len(), 2);

    let events = collect_events(&service, upload.task_id).await;
    assert!(events.last().unwrap().is_terminal());
    assert!(dir.files().is_empty());
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_image_with_unknown_extension_still_reaches_model() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::json("a photo", "photo")));
    let service = vision_service(dir.path(), gateway.clone());
    let builder = TestDataBuilder::from_test_name("pipeline_octet_stream");

    let files = vec![
        IncomingFile::new("photo.bin", Some("image/png".to_string()), builder.png_bytes()),
        IncomingFile::new("cat.png", Some("image/png".to_string()), builder.png_bytes()),
    ];
    let upload = service.submit_batch(files).await.unwrap();
    assert_eq!(upload.uploaded_images.len(), 2);

    let events = collect_events(&service, upload.task_id).await;
    let completed = events
        .iter()
        .filter(|e| e.kind == EventKind::ImageComplete)
        .count();
    assert_eq!(completed, 2);

    let urls = gateway.image_urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].starts_with("data:application/octet-stream;base64,"));
    assert!(urls[1].starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_concurrent_batches_do_not_interleave() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::json("shared", "k")));
    let service = vision_service(dir.path(), gateway);

    let mut consumers = Vec::new();
    for batch in 0..3 {
        let builder = TestDataBuilder::from_test_name(&format!("pipeline_concurrent_{}", batch));
        let upload = service.submit_batch(images(&builder, 3)).await.unwrap();
        let service = Arc::clone(&service);
        consumers.push(tokio::spawn(async move {
            let events = collect_events(&service, upload.task_id).await;
            (upload, events)
        }));
    }

    for consumer in consumers {
        let (upload, events) = consumer.await.unwrap();
        let own: HashSet<Uuid> = upload.uploaded_images.iter().map(|i| i.image_id).collect();
        let seen: HashSet<Uuid> = events.iter().filter_map(|e| e.image_id).collect();
        assert_eq!(seen, own);
        assert_eq!(events.iter().filter(|e| e.is_image_terminal()).count(), 3);
    }
}

#[tokio::test]
async fn test_disconnected_stream_cancels_remaining_images() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::Hang));
    let service = vision_service(dir.path(), gateway.clone());
    let builder = TestDataBuilder::from_test_name("pipeline_disconnect");

    let upload = service.submit_batch(images(&builder, 3)).await.unwrap();

    let mut stream = Box::pin(task_events(
        Arc::clone(service.registry()),
        upload.task_id,
        None,
    ));
    loop {
        let event = stream.next().await.unwrap();
        if event.data.starts_with("Sending ") {
            break;
        }
    }
    drop(stream);

    assert!(eventually(|| dir.files().is_empty()).await);
    assert!(service.registry().is_empty());
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_live_tasks() {
    let dir = TestTempDir::new();
    let gateway = Arc::new(ScriptedGateway::new(Script::Hang));
    let service = vision_service(dir.path(), gateway);
    let builder = TestDataBuilder::from_test_name("pipeline_shutdown");

    let upload = service.submit_batch(images(&builder, 2)).await.unwrap();
    service.shutdown().await;

    let events = collect_events(&service, upload.task_id).await;
    assert!(events.iter().all(|e| !e.is_terminal()));
    assert!(eventually(|| dir.files().is_empty()).await);
}
