//! Helpers shared by the vision integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use domain_vision::*;
use futures::stream;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::MultipartBody;

/// What the scripted model does for one call.
#[derive(Clone, Debug)]
pub enum Script {
    /// Stream these fragments, then finish
    Answer(Vec<String>),
    /// Reject the request with this HTTP status
    Fail(u16),
    /// Open a stream that never yields
    Hang,
}

impl Script {
    pub fn answer(fragments: &[&str]) -> Self {
        Script::Answer(fragments.iter().map(|f| f.to_string()).collect())
    }

    pub fn json(description: &str, keywords: &str) -> Self {
        Script::Answer(vec![
            "```json\n".to_string(),
            format!("{{\"description\": \"{}\", ", description),
            format!("\"keywords\": \"{}\"}}", keywords),
            "\n```".to_string(),
        ])
    }
}

/// Model backend replaying queued scripts, falling back to a default.
pub struct ScriptedGateway {
    queue: Mutex<VecDeque<Script>>,
    fallback: Script,
    calls: AtomicUsize,
    image_urls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(fallback: Script) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            image_urls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, script: Script) -> Self {
        self.queue.lock().unwrap().push_back(script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Data URIs received so far, in call order.
    pub fn image_urls(&self) -> Vec<String> {
        self.image_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    async fn stream_completion(&self, request: VisionRequest) -> ModelResult<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.image_urls.lock().unwrap().push(request.image_url);

        let script = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match script {
            Script::Answer(fragments) => {
                let items: Vec<ModelResult<String>> = fragments.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Script::Fail(status) => Err(ModelError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Script::Hang => Ok(Box::pin(stream::pending::<ModelResult<String>>())),
        }
    }
}

pub fn vision_config(dir: &Path) -> VisionConfig {
    VisionConfig {
        temp_dir: dir.to_path_buf(),
        stream_attach_timeout: Some(Duration::from_millis(200)),
        unclaimed_task_ttl: None,
        ..VisionConfig::default()
    }
}

pub fn vision_service(dir: &Path, gateway: Arc<ScriptedGateway>) -> Arc<VisionService> {
    Arc::new(VisionService::new(
        Arc::new(TaskRegistry::new()),
        gateway,
        &vision_config(dir),
    ))
}

pub fn vision_router(service: Arc<VisionService>, max_body_bytes: usize) -> Router {
    let state = VisionState::new(service, Some(Duration::from_millis(200)));
    handlers::router(state, max_body_bytes)
}

pub fn upload_request(body: &MultipartBody) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("content-type", body.content_type())
        .body(Body::from(body.build()))
        .unwrap()
}

pub fn stream_request(task_id: impl std::fmt::Display) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/stream/{}", task_id))
        .body(Body::empty())
        .unwrap()
}

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub id: Option<String>,
    pub data: String,
}

/// Split an SSE body into frames, skipping keep-alive comments.
pub fn parse_sse(body: &str) -> Vec<SseFrame> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut id = None;
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    event = Some(value.trim_start().to_string());
                } else if let Some(value) = line.strip_prefix("id:") {
                    id = Some(value.trim_start().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            event.map(|event| SseFrame {
                event,
                id,
                data: data.join("\n"),
            })
        })
        .collect()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
