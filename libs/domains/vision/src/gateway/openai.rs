use async_trait::async_trait;
use core_config::model::ModelEndpointConfig;
use futures::StreamExt;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ModelGateway, TokenStream, VisionRequest};
use crate::error::{ModelError, ModelResult};

/// Streaming client for any OpenAI chat-completions compatible server
/// (LM Studio, vLLM, llama.cpp, OpenAI itself).
pub struct OpenAiCompatibleGateway {
    client: Client,
    config: ModelEndpointConfig,
}

impl OpenAiCompatibleGateway {
    pub fn new(config: ModelEndpointConfig) -> ModelResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(config: &'a ModelEndpointConfig, request: &'a VisionRequest) -> Self {
        Self {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(&request.system_prompt),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: &request.instruction,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: &request.image_url,
                            },
                        },
                    ]),
                },
            ],
            stream: true,
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded `data:` payload.
#[derive(Debug, PartialEq, Eq)]
struct StreamPayload {
    fragment: Option<String>,
    done: bool,
}

fn parse_stream_payload(payload: &str) -> ModelResult<StreamPayload> {
    if payload == "[DONE]" {
        return Ok(StreamPayload {
            fragment: None,
            done: true,
        });
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|e| ModelError::MalformedChunk(format!("{}: {}", e, payload)))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ModelError::Provider(message));
    }

    let mut fragment = String::new();
    let mut done = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.and_then(|d| d.content) {
            fragment.push_str(&content);
        }
        done |= choice.finish_reason.is_some();
    }

    Ok(StreamPayload {
        fragment: (!fragment.is_empty()).then_some(fragment),
        done,
    })
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Lines may span network chunks; comments, `event:` and `id:` lines are ignored.
#[derive(Debug, Default)]
struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Trailing line left without a newline when the body ended.
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\n', '\r']);
    text.strip_prefix("data:").map(|rest| rest.trim().to_string())
}

#[async_trait]
impl ModelGateway for OpenAiCompatibleGateway {
    fn model_name(&self) -> String {
        self.config.model.clone()
    }

    async fn stream_completion(&self, request: VisionRequest) -> ModelResult<TokenStream> {
        let body = ChatCompletionRequest::new(&self.config, &request);

        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status, body });
        }

        debug!(model = %self.config.model, "Model stream opened");
        let mut bytes = Box::pin(response.bytes_stream());

        let stream = async_stream::try_stream! {
            let mut decoder = SseLineDecoder::default();
            let mut saw_payload = false;
            let mut done = false;

            while !done {
                let chunk = match bytes.next().await {
                    Some(chunk) => chunk?,
                    None => break,
                };

                for payload in decoder.push(&chunk) {
                    saw_payload = true;
                    let parsed = parse_stream_payload(&payload)?;
                    if let Some(fragment) = parsed.fragment {
                        yield fragment;
                    }
                    if parsed.done {
                        done = true;
                        break;
                    }
                }
            }

            if !done {
                if let Some(payload) = decoder.finish() {
                    saw_payload = true;
                    let parsed = parse_stream_payload(&payload)?;
                    if let Some(fragment) = parsed.fragment {
                        yield fragment;
                    }
                }
            }

            if !saw_payload {
                Err::<(), _>(ModelError::EmptyResponse)?;
            }
        };

        Ok(Box::pin(stream))
    }
}
