//! Streaming chat against an OpenAI-compatible server (Ollama, llama.cpp,
//! vLLM and the like).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::LabsError;
use crate::runtime::{ChatEngine, ChatTurn, FragmentStream, LoadProgress, Runtime, RuntimeFactory};

/// Where to reach an OpenAI-compatible server and which model to ask for.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Error(String),
    Done,
}

/// Map one event's `data` payload to a completion event. Payloads that are
/// not completion chunks (comments, unknown JSON) yield `None`.
pub fn parse_data(data: &str) -> Option<SseEvent> {
    let data = data.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let parsed: StreamResponse = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("skipping unparseable event: {err}");
            return None;
        }
    };
    if let Some(error) = parsed.error {
        return Some(SseEvent::Error(error.message));
    }
    let choice = parsed.choices.into_iter().next()?;
    match choice.delta.content {
        Some(content) if !content.is_empty() => Some(SseEvent::Fragment(content)),
        _ if choice.finish_reason.is_some() => Some(SseEvent::Done),
        _ => None,
    }
}

/// Turn a `text/event-stream` body into text fragments in arrival order. The
/// stream ends at `[DONE]`, a finish reason, a server error, or the end of
/// the body.
pub fn fragments(bytes: BoxStream<'static, Result<Vec<u8>>>) -> FragmentStream {
    let events = bytes.eventsource().boxed();
    futures::stream::unfold(Some(events), |events| async move {
        let mut events = events?;
        loop {
            let event = match events.next().await? {
                Ok(event) => event,
                Err(EventStreamError::Transport(err)) => return Some((Err(err), None)),
                Err(err) => return Some((Err(anyhow!("malformed event stream: {err}")), None)),
            };
            match parse_data(&event.data) {
                Some(SseEvent::Fragment(text)) => return Some((Ok(text), Some(events))),
                Some(SseEvent::Error(message)) => return Some((Err(anyhow!(message)), None)),
                Some(SseEvent::Done) => return None,
                None => continue,
            }
        }
    })
    .boxed()
}

fn authorize(req: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) if !key.is_empty() => req.header("Authorization", format!("Bearer {key}")),
        _ => req,
    }
}

/// Connects to the chat server and checks the configured model is served.
/// The server picks its own device, so the backend choice does not apply.
pub struct OpenAiChatFactory {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChatFactory {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl RuntimeFactory for OpenAiChatFactory {
    type Runtime = OpenAiChat;

    async fn load(&self, _backend: Backend, progress: &LoadProgress) -> Result<OpenAiChat, LabsError> {
        let base = self.config.base_url.trim_end_matches('/');
        progress.report(0.2, format!("Connecting to {base}"));

        let list = async {
            let resp = authorize(self.client.get(format!("{base}/models")), self.config.api_key.as_deref())
                .send()
                .await
                .with_context(|| format!("failed to reach {base}"))?;
            let status = resp.status();
            if !status.is_success() {
                bail!("{base}/models returned {status}");
            }
            resp.json::<ModelList>().await.context("unexpected model list")
        }
        .await
        .map_err(|e| LabsError::runtime_load(e.context("Error loading model")))?;

        if !list.data.iter().any(|m| m.id == self.config.model) {
            return Err(LabsError::RuntimeLoad(format!(
                "Error loading model: {} is not served by {base}",
                self.config.model
            )));
        }
        progress.report(1.0, "Model available");
        progress.log(format!("Loaded model {}", self.config.model));
        info!(model = %self.config.model, %base, "chat model ready");

        Ok(OpenAiChat {
            client: self.client.clone(),
            config: OpenAiConfig {
                base_url: base.to_string(),
                ..self.config.clone()
            },
        })
    }
}

pub struct OpenAiChat {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl Runtime for OpenAiChat {}

#[async_trait]
impl ChatEngine for OpenAiChat {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream_chat(&self, turns: Vec<ChatTurn>) -> Result<FragmentStream> {
        let body = CompletionRequest {
            model: &self.config.model,
            messages: &turns,
            stream: true,
        };
        let req = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        let resp = authorize(req, self.config.api_key.as_deref())
            .send()
            .await
            .context("chat request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat server returned {status}: {text}");
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(anyhow::Error::from))
            .boxed();
        Ok(fragments(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!("data: {{\"choices\":[{{\"delta\":{{\"content\":{content:?}}},\"finish_reason\":null}}]}}\n\n")
    }

    fn body(parts: Vec<&[u8]>) -> BoxStream<'static, Result<Vec<u8>>> {
        let owned: Vec<Result<Vec<u8>>> = parts.into_iter().map(|p| Ok(p.to_vec())).collect();
        futures::stream::iter(owned).boxed()
    }

    async fn collect_ok(stream: FragmentStream) -> Vec<String> {
        stream.map(|r| r.unwrap()).collect().await
    }

    #[test]
    fn data_payloads_map_to_events() {
        assert_eq!(parse_data("[DONE]"), Some(SseEvent::Done));
        assert_eq!(
            parse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            Some(SseEvent::Done)
        );
        assert_eq!(
            parse_data(r#"{"error":{"message":"model unloaded"}}"#),
            Some(SseEvent::Error("model unloaded".to_string()))
        );
        assert_eq!(
            parse_data(r#"{"choices":[{"delta":{"content":"hi"}}]}"#),
            Some(SseEvent::Fragment("hi".to_string()))
        );
        assert_eq!(parse_data(r#"{"choices":[{"delta":{"content":""}}]}"#), None);
        assert_eq!(parse_data("not json"), None);
    }

    #[tokio::test]
    async fn fragments_arrive_in_order_and_stop_at_done() {
        let a = chunk("Web");
        let b = chunk("GPU");
        let stream = fragments(body(vec![
            a.as_bytes(),
            b.as_bytes(),
            b"data: [DONE]\n\n",
            chunk("ignored").as_bytes(),
        ]));
        assert_eq!(collect_ok(stream).await, ["Web", "GPU"]);
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let line = chunk("hello");
        let (head, tail) = line.split_at(line.len() / 2);
        let stream = fragments(body(vec![head.as_bytes(), tail.as_bytes(), b"data: [DONE]\n\n"]));
        assert_eq!(collect_ok(stream).await, ["hello"]);
    }

    #[tokio::test]
    async fn multi_line_data_is_joined_before_parsing() {
        let stream = fragments(body(vec![
            &b": keep-alive\n\n"[..],
            b"event: message\ndata: {\"choices\":[{\"delta\":{\"content\":\"multi\"}}\ndata: ]}\n\n",
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            chunk("ignored").as_bytes(),
        ]));
        assert_eq!(collect_ok(stream).await, ["multi"]);
    }

    #[tokio::test]
    async fn server_error_ends_the_stream_with_an_error() {
        let first = chunk("partial");
        let mut stream = fragments(body(vec![
            first.as_bytes(),
            b"data: {\"error\":{\"message\":\"out of memory\"}}\n\n",
        ]));
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "out of memory");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_errors_surface_unchanged() {
        let first = chunk("partial");
        let parts: Vec<Result<Vec<u8>>> = vec![
            Ok(first.into_bytes()),
            Err(anyhow!("connection reset")),
        ];
        let mut stream = fragments(futures::stream::iter(parts).boxed());
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert_eq!(stream.next().await.unwrap().unwrap_err().to_string(), "connection reset");
        assert!(stream.next().await.is_none());
    }
}
