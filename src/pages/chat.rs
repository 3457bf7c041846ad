use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::LabsError;
use crate::page::{PageController, PageStatus};
use crate::pages::Lifecycle;
use crate::runtime::{ChatEngine, ChatTurn, RuntimeFactory};
use crate::types::ChatMessage;

pub const DEFAULT_PROMPT: &str = "Explain WebGPU in two sentences.";

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatView {
    pub messages: Vec<ChatMessage>,
    /// The assistant message currently receiving fragments.
    pub in_progress: Option<Uuid>,
}

impl ChatView {
    /// Append `delta` to the in-progress reply, starting one if needed.
    fn append_fragment(&mut self, delta: &str) -> Uuid {
        if let Some(id) = self.in_progress {
            if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                message.content.push_str(delta);
                return id;
            }
        }
        let message = ChatMessage::assistant(delta);
        let id = message.id;
        self.messages.push(message);
        self.in_progress = Some(id);
        id
    }

    /// Close the in-progress reply and return it.
    fn finalize(&mut self) -> Option<ChatMessage> {
        let id = self.in_progress.take()?;
        self.messages.iter().find(|m| m.id == id).cloned()
    }

    /// Drop the in-progress reply after a failed stream.
    fn discard_partial(&mut self) {
        if let Some(id) = self.in_progress.take() {
            self.messages.retain(|m| m.id != id);
        }
    }
}

/// Streaming progress forwarded to the desktop view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatStreamEvent {
    pub message_id: Option<Uuid>,
    pub delta: String,
    pub done: bool,
}

/// Conversation with a chat engine. The engine is remote, so the page keeps
/// its runtime across backend changes.
pub struct ChatPage<F: RuntimeFactory> {
    controller: PageController<F, ChatView>,
    model: String,
}

impl<F> ChatPage<F>
where
    F: RuntimeFactory,
    F::Runtime: ChatEngine,
{
    pub fn new(factory: F, backend: Backend, model: impl Into<String>) -> Self {
        Self {
            controller: PageController::new(factory, backend),
            model: model.into(),
        }
    }

    pub fn controller(&self) -> &PageController<F, ChatView> {
        &self.controller
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.controller.view(|view| view.messages.clone())
    }

    /// Send `input` and stream the reply into the conversation. Returns the
    /// finished assistant message, or `None` when the reply was empty or the
    /// page moved on first.
    pub async fn send<E>(&self, input: &str, mut on_event: E) -> Result<Option<ChatMessage>, LabsError>
    where
        E: FnMut(ChatStreamEvent) + Send,
    {
        let text = input.trim().to_string();
        if text.is_empty() {
            return Err(LabsError::Action("Type a message first.".to_string()));
        }

        let outcome = self
            .controller
            .act(move |engine, scope| async move {
                scope.apply(|view| view.messages.push(ChatMessage::user(text.clone())));

                let mut stream = match engine.stream_chat(vec![ChatTurn::user(text)]).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        scope.log(format!("Error: {err:#}"));
                        return Err(LabsError::action(err));
                    }
                };

                let mut fragments = 0usize;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(delta) if delta.is_empty() => continue,
                        Ok(delta) => {
                            let Some(id) = scope.apply(|view| view.append_fragment(&delta)) else {
                                on_event(ChatStreamEvent {
                                    message_id: None,
                                    delta: String::new(),
                                    done: true,
                                });
                                return Ok(None);
                            };
                            fragments += 1;
                            on_event(ChatStreamEvent {
                                message_id: Some(id),
                                delta,
                                done: false,
                            });
                        }
                        Err(err) => {
                            scope.apply(ChatView::discard_partial);
                            scope.log(format!("Error: {err:#}"));
                            on_event(ChatStreamEvent {
                                message_id: None,
                                delta: String::new(),
                                done: true,
                            });
                            return Err(LabsError::action(err));
                        }
                    }
                }

                let reply = scope.apply(ChatView::finalize).flatten();
                scope.log(format!("Response tokens: {fragments}"));
                on_event(ChatStreamEvent {
                    message_id: reply.as_ref().map(|m| m.id),
                    delta: String::new(),
                    done: true,
                });
                Ok(reply)
            })
            .await?;
        Ok(outcome.flatten())
    }

    /// Clear the conversation but keep the engine loaded. Rejected while a
    /// reply is streaming.
    pub fn reset(&self) -> Result<(), LabsError> {
        let model = &self.model;
        self.controller.edit_view(|view, logs| {
            *view = ChatView::default();
            let mut kept = vec![format!("Reset conversation. Model {model} stays in memory.")];
            kept.extend(logs.iter().filter(|line| line.starts_with("Loaded")).cloned());
            *logs = kept;
        })
    }
}

#[async_trait]
impl<F> Lifecycle for ChatPage<F>
where
    F: RuntimeFactory,
    F::Runtime: ChatEngine,
{
    async fn mount(&self, backend: Backend) {
        self.controller.mount(backend).await;
    }

    fn unmount(&self) {
        self.controller.unmount();
    }

    async fn set_backend(&self, _backend: Backend) {}

    fn follows_backend(&self) -> bool {
        false
    }

    fn status(&self) -> PageStatus {
        self.controller.status()
    }
}
