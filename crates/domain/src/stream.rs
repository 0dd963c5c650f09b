//! The model-adapter contract.
//!
//! The core never talks to a provider directly; it consumes an opaque
//! [`ModelAdapter`] that turns a message history into an async stream of
//! [`AdapterEvent`]s. Adapter implementations (HTTP providers, mocks) live
//! outside this workspace.

use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::session::SessionContext;
use crate::tool::{Message, ToolCall, ToolDefinition};

/// A boxed async stream, used for adapter event streaming.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage for a completed turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Events emitted while streaming one model turn (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AdapterEvent {
    /// A chunk of assistant text.
    #[serde(rename = "assistant_delta")]
    AssistantDelta { text: String },

    /// The model wants a tool invoked; streaming is suspended until the
    /// result is fed back on the next iteration.
    #[serde(rename = "tool_call")]
    ToolCall { call: ToolCall },

    /// Token accounting, usually once near the end of the stream.
    #[serde(rename = "usage")]
    Usage { usage: Usage },

    /// Provider-side failure. Terminates the stream.
    #[serde(rename = "error")]
    Error { message: String },

    /// The turn finished cleanly.
    #[serde(rename = "done")]
    Done,
}

/// Opaque per-session handle minted by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHandle(pub String);

/// Per-turn adapter options.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Identifies the in-flight turn for [`ModelAdapter::cancel`].
    pub turn_id: Uuid,
}

/// Trait every model adapter must implement.
#[async_trait::async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Create (or resume) a provider-side session for the given context.
    async fn create_session(&self, ctx: &SessionContext) -> Result<AdapterHandle>;

    /// Stream one turn. The returned stream yields events until `Done`,
    /// `Error`, or cancellation.
    async fn send_turn(
        &self,
        handle: &AdapterHandle,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &TurnOptions,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>>;

    /// Cancel an in-flight turn. Best-effort; the stream ends shortly after.
    async fn cancel(&self, turn_id: Uuid) -> Result<()>;

    /// Release the provider-side session.
    async fn close(&self, handle: AdapterHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_event_tags() {
        let e = AdapterEvent::AssistantDelta { text: "hi".into() };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "assistant_delta");

        let json = serde_json::to_value(&AdapterEvent::Done).unwrap();
        assert_eq!(json["type"], "done");
    }
}
