//! Streaming language model adapter

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ProviderError;

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the conversation context
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// One item on the token stream
pub type TokenResult = Result<String, ProviderError>;

/// Post-call screening result; out of the real-time critical path
#[derive(Debug, Clone)]
pub struct CallAnalysis {
    /// Coarse category, e.g. "human", "sales", "robocall"
    pub category: String,
    pub confidence: f32,
    pub summary: String,
}

/// Streaming LLM provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response as text fragments; the channel closes when
    /// generation finishes. Dropping the receiver cancels generation.
    async fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<TokenResult>, ProviderError>;

    /// Classify a finished call from its transcript
    async fn analyze_call(&self, messages: &[ChatMessage]) -> Result<CallAnalysis, ProviderError>;
}
