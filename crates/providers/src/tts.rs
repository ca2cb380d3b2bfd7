//! Streaming text-to-speech adapter

use async_trait::async_trait;
use tokio::sync::mpsc;

use call_agent_config::VoiceConfig;

use crate::ProviderError;

/// One item on the audio chunk stream
pub type AudioChunk = Result<Vec<u8>, ProviderError>;

/// Streaming TTS provider
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize a whole utterance at once; used rarely (previews)
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<Vec<u8>, ProviderError>;

    /// Stream audio chunks as they are synthesized; the channel closes when
    /// synthesis finishes. Dropping the receiver stops further emission.
    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<mpsc::Receiver<AudioChunk>, ProviderError>;
}
