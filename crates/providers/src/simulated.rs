//! Simulated providers
//!
//! Deterministic local stand-ins for the vendor adapters, used by the dev
//! server and by session tests. The simulated LLM cycles through canned
//! replies; the simulated TTS produces silence-shaped PCM; the scripted STT
//! is driven externally by tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use call_agent_config::VoiceConfig;
use call_agent_core::TranscriptEvent;

use crate::llm::{CallAnalysis, ChatMessage, LlmProvider, TokenResult};
use crate::stt::{SttProvider, SttResult, SttStream};
use crate::tts::{AudioChunk, TtsProvider};
use crate::ProviderError;

/// LLM that cycles through canned replies, streamed word by word
pub struct SimulatedLlm {
    replies: Vec<String>,
    next_reply: AtomicUsize,
    first_token_delay: Duration,
    token_delay: Duration,
}

impl SimulatedLlm {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            next_reply: AtomicUsize::new(0),
            first_token_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
        }
    }

    /// Delay before the first fragment; lets tests exercise the filler path
    pub fn with_first_token_delay(mut self, delay: Duration) -> Self {
        self.first_token_delay = delay;
        self
    }

    /// Delay between fragments
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

#[async_trait]
impl LlmProvider for SimulatedLlm {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<TokenResult>, ProviderError> {
        if self.replies.is_empty() {
            return Err(ProviderError::Llm("no canned replies".to_string()));
        }

        let idx = self.next_reply.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        let reply = self.replies[idx].clone();
        let first_delay = self.first_token_delay;
        let token_delay = self.token_delay;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if !first_delay.is_zero() {
                tokio::time::sleep(first_delay).await;
            }
            // Stream word by word, keeping trailing whitespace attached
            // so concatenation reproduces the reply exactly.
            let mut rest = reply.as_str();
            while !rest.is_empty() {
                let cut = rest
                    .find(char::is_whitespace)
                    .map(|i| {
                        i + rest[i..].find(|c: char| !c.is_whitespace()).unwrap_or(rest.len() - i)
                    })
                    .unwrap_or(rest.len());
                let (frag, tail) = rest.split_at(cut);
                if tx.send(Ok(frag.to_string())).await.is_err() {
                    return; // receiver dropped: generation cancelled
                }
                rest = tail;
                if !token_delay.is_zero() {
                    tokio::time::sleep(token_delay).await;
                }
            }
        });

        Ok(rx)
    }

    async fn analyze_call(&self, messages: &[ChatMessage]) -> Result<CallAnalysis, ProviderError> {
        Ok(CallAnalysis {
            category: "human".to_string(),
            confidence: 0.5,
            summary: format!("{} messages", messages.len()),
        })
    }
}

/// TTS that emits silence PCM sized proportionally to the text
pub struct SimulatedTts {
    bytes_per_char: usize,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl SimulatedTts {
    pub fn new() -> Self {
        Self {
            bytes_per_char: 160,
            chunk_size: 1600,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }
}

impl Default for SimulatedTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for SimulatedTts {
    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<Vec<u8>, ProviderError> {
        Ok(vec![0u8; text.chars().count().max(1) * self.bytes_per_char])
    }

    async fn synthesize_stream(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Result<mpsc::Receiver<AudioChunk>, ProviderError> {
        let audio = self.synthesize(text, voice).await?;
        let chunk_size = self.chunk_size;
        let chunk_delay = self.chunk_delay;

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for chunk in audio.chunks(chunk_size) {
                if tx.send(Ok(chunk.to_vec())).await.is_err() {
                    return; // receiver dropped: synthesis cancelled
                }
                if !chunk_delay.is_zero() {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
        });

        Ok(rx)
    }
}

/// Dev loopback STT: treats each audio frame as UTF-8 text
///
/// Lets the dev server be exercised with plain text in the media payload
/// instead of real speech.
#[derive(Default)]
pub struct LoopbackStt;

#[async_trait]
impl SttProvider for LoopbackStt {
    async fn open(&self, _language: &str) -> Result<SttStream, ProviderError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (events_tx, events_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                let Ok(text) = String::from_utf8(frame) else { continue };
                if text.trim().is_empty() {
                    continue;
                }
                if events_tx
                    .send(Ok(TranscriptEvent::end_of_utterance(text.trim(), 1.0)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });

        Ok(SttStream { audio: audio_tx, events: events_rx })
    }
}

struct ScriptedSttInner {
    current: Mutex<Option<mpsc::Sender<SttResult>>>,
    opens: AtomicUsize,
    audio_bytes: AtomicUsize,
}

/// Externally driven STT, for tests
///
/// Each `open` installs a fresh result channel; the paired [`SttScript`]
/// handle feeds events into whichever stream is currently open.
pub struct ScriptedStt {
    inner: Arc<ScriptedSttInner>,
}

/// Test-side handle driving a [`ScriptedStt`]
#[derive(Clone)]
pub struct SttScript {
    inner: Arc<ScriptedSttInner>,
}

impl ScriptedStt {
    pub fn new() -> (Self, SttScript) {
        let inner = Arc::new(ScriptedSttInner {
            current: Mutex::new(None),
            opens: AtomicUsize::new(0),
            audio_bytes: AtomicUsize::new(0),
        });
        (Self { inner: inner.clone() }, SttScript { inner })
    }
}

#[async_trait]
impl SttProvider for ScriptedStt {
    async fn open(&self, _language: &str) -> Result<SttStream, ProviderError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (events_tx, events_rx) = mpsc::channel(64);

        self.inner.opens.fetch_add(1, Ordering::Relaxed);
        *self.inner.current.lock().await = Some(events_tx);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                inner.audio_bytes.fetch_add(frame.len(), Ordering::Relaxed);
            }
        });

        Ok(SttStream { audio: audio_tx, events: events_rx })
    }
}

impl SttScript {
    /// Emit a transcript event on the currently open stream
    pub async fn say(&self, event: TranscriptEvent) {
        if let Some(tx) = self.inner.current.lock().await.as_ref() {
            let _ = tx.send(Ok(event)).await;
        }
    }

    /// Emit a provider error on the currently open stream
    pub async fn fail(&self, error: ProviderError) {
        if let Some(tx) = self.inner.current.lock().await.as_ref() {
            let _ = tx.send(Err(error)).await;
        }
    }

    /// Close the current result stream, simulating an unexpected provider drop
    pub async fn close(&self) {
        self.inner.current.lock().await.take();
    }

    /// How many streams have been opened (observes reconnects)
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::Relaxed)
    }

    /// Total audio bytes drained from the session
    pub fn audio_bytes(&self) -> usize {
        self.inner.audio_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_llm_streams_reply_exactly() {
        let llm = SimulatedLlm::new(vec!["Hello there. How are you?".to_string()]);
        let mut rx = llm.generate(&[]).await.unwrap();

        let mut text = String::new();
        while let Some(frag) = rx.recv().await {
            text.push_str(&frag.unwrap());
        }
        assert_eq!(text, "Hello there. How are you?");
    }

    #[tokio::test]
    async fn test_simulated_llm_cycles_replies() {
        let llm = SimulatedLlm::new(vec!["a.".to_string(), "b.".to_string()]);

        for expected in ["a.", "b.", "a."] {
            let mut rx = llm.generate(&[]).await.unwrap();
            let mut text = String::new();
            while let Some(frag) = rx.recv().await {
                text.push_str(&frag.unwrap());
            }
            assert_eq!(text, expected);
        }
    }

    #[tokio::test]
    async fn test_simulated_tts_chunks() {
        let tts = SimulatedTts::new();
        let mut rx = tts
            .synthesize_stream("hello", &VoiceConfig::default())
            .await
            .unwrap();

        let mut total = 0;
        while let Some(chunk) = rx.recv().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 5 * 160);
    }

    #[tokio::test]
    async fn test_scripted_stt_routes_to_latest_stream() {
        let (stt, script) = ScriptedStt::new();

        let mut first = stt.open("en").await.unwrap();
        let mut second = stt.open("en").await.unwrap();
        assert_eq!(script.opens(), 2);

        script.say(TranscriptEvent::partial("hi", 0.9)).await;
        let ev = second.events.recv().await.unwrap().unwrap();
        assert_eq!(ev.text, "hi");

        // First stream was replaced; its sender is gone, so it reads closed.
        assert!(first.events.try_recv().is_err());
    }
}
