//! Structured call lifecycle eventlog
//!
//! One fire-and-forget event per lifecycle milestone, with a stable name
//! vocabulary. Operators observe the call pipeline exclusively through this
//! stream; the caller never hears raw errors.

use serde_json::{json, Value};

use crate::call::CallId;

/// Lifecycle event vocabulary
///
/// Variant names map 1:1 to the stable wire names returned by [`CallEvent::name`].
#[derive(Debug, Clone)]
pub enum CallEvent {
    CallStarted { tenant: String },
    SttResult { text: String, confidence: f32, speech_final: bool },
    TurnFinalized { turn_id: u64, speaker: &'static str, chars: usize, interrupted: bool },
    BargeIn { turn_id: u64 },
    FillerDecision { decision: bool, elapsed_ms: u64 },
    FillerSpoken { phrase: String },
    FillerSkipped,
    LlmStarted { turn_id: u64 },
    LlmFirstToken { latency_ms: u64 },
    LlmCompleted { latency_ms: u64, chars: usize },
    LlmError { error: String },
    SentenceExtracted { chars: usize },
    TtsStarted { chars: usize },
    TtsFirstChunk { latency_ms: u64 },
    TtsCompleted { chunks: u64 },
    TtsError { error: String },
    GoodbyeDetected,
    ForwardDetected { destination: String },
    CallForwarded { destination: String },
    CallHangup { by: &'static str },
    CallEnded { cause: &'static str, duration_ms: u64, turns: u64 },
    VadSpeechStarted,
    VadUtteranceEnd { chars: usize },
    MaxTurnTimeout { turn_id: u64 },
    SttEmptyStreak { streak: u32 },
    AudioSilenceDetected { silent_ms: u64 },
    RobocallSignal { reason: String },
}

impl CallEvent {
    /// Stable event name
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::CallStarted { .. } => "call_started",
            CallEvent::SttResult { .. } => "stt_result",
            CallEvent::TurnFinalized { .. } => "turn_finalized",
            CallEvent::BargeIn { .. } => "barge_in",
            CallEvent::FillerDecision { .. } => "filler_decision",
            CallEvent::FillerSpoken { .. } => "filler_spoken",
            CallEvent::FillerSkipped => "filler_skipped",
            CallEvent::LlmStarted { .. } => "llm_started",
            CallEvent::LlmFirstToken { .. } => "llm_first_token",
            CallEvent::LlmCompleted { .. } => "llm_completed",
            CallEvent::LlmError { .. } => "llm_error",
            CallEvent::SentenceExtracted { .. } => "sentence_extracted",
            CallEvent::TtsStarted { .. } => "tts_started",
            CallEvent::TtsFirstChunk { .. } => "tts_first_chunk",
            CallEvent::TtsCompleted { .. } => "tts_completed",
            CallEvent::TtsError { .. } => "tts_error",
            CallEvent::GoodbyeDetected => "goodbye_detected",
            CallEvent::ForwardDetected { .. } => "forward_detected",
            CallEvent::CallForwarded { .. } => "call_forwarded",
            CallEvent::CallHangup { .. } => "call_hangup",
            CallEvent::CallEnded { .. } => "call_ended",
            CallEvent::VadSpeechStarted => "vad_speech_started",
            CallEvent::VadUtteranceEnd { .. } => "vad_utterance_end",
            CallEvent::MaxTurnTimeout { .. } => "max_turn_timeout",
            CallEvent::SttEmptyStreak { .. } => "stt_empty_streak",
            CallEvent::AudioSilenceDetected { .. } => "audio_silence_detected",
            CallEvent::RobocallSignal { .. } => "robocall_signal",
        }
    }

    /// Event-specific key/value data
    pub fn data(&self) -> Value {
        match self {
            CallEvent::CallStarted { tenant } => json!({ "tenant": tenant }),
            CallEvent::SttResult { text, confidence, speech_final } => {
                json!({ "text": text, "confidence": confidence, "speech_final": speech_final })
            }
            CallEvent::TurnFinalized { turn_id, speaker, chars, interrupted } => {
                json!({ "turn_id": turn_id, "speaker": speaker, "chars": chars, "interrupted": interrupted })
            }
            CallEvent::BargeIn { turn_id } => json!({ "turn_id": turn_id }),
            CallEvent::FillerDecision { decision, elapsed_ms } => {
                json!({ "decision": decision, "elapsed_ms": elapsed_ms })
            }
            CallEvent::FillerSpoken { phrase } => json!({ "phrase": phrase }),
            CallEvent::FillerSkipped => json!({}),
            CallEvent::LlmStarted { turn_id } => json!({ "turn_id": turn_id }),
            CallEvent::LlmFirstToken { latency_ms } => json!({ "latency_ms": latency_ms }),
            CallEvent::LlmCompleted { latency_ms, chars } => {
                json!({ "latency_ms": latency_ms, "chars": chars })
            }
            CallEvent::LlmError { error } => json!({ "error": error }),
            CallEvent::SentenceExtracted { chars } => json!({ "chars": chars }),
            CallEvent::TtsStarted { chars } => json!({ "chars": chars }),
            CallEvent::TtsFirstChunk { latency_ms } => json!({ "latency_ms": latency_ms }),
            CallEvent::TtsCompleted { chunks } => json!({ "chunks": chunks }),
            CallEvent::TtsError { error } => json!({ "error": error }),
            CallEvent::GoodbyeDetected => json!({}),
            CallEvent::ForwardDetected { destination } => json!({ "destination": destination }),
            CallEvent::CallForwarded { destination } => json!({ "destination": destination }),
            CallEvent::CallHangup { by } => json!({ "by": by }),
            CallEvent::CallEnded { cause, duration_ms, turns } => {
                json!({ "cause": cause, "duration_ms": duration_ms, "turns": turns })
            }
            CallEvent::VadSpeechStarted => json!({}),
            CallEvent::VadUtteranceEnd { chars } => json!({ "chars": chars }),
            CallEvent::MaxTurnTimeout { turn_id } => json!({ "turn_id": turn_id }),
            CallEvent::SttEmptyStreak { streak } => json!({ "streak": streak }),
            CallEvent::AudioSilenceDetected { silent_ms } => json!({ "silent_ms": silent_ms }),
            CallEvent::RobocallSignal { reason } => json!({ "reason": reason }),
        }
    }
}

/// Destination for lifecycle events
///
/// Emission is fire-and-forget; a sink must never block the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, call_id: &CallId, event: CallEvent);
}

/// Default sink: one structured tracing record per event
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, call_id: &CallId, event: CallEvent) {
        tracing::info!(
            target: "eventlog",
            call_id = %call_id,
            event = event.name(),
            data = %event.data(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_stable() {
        let ev = CallEvent::TurnFinalized {
            turn_id: 3,
            speaker: "caller",
            chars: 12,
            interrupted: false,
        };
        assert_eq!(ev.name(), "turn_finalized");
        assert_eq!(ev.data()["turn_id"], 3);

        assert_eq!(CallEvent::FillerSkipped.name(), "filler_skipped");
        assert_eq!(
            CallEvent::MaxTurnTimeout { turn_id: 1 }.name(),
            "max_turn_timeout"
        );
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let sink = TracingEventSink;
        sink.emit(&CallId::generate(), CallEvent::GoodbyeDetected);
    }
}
