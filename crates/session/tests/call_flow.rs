//! End-to-end call flow tests over the in-process transport
//!
//! The peer endpoint plays the telephony provider, the scripted STT plays the
//! recognizer, and the simulated LLM/TTS complete the pipeline. Timing knobs
//! are shrunk so the adaptive endpointing fires within milliseconds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use call_agent_config::{
    EndpointingConfig, FillerConfig, RobocallAction, RobocallConfig, TenantConfig,
};
use call_agent_core::{CallEvent, CallId, EventSink, Speaker, TerminalCause, TranscriptEvent};
use call_agent_persistence::MemoryCallStore;
use call_agent_providers::{
    CallAnalysis, ChatMessage, ChatRole, LlmProvider, ProviderError, ScriptedStt, SimulatedLlm,
    SimulatedTts, SttScript, TokenResult,
};
use call_agent_session::{CallRegistry, CallSession, CallSummary, Providers};
use call_agent_telephony::{in_process, OutboundFrame, PeerEndpoint};

/// Event sink capturing the full eventlog for assertions
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingSink {
    fn has(&self, name: &str) -> bool {
        self.events.lock().iter().any(|(n, _)| n == name)
    }

    fn find(&self, name: &str) -> Option<serde_json::Value> {
        self.events
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, _call_id: &CallId, event: CallEvent) {
        self.events
            .lock()
            .push((event.name().to_string(), event.data()));
    }
}

/// LLM recording every conversation history it is asked to complete
struct RecordingLlm {
    inner: SimulatedLlm,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl LlmProvider for RecordingLlm {
    async fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<TokenResult>, ProviderError> {
        self.histories.lock().push(messages.to_vec());
        self.inner.generate(messages).await
    }

    async fn analyze_call(&self, messages: &[ChatMessage]) -> Result<CallAnalysis, ProviderError> {
        self.inner.analyze_call(messages).await
    }
}

struct Harness {
    peer: PeerEndpoint,
    script: SttScript,
    store: Arc<MemoryCallStore>,
    sink: Arc<RecordingSink>,
    registry: Arc<CallRegistry>,
    call_id: CallId,
    handle: tokio::task::JoinHandle<CallSummary>,
}

fn fast_endpointing() -> EndpointingConfig {
    EndpointingConfig {
        base_ms: 80,
        min_ms: 40,
        per_char_decay_ms: 1,
        sentence_end_bonus_ms: 10,
        max_turn_timeout_ms: 3_000,
    }
}

fn robocall_off() -> RobocallConfig {
    RobocallConfig {
        silence_threshold_ms: 0,
        barge_in_threshold: 0,
        repetition_threshold: 0,
        ..RobocallConfig::default()
    }
}

fn tenant(greeting: &str, robocall: RobocallConfig) -> TenantConfig {
    TenantConfig {
        greeting: greeting.to_string(),
        endpointing: fast_endpointing(),
        filler: FillerConfig {
            probability: 0.0,
            first_token_delay_ms: 50,
            ..FillerConfig::default()
        },
        robocall,
        ..TenantConfig::default()
    }
}

async fn start_call(tenant: TenantConfig, llm: Arc<dyn LlmProvider>) -> Harness {
    let (stt, script) = ScriptedStt::new();
    let providers = Providers {
        stt: Arc::new(stt),
        llm,
        tts: Arc::new(SimulatedTts::new()),
    };

    let store = Arc::new(MemoryCallStore::new());
    let sink = Arc::new(RecordingSink::default());
    let registry = CallRegistry::new();
    let call_id = CallId::generate();

    let (peer, source, playback) = in_process(1024);
    let guard = registry.register().expect("registry accepts the call");
    let session = CallSession::new(
        call_id.clone(),
        tenant,
        providers,
        store.clone(),
        sink.clone(),
        guard,
    )
    .expect("tenant config is valid");

    let handle = tokio::spawn(session.run(Box::new(source), Arc::new(playback)));

    wait_for(|| script.opens() >= 1).await;

    Harness {
        peer,
        script,
        store,
        sink,
        registry,
        call_id,
        handle,
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

async fn recv_until(peer: &mut PeerEndpoint, want: impl Fn(&OutboundFrame) -> bool) {
    timeout(Duration::from_secs(5), async {
        while let Some(frame) = peer.recv().await {
            if want(&frame) {
                return;
            }
        }
        panic!("outbound stream closed before the expected frame");
    })
    .await
    .expect("expected outbound frame within 5s");
}

#[tokio::test]
async fn test_greeting_then_one_turn_then_caller_hangup() {
    let llm = SimulatedLlm::new(vec!["I can take a message for you.".to_string()]);
    let mut h = start_call(tenant("Hello.", robocall_off()), Arc::new(llm)).await;

    // Greeting audio reaches the wire and the greeting turn is persisted.
    recv_until(&mut h.peer, |f| matches!(f, OutboundFrame::Media { .. })).await;
    let store = h.store.clone();
    let call_id = h.call_id.clone();
    wait_for(move || store.get(&call_id).map(|r| !r.turns.is_empty()).unwrap_or(false)).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("I want to leave a message", 0.9))
        .await;

    let store = h.store.clone();
    let call_id = h.call_id.clone();
    wait_for(move || store.get(&call_id).map(|r| r.turns.len() >= 3).unwrap_or(false)).await;

    h.peer.hangup();
    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("call ends")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::CallerHangup);

    let record = h.store.get(&h.call_id).unwrap();
    assert_eq!(record.cause, Some(TerminalCause::CallerHangup));
    assert_eq!(record.turns.len(), 3);

    // Sequence numbers interleave both speakers in completion order.
    let seqs: Vec<u64> = record.turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(record.turns[0].speaker, Speaker::Agent);
    assert_eq!(record.turns[0].text, "Hello.");
    assert_eq!(record.turns[1].speaker, Speaker::Caller);
    assert_eq!(record.turns[1].text, "I want to leave a message");
    assert_eq!(record.turns[1].confidence, Some(0.9));
    assert_eq!(record.turns[2].speaker, Speaker::Agent);
    assert!(!record.turns[2].interrupted);

    assert!(h.sink.has("call_started"));
    assert!(h.sink.has("vad_speech_started"));
    assert!(h.sink.has("vad_utterance_end"));
    assert!(h.sink.has("sentence_extracted"));
    assert!(h.sink.has("call_hangup"));
    assert!(h.sink.has("call_ended"));

    assert_eq!(h.registry.active_count(), 0);
}

#[tokio::test]
async fn test_barge_in_clears_playback_and_marks_turn_interrupted() {
    let llm = SimulatedLlm::new(vec![
        "Let me explain this in a great amount of detail. There are many things to cover here."
            .to_string(),
        "Okay, goodbye. <hangup/>".to_string(),
    ])
    .with_token_delay(Duration::from_millis(50));
    let mut h = start_call(tenant("", robocall_off()), Arc::new(llm)).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("hello", 0.9))
        .await;

    // Wait for agent audio, then barge in mid-playback.
    recv_until(&mut h.peer, |f| matches!(f, OutboundFrame::Media { .. })).await;
    h.script
        .say(TranscriptEvent::partial("wait wait", 0.5))
        .await;

    recv_until(&mut h.peer, |f| matches!(f, OutboundFrame::Clear)).await;

    // Discard whatever was already in flight at cancellation, then verify the
    // cancelled turn produces no further audio behind the clear.
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.peer.drain();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        h.peer
            .drain()
            .iter()
            .all(|f| !matches!(f, OutboundFrame::Media { .. })),
        "stale audio arrived after the clear frame"
    );

    h.script
        .say(TranscriptEvent::end_of_utterance("stop calling me", 0.9))
        .await;

    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("agent hangs up")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::AgentHangup);

    let record = h.store.get(&h.call_id).unwrap();
    assert!(record.turns.iter().any(|t| t.interrupted));

    let last = record.turns.last().unwrap();
    assert_eq!(last.speaker, Speaker::Agent);
    assert!(!last.interrupted);
    assert_eq!(last.text, "Okay, goodbye.");
    // Turn timestamps span the streamed generation, not a single instant.
    assert!(last.ended_at - last.started_at >= chrono::Duration::milliseconds(50));

    assert!(h.sink.has("barge_in"));
    assert!(h.sink.has("goodbye_detected"));
    assert_eq!(h.sink.find("call_hangup").unwrap()["by"], "agent");
}

#[tokio::test]
async fn test_prolonged_silence_classified_as_robocall() {
    let robocall = RobocallConfig {
        silence_threshold_ms: 200,
        min_agent_turns: 1,
        barge_in_threshold: 0,
        repetition_threshold: 0,
        action: RobocallAction::Hangup,
        ..RobocallConfig::default()
    };
    let llm = SimulatedLlm::new(vec!["Anyone there?".to_string()]);
    let h = start_call(tenant("Hello.", robocall), Arc::new(llm)).await;

    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("silence ends the call")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::RobocallDetected);

    let signal = h.sink.find("robocall_signal").unwrap();
    assert_eq!(signal["reason"], "prolonged_silence");

    let record = h.store.get(&h.call_id).unwrap();
    assert_eq!(record.cause, Some(TerminalCause::RobocallDetected));
}

#[tokio::test]
async fn test_stt_stream_loss_reconnects_once_then_fails() {
    let llm = SimulatedLlm::new(vec!["Sure.".to_string()]);
    let h = start_call(tenant("", robocall_off()), Arc::new(llm)).await;

    // First loss: the session opens a replacement stream.
    h.script.close().await;
    let script = h.script.clone();
    wait_for(move || script.opens() >= 2).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("are you there", 0.8))
        .await;
    let store = h.store.clone();
    let call_id = h.call_id.clone();
    wait_for(move || store.get(&call_id).map(|r| r.turns.len() >= 2).unwrap_or(false)).await;

    // Second loss is terminal.
    h.script.close().await;
    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("second loss ends the call")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::Error);
    assert_eq!(h.script.opens(), 2);
}

#[tokio::test]
async fn test_forward_directive_ends_call() {
    let llm = SimulatedLlm::new(vec![
        r#"Connecting you now. <forward to="owner"/>"#.to_string(),
    ]);
    let h = start_call(tenant("", robocall_off()), Arc::new(llm)).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("can I talk to a human", 0.9))
        .await;

    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("forward ends the call")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::Forwarded);
    assert_eq!(h.sink.find("call_forwarded").unwrap()["destination"], "owner");

    // The directive tag itself is never spoken.
    let record = h.store.get(&h.call_id).unwrap();
    let agent_turn = record.turns.last().unwrap();
    assert!(!agent_turn.text.contains("forward"));
}

#[tokio::test]
async fn test_greeting_enters_history_exactly_once() {
    let llm = Arc::new(RecordingLlm {
        inner: SimulatedLlm::new(vec!["Noted.".to_string()]),
        histories: Mutex::new(Vec::new()),
    });
    let h = start_call(tenant("Hello.", robocall_off()), llm.clone()).await;

    // Let the greeting turn complete before the caller speaks.
    let store = h.store.clone();
    let call_id = h.call_id.clone();
    wait_for(move || store.get(&call_id).map(|r| !r.turns.is_empty()).unwrap_or(false)).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("hi there", 0.9))
        .await;
    let recorded = llm.clone();
    wait_for(move || !recorded.histories.lock().is_empty()).await;

    let history = llm.histories.lock()[0].clone();
    assert_eq!(history[0].role, ChatRole::System);
    assert_eq!(
        history
            .iter()
            .filter(|m| m.role == ChatRole::Assistant && m.content == "Hello.")
            .count(),
        1,
        "greeting duplicated in history: {history:?}"
    );
    assert_eq!(history.last().unwrap().role, ChatRole::User);
    assert_eq!(history.last().unwrap().content, "hi there");

    h.peer.hangup();
    timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("call ends")
        .unwrap();
}

#[tokio::test]
async fn test_silent_caller_reprompted_until_robocall_determination() {
    // min_agent_turns stays at the shipped default of 2: the greeting alone
    // is not enough, the re-prompt turns carry the count past the bar.
    let robocall = RobocallConfig {
        silence_threshold_ms: 500,
        barge_in_threshold: 0,
        repetition_threshold: 0,
        ..RobocallConfig::default()
    };
    let mut config = tenant("Hello.", robocall);
    config.reprompt_after_ms = 100;

    let llm = SimulatedLlm::new(vec!["Anyone there?".to_string()]);
    let h = start_call(config, Arc::new(llm)).await;

    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("silence ends the call")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::RobocallDetected);
    assert_eq!(h.sink.find("robocall_signal").unwrap()["reason"], "prolonged_silence");

    let record = h.store.get(&h.call_id).unwrap();
    let agent_turns = record
        .turns
        .iter()
        .filter(|t| t.speaker == Speaker::Agent)
        .count();
    assert!(agent_turns >= 2, "expected re-prompt turns, saw {agent_turns}");
}

#[tokio::test]
async fn test_filler_spoken_while_model_is_slow() {
    let mut config = tenant("", robocall_off());
    config.filler.probability = 1.0;
    config.filler.first_token_delay_ms = 30;

    let llm = SimulatedLlm::new(vec!["Here is the answer.".to_string()])
        .with_first_token_delay(Duration::from_millis(400));
    let h = start_call(config, Arc::new(llm)).await;

    h.script
        .say(TranscriptEvent::end_of_utterance("quick question", 0.9))
        .await;

    let sink = h.sink.clone();
    wait_for(move || sink.has("filler_spoken")).await;

    let store = h.store.clone();
    let call_id = h.call_id.clone();
    wait_for(move || store.get(&call_id).map(|r| r.turns.len() >= 2).unwrap_or(false)).await;

    // Filler audio is stalling, not content: the persisted turn is only the
    // model's reply.
    let record = h.store.get(&h.call_id).unwrap();
    assert_eq!(record.turns.last().unwrap().text, "Here is the answer.");

    h.peer.hangup();
    let summary = timeout(Duration::from_secs(5), h.handle)
        .await
        .expect("call ends")
        .unwrap();
    assert_eq!(summary.cause, TerminalCause::CallerHangup);
}
