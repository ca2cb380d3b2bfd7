//! Call session orchestrator
//!
//! One `CallSession` owns one phone call end to end: the duplex media
//! transport, a streaming STT connection, the turn-taking state machine, LLM
//! response generation with sentence-by-sentence synthesis, barge-in, and
//! teardown. The control loop is the single writer of call state, turn
//! sequencing, and persistence, so turns are recorded in real completion
//! order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use call_agent_config::{RobocallAction, TenantConfig, VoiceConfig};
use call_agent_core::{CallEvent, CallId, CallState, EventSink, TerminalCause, Turn};
use call_agent_persistence::CallStore;
use call_agent_providers::{
    ChatMessage, LlmProvider, SttProvider, SttResult, TtsProvider,
};
use call_agent_telephony::{FrameSource, InboundFrame, PlaybackSink};

use crate::directive::{extract_directives, Directive};
use crate::endpointing::silence_wait;
use crate::filler::FillerPolicy;
use crate::registry::CallGuard;
use crate::robocall::RobocallDetector;
use crate::sentence::SentenceSplitter;
use crate::SessionError;

/// Spoken when response generation fails outright
const FALLBACK_REPLY: &str =
    "I'm sorry, something went wrong on my end. Could you say that again?";

/// Silence run length that triggers the one-shot audio silence event
const AUDIO_SILENCE_MS: u64 = 10_000;

/// The provider stack one session talks to
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SttProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,
}

/// What a finished call looked like
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: CallId,
    pub cause: TerminalCause,
    pub turns: u64,
    pub duration: Duration,
    /// Robocall reason, when detected under the `flag` action
    pub robocall_flagged: Option<String>,
}

/// Messages from the transport ingestion task to the control loop
enum CtlMsg {
    CallerHangup,
    TransportError(String),
}

/// Messages from an agent turn task to the control loop
struct AgentMsg {
    epoch: u64,
    kind: AgentMsgKind,
}

enum AgentMsgKind {
    /// First audio chunk is on its way to the transport
    SpeakingStarted,
    /// The turn ran to completion or was cancelled
    Completed(AgentTurnReport),
}

struct AgentTurnReport {
    /// Speakable text dispatched to synthesis, directive tags stripped
    text: String,
    /// When the turn task was spawned
    started_at: DateTime<Utc>,
    interrupted: bool,
    directive: Option<Directive>,
}

/// What an agent turn speaks
enum ResponseSource {
    /// Fixed text, no model call (greeting, fallback)
    Fixed(String),
    /// Streamed model response over the conversation so far
    Llm(Vec<ChatMessage>),
}

/// One active call
pub struct CallSession {
    call_id: CallId,
    tenant: TenantConfig,
    providers: Providers,
    store: Arc<dyn CallStore>,
    events: Arc<dyn EventSink>,
    _guard: CallGuard,
}

impl CallSession {
    /// Build a session for an admitted call
    ///
    /// Tenant validation happens here; a rejected configuration never opens
    /// provider connections.
    pub fn new(
        call_id: CallId,
        tenant: TenantConfig,
        providers: Providers,
        store: Arc<dyn CallStore>,
        events: Arc<dyn EventSink>,
        guard: CallGuard,
    ) -> Result<Self, SessionError> {
        tenant.validate()?;
        Ok(Self {
            call_id,
            tenant,
            providers,
            store,
            events,
            _guard: guard,
        })
    }

    /// Drive the call to completion
    ///
    /// Returns when the call reaches a terminal cause; the registry slot is
    /// released when the session drops.
    pub async fn run(
        self,
        source: Box<dyn FrameSource>,
        sink: Arc<dyn PlaybackSink>,
    ) -> CallSummary {
        let started = TokioInstant::now();
        let call_id = self.call_id.clone();

        if let Err(e) = self.store.create_call(&call_id, &self.tenant.id).await {
            warn!(call_id = %call_id, error = %e, "failed to create call record");
        }
        self.events
            .emit(&call_id, CallEvent::CallStarted { tenant: self.tenant.id.clone() });

        let stt_stream = match self.providers.stt.open(&self.tenant.language).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "failed to open recognition stream");
                return self.finish(started, TerminalCause::Error, 0, None).await;
            }
        };
        let mut stt_events = stt_stream.events;

        let (ctl_tx, mut ctl_rx) = mpsc::channel::<CtlMsg>(8);
        let (audio_tx, audio_rx) = watch::channel(stt_stream.audio);
        let (speech_tx, mut speech_rx) = watch::channel::<Option<Instant>>(None);
        let (agent_tx, mut agent_rx) = mpsc::channel::<AgentMsg>(8);

        let ingestion = tokio::spawn(ingest_frames(
            source,
            audio_rx,
            speech_tx,
            ctl_tx,
            self.events.clone(),
            call_id.clone(),
        ));

        let mut eng = Engine {
            call_id: call_id.clone(),
            tenant: self.tenant.clone(),
            providers: self.providers.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            sink,
            filler: Arc::new(Mutex::new(FillerPolicy::new(&self.tenant.filler))),
            detector: RobocallDetector::new(self.tenant.robocall.clone(), Instant::now()),
            agent_tx,
            state: CallState::Listening,
            turn_seq: 0,
            epoch: 0,
            agent: None,
            transcript: String::new(),
            confidence_sum: 0.0,
            confidence_n: 0,
            turn_started: Utc::now(),
            endpoint_deadline: None,
            turn_deadline: None,
            reprompt_deadline: None,
            empty_streak: 0,
            messages: vec![ChatMessage::system(self.tenant.system_prompt.as_str())],
            robocall_flagged: None,
            stt_reconnected: false,
        };

        if self.tenant.greeting.trim().is_empty() {
            eng.arm_reprompt();
        } else {
            // The greeting joins the conversation history when its turn
            // completes, like any other agent turn.
            eng.state = CallState::Thinking;
            eng.spawn_agent(ResponseSource::Fixed(self.tenant.greeting.clone()));
        }

        let call_deadline = started + Duration::from_millis(self.tenant.max_call_duration_ms);
        let mut robocall_tick = tokio::time::interval(Duration::from_secs(1));
        robocall_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut hints_live = true;

        let cause = loop {
            let far = TokioInstant::now() + Duration::from_secs(3600);
            tokio::select! {
                Some(msg) = ctl_rx.recv() => {
                    if let Some(cause) = eng.handle_ctl(msg) {
                        break cause;
                    }
                }
                ev = stt_events.recv() => {
                    match ev {
                        Some(result) => {
                            if let Some(cause) = eng.handle_stt(result).await {
                                break cause;
                            }
                        }
                        None => match eng.reconnect_stt(&audio_tx).await {
                            Some(events) => stt_events = events,
                            None => break TerminalCause::Error,
                        },
                    }
                }
                Some(msg) = agent_rx.recv() => {
                    if let Some(cause) = eng.handle_agent(msg).await {
                        break cause;
                    }
                }
                changed = speech_rx.changed(), if hints_live => {
                    match changed {
                        Ok(()) => {
                            let hint = *speech_rx.borrow_and_update();
                            if hint.is_some() && eng.state.interruptible() {
                                eng.barge_in().await;
                            }
                        }
                        Err(_) => hints_live = false,
                    }
                }
                _ = sleep_until(eng.endpoint_deadline.unwrap_or(far)),
                        if eng.endpoint_deadline.is_some() => {
                    if let Some(cause) = eng.finalize_caller_turn(false).await {
                        break cause;
                    }
                }
                _ = sleep_until(eng.turn_deadline.unwrap_or(far)),
                        if eng.turn_deadline.is_some() => {
                    if let Some(cause) = eng.finalize_caller_turn(true).await {
                        break cause;
                    }
                }
                _ = sleep_until(eng.reprompt_deadline.unwrap_or(far)),
                        if eng.reprompt_deadline.is_some() => {
                    eng.reprompt();
                }
                _ = sleep_until(call_deadline) => {
                    break TerminalCause::MaxDuration;
                }
                _ = robocall_tick.tick() => {
                    if let Some(cause) = eng.robocall_check() {
                        break cause;
                    }
                }
            }
        };

        eng.state = CallState::Ending;
        if let Some(cancel) = eng.agent.take() {
            cancel.cancel();
        }
        ingestion.abort();

        let turns = eng.turn_seq;
        let robocall_flagged = eng.robocall_flagged.clone();

        // Post-call screening runs off the critical path; the transcript is
        // already persisted by this point.
        if eng.messages.len() > 1 {
            let llm = self.providers.llm.clone();
            let messages = eng.messages.clone();
            let analysis_call_id = call_id.clone();
            tokio::spawn(async move {
                match llm.analyze_call(&messages).await {
                    Ok(analysis) => debug!(
                        call_id = %analysis_call_id,
                        category = %analysis.category,
                        confidence = analysis.confidence,
                        "post-call analysis",
                    ),
                    Err(e) => {
                        debug!(call_id = %analysis_call_id, error = %e, "post-call analysis failed")
                    }
                }
            });
        }

        eng.state = CallState::Ended;
        debug!(call_id = %call_id, state = ?eng.state, "session torn down");
        drop(eng);
        self.finish(started, cause, turns, robocall_flagged).await
    }

    async fn finish(
        self,
        started: TokioInstant,
        cause: TerminalCause,
        turns: u64,
        robocall_flagged: Option<String>,
    ) -> CallSummary {
        if let Err(e) = self.store.finish_call(&self.call_id, cause).await {
            warn!(call_id = %self.call_id, error = %e, "failed to finish call record");
        }

        let duration = started.elapsed();
        self.events.emit(
            &self.call_id,
            CallEvent::CallEnded {
                cause: cause.as_str(),
                duration_ms: duration.as_millis() as u64,
                turns,
            },
        );

        CallSummary {
            call_id: self.call_id,
            cause,
            turns,
            duration,
            robocall_flagged,
        }
    }
}

/// Mutable per-call orchestration state, driven only by the control loop
struct Engine {
    call_id: CallId,
    tenant: TenantConfig,
    providers: Providers,
    store: Arc<dyn CallStore>,
    events: Arc<dyn EventSink>,
    sink: Arc<dyn PlaybackSink>,
    filler: Arc<Mutex<FillerPolicy>>,
    detector: RobocallDetector,
    agent_tx: mpsc::Sender<AgentMsg>,

    state: CallState,
    turn_seq: u64,
    /// Bumped on every agent turn spawn; stale task messages are ignored
    epoch: u64,
    agent: Option<CancellationToken>,

    transcript: String,
    confidence_sum: f32,
    confidence_n: u32,
    turn_started: DateTime<Utc>,
    endpoint_deadline: Option<TokioInstant>,
    turn_deadline: Option<TokioInstant>,
    reprompt_deadline: Option<TokioInstant>,
    empty_streak: u32,

    messages: Vec<ChatMessage>,
    robocall_flagged: Option<String>,
    stt_reconnected: bool,
}

impl Engine {
    fn emit(&self, event: CallEvent) {
        self.events.emit(&self.call_id, event);
    }

    fn handle_ctl(&mut self, msg: CtlMsg) -> Option<TerminalCause> {
        match msg {
            CtlMsg::CallerHangup => {
                self.emit(CallEvent::CallHangup { by: "caller" });
                Some(TerminalCause::CallerHangup)
            }
            CtlMsg::TransportError(error) => {
                warn!(call_id = %self.call_id, error = %error, "transport failed");
                Some(TerminalCause::Error)
            }
        }
    }

    async fn handle_stt(&mut self, result: SttResult) -> Option<TerminalCause> {
        let ev = match result {
            Ok(ev) => ev,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "recognition error");
                return None;
            }
        };

        if ev.is_empty() {
            self.empty_streak += 1;
            if self.empty_streak % 5 == 0 {
                self.emit(CallEvent::SttEmptyStreak { streak: self.empty_streak });
            }
            // An empty end-of-utterance still closes an open caller turn.
            if ev.speech_final && self.state == CallState::CallerSpeaking {
                return self.finalize_caller_turn(false).await;
            }
            return None;
        }
        self.empty_streak = 0;

        if ev.segment_final {
            self.emit(CallEvent::SttResult {
                text: ev.text.clone(),
                confidence: ev.confidence,
                speech_final: ev.speech_final,
            });
        }

        if self.state.interruptible() {
            self.barge_in().await;
        }
        if self.state == CallState::Listening {
            self.begin_caller_turn();
        }
        if self.state != CallState::CallerSpeaking {
            return None;
        }

        if ev.segment_final {
            if !self.transcript.is_empty() {
                self.transcript.push(' ');
            }
            self.transcript.push_str(ev.text.trim());
            self.confidence_sum += ev.confidence;
            self.confidence_n += 1;
        }

        // Endpointing reacts to everything heard so far, partials included.
        let preview = if ev.segment_final {
            self.transcript.clone()
        } else if self.transcript.is_empty() {
            ev.text.clone()
        } else {
            format!("{} {}", self.transcript, ev.text)
        };
        self.endpoint_deadline =
            Some(TokioInstant::now() + silence_wait(&preview, &self.tenant.endpointing));

        if ev.speech_final {
            return self.finalize_caller_turn(false).await;
        }
        None
    }

    /// Schedule a nudge for a caller who has never spoken
    ///
    /// Re-prompt turns keep agent turns accumulating through caller silence,
    /// which lets the prolonged-silence robocall check mature.
    fn arm_reprompt(&mut self) {
        let enabled = !self.detector.heard_caller()
            && self.tenant.reprompt_after_ms > 0
            && !self.tenant.reprompt.trim().is_empty();
        self.reprompt_deadline = enabled.then(|| {
            TokioInstant::now() + Duration::from_millis(self.tenant.reprompt_after_ms)
        });
    }

    fn reprompt(&mut self) {
        self.reprompt_deadline = None;
        if self.state == CallState::Listening {
            self.state = CallState::Thinking;
            self.spawn_agent(ResponseSource::Fixed(self.tenant.reprompt.clone()));
        }
    }

    fn begin_caller_turn(&mut self) {
        self.state = CallState::CallerSpeaking;
        self.reprompt_deadline = None;
        self.emit(CallEvent::VadSpeechStarted);
        self.turn_started = Utc::now();
        self.turn_deadline = Some(
            TokioInstant::now()
                + Duration::from_millis(self.tenant.endpointing.max_turn_timeout_ms),
        );
    }

    /// Caller spoke while the agent held the floor
    async fn barge_in(&mut self) {
        self.emit(CallEvent::BargeIn { turn_id: self.turn_seq + 1 });

        if let Some(cancel) = self.agent.take() {
            cancel.cancel();
        }
        self.epoch += 1;
        if let Err(e) = self.sink.clear().await {
            warn!(call_id = %self.call_id, error = %e, "failed to clear playback");
        }

        self.detector.record_barge_in(Instant::now());
        self.begin_caller_turn();
        self.endpoint_deadline = None;
    }

    /// Close out the caller's turn and hand it to generation
    async fn finalize_caller_turn(&mut self, timed_out: bool) -> Option<TerminalCause> {
        self.endpoint_deadline = None;
        self.turn_deadline = None;

        if timed_out {
            self.emit(CallEvent::MaxTurnTimeout { turn_id: self.turn_seq + 1 });
        }

        let text = std::mem::take(&mut self.transcript).trim().to_string();
        let confidence = if self.confidence_n == 0 {
            0.0
        } else {
            self.confidence_sum / self.confidence_n as f32
        };
        self.confidence_sum = 0.0;
        self.confidence_n = 0;

        if text.is_empty() {
            // Energy without words (a cough, line noise): resume listening.
            self.state = CallState::Listening;
            return None;
        }

        self.state = CallState::Finalizing;
        self.emit(CallEvent::VadUtteranceEnd { chars: text.chars().count() });

        self.turn_seq += 1;
        let turn = Turn::caller(self.turn_seq, text.as_str(), confidence)
            .with_times(self.turn_started, Utc::now());
        if let Err(e) = self.store.append_turn(&self.call_id, &turn).await {
            warn!(call_id = %self.call_id, error = %e, "failed to persist caller turn");
        }
        self.emit(CallEvent::TurnFinalized {
            turn_id: self.turn_seq,
            speaker: "caller",
            chars: text.chars().count(),
            interrupted: false,
        });

        self.detector.record_speech(&text, Instant::now());
        if let Some(keyword) = self.detector.check_text(&text) {
            self.emit(CallEvent::RobocallSignal { reason: format!("hold_keyword:{keyword}") });
        }

        self.messages.push(ChatMessage::user(text.as_str()));
        self.state = CallState::Thinking;
        self.spawn_agent(ResponseSource::Llm(self.messages.clone()));
        None
    }

    async fn handle_agent(&mut self, msg: AgentMsg) -> Option<TerminalCause> {
        match msg.kind {
            AgentMsgKind::SpeakingStarted => {
                if msg.epoch == self.epoch && self.state == CallState::Thinking {
                    self.state = CallState::AgentSpeaking;
                }
                None
            }
            AgentMsgKind::Completed(report) => {
                if msg.epoch == self.epoch {
                    self.agent = None;
                }

                let text = report.text.trim().to_string();
                if text.is_empty() && report.interrupted {
                    // Cancelled before a single word made it out.
                    return None;
                }

                self.turn_seq += 1;
                let turn = Turn::agent(self.turn_seq, text.as_str(), report.interrupted)
                    .with_times(report.started_at, Utc::now());
                if let Err(e) = self.store.append_turn(&self.call_id, &turn).await {
                    warn!(call_id = %self.call_id, error = %e, "failed to persist agent turn");
                }
                self.emit(CallEvent::TurnFinalized {
                    turn_id: self.turn_seq,
                    speaker: "agent",
                    chars: text.chars().count(),
                    interrupted: report.interrupted,
                });

                if report.interrupted {
                    // Barge-in already moved the state machine on.
                    return None;
                }

                self.detector.record_agent_turn();
                self.messages.push(ChatMessage::assistant(text.as_str()));

                match report.directive {
                    Some(Directive::Hangup) => {
                        self.emit(CallEvent::GoodbyeDetected);
                        self.emit(CallEvent::CallHangup { by: "agent" });
                        Some(TerminalCause::AgentHangup)
                    }
                    Some(Directive::Forward(destination)) => {
                        self.emit(CallEvent::ForwardDetected {
                            destination: destination.clone(),
                        });
                        self.emit(CallEvent::CallForwarded { destination });
                        Some(TerminalCause::Forwarded)
                    }
                    None => {
                        if msg.epoch == self.epoch {
                            self.state = CallState::Listening;
                            self.arm_reprompt();
                        }
                        None
                    }
                }
            }
        }
    }

    fn robocall_check(&mut self) -> Option<TerminalCause> {
        if self.robocall_flagged.is_some() {
            return None;
        }
        let reason = self.detector.check(Instant::now())?.to_string();
        self.emit(CallEvent::RobocallSignal { reason: reason.clone() });
        self.robocall_flagged = Some(reason);

        match self.tenant.robocall.action {
            RobocallAction::Hangup => {
                self.emit(CallEvent::CallHangup { by: "agent" });
                Some(TerminalCause::RobocallDetected)
            }
            RobocallAction::Flag => None,
        }
    }

    /// One reconnect attempt per call; a second stream loss ends the call
    async fn reconnect_stt(
        &mut self,
        audio_tx: &watch::Sender<mpsc::Sender<Vec<u8>>>,
    ) -> Option<mpsc::Receiver<SttResult>> {
        if self.stt_reconnected {
            warn!(call_id = %self.call_id, "recognition stream lost again, giving up");
            return None;
        }
        self.stt_reconnected = true;
        warn!(call_id = %self.call_id, "recognition stream lost, reconnecting");

        match self.providers.stt.open(&self.tenant.language).await {
            Ok(stream) => {
                let _ = audio_tx.send(stream.audio);
                Some(stream.events)
            }
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "reconnect failed");
                None
            }
        }
    }

    fn spawn_agent(&mut self, source: ResponseSource) {
        self.epoch += 1;
        let cancel = CancellationToken::new();
        let ctx = AgentCtx {
            call_id: self.call_id.clone(),
            turn_id: self.turn_seq + 1,
            epoch: self.epoch,
            started_at: Utc::now(),
            llm: self.providers.llm.clone(),
            tts: self.providers.tts.clone(),
            voice: self.tenant.voice.clone(),
            first_token_delay: Duration::from_millis(self.tenant.filler.first_token_delay_ms),
            filler: self.filler.clone(),
            events: self.events.clone(),
            sink: self.sink.clone(),
            cancel: cancel.clone(),
            done: self.agent_tx.clone(),
        };
        self.agent = Some(cancel);
        tokio::spawn(agent_task(ctx, source));
    }
}

/// Forwards decoded caller audio into the recognition stream and publishes
/// speech-energy hints for barge-in
///
/// Uses `try_send` so a backed-up recognizer drops frames instead of stalling
/// the transport read loop. The hint channel is a single latest-wins slot.
async fn ingest_frames(
    mut source: Box<dyn FrameSource>,
    stt_audio: watch::Receiver<mpsc::Sender<Vec<u8>>>,
    speech_tx: watch::Sender<Option<Instant>>,
    ctl: mpsc::Sender<CtlMsg>,
    events: Arc<dyn EventSink>,
    call_id: CallId,
) {
    let mut silent_bytes: u64 = 0;
    let mut silence_reported = false;

    loop {
        match source.next_frame().await {
            Ok(Some(frame @ InboundFrame::Media { .. })) => {
                let audio = match frame.audio() {
                    Ok(audio) => audio,
                    Err(e) => {
                        warn!(call_id = %call_id, error = %e, "dropping malformed media frame");
                        continue;
                    }
                };

                if frame_has_speech(&audio) {
                    silent_bytes = 0;
                    let _ = speech_tx.send(Some(Instant::now()));
                } else {
                    // 8 kHz mu-law: one byte per sample, 8 bytes per ms.
                    silent_bytes += audio.len() as u64;
                    if !silence_reported && silent_bytes / 8 >= AUDIO_SILENCE_MS {
                        silence_reported = true;
                        events.emit(
                            &call_id,
                            CallEvent::AudioSilenceDetected { silent_ms: silent_bytes / 8 },
                        );
                    }
                }

                let tx = stt_audio.borrow().clone();
                if tx.try_send(audio).is_err() {
                    debug!(call_id = %call_id, "recognizer backlogged, dropping frame");
                }
            }
            Ok(Some(InboundFrame::Start { .. })) => {
                debug!(call_id = %call_id, "ignoring mid-call start frame");
            }
            Ok(Some(InboundFrame::Stop)) | Ok(None) => {
                let _ = ctl.send(CtlMsg::CallerHangup).await;
                return;
            }
            Err(e) => {
                let _ = ctl.send(CtlMsg::TransportError(e.to_string())).await;
                return;
            }
        }
    }
}

/// Cheap speech-energy heuristic over a mu-law frame
///
/// 0xff/0x7f encode near-zero amplitude; a frame counts as speech when more
/// than a tenth of its samples deviate from that.
fn frame_has_speech(frame: &[u8]) -> bool {
    if frame.is_empty() {
        return false;
    }
    let active = frame.iter().filter(|&&b| (b | 0x80) != 0xff).count();
    active * 10 > frame.len()
}

/// Marker for a cancelled agent turn
struct Interrupted;

/// Everything one agent turn task needs, captured at spawn time
struct AgentCtx {
    call_id: CallId,
    turn_id: u64,
    epoch: u64,
    started_at: DateTime<Utc>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
    voice: VoiceConfig,
    first_token_delay: Duration,
    filler: Arc<Mutex<FillerPolicy>>,
    events: Arc<dyn EventSink>,
    sink: Arc<dyn PlaybackSink>,
    cancel: CancellationToken,
    done: mpsc::Sender<AgentMsg>,
}

impl AgentCtx {
    fn emit(&self, event: CallEvent) {
        self.events.emit(&self.call_id, event);
    }
}

async fn agent_task(ctx: AgentCtx, source: ResponseSource) {
    let mut report = AgentTurnReport {
        text: String::new(),
        started_at: ctx.started_at,
        interrupted: false,
        directive: None,
    };
    let mut speaking = false;

    let outcome = match source {
        ResponseSource::Fixed(text) => {
            speak_fixed(&ctx, &text, &mut report, &mut speaking).await
        }
        ResponseSource::Llm(messages) => {
            run_llm_turn(&ctx, messages, &mut report, &mut speaking).await
        }
    };
    if outcome.is_err() {
        report.interrupted = true;
    }

    let _ = ctx
        .done
        .send(AgentMsg { epoch: ctx.epoch, kind: AgentMsgKind::Completed(report) })
        .await;
}

async fn speak_fixed(
    ctx: &AgentCtx,
    text: &str,
    report: &mut AgentTurnReport,
    speaking: &mut bool,
) -> Result<(), Interrupted> {
    let mut splitter = SentenceSplitter::new();
    for sentence in splitter.push(text) {
        dispatch_sentence(ctx, &sentence, report, speaking).await?;
    }
    if let Some(rest) = splitter.flush() {
        dispatch_sentence(ctx, &rest, report, speaking).await?;
    }
    Ok(())
}

async fn run_llm_turn(
    ctx: &AgentCtx,
    messages: Vec<ChatMessage>,
    report: &mut AgentTurnReport,
    speaking: &mut bool,
) -> Result<(), Interrupted> {
    ctx.emit(CallEvent::LlmStarted { turn_id: ctx.turn_id });
    let started = Instant::now();

    let mut rx = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Interrupted),
        result = ctx.llm.generate(&messages) => match result {
            Ok(rx) => rx,
            Err(e) => {
                ctx.emit(CallEvent::LlmError { error: e.to_string() });
                return speak_fixed(ctx, FALLBACK_REPLY, report, speaking).await;
            }
        },
    };

    // First fragment, with a filler opportunity if the model is slow.
    let mut fragment = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Interrupted),
        fragment = rx.recv() => fragment,
        _ = tokio::time::sleep(ctx.first_token_delay) => {
            maybe_filler(ctx, speaking).await?;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Interrupted),
                fragment = rx.recv() => fragment,
            }
        }
    };

    let mut splitter = SentenceSplitter::new();
    let mut chars = 0usize;
    let mut first_seen = false;

    loop {
        match fragment {
            Some(Ok(text)) => {
                if !first_seen {
                    first_seen = true;
                    ctx.emit(CallEvent::LlmFirstToken {
                        latency_ms: started.elapsed().as_millis() as u64,
                    });
                }
                chars += text.chars().count();
                for sentence in splitter.push(&text) {
                    dispatch_sentence(ctx, &sentence, report, speaking).await?;
                }
            }
            Some(Err(e)) => {
                ctx.emit(CallEvent::LlmError { error: e.to_string() });
                if report.text.trim().is_empty() && splitter.pending().trim().is_empty() {
                    return speak_fixed(ctx, FALLBACK_REPLY, report, speaking).await;
                }
                break;
            }
            None => break,
        }

        fragment = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Interrupted),
            fragment = rx.recv() => fragment,
        };
    }

    if let Some(rest) = splitter.flush() {
        dispatch_sentence(ctx, &rest, report, speaking).await?;
    }
    ctx.emit(CallEvent::LlmCompleted {
        latency_ms: started.elapsed().as_millis() as u64,
        chars,
    });
    Ok(())
}

/// Speak a stalling phrase if the policy allows one right now
///
/// The policy lock is held only for the decision; synthesis happens after it
/// is released.
async fn maybe_filler(ctx: &AgentCtx, speaking: &mut bool) -> Result<(), Interrupted> {
    let phrase = {
        let mut policy = ctx.filler.lock();
        let now = Instant::now();
        let decision = policy.should_speak(now);
        ctx.emit(CallEvent::FillerDecision {
            decision,
            elapsed_ms: policy.elapsed_ms(now),
        });
        if decision {
            let phrase = policy.pick_phrase();
            if phrase.is_some() {
                policy.mark_spoken(now);
            }
            phrase
        } else {
            None
        }
    };

    match phrase {
        Some(phrase) => {
            ctx.emit(CallEvent::FillerSpoken { phrase: phrase.clone() });
            speak(ctx, &phrase, speaking).await
        }
        None => {
            ctx.emit(CallEvent::FillerSkipped);
            Ok(())
        }
    }
}

/// Strip directives from one sentence and synthesize the rest
async fn dispatch_sentence(
    ctx: &AgentCtx,
    sentence: &str,
    report: &mut AgentTurnReport,
    speaking: &mut bool,
) -> Result<(), Interrupted> {
    let (speakable, directive) = extract_directives(sentence);
    if let Some(directive) = directive {
        // Forward outranks hangup; otherwise first one wins.
        let forward_held = matches!(report.directive, Some(Directive::Forward(_)));
        if !forward_held && (report.directive.is_none() || matches!(directive, Directive::Forward(_))) {
            report.directive = Some(directive);
        }
    }

    if speakable.trim().is_empty() {
        return Ok(());
    }
    ctx.emit(CallEvent::SentenceExtracted { chars: speakable.chars().count() });
    report.text.push_str(&speakable);
    speak(ctx, &speakable, speaking).await
}

/// Stream one utterance through synthesis into the playback sink
async fn speak(ctx: &AgentCtx, text: &str, speaking: &mut bool) -> Result<(), Interrupted> {
    ctx.emit(CallEvent::TtsStarted { chars: text.chars().count() });
    let started = Instant::now();

    let mut rx = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(Interrupted),
        result = ctx.tts.synthesize_stream(text, &ctx.voice) => match result {
            Ok(rx) => rx,
            Err(e) => {
                ctx.emit(CallEvent::TtsError { error: e.to_string() });
                return Ok(());
            }
        },
    };

    let mut chunks = 0u64;
    loop {
        // Cancellation wins over a ready chunk so no stale audio follows the
        // control task's clear frame.
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Interrupted),
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        match chunk {
            Ok(audio) => {
                if chunks == 0 {
                    ctx.emit(CallEvent::TtsFirstChunk {
                        latency_ms: started.elapsed().as_millis() as u64,
                    });
                }
                if !*speaking {
                    *speaking = true;
                    let _ = ctx
                        .done
                        .send(AgentMsg {
                            epoch: ctx.epoch,
                            kind: AgentMsgKind::SpeakingStarted,
                        })
                        .await;
                }
                chunks += 1;

                let sent = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(Interrupted),
                    sent = ctx.sink.send_audio(&audio) => sent,
                };
                if sent.is_err() {
                    // Transport is gone; the control loop hears about it from
                    // the ingestion side.
                    return Ok(());
                }
            }
            Err(e) => {
                ctx.emit(CallEvent::TtsError { error: e.to_string() });
                break;
            }
        }
    }

    ctx.emit(CallEvent::TtsCompleted { chunks });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_energy_heuristic() {
        // Mu-law silence bytes.
        assert!(!frame_has_speech(&[0xff; 160]));
        assert!(!frame_has_speech(&[0x7f; 160]));
        assert!(!frame_has_speech(&[]));

        assert!(frame_has_speech(&[0x01; 160]));

        // A few active samples in a mostly silent frame stay below the bar.
        let mut frame = vec![0xff; 160];
        for byte in frame.iter_mut().take(10) {
            *byte = 0x01;
        }
        assert!(!frame_has_speech(&frame));
    }
}
