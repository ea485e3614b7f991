//! Conversation relay: the per-connection state machine.
//!
//! One relay exists per client connection. It is a single-writer actor: the
//! client's inbound audio, the transcription events, and the completion and
//! synthesis streams of the current response all feed one `tokio::select!`
//! loop, so a barge-in cancellation can never interleave with a token append
//! from the response it is cancelling.
//!
//! The relay is `Idle` when no response is outstanding and `Responding`
//! while completion and/or synthesis work is in flight; the two states are
//! encoded by `Option<InFlightResponse>`. Replacing the in-flight response
//! always tears the previous one down first, which is what keeps at most one
//! completion and one synthesis stream open per session.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::llm::{LlmEvent, LlmHandle};
use crate::core::stt::{SttEvent, SttHandle};
use crate::core::tts::{TtsError, TtsEvent, TtsHandle};
use crate::utils::audio;

/// Synthesized audio is re-framed into chunks of this size before being
/// forwarded to the client; balances playback latency against per-frame
/// overhead.
pub const AUDIO_FRAME_BYTES: usize = 5 * 1024;

// =============================================================================
// Client frames
// =============================================================================

/// JSON control frames sent to the client alongside binary audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Incremental response text for display.
    Text { content: String },
    /// The client must immediately drop any audio queued for playback.
    Interrupt,
    /// A provider failure the client should surface.
    Error { message: String },
}

/// One outbound frame for the client transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Synthesized audio ready for playback.
    Audio(Bytes),
    Control(ControlFrame),
}

// =============================================================================
// Utterance accumulation
// =============================================================================

/// Ordered finalized fragments of the user turn being assembled.
#[derive(Debug, Default)]
pub struct UtteranceAccumulator {
    fragments: Vec<String>,
}

impl UtteranceAccumulator {
    pub fn push(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Join the fragments with single spaces in arrival order and clear.
    pub fn finish(&mut self) -> String {
        let utterance = self.fragments.join(" ");
        self.fragments.clear();
        utterance
    }
}

// =============================================================================
// Provider wiring
// =============================================================================

/// Sample-rate domains the relay converts between.
#[derive(Debug, Clone, Copy)]
pub struct AudioParams {
    /// Rate of the client's microphone audio
    pub client_sample_rate: u32,
    /// Rate the transcription provider expects
    pub stt_sample_rate: u32,
    /// Rate of the synthesis provider's output
    pub tts_sample_rate: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            client_sample_rate: 16000,
            stt_sample_rate: 16000,
            tts_sample_rate: 16000,
        }
    }
}

/// Starts provider work for one assistant turn.
///
/// The completion starts as soon as an utterance is finalized; the synthesis
/// stream is opened lazily on the first non-empty token so empty completions
/// never open a connection.
pub trait ResponseProviders: Send + 'static {
    fn start_completion(
        &self,
        system_prompt: &str,
        utterance: &str,
    ) -> (LlmHandle, mpsc::Receiver<LlmEvent>);

    fn open_synthesis(&self) -> Result<(TtsHandle, mpsc::Receiver<TtsEvent>), TtsError>;
}

/// Production wiring: OpenAI completions + ElevenLabs synthesis.
pub struct LiveProviders {
    llm: crate::core::llm::OpenAiChat,
    tts: crate::core::tts::ElevenLabsTtsConfig,
}

impl LiveProviders {
    pub fn new(
        llm: crate::core::llm::OpenAiChat,
        tts: crate::core::tts::ElevenLabsTtsConfig,
    ) -> Self {
        Self { llm, tts }
    }
}

impl ResponseProviders for LiveProviders {
    fn start_completion(
        &self,
        system_prompt: &str,
        utterance: &str,
    ) -> (LlmHandle, mpsc::Receiver<LlmEvent>) {
        self.llm.stream(system_prompt, utterance)
    }

    fn open_synthesis(&self) -> Result<(TtsHandle, mpsc::Receiver<TtsEvent>), TtsError> {
        crate::core::tts::ElevenLabsTts::open(self.tts.clone())
    }
}

// =============================================================================
// In-flight response
// =============================================================================

/// The completion and synthesis work of one assistant turn.
///
/// At most one instance exists per session. The event receivers live outside
/// this struct, in the relay loop's select slots; dropping them alongside a
/// teardown is what makes stale events from a superseded response
/// unreachable.
struct InFlightResponse {
    llm: LlmHandle,
    tts: Option<TtsHandle>,
    response_text: String,
    /// The completion finished; only trailing synthesis audio is draining.
    llm_done: bool,
}

impl InFlightResponse {
    fn new(llm: LlmHandle) -> Self {
        Self {
            llm,
            tts: None,
            response_text: String::new(),
            llm_done: false,
        }
    }

    /// Cancel the completion and hard-close the synthesis stream.
    fn abort(mut self) {
        self.llm.cancel();
        if let Some(mut tts) = self.tts.take() {
            tts.close();
        }
    }
}

/// Why the relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The client transport closed.
    ClientDisconnected,
    /// The transcription stream failed; no further input can be understood.
    TranscriberFailed,
}

// =============================================================================
// Relay
// =============================================================================

/// Per-connection conversation relay.
pub struct ConversationRelay<P: ResponseProviders> {
    session_id: String,
    system_prompt: String,
    providers: P,
    stt: SttHandle,
    audio: AudioParams,
}

impl<P: ResponseProviders> ConversationRelay<P> {
    pub fn new(
        session_id: String,
        system_prompt: String,
        providers: P,
        stt: SttHandle,
        audio: AudioParams,
    ) -> Self {
        Self {
            session_id,
            system_prompt,
            providers,
            stt,
            audio,
        }
    }

    /// Run the relay until the client disconnects or transcription fails.
    ///
    /// `stt_events` is the receiver returned when the STT handle was opened,
    /// `audio_rx` carries the client's inbound microphone chunks, and
    /// `client_tx` feeds the client transport writer.
    pub async fn run(
        mut self,
        mut stt_events: mpsc::Receiver<SttEvent>,
        mut audio_rx: mpsc::Receiver<Bytes>,
        client_tx: mpsc::Sender<ClientFrame>,
    ) -> RelayExit {
        let mut accumulator = UtteranceAccumulator::default();
        let mut in_flight: Option<InFlightResponse> = None;
        let mut llm_rx: Option<mpsc::Receiver<LlmEvent>> = None;
        let mut tts_rx: Option<mpsc::Receiver<TtsEvent>> = None;

        let exit = loop {
            tokio::select! {
                maybe_audio = audio_rx.recv() => {
                    match maybe_audio {
                        Some(chunk) => {
                            if let Err(e) = self.forward_client_audio(chunk).await {
                                error!(session_id = %self.session_id, error = %e,
                                       "Failed to forward client audio");
                                let _ = client_tx
                                    .send(ClientFrame::Control(ControlFrame::Error {
                                        message: e.to_string(),
                                    }))
                                    .await;
                                break RelayExit::TranscriberFailed;
                            }
                        }
                        None => {
                            info!(session_id = %self.session_id, "Client disconnected");
                            break RelayExit::ClientDisconnected;
                        }
                    }
                }

                maybe_event = stt_events.recv() => {
                    let event = match maybe_event {
                        Some(event) => event,
                        None => {
                            error!(session_id = %self.session_id,
                                   "Transcription event stream ended");
                            break RelayExit::TranscriberFailed;
                        }
                    };

                    match event {
                        SttEvent::Interim { transcript } => {
                            debug!(session_id = %self.session_id, transcript = %transcript,
                                   "Interim transcript");
                        }
                        SttEvent::Final { transcript, speech_final } => {
                            info!(session_id = %self.session_id, transcript = %transcript,
                                  speech_final, "Finalized transcript fragment");
                            accumulator.push(transcript);
                            if speech_final {
                                let utterance = accumulator.finish();
                                self.begin_turn(
                                    utterance,
                                    &mut in_flight,
                                    &mut llm_rx,
                                    &mut tts_rx,
                                    &client_tx,
                                )
                                .await;
                            }
                        }
                        SttEvent::UtteranceEnd => {
                            // Only meaningful when finalized fragments are pending;
                            // a pause with nothing accumulated is not a turn.
                            if !accumulator.is_empty() {
                                let utterance = accumulator.finish();
                                self.begin_turn(
                                    utterance,
                                    &mut in_flight,
                                    &mut llm_rx,
                                    &mut tts_rx,
                                    &client_tx,
                                )
                                .await;
                            }
                        }
                        SttEvent::Closed => {
                            error!(session_id = %self.session_id,
                                   "Transcription stream closed unexpectedly");
                            let _ = client_tx
                                .send(ClientFrame::Control(ControlFrame::Error {
                                    message: "Transcription stream closed".to_string(),
                                }))
                                .await;
                            break RelayExit::TranscriberFailed;
                        }
                        SttEvent::Error(e) => {
                            error!(session_id = %self.session_id, error = %e,
                                   "Transcription stream failed");
                            let _ = client_tx
                                .send(ClientFrame::Control(ControlFrame::Error {
                                    message: e.to_string(),
                                }))
                                .await;
                            break RelayExit::TranscriberFailed;
                        }
                    }
                }

                maybe_event = recv_llm(&mut llm_rx), if llm_rx.is_some() => {
                    self.handle_llm_event(
                        maybe_event,
                        &mut in_flight,
                        &mut llm_rx,
                        &mut tts_rx,
                        &client_tx,
                    )
                    .await;
                }

                maybe_event = recv_tts(&mut tts_rx), if tts_rx.is_some() => {
                    self.handle_tts_event(
                        maybe_event,
                        &mut in_flight,
                        &mut llm_rx,
                        &mut tts_rx,
                        &client_tx,
                    )
                    .await;
                }
            }
        };

        if let Some(response) = in_flight.take() {
            response.abort();
        }
        self.stt.close();
        exit
    }

    /// Convert one client microphone chunk to the transcriber's rate and
    /// queue it. Chunks arriving before the STT connection opens are
    /// buffered by the handle in arrival order.
    async fn forward_client_audio(&self, chunk: Bytes) -> Result<(), crate::core::stt::SttError> {
        let converted = if self.audio.client_sample_rate != self.audio.stt_sample_rate {
            match audio::resample_pcm16_bytes(
                &chunk,
                self.audio.client_sample_rate,
                self.audio.stt_sample_rate,
            ) {
                Ok(converted) => converted,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e,
                          "Dropping malformed client audio chunk");
                    return Ok(());
                }
            }
        } else {
            chunk
        };
        self.stt.send_audio(converted).await
    }

    /// Finalized utterance: cancel any in-flight response, notify the
    /// client, and start a fresh completion.
    async fn begin_turn(
        &self,
        utterance: String,
        in_flight: &mut Option<InFlightResponse>,
        llm_rx: &mut Option<mpsc::Receiver<LlmEvent>>,
        tts_rx: &mut Option<mpsc::Receiver<TtsEvent>>,
        client_tx: &mpsc::Sender<ClientFrame>,
    ) {
        if let Some(response) = in_flight.take() {
            info!(session_id = %self.session_id, "New utterance supersedes in-flight response");
            response.abort();
            // Dropping the receivers makes any trailing events unreachable.
            *llm_rx = None;
            *tts_rx = None;
            let _ = client_tx
                .send(ClientFrame::Control(ControlFrame::Interrupt))
                .await;
        }

        info!(session_id = %self.session_id, utterance = %utterance, "Requesting completion");
        let (handle, events) = self
            .providers
            .start_completion(&self.system_prompt, &utterance);
        *llm_rx = Some(events);
        *in_flight = Some(InFlightResponse::new(handle));
    }

    async fn handle_llm_event(
        &self,
        event: Option<LlmEvent>,
        in_flight: &mut Option<InFlightResponse>,
        llm_rx: &mut Option<mpsc::Receiver<LlmEvent>>,
        tts_rx: &mut Option<mpsc::Receiver<TtsEvent>>,
        client_tx: &mpsc::Sender<ClientFrame>,
    ) {
        match event {
            Some(LlmEvent::Token(token)) => {
                if token.is_empty() {
                    return;
                }
                let Some(response) = in_flight.as_mut() else {
                    // Stale token from a response that was already torn down.
                    *llm_rx = None;
                    return;
                };

                response.response_text.push_str(&token);
                let _ = client_tx
                    .send(ClientFrame::Control(ControlFrame::Text {
                        content: token.clone(),
                    }))
                    .await;

                if response.tts.is_none() {
                    match self.providers.open_synthesis() {
                        Ok((handle, events)) => {
                            response.tts = Some(handle);
                            *tts_rx = Some(events);
                        }
                        Err(e) => {
                            error!(session_id = %self.session_id, error = %e,
                                   "Failed to open synthesis stream");
                            let _ = client_tx
                                .send(ClientFrame::Control(ControlFrame::Error {
                                    message: e.to_string(),
                                }))
                                .await;
                            if let Some(response) = in_flight.take() {
                                response.abort();
                            }
                            *llm_rx = None;
                            *tts_rx = None;
                            return;
                        }
                    }
                }

                if let Some(tts) = in_flight.as_ref().and_then(|r| r.tts.as_ref()) {
                    if let Err(e) = tts.send_text(&token).await {
                        // The synthesis event stream will report the failure.
                        warn!(session_id = %self.session_id, error = %e,
                              "Failed to queue token for synthesis");
                    }
                }
            }

            Some(LlmEvent::Done) => {
                *llm_rx = None;
                let Some(response) = in_flight.as_mut() else { return };
                response.llm_done = true;
                info!(session_id = %self.session_id, response = %response.response_text,
                      "Completion finished");

                match &response.tts {
                    Some(tts) => {
                        // Flush trailing audio; Idle is reached when the
                        // provider reports its final frame.
                        if let Err(e) = tts.finish().await {
                            warn!(session_id = %self.session_id, error = %e,
                                  "Failed to flush synthesis stream");
                        }
                    }
                    None => {
                        // Empty completion: nothing was synthesized.
                        *in_flight = None;
                    }
                }
            }

            Some(LlmEvent::Error(e)) => {
                error!(session_id = %self.session_id, error = %e, "Completion stream failed");
                let _ = client_tx
                    .send(ClientFrame::Control(ControlFrame::Error {
                        message: e.to_string(),
                    }))
                    .await;
                if let Some(response) = in_flight.take() {
                    response.abort();
                }
                *llm_rx = None;
                *tts_rx = None;
            }

            None => {
                // Completion task died without a terminator.
                warn!(session_id = %self.session_id, "Completion stream ended unexpectedly");
                let _ = client_tx
                    .send(ClientFrame::Control(ControlFrame::Error {
                        message: "Completion stream ended unexpectedly".to_string(),
                    }))
                    .await;
                if let Some(response) = in_flight.take() {
                    response.abort();
                }
                *llm_rx = None;
                *tts_rx = None;
            }
        }
    }

    async fn handle_tts_event(
        &self,
        event: Option<TtsEvent>,
        in_flight: &mut Option<InFlightResponse>,
        llm_rx: &mut Option<mpsc::Receiver<LlmEvent>>,
        tts_rx: &mut Option<mpsc::Receiver<TtsEvent>>,
        client_tx: &mpsc::Sender<ClientFrame>,
    ) {
        match event {
            Some(TtsEvent::Audio(audio)) => {
                self.forward_synthesized_audio(audio, client_tx).await;
            }

            Some(TtsEvent::Final) => {
                *tts_rx = None;
                let Some(response) = in_flight.as_mut() else { return };
                response.tts = None;
                if response.llm_done {
                    info!(session_id = %self.session_id, "Response fully delivered");
                    *in_flight = None;
                }
                // Otherwise the provider flushed early; a later token will
                // open a fresh synthesis stream for the remaining text.
            }

            Some(TtsEvent::Closed) | None => {
                *tts_rx = None;
                if let Some(response) = in_flight.take() {
                    warn!(session_id = %self.session_id,
                          "Synthesis stream closed before completion");
                    response.abort();
                    *llm_rx = None;
                    let _ = client_tx
                        .send(ClientFrame::Control(ControlFrame::Error {
                            message: "Synthesis stream closed unexpectedly".to_string(),
                        }))
                        .await;
                }
            }

            Some(TtsEvent::Error(e)) => {
                error!(session_id = %self.session_id, error = %e, "Synthesis stream failed");
                *tts_rx = None;
                if let Some(response) = in_flight.take() {
                    response.abort();
                    *llm_rx = None;
                }
                let _ = client_tx
                    .send(ClientFrame::Control(ControlFrame::Error {
                        message: e.to_string(),
                    }))
                    .await;
            }
        }
    }

    /// Convert synthesized audio toward the client's playback rate and
    /// forward it in fixed-size frames, preserving byte order.
    async fn forward_synthesized_audio(&self, audio: Bytes, client_tx: &mpsc::Sender<ClientFrame>) {
        let audio = if self.audio.tts_sample_rate != self.audio.client_sample_rate {
            match audio::resample_pcm16_bytes(
                &audio,
                self.audio.tts_sample_rate,
                self.audio.client_sample_rate,
            ) {
                Ok(converted) => converted,
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e,
                          "Forwarding synthesized audio without rate conversion");
                    audio
                }
            }
        } else {
            audio
        };

        let mut offset = 0;
        while offset < audio.len() {
            let end = usize::min(offset + AUDIO_FRAME_BYTES, audio.len());
            if client_tx
                .send(ClientFrame::Audio(audio.slice(offset..end)))
                .await
                .is_err()
            {
                break;
            }
            offset = end;
        }
    }
}

async fn recv_llm(rx: &mut Option<mpsc::Receiver<LlmEvent>>) -> Option<LlmEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        // Unreachable: the branch is guarded on is_some.
        None => std::future::pending().await,
    }
}

async fn recv_tts(rx: &mut Option<mpsc::Receiver<TtsEvent>>) -> Option<TtsEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    use crate::core::llm::LlmError;
    use crate::core::stt::SttError;
    use crate::core::tts::elevenlabs::TtsInput;
    use crate::core::{HandleState, new_handle_state};

    const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeState {
        requests: Vec<(String, String)>,
        llm_senders: Vec<mpsc::Sender<LlmEvent>>,
        llm_tokens: Vec<CancellationToken>,
        tts_senders: Vec<mpsc::Sender<TtsEvent>>,
        tts_inputs: Vec<Option<mpsc::Receiver<TtsInput>>>,
        tts_shutdowns: Vec<Option<oneshot::Receiver<()>>>,
        fail_synthesis: bool,
    }

    #[derive(Clone, Default)]
    struct FakeProviders {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeProviders {
        fn failing_synthesis() -> Self {
            let providers = Self::default();
            providers.state.lock().unwrap().fail_synthesis = true;
            providers
        }

        fn requests(&self) -> Vec<(String, String)> {
            self.state.lock().unwrap().requests.clone()
        }

        fn completion_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        fn synthesis_count(&self) -> usize {
            self.state.lock().unwrap().tts_senders.len()
        }

        fn llm_sender(&self, index: usize) -> mpsc::Sender<LlmEvent> {
            self.state.lock().unwrap().llm_senders[index].clone()
        }

        fn llm_cancelled(&self, index: usize) -> bool {
            self.state.lock().unwrap().llm_tokens[index].is_cancelled()
        }

        fn tts_sender(&self, index: usize) -> mpsc::Sender<TtsEvent> {
            self.state.lock().unwrap().tts_senders[index].clone()
        }

        fn take_tts_input(&self, index: usize) -> mpsc::Receiver<TtsInput> {
            self.state.lock().unwrap().tts_inputs[index].take().unwrap()
        }

        fn take_tts_shutdown(&self, index: usize) -> oneshot::Receiver<()> {
            self.state.lock().unwrap().tts_shutdowns[index]
                .take()
                .unwrap()
        }
    }

    impl ResponseProviders for FakeProviders {
        fn start_completion(
            &self,
            system_prompt: &str,
            utterance: &str,
        ) -> (LlmHandle, mpsc::Receiver<LlmEvent>) {
            let mut state = self.state.lock().unwrap();
            state
                .requests
                .push((system_prompt.to_string(), utterance.to_string()));
            let (tx, rx) = mpsc::channel(64);
            let token = CancellationToken::new();
            state.llm_senders.push(tx);
            state.llm_tokens.push(token.clone());
            (LlmHandle { cancel: token }, rx)
        }

        fn open_synthesis(&self) -> Result<(TtsHandle, mpsc::Receiver<TtsEvent>), TtsError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_synthesis {
                return Err(TtsError::ConnectionFailed("synthesis refused".to_string()));
            }
            let (input_tx, input_rx) = mpsc::channel(64);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let (event_tx, event_rx) = mpsc::channel(64);
            let handle_state = new_handle_state();
            *handle_state.write() = HandleState::Open;
            state.tts_senders.push(event_tx);
            state.tts_inputs.push(Some(input_rx));
            state.tts_shutdowns.push(Some(shutdown_rx));
            Ok((
                TtsHandle {
                    input_tx,
                    shutdown_tx: Some(shutdown_tx),
                    state: handle_state,
                },
                event_rx,
            ))
        }
    }

    struct TestHarness {
        providers: FakeProviders,
        stt_tx: mpsc::Sender<SttEvent>,
        client_audio_tx: mpsc::Sender<Bytes>,
        frames: mpsc::Receiver<ClientFrame>,
        stt_audio_rx: mpsc::Receiver<Bytes>,
        stt_shutdown_rx: oneshot::Receiver<()>,
        relay: tokio::task::JoinHandle<RelayExit>,
    }

    fn spawn_relay(providers: FakeProviders, audio: AudioParams) -> TestHarness {
        let (stt_audio_tx, stt_audio_rx) = mpsc::channel(64);
        let (stt_shutdown_tx, stt_shutdown_rx) = oneshot::channel();
        let stt_state = new_handle_state();
        *stt_state.write() = HandleState::Open;
        let stt = SttHandle {
            audio_tx: stt_audio_tx,
            shutdown_tx: Some(stt_shutdown_tx),
            state: stt_state,
        };

        let (stt_tx, stt_events) = mpsc::channel(64);
        let (client_audio_tx, audio_rx) = mpsc::channel(64);
        let (client_tx, frames) = mpsc::channel(256);

        let relay = ConversationRelay::new(
            "session-test".to_string(),
            SYSTEM_PROMPT.to_string(),
            providers.clone(),
            stt,
            audio,
        );
        let relay = tokio::spawn(relay.run(stt_events, audio_rx, client_tx));

        TestHarness {
            providers,
            stt_tx,
            client_audio_tx,
            frames,
            stt_audio_rx,
            stt_shutdown_rx,
            relay,
        }
    }

    fn harness() -> TestHarness {
        spawn_relay(FakeProviders::default(), AudioParams::default())
    }

    async fn next_frame(frames: &mut mpsc::Receiver<ClientFrame>) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client frame channel closed")
    }

    async fn expect_no_frame(frames: &mut mpsc::Receiver<ClientFrame>) {
        let result = tokio::time::timeout(Duration::from_millis(100), frames.recv()).await;
        assert!(result.is_err(), "unexpected frame: {:?}", result.unwrap());
    }

    async fn send_final(harness: &TestHarness, transcript: &str, speech_final: bool) {
        harness
            .stt_tx
            .send(SttEvent::Final {
                transcript: transcript.to_string(),
                speech_final,
            })
            .await
            .unwrap();
    }

    async fn wait_for_completions(providers: &FakeProviders, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while providers.completion_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for completion request");
    }

    // -------------------------------------------------------------------------
    // Unit: accumulator
    // -------------------------------------------------------------------------

    #[test]
    fn test_accumulator_joins_in_arrival_order() {
        let mut accumulator = UtteranceAccumulator::default();
        accumulator.push("hello");
        accumulator.push("there");
        accumulator.push("friend");

        assert_eq!(accumulator.finish(), "hello there friend");
        assert!(accumulator.is_empty());
        assert_eq!(accumulator.finish(), "");
    }

    #[test]
    fn test_control_frame_serialization() {
        assert_eq!(
            serde_json::to_string(&ControlFrame::Text {
                content: "hi".to_string()
            })
            .unwrap(),
            r#"{"type":"text","content":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&ControlFrame::Interrupt).unwrap(),
            r#"{"type":"interrupt"}"#
        );
    }

    // -------------------------------------------------------------------------
    // Turn detection
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fragments_joined_into_single_utterance() {
        let mut harness = harness();

        send_final(&harness, "hello", false).await;
        send_final(&harness, "there", true).await;

        // Wait until the completion request is visible.
        wait_for_completions(&harness.providers, 1).await;

        assert_eq!(
            harness.providers.requests(),
            vec![(SYSTEM_PROMPT.to_string(), "hello there".to_string())]
        );
    }

    #[tokio::test]
    async fn test_utterance_end_flushes_pending_finals() {
        let harness = harness();

        send_final(&harness, "are", false).await;
        send_final(&harness, "you", false).await;
        send_final(&harness, "there", false).await;
        harness.stt_tx.send(SttEvent::UtteranceEnd).await.unwrap();

        wait_for_completions(&harness.providers, 1).await;

        assert_eq!(
            harness.providers.requests(),
            vec![(SYSTEM_PROMPT.to_string(), "are you there".to_string())]
        );
    }

    #[tokio::test]
    async fn test_utterance_end_without_finals_is_ignored() {
        let harness = harness();

        harness.stt_tx.send(SttEvent::UtteranceEnd).await.unwrap();
        harness
            .stt_tx
            .send(SttEvent::Interim {
                transcript: "hel".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.providers.completion_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Token and audio forwarding
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_tokens_forwarded_and_synthesis_opened_lazily() {
        let mut harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;
        let llm = harness.providers.llm_sender(0);

        // Empty deltas must neither reach the client nor open synthesis.
        llm.send(LlmEvent::Token(String::new())).await.unwrap();
        llm.send(LlmEvent::Token("Hello".to_string())).await.unwrap();
        llm.send(LlmEvent::Token(" there!".to_string())).await.unwrap();

        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text {
                content: "Hello".to_string()
            })
        );
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text {
                content: " there!".to_string()
            })
        );

        assert_eq!(harness.providers.synthesis_count(), 1);
        let mut tts_input = harness.providers.take_tts_input(0);
        assert_eq!(
            tts_input.recv().await.unwrap(),
            TtsInput::Text("Hello".to_string())
        );
        assert_eq!(
            tts_input.recv().await.unwrap(),
            TtsInput::Text(" there!".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_completion_returns_to_idle_without_synthesis() {
        let mut harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;

        harness.providers.llm_sender(0).send(LlmEvent::Done).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.providers.synthesis_count(), 0);

        // Back in Idle: the next turn starts without an interrupt frame.
        send_final(&harness, "again", true).await;
        wait_for_completions(&harness.providers, 2).await;
        expect_no_frame(&mut harness.frames).await;
    }

    #[tokio::test]
    async fn test_synthesized_audio_is_chunked_in_order() {
        let mut harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;
        harness
            .providers
            .llm_sender(0)
            .send(LlmEvent::Token("Hello".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text { .. })
        ));

        // 12 KB of audio with a recognizable byte ramp.
        let payload: Vec<u8> = (0..12 * 1024).map(|i| (i % 251) as u8).collect();
        harness
            .providers
            .tts_sender(0)
            .send(TtsEvent::Audio(Bytes::from(payload.clone())))
            .await
            .unwrap();

        let mut received = Vec::new();
        for expected_len in [AUDIO_FRAME_BYTES, AUDIO_FRAME_BYTES, 2 * 1024] {
            match next_frame(&mut harness.frames).await {
                ClientFrame::Audio(chunk) => {
                    assert_eq!(chunk.len(), expected_len);
                    received.extend_from_slice(&chunk);
                }
                other => panic!("Expected audio frame, got {other:?}"),
            }
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_completion_end_flushes_synthesis_then_idles() {
        let mut harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;
        let llm = harness.providers.llm_sender(0);
        llm.send(LlmEvent::Token("Hi!".to_string())).await.unwrap();
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text { .. })
        ));

        llm.send(LlmEvent::Done).await.unwrap();

        let mut tts_input = harness.providers.take_tts_input(0);
        assert_eq!(
            tts_input.recv().await.unwrap(),
            TtsInput::Text("Hi!".to_string())
        );
        assert_eq!(tts_input.recv().await.unwrap(), TtsInput::Flush);

        // Trailing audio still flows after the completion ended.
        harness
            .providers
            .tts_sender(0)
            .send(TtsEvent::Audio(Bytes::from_static(&[7, 7, 7, 7])))
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Audio(Bytes::from_static(&[7, 7, 7, 7]))
        );

        harness
            .providers
            .tts_sender(0)
            .send(TtsEvent::Final)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Back in Idle: a new turn produces no interrupt frame.
        send_final(&harness, "next", true).await;
        wait_for_completions(&harness.providers, 2).await;
        expect_no_frame(&mut harness.frames).await;
    }

    // -------------------------------------------------------------------------
    // Barge-in
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_barge_in_cancels_response_and_interrupts_client() {
        let mut harness = harness();

        // Turn 1 streaming.
        send_final(&harness, "first question", true).await;
        wait_for_completions(&harness.providers, 1).await;
        let turn1_llm = harness.providers.llm_sender(0);
        turn1_llm
            .send(LlmEvent::Token("Answering".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text { .. })
        ));
        let turn1_tts = harness.providers.tts_sender(0);
        turn1_tts
            .send(TtsEvent::Audio(Bytes::from_static(&[1, 1, 1, 1])))
            .await
            .unwrap();
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Audio(_)
        ));

        // Barge-in.
        send_final(&harness, "wait stop", true).await;
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Interrupt)
        );

        // Turn 1 is fully torn down: completion cancelled, synthesis closed.
        assert!(harness.providers.llm_cancelled(0));
        let mut turn1_shutdown = harness.providers.take_tts_shutdown(0);
        tokio::time::timeout(Duration::from_secs(1), &mut turn1_shutdown)
            .await
            .expect("turn-1 synthesis was not closed")
            .unwrap();

        // Stale turn-1 events can no longer reach the client: the relay
        // dropped their receivers.
        assert!(
            turn1_llm
                .send(LlmEvent::Token("stale".to_string()))
                .await
                .is_err()
        );
        assert!(
            turn1_tts
                .send(TtsEvent::Audio(Bytes::from_static(&[9, 9])))
                .await
                .is_err()
        );

        // Turn 2 proceeds normally; no turn-1 bytes appear after the interrupt.
        wait_for_completions(&harness.providers, 2).await;
        assert_eq!(
            harness.providers.requests()[1],
            (SYSTEM_PROMPT.to_string(), "wait stop".to_string())
        );
        let turn2_llm = harness.providers.llm_sender(1);
        turn2_llm
            .send(LlmEvent::Token("Sure".to_string()))
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text {
                content: "Sure".to_string()
            })
        );
        harness
            .providers
            .tts_sender(1)
            .send(TtsEvent::Audio(Bytes::from_static(&[2, 2, 2, 2])))
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Audio(Bytes::from_static(&[2, 2, 2, 2]))
        );
    }

    #[tokio::test]
    async fn test_barge_in_during_trailing_audio_drain() {
        let mut harness = harness();

        send_final(&harness, "question", true).await;
        wait_for_completions(&harness.providers, 1).await;
        let llm = harness.providers.llm_sender(0);
        llm.send(LlmEvent::Token("Reply".to_string())).await.unwrap();
        llm.send(LlmEvent::Done).await.unwrap();
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text { .. })
        ));

        // Completion is done but synthesis has not reported final: the
        // response is still in flight, so a new utterance interrupts it.
        send_final(&harness, "actually never mind", true).await;
        assert_eq!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Interrupt)
        );
        let mut shutdown = harness.providers.take_tts_shutdown(0);
        tokio::time::timeout(Duration::from_secs(1), &mut shutdown)
            .await
            .expect("synthesis was not closed")
            .unwrap();
        wait_for_completions(&harness.providers, 2).await;
    }

    // -------------------------------------------------------------------------
    // Failure handling
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_completion_error_keeps_session_alive() {
        let mut harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;
        harness
            .providers
            .llm_sender(0)
            .send(LlmEvent::Error(LlmError::NetworkError(
                "connection reset".to_string(),
            )))
            .await
            .unwrap();

        match next_frame(&mut harness.frames).await {
            ClientFrame::Control(ControlFrame::Error { message }) => {
                assert!(message.contains("connection reset"));
            }
            other => panic!("Expected error frame, got {other:?}"),
        }

        // The session survives: speaking again starts a fresh attempt.
        send_final(&harness, "hello again", true).await;
        wait_for_completions(&harness.providers, 2).await;
        assert!(!harness.relay.is_finished());
    }

    #[tokio::test]
    async fn test_synthesis_open_failure_tears_down_response() {
        let mut harness = spawn_relay(FakeProviders::failing_synthesis(), AudioParams::default());

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;
        harness
            .providers
            .llm_sender(0)
            .send(LlmEvent::Token("Hello".to_string()))
            .await
            .unwrap();

        // The token itself is forwarded, then the open failure surfaces.
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Text { .. })
        ));
        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Error { .. })
        ));
        assert!(harness.providers.llm_cancelled(0));
        assert!(!harness.relay.is_finished());
    }

    #[tokio::test]
    async fn test_transcriber_error_ends_session() {
        let mut harness = harness();

        harness
            .stt_tx
            .send(SttEvent::Error(SttError::NetworkError(
                "socket reset".to_string(),
            )))
            .await
            .unwrap();

        assert!(matches!(
            next_frame(&mut harness.frames).await,
            ClientFrame::Control(ControlFrame::Error { .. })
        ));
        assert_eq!(harness.relay.await.unwrap(), RelayExit::TranscriberFailed);
        // The relay closed its transcription handle on the way out.
        harness.stt_shutdown_rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_disconnect_aborts_in_flight_response() {
        let harness = harness();

        send_final(&harness, "hi", true).await;
        wait_for_completions(&harness.providers, 1).await;

        drop(harness.client_audio_tx);
        assert_eq!(harness.relay.await.unwrap(), RelayExit::ClientDisconnected);
        assert!(harness.providers.llm_cancelled(0));
        harness.stt_shutdown_rx.await.unwrap();
    }

    // -------------------------------------------------------------------------
    // Client audio path
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_client_audio_forwarded_opaquely_at_matching_rate() {
        let mut harness = harness();

        let chunk = Bytes::from_static(&[1, 2, 3, 4, 5, 6]);
        harness.client_audio_tx.send(chunk.clone()).await.unwrap();

        let forwarded = tokio::time::timeout(Duration::from_secs(5), harness.stt_audio_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded, chunk);
    }

    #[tokio::test]
    async fn test_client_audio_resampled_to_transcriber_rate() {
        let mut harness = spawn_relay(
            FakeProviders::default(),
            AudioParams {
                client_sample_rate: 32000,
                stt_sample_rate: 16000,
                tts_sample_rate: 16000,
            },
        );

        // Eight samples at 32kHz become four at 16kHz.
        let samples = [10i16, 20, 30, 40, 50, 60, 70, 80];
        let mut chunk = Vec::new();
        for s in samples {
            chunk.extend_from_slice(&s.to_le_bytes());
        }
        harness
            .client_audio_tx
            .send(Bytes::from(chunk))
            .await
            .unwrap();

        let forwarded = tokio::time::timeout(Duration::from_secs(5), harness.stt_audio_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.len(), 8);
        assert_eq!(i16::from_le_bytes([forwarded[0], forwarded[1]]), 10);
        assert_eq!(i16::from_le_bytes([forwarded[2], forwarded[3]]), 30);
    }
}
