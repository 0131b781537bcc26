//! Per-connection protocol state, free of I/O.
//!
//! The driver task feeds transport events in and carries out the returned
//! [`Action`]s. Keeping the state machine synchronous means every inbound
//! message and every flush runs to completion before the next one starts.

use crate::provider::{Framing, Inbound, WireProtocol};
use duplex_core::{
    AdapterResult, FunctionCall, SessionConfig, SessionEvent, SessionState, ToolCall, ToolResult,
    audio_utils, tool_call::PendingFunctionCall,
};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Something the driver must do on the session's behalf.
#[derive(Debug)]
pub enum Action {
    /// Send a text frame to the vendor.
    Send(String),
    /// Deliver an event to the application.
    Emit(SessionEvent),
    /// The handshake was acknowledged: disarm the timeout, arm the flush timer.
    Ready,
}

/// Outbound PCM16 waiting for the next flush cycle.
#[derive(Debug, Default)]
struct AudioBuffer {
    chunks: Vec<Vec<u8>>,
    samples: usize,
}

impl AudioBuffer {
    fn push(&mut self, pcm16: Vec<u8>) {
        self.samples += pcm16.len() / 2;
        self.chunks.push(pcm16);
    }

    fn take(&mut self) -> Vec<u8> {
        self.samples = 0;
        std::mem::take(&mut self.chunks).concat()
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.samples = 0;
    }
}

pub struct Session<P> {
    state: SessionState,
    speaking: bool,
    audio_out: AudioBuffer,
    pending: PendingFunctionCall,
    completed_calls: Vec<FunctionCall>,
    model: String,
    config: SessionConfig,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: WireProtocol> Session<P> {
    pub fn new(model: String, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Connecting,
            speaking: false,
            audio_out: AudioBuffer::default(),
            pending: PendingFunctionCall::new(),
            completed_calls: Vec::new(),
            model,
            config,
            _protocol: PhantomData,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn buffered_samples(&self) -> usize {
        self.audio_out.samples
    }

    /// The transport is open. Client-initiated handshakes start here.
    pub fn on_open(&mut self) -> AdapterResult<Vec<Action>> {
        if P::OPENS_HANDSHAKE && self.state == SessionState::Connecting {
            return self.begin_handshake().map(|action| vec![action]);
        }
        Ok(Vec::new())
    }

    /// Handles one text frame from the vendor.
    pub fn on_text(&mut self, text: &str) -> AdapterResult<Vec<Action>> {
        let mut actions = Vec::new();
        for inbound in P::decode(text) {
            self.on_inbound(inbound, &mut actions)?;
        }
        Ok(actions)
    }

    pub fn on_inbound(&mut self, inbound: Inbound, actions: &mut Vec<Action>) -> AdapterResult<()> {
        match inbound {
            Inbound::SessionCreated => {
                if self.state == SessionState::Connecting {
                    info!("Session created, sending configuration");
                    actions.push(self.begin_handshake()?);
                } else {
                    debug!(state = %self.state, "Ignoring duplicate session.created");
                }
            }
            Inbound::SessionUpdated => {
                if self.state == SessionState::AwaitingHandshakeAck {
                    self.state = SessionState::Ready;
                    actions.push(Action::Ready);
                } else {
                    debug!(state = %self.state, "Ignoring session acknowledgement");
                }
            }
            Inbound::AudioDelta(audio) => {
                if self.state != SessionState::Ready || audio.is_empty() {
                    return Ok(());
                }
                self.speaking = true;
                if let Some(pcm16) = P::normalize_audio(audio) {
                    actions.push(Action::Emit(SessionEvent::Audio(pcm16)));
                }
            }
            Inbound::UserSpeechStarted => {
                if self.speaking {
                    debug!("User barged in");
                    self.speaking = false;
                    actions.push(Action::Emit(SessionEvent::Interrupted));
                }
            }
            Inbound::ArgumentsDelta {
                delta,
                name,
                call_id,
            } => {
                self.pending
                    .push_delta(&delta, name.as_deref(), call_id.as_deref());
            }
            Inbound::ArgumentsDone {
                name,
                call_id,
                arguments,
            } => match self
                .pending
                .finish(name.as_deref(), call_id.as_deref(), arguments.as_deref())
            {
                Ok(call) => {
                    info!(tool = %call.name, call_id = %call.id, "Function call complete");
                    self.completed_calls.push(call);
                }
                Err(e) => warn!(error = %e, "Dropping function call"),
            },
            Inbound::DispatchToolCalls => {
                if !self.completed_calls.is_empty() {
                    let function_calls = std::mem::take(&mut self.completed_calls);
                    if self.state == SessionState::Ready {
                        actions.push(Action::Emit(SessionEvent::ToolCall(ToolCall {
                            function_calls,
                        })));
                    }
                }
            }
            Inbound::ResponseDone => {
                if self.state == SessionState::Ready {
                    self.speaking = false;
                    actions.push(Action::Emit(SessionEvent::TurnComplete));
                }
            }
            Inbound::VendorError(message) => {
                warn!(%message, "Vendor reported an error");
                actions.push(Action::Emit(SessionEvent::Error(
                    duplex_core::AdapterError::Vendor(message),
                )));
            }
        }
        Ok(())
    }

    /// Queues base64 PCM16 for the next flush. Dropped once closed.
    pub fn append_audio(&mut self, base64_pcm16: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        match audio_utils::decode_base64(base64_pcm16) {
            Ok(pcm16) if !pcm16.is_empty() => self.audio_out.push(pcm16),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Dropping invalid base64 audio"),
        }
    }

    /// Drains the outbound buffer into one framed message.
    ///
    /// Returns `None` when nothing was buffered; empty frames are never sent.
    pub fn flush(&mut self) -> AdapterResult<Option<String>> {
        if self.state != SessionState::Ready || self.audio_out.chunks.is_empty() {
            return Ok(None);
        }
        let pcm16 = self.audio_out.take();
        let payload = match P::FRAMING {
            Framing::Wav { sample_rate } => audio_utils::wrap_wav(&pcm16, sample_rate),
            Framing::Raw => pcm16,
        };
        P::audio_message(&audio_utils::encode_base64(&payload)).map(Some)
    }

    /// Messages answering the current tool call.
    pub fn tool_response(&self, results: &[ToolResult]) -> AdapterResult<Vec<String>> {
        if self.state == SessionState::Closed {
            return Ok(Vec::new());
        }
        P::tool_response_messages(results)
    }

    /// Terminal: unsent audio and any half-built call are discarded.
    pub fn close(&mut self) {
        if self.pending.is_active() {
            debug!("Discarding an unfinished tool call");
        }
        self.state = SessionState::Closed;
        self.speaking = false;
        self.audio_out.clear();
        self.pending = PendingFunctionCall::new();
        self.completed_calls.clear();
    }

    fn begin_handshake(&mut self) -> AdapterResult<Action> {
        let setup = P::setup_message(&self.model, &self.config)?;
        self.state = SessionState::AwaitingHandshakeAck;
        Ok(Action::Send(setup))
    }
}
