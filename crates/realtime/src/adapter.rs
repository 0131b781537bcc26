//! The tokio task that runs one [`Session`] over a WebSocket.

use crate::config::AdapterConfig;
use crate::provider::{self, WireProtocol, gemini::Gemini, glm::Glm, qwen::Qwen};
use crate::session::{Action, Session};
use async_trait::async_trait;
use duplex_core::{
    AdapterError, AdapterResult, RealtimeAdapter, SessionEvent, SessionState, ToolResult,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::{future::pending, marker::PhantomData, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until, timeout, timeout_at},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message, Utf8Bytes,
        handshake::client::Request,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{Instrument, debug, error, info, info_span, warn};

pub type GlmAdapter = Adapter<Glm>;
pub type QwenAdapter = Adapter<Qwen>;
pub type GeminiAdapter = Adapter<Gemini>;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// An internal command passed to the session task.
#[derive(Debug)]
enum Command {
    Audio(String),
    ToolResponse(Vec<ToolResult>),
    Disconnect,
}

/// Everything the session task takes ownership of on `connect()`.
struct Startup {
    config: AdapterConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<SessionState>,
}

/// One realtime voice session with the vendor selected by `P`.
pub struct Adapter<P> {
    startup: Option<Startup>,
    commands: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: WireProtocol> Adapter<P> {
    pub fn new(config: AdapterConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        Self {
            startup: Some(Startup {
                config,
                commands: commands_rx,
                events: events_tx,
                state: state_tx,
            }),
            commands: commands_tx,
            events: Some(events_rx),
            state: state_rx,
            task: None,
            _protocol: PhantomData,
        }
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn transport_open(&self) -> bool {
        matches!(
            *self.state.borrow(),
            SessionState::Connecting | SessionState::AwaitingHandshakeAck | SessionState::Ready
        )
    }
}

#[async_trait]
impl<P: WireProtocol> RealtimeAdapter for Adapter<P> {
    async fn connect(&mut self) -> AdapterResult<()> {
        let Some(startup) = self.startup.take() else {
            return Err(AdapterError::SessionClosed);
        };
        let request = match P::request(&startup.config) {
            Ok(request) => request,
            Err(e) => {
                startup.state.send_replace(SessionState::Closed);
                return Err(e);
            }
        };

        let (settle_tx, settle_rx) = oneshot::channel();
        let handshake_timeout = startup.config.handshake_timeout;
        let model = provider::model_for::<P>(&startup.config);
        let driver = Driver::<P> {
            session: Session::new(model, startup.config.session),
            commands: startup.commands,
            events: startup.events,
            state: startup.state,
            settle: Some(settle_tx),
            handshake_timeout,
            write_timeout: startup.config.write_timeout,
        };
        driver.state.send_replace(SessionState::Connecting);

        let span = info_span!("realtime_session", provider = %P::PROVIDER);
        let deadline = Instant::now() + handshake_timeout;
        self.task = Some(tokio::spawn(driver.run(request, deadline).instrument(span)));

        settle_rx.await.unwrap_or_else(|_| {
            Err(AdapterError::Transport(
                "session task ended before the handshake settled".to_string(),
            ))
        })
    }

    fn send_audio(&self, base64_pcm16: &str) {
        if !self.transport_open() {
            debug!("Dropping audio: transport not open");
            return;
        }
        let _ = self.commands.send(Command::Audio(base64_pcm16.to_owned()));
    }

    fn send_tool_response(&self, results: Vec<ToolResult>) {
        if !self.transport_open() {
            warn!("Dropping tool response: transport not open");
            return;
        }
        let _ = self.commands.send(Command::ToolResponse(results));
    }

    async fn disconnect(&mut self) {
        if let Some(startup) = self.startup.take() {
            // Never connected
            startup.state.send_replace(SessionState::Closed);
            return;
        }
        let _ = self.commands.send(Command::Disconnect);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Session task failed");
            }
        }
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

impl<P> Drop for Adapter<P> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Why the session task stopped.
#[derive(Debug)]
enum Exit {
    /// `disconnect()` was called or the adapter went away.
    Disconnected,
    /// The vendor closed the socket.
    RemoteClosed(Option<CloseFrame>),
    HandshakeTimedOut,
    Failed(AdapterError),
}

struct Driver<P> {
    session: Session<P>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<SessionState>,
    settle: Option<oneshot::Sender<AdapterResult<()>>>,
    handshake_timeout: Duration,
    write_timeout: Duration,
}

impl<P: WireProtocol> Driver<P> {
    async fn run(mut self, request: Request, deadline: Instant) {
        let exit = self.drive(request, deadline).await;
        self.finish(exit);
    }

    async fn drive(&mut self, request: Request, deadline: Instant) -> Exit {
        let socket = match timeout_at(deadline, connect_async(request)).await {
            Ok(Ok((socket, _))) => socket,
            Ok(Err(e)) => return Exit::Failed(AdapterError::Transport(e.to_string())),
            Err(_) => return Exit::HandshakeTimedOut,
        };
        info!("Connected to realtime endpoint");
        let (mut sink, mut stream) = socket.split();

        // Anything queued before the socket opened is dropped
        while self.commands.try_recv().is_ok() {}

        let mut handshake = Some(deadline);
        let mut flush: Option<Interval> = None;

        let exit = match self.session.on_open() {
            Ok(actions) => self
                .apply(&mut sink, actions, &mut handshake, &mut flush)
                .await
                .err()
                .map(Exit::Failed),
            Err(e) => Some(Exit::Failed(e)),
        };
        let exit = match exit {
            Some(exit) => exit,
            None => loop {
                let step = tokio::select! {
                    biased;
                    _ = expire(handshake) => {
                        warn!(timeout = ?self.handshake_timeout, "Handshake not acknowledged in time");
                        break Exit::HandshakeTimedOut;
                    }
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => self.session.on_text(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.session.on_text(text),
                            Err(_) => {
                                debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                                Ok(Vec::new())
                            }
                        },
                        Some(Ok(Message::Close(frame))) => break Exit::RemoteClosed(frame),
                        Some(Ok(_)) => Ok(Vec::new()),
                        Some(Err(e)) => break Exit::Failed(AdapterError::Transport(e.to_string())),
                        None => break Exit::RemoteClosed(None),
                    },
                    command = self.commands.recv() => match command {
                        Some(Command::Audio(audio)) => {
                            self.session.append_audio(&audio);
                            Ok(Vec::new())
                        }
                        Some(Command::ToolResponse(results)) => self
                            .session
                            .tool_response(&results)
                            .map(|messages| messages.into_iter().map(Action::Send).collect()),
                        Some(Command::Disconnect) | None => break Exit::Disconnected,
                    },
                    _ = tick(&mut flush) => self
                        .session
                        .flush()
                        .map(|frame| frame.into_iter().map(Action::Send).collect()),
                };
                let applied = match step {
                    Ok(actions) => self.apply(&mut sink, actions, &mut handshake, &mut flush).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = applied {
                    break Exit::Failed(e);
                }
            },
        };

        if !matches!(exit, Exit::RemoteClosed(_)) {
            close_transport(&mut sink, self.write_timeout).await;
        }
        exit
    }

    async fn apply(
        &mut self,
        sink: &mut WsSink,
        actions: Vec<Action>,
        handshake: &mut Option<Instant>,
        flush: &mut Option<Interval>,
    ) -> AdapterResult<()> {
        for action in actions {
            match action {
                Action::Send(text) => self.write(sink, Message::Text(text.into())).await?,
                Action::Emit(event) => {
                    let _ = self.events.send(event);
                }
                Action::Ready => {
                    *handshake = None;
                    let period = P::FLUSH_PERIOD;
                    let mut interval = interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    *flush = Some(interval);
                    if let Some(settle) = self.settle.take() {
                        let _ = settle.send(Ok(()));
                    }
                    info!(flush_period = ?period, "Session ready");
                }
            }
        }
        self.state.send_if_modified(|state| {
            let next = self.session.state();
            let changed = *state != next;
            *state = next;
            changed
        });
        Ok(())
    }

    /// Sends one frame, failing the session if the vendor stops reading.
    async fn write(&self, sink: &mut WsSink, message: Message) -> AdapterResult<()> {
        match timeout(self.write_timeout, sink.send(message)).await {
            Ok(sent) => sent.map_err(|e| AdapterError::Transport(e.to_string())),
            Err(_) => Err(AdapterError::Transport(format!(
                "socket write stalled for {:?}",
                self.write_timeout
            ))),
        }
    }

    fn finish(&mut self, exit: Exit) {
        let was_ready = self.session.state() == SessionState::Ready;
        self.session.close();
        self.state.send_replace(SessionState::Closed);

        let Some(settle) = self.settle.take() else {
            match exit {
                Exit::Failed(e) => {
                    error!(error = %e, "Session failed");
                    let _ = self.events.send(SessionEvent::Error(e));
                }
                Exit::RemoteClosed(frame) => {
                    let (code, reason) = close_details(frame);
                    info!(code, %reason, "Vendor closed the session");
                }
                Exit::Disconnected => info!("Session disconnected"),
                Exit::HandshakeTimedOut => {}
            }
            if was_ready {
                let _ = self.events.send(SessionEvent::Closed);
            }
            return;
        };

        let error = match exit {
            Exit::Failed(e) => e,
            Exit::RemoteClosed(frame) => {
                let (code, reason) = close_details(frame);
                AdapterError::ClosedBeforeReady { code, reason }
            }
            Exit::HandshakeTimedOut => AdapterError::HandshakeTimeout(self.handshake_timeout),
            Exit::Disconnected => AdapterError::SessionClosed,
        };
        warn!(error = %error, "Session closed before it was ready");
        let _ = settle.send(Err(error));
    }
}

/// Code and reason of a close frame; a missing frame reads as 1006.
fn close_details(frame: Option<CloseFrame>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
        None => (u16::from(CloseCode::Abnormal), String::new()),
    }
}

async fn close_transport(sink: &mut WsSink, limit: Duration) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Utf8Bytes::from_static(""),
    };
    let closing = async {
        let _ = sink.send(Message::Close(Some(frame))).await;
        let _ = sink.close().await;
    };
    if timeout(limit, closing).await.is_err() {
        debug!(limit = ?limit, "Gave up writing the close frame");
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
