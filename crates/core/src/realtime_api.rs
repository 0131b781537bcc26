use crate::error::AdapterResult;
use crate::generic_types::{SessionEvent, SessionState, ToolResult};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// A trait abstracting one realtime voice provider session.
///
/// Application code drives every vendor through this interface, so switching
/// providers is a construction-time choice only.
#[async_trait]
pub trait RealtimeAdapter: Send {
    /// Opens the transport and performs the vendor handshake.
    ///
    /// Resolves once the vendor acknowledges the session configuration, or
    /// fails on timeout, transport error, or an early close. Settles once.
    async fn connect(&mut self) -> AdapterResult<()>;

    /// Queues base64 PCM16 mono 16 kHz audio for the next flush cycle.
    /// A no-op unless the session is open.
    fn send_audio(&self, base64_pcm16: &str);

    /// Sends tool outputs followed by a single request for the next response.
    fn send_tool_response(&self, results: Vec<ToolResult>);

    /// Closes the session and waits for its task to wind down. Idempotent.
    async fn disconnect(&mut self);

    /// Takes the event stream. Returns `None` after the first call.
    fn take_events(&mut self) -> Option<UnboundedReceiver<SessionEvent>>;

    fn state(&self) -> SessionState;
}
