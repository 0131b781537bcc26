//! Vendor wire protocols.
//!
//! Each vendor is a zero-sized type implementing [`WireProtocol`]. The
//! session state machine is generic over it, so the vendor is chosen once at
//! construction and every call is statically dispatched.

pub mod compat;
pub mod gemini;
pub mod glm;
pub mod qwen;

use crate::config::{AdapterConfig, Provider};
use duplex_core::{AdapterError, AdapterResult, SessionConfig, ToolResult};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, handshake::client::Request};
use url::Url;

/// How buffered outbound PCM16 is packaged at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// RIFF/WAVE mono 16-bit container at the given sample rate.
    Wav { sample_rate: u32 },
    /// Bare PCM16 bytes.
    Raw,
}

/// A vendor message reduced to what the session state machine acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SessionCreated,
    SessionUpdated,
    /// Base64 audio in the vendor's native encoding.
    AudioDelta(String),
    /// The user started talking.
    UserSpeechStarted,
    ArgumentsDelta {
        delta: String,
        name: Option<String>,
        call_id: Option<String>,
    },
    ArgumentsDone {
        name: Option<String>,
        call_id: Option<String>,
        arguments: Option<String>,
    },
    /// Deliver every function call completed since the last dispatch.
    DispatchToolCalls,
    ResponseDone,
    VendorError(String),
}

pub trait WireProtocol: Send + Sync + 'static {
    const PROVIDER: Provider;
    const FLUSH_PERIOD: Duration;
    const FRAMING: Framing;
    /// True when the client speaks first: the setup message goes out as soon
    /// as the transport opens instead of waiting for a "session created".
    const OPENS_HANDSHAKE: bool = false;
    const DEFAULT_ENDPOINT: &'static str;
    const DEFAULT_MODEL: &'static str;
    const DEFAULT_VOICE: &'static str;

    /// Builds the upgrade request, credentials included.
    fn request(config: &AdapterConfig) -> AdapterResult<Request>;

    /// The session-configuration message sent during the handshake.
    fn setup_message(model: &str, session: &SessionConfig) -> AdapterResult<String>;

    /// Parses one text frame. Unknown or malformed frames decode to nothing.
    fn decode(text: &str) -> Vec<Inbound>;

    /// Converts vendor output audio to base64 PCM16. `None` drops the fragment.
    fn normalize_audio(audio: String) -> Option<String> {
        Some(audio)
    }

    /// Wraps one flushed, already framed and encoded audio block.
    fn audio_message(audio: &str) -> AdapterResult<String>;

    /// Tool outputs followed by whatever asks the vendor to continue.
    fn tool_response_messages(results: &[ToolResult]) -> AdapterResult<Vec<String>>;
}

/// Resolves the configured model against the provider default.
pub(crate) fn model_for<P: WireProtocol>(config: &AdapterConfig) -> String {
    config
        .model
        .clone()
        .unwrap_or_else(|| P::DEFAULT_MODEL.to_string())
}

/// Appends `params` to the configured (or default) endpoint.
pub(crate) fn build_request<P: WireProtocol>(
    config: &AdapterConfig,
    params: &[(&str, &str)],
) -> AdapterResult<Request> {
    let endpoint = config.endpoint.as_deref().unwrap_or(P::DEFAULT_ENDPOINT);
    let mut url = Url::parse_with_params(endpoint, params)
        .map_err(|e| AdapterError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    // Form encoding writes spaces as '+', which not every vendor decodes
    let query = url
        .query()
        .filter(|q| !q.is_empty())
        .map(|q| q.replace('+', "%20"));
    url.set_query(query.as_deref());
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(AdapterError::InvalidEndpoint(format!(
            "{endpoint}: expected a ws:// or wss:// URL"
        )));
    }
    url.as_str()
        .into_client_request()
        .map_err(|e| AdapterError::InvalidEndpoint(e.to_string()))
}

pub(crate) fn api_key(config: &AdapterConfig) -> &str {
    config.api_key.expose_secret()
}
