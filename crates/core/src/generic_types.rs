use crate::error::AdapterError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Generic configuration sent to any provider during the handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// System instructions for the voice model.
    pub instructions: String,
    /// Functions the model may call.
    pub tools: Vec<ToolDeclaration>,
    /// Voice identity; each provider falls back to its own default.
    pub voice: Option<String>,
}

/// A name/description/parameter-schema triple declared to the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// One reconstructed function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
    /// Vendor-assigned correlation id, echoed back in the matching [`ToolResult`].
    pub id: String,
}

/// Payload of a tool-call notification: `{ functionCalls: [{ name, args, id }] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub function_calls: Vec<FunctionCall>,
}

/// The outcome of a tool execution, sent back to the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The `id` of the [`FunctionCall`] this result answers.
    pub id: String,
    /// Function name. Only providers that key responses by name use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub response: Value,
}

/// Lifecycle of a session as seen from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session yet: `connect()` has not been called.
    #[default]
    Idle,
    Connecting,
    AwaitingHandshakeAck,
    Ready,
    /// Terminal. A closed session is never reused.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::AwaitingHandshakeAck => write!(f, "AwaitingHandshakeAck"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Events any provider emits back to the application.
#[derive(Debug)]
pub enum SessionEvent {
    /// A chunk of spoken audio from the model (base64 PCM16 little-endian).
    Audio(String),
    /// The model finished its response.
    TurnComplete,
    /// The user started speaking over the model; stop local playback.
    Interrupted,
    /// The model wants a tool executed.
    ToolCall(ToolCall),
    /// A transport or vendor error after the session became ready.
    Error(AdapterError),
    /// The session closed after having been ready.
    Closed,
}
