//! The OpenAI-style realtime event vocabulary spoken by GLM and Qwen.
//!
//! Both vendors use the same `type`-tagged JSON events and differ only in how
//! they stamp client messages and in their session payload.

use super::Inbound;
use duplex_core::{AdapterResult, ToolDeclaration, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub(crate) enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},
    #[serde(rename = "session.updated")]
    SessionUpdated {},
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta {
        #[serde(default)]
        delta: String,
        name: Option<String>,
        call_id: Option<String>,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    ArgumentsDone {
        name: Option<String>,
        call_id: Option<String>,
        arguments: Option<String>,
    },
    #[serde(rename = "response.done")]
    ResponseDone {},
    #[serde(rename = "error")]
    Error { error: Option<Value> },
    #[serde(other)]
    Other,
}

pub(crate) fn decode(text: &str) -> Vec<Inbound> {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable frame");
            return Vec::new();
        }
    };
    match event {
        ServerEvent::SessionCreated {} => vec![Inbound::SessionCreated],
        ServerEvent::SessionUpdated {} => vec![Inbound::SessionUpdated],
        ServerEvent::AudioDelta { delta } => vec![Inbound::AudioDelta(delta)],
        ServerEvent::SpeechStarted {} => vec![Inbound::UserSpeechStarted],
        ServerEvent::ArgumentsDelta {
            delta,
            name,
            call_id,
        } => vec![Inbound::ArgumentsDelta {
            delta,
            name,
            call_id,
        }],
        ServerEvent::ArgumentsDone {
            name,
            call_id,
            arguments,
        } => vec![
            Inbound::ArgumentsDone {
                name,
                call_id,
                arguments,
            },
            Inbound::DispatchToolCalls,
        ],
        ServerEvent::ResponseDone {} => vec![Inbound::ResponseDone],
        ServerEvent::Error { error } => vec![Inbound::VendorError(error_message(error, text))],
        ServerEvent::Other => Vec::new(),
    }
}

/// `error.message` when present, otherwise the error object (or the whole
/// frame) as JSON text.
fn error_message(error: Option<Value>, frame: &str) -> String {
    match error {
        Some(error) => match error.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error.to_string(),
        },
        None => frame.to_string(),
    }
}

/// Correlation fields stamped on outgoing events.
#[derive(Serialize, Debug, Default)]
pub(crate) struct Stamp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<i64>,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(flatten)]
    stamp: Stamp,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct NoBody {}

pub(crate) fn event<T: Serialize>(kind: &str, stamp: Stamp, body: T) -> AdapterResult<String> {
    Ok(serde_json::to_string(&Envelope { kind, stamp, body })?)
}

#[derive(Serialize)]
pub(crate) struct SessionUpdate<S> {
    pub session: S,
}

#[derive(Serialize)]
pub(crate) struct AudioAppend<'a> {
    pub audio: &'a str,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub(crate) struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

impl TurnDetection {
    pub(crate) fn server_vad() -> Self {
        Self {
            kind: "server_vad",
            threshold: None,
            silence_duration_ms: None,
        }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct ToolDef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDef<'a>,
}

#[derive(Serialize, Debug)]
struct FunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

/// Tool declarations in `{type: "function", function: {...}}` form; `None`
/// when there are no tools so the field is left out.
pub(crate) fn tool_defs(tools: &[ToolDeclaration]) -> Option<Vec<ToolDef<'_>>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ToolDef {
                kind: "function",
                function: FunctionDef {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: &tool.parameters,
                },
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct ItemCreate {
    item: FunctionCallOutput,
}

#[derive(Serialize)]
struct FunctionCallOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    call_id: String,
    /// The tool result serialized as a JSON string.
    output: String,
}

/// One `conversation.item.create` per result, then a single `response.create`.
pub(crate) fn tool_outputs(
    results: &[ToolResult],
    mut stamp: impl FnMut() -> Stamp,
) -> AdapterResult<Vec<String>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }
    let mut messages = Vec::with_capacity(results.len() + 1);
    for result in results {
        let item = ItemCreate {
            item: FunctionCallOutput {
                kind: "function_call_output",
                call_id: result.id.clone(),
                output: serde_json::to_string(&result.response)?,
            },
        };
        messages.push(event("conversation.item.create", stamp(), item)?);
    }
    messages.push(event("response.create", stamp(), NoBody {})?);
    Ok(messages)
}
