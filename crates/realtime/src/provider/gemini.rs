//! Gemini Live (BidiGenerateContent).
//!
//! The client opens the handshake: `setup` goes out as soon as the socket is
//! up and `setupComplete` acknowledges it. Audio is raw PCM16 both ways.

use super::{Framing, Inbound, WireProtocol};
use crate::config::{AdapterConfig, Provider};
use duplex_core::{AdapterResult, SessionConfig, ToolResult};
use std::time::Duration;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tracing::debug;

// --- Local Gemini Live types ---
mod gemini_live_types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage<'a> {
        Setup(BidiGenerateContentSetup<'a>),
        RealtimeInput(BidiGenerateContentRealtimeInput<'a>),
        ToolResponse(BidiGenerateContentToolResponse<'a>),
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup<'a> {
        pub model: String,
        pub generation_config: GenerationConfig<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content<'a>>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<Tool<'a>>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig<'a> {
        pub response_modalities: Vec<ResponseModality>,
        pub speech_config: SpeechConfig<'a>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig<'a> {
        pub voice_config: VoiceConfig<'a>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig<'a> {
        pub prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig<'a> {
        pub voice_name: &'a str,
    }
    #[derive(Serialize)]
    pub(super) struct Content<'a> {
        pub parts: Vec<Part<'a>>,
    }
    #[derive(Serialize)]
    pub(super) struct Part<'a> {
        pub text: &'a str,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Tool<'a> {
        pub function_declarations: Vec<FunctionDeclaration<'a>>,
    }
    #[derive(Serialize)]
    pub(super) struct FunctionDeclaration<'a> {
        pub name: &'a str,
        pub description: &'a str,
        pub parameters: &'a Value,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentRealtimeInput<'a> {
        pub audio: Blob<'a>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob<'a> {
        pub mime_type: &'a str,
        pub data: &'a str,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentToolResponse<'a> {
        pub function_responses: Vec<FunctionResponse<'a>>,
    }
    #[derive(Serialize)]
    pub(super) struct FunctionResponse<'a> {
        pub id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub name: Option<&'a str>,
        pub response: &'a Value,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<Value>,
        pub server_content: Option<LiveServerContent>,
        pub tool_call: Option<LiveToolCall>,
        pub error: Option<Value>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveServerContent {
        pub model_turn: Option<ServerContentTurn>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerContentTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveToolCall {
        #[serde(default)]
        pub function_calls: Vec<LiveFunctionCall>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct LiveFunctionCall {
        pub id: Option<String>,
        pub name: String,
        pub args: Option<Value>,
    }
}

use gemini_live_types as live;

pub struct Gemini;

const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

impl WireProtocol for Gemini {
    const PROVIDER: Provider = Provider::Gemini;
    const FLUSH_PERIOD: Duration = Duration::from_millis(100);
    const FRAMING: Framing = Framing::Raw;
    const OPENS_HANDSHAKE: bool = true;
    const DEFAULT_ENDPOINT: &'static str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
    const DEFAULT_MODEL: &'static str = "models/gemini-2.0-flash-exp";
    const DEFAULT_VOICE: &'static str = "Puck";

    fn request(config: &AdapterConfig) -> AdapterResult<Request> {
        super::build_request::<Self>(config, &[("key", super::api_key(config))])
    }

    fn setup_message(model: &str, session: &SessionConfig) -> AdapterResult<String> {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        let system_instruction = (!session.instructions.is_empty()).then(|| live::Content {
            parts: vec![live::Part {
                text: &session.instructions,
            }],
        });
        let tools = if session.tools.is_empty() {
            Vec::new()
        } else {
            vec![live::Tool {
                function_declarations: session
                    .tools
                    .iter()
                    .map(|tool| live::FunctionDeclaration {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    })
                    .collect(),
            }]
        };
        let setup = live::ClientMessage::Setup(live::BidiGenerateContentSetup {
            model,
            generation_config: live::GenerationConfig {
                response_modalities: vec![live::ResponseModality::Audio],
                speech_config: live::SpeechConfig {
                    voice_config: live::VoiceConfig {
                        prebuilt_voice_config: live::PrebuiltVoiceConfig {
                            voice_name: session.voice.as_deref().unwrap_or(Self::DEFAULT_VOICE),
                        },
                    },
                },
            },
            system_instruction,
            tools,
        });
        Ok(serde_json::to_string(&setup)?)
    }

    fn decode(text: &str) -> Vec<Inbound> {
        let message = match serde_json::from_str::<live::ServerMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable frame");
                return Vec::new();
            }
        };

        let mut inbound = Vec::new();
        if message.setup_complete.is_some() {
            inbound.push(Inbound::SessionUpdated);
        }
        if let Some(content) = message.server_content {
            if content.interrupted == Some(true) {
                inbound.push(Inbound::UserSpeechStarted);
            }
            if let Some(turn) = content.model_turn {
                inbound.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .map(|blob| Inbound::AudioDelta(blob.data)),
                );
            }
            if content.turn_complete == Some(true) {
                inbound.push(Inbound::ResponseDone);
            }
        }
        if let Some(tool_call) = message.tool_call {
            // Calls arrive complete; each still passes through the accumulator
            for call in tool_call.function_calls {
                let delta = call.args.map(|args| args.to_string()).unwrap_or_default();
                inbound.push(Inbound::ArgumentsDelta {
                    delta,
                    name: Some(call.name),
                    call_id: call.id,
                });
                inbound.push(Inbound::ArgumentsDone {
                    name: None,
                    call_id: None,
                    arguments: None,
                });
            }
            inbound.push(Inbound::DispatchToolCalls);
        }
        if let Some(error) = message.error {
            let text = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            inbound.push(Inbound::VendorError(text));
        }
        inbound
    }

    fn audio_message(audio: &str) -> AdapterResult<String> {
        let message =
            live::ClientMessage::RealtimeInput(live::BidiGenerateContentRealtimeInput {
                audio: live::Blob {
                    mime_type: INPUT_MIME_TYPE,
                    data: audio,
                },
            });
        Ok(serde_json::to_string(&message)?)
    }

    fn tool_response_messages(results: &[ToolResult]) -> AdapterResult<Vec<String>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let message = live::ClientMessage::ToolResponse(live::BidiGenerateContentToolResponse {
            function_responses: results
                .iter()
                .map(|result| live::FunctionResponse {
                    id: &result.id,
                    name: result.name.as_deref(),
                    response: &result.response,
                })
                .collect(),
        });
        Ok(vec![serde_json::to_string(&message)?])
    }
}
