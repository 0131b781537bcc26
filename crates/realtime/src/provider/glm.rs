//! GLM realtime: WAV-framed input, PCM16 output, key in the `Authorization`
//! query parameter.

use super::compat::{self, AudioAppend, SessionUpdate, Stamp, ToolDef, TurnDetection};
use super::{Framing, Inbound, WireProtocol};
use crate::config::{AdapterConfig, Provider};
use duplex_core::{AdapterResult, SessionConfig, ToolResult, audio_utils::CAPTURE_SAMPLE_RATE};
use serde::Serialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub struct Glm;

#[derive(Serialize)]
struct GlmSession<'a> {
    turn_detection: TurnDetection,
    instructions: &'a str,
    output_audio_format: &'static str,
    input_audio_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef<'a>>>,
    beta_fields: BetaFields,
    voice: &'a str,
}

#[derive(Serialize)]
struct BetaFields {
    chat_mode: &'static str,
    tts_source: &'static str,
}

fn timestamp() -> Stamp {
    Stamp {
        event_id: None,
        client_timestamp: Some(chrono::Utc::now().timestamp_millis()),
    }
}

impl WireProtocol for Glm {
    const PROVIDER: Provider = Provider::Glm;
    const FLUSH_PERIOD: Duration = Duration::from_millis(250);
    const FRAMING: Framing = Framing::Wav {
        sample_rate: CAPTURE_SAMPLE_RATE,
    };
    const DEFAULT_ENDPOINT: &'static str = "wss://api.z.ai/api/paas/v4/realtime";
    const DEFAULT_MODEL: &'static str = "glm-realtime";
    const DEFAULT_VOICE: &'static str = "tongtong";

    fn request(config: &AdapterConfig) -> AdapterResult<Request> {
        let bearer = format!("Bearer {}", super::api_key(config));
        match config.model.as_deref() {
            Some(model) => {
                super::build_request::<Self>(config, &[("Authorization", bearer.as_str()), ("model", model)])
            }
            None => super::build_request::<Self>(config, &[("Authorization", bearer.as_str())]),
        }
    }

    fn setup_message(_model: &str, session: &SessionConfig) -> AdapterResult<String> {
        let body = GlmSession {
            turn_detection: TurnDetection::server_vad(),
            instructions: &session.instructions,
            output_audio_format: "pcm",
            input_audio_format: "wav",
            tools: compat::tool_defs(&session.tools),
            beta_fields: BetaFields {
                chat_mode: "audio",
                tts_source: "e2e",
            },
            voice: session.voice.as_deref().unwrap_or(Self::DEFAULT_VOICE),
        };
        let stamp = Stamp {
            event_id: Some(uuid::Uuid::new_v4().to_string()),
            ..timestamp()
        };
        compat::event("session.update", stamp, SessionUpdate { session: body })
    }

    fn decode(text: &str) -> Vec<Inbound> {
        compat::decode(text)
    }

    fn audio_message(audio: &str) -> AdapterResult<String> {
        compat::event("input_audio_buffer.append", timestamp(), AudioAppend { audio })
    }

    fn tool_response_messages(results: &[ToolResult]) -> AdapterResult<Vec<String>> {
        compat::tool_outputs(results, timestamp)
    }
}
