//! Qwen omni realtime, reached through the header-injecting relay.
//!
//! Input is raw PCM16. Output arrives as 24-bit PCM and is reduced to 16-bit
//! before it reaches the application.

use super::compat::{self, AudioAppend, SessionUpdate, Stamp, ToolDef, TurnDetection};
use super::{Framing, Inbound, WireProtocol};
use crate::config::{AdapterConfig, Provider};
use duplex_core::{AdapterResult, SessionConfig, ToolResult, audio_utils};
use serde::Serialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tracing::warn;

pub struct Qwen;

#[derive(Serialize)]
struct QwenSession<'a> {
    modalities: [&'static str; 2],
    voice: &'a str,
    input_audio_format: &'static str,
    output_audio_format: &'static str,
    instructions: &'a str,
    turn_detection: TurnDetection,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef<'a>>>,
}

fn event_id() -> Stamp {
    Stamp {
        event_id: Some(uuid::Uuid::new_v4().to_string()),
        client_timestamp: None,
    }
}

impl WireProtocol for Qwen {
    const PROVIDER: Provider = Provider::Qwen;
    const FLUSH_PERIOD: Duration = Duration::from_millis(200);
    const FRAMING: Framing = Framing::Raw;
    const DEFAULT_ENDPOINT: &'static str = "ws://localhost:3001";
    const DEFAULT_MODEL: &'static str = "qwen3-omni-flash-realtime";
    const DEFAULT_VOICE: &'static str = "Cherry";

    fn request(config: &AdapterConfig) -> AdapterResult<Request> {
        let model = super::model_for::<Self>(config);
        super::build_request::<Self>(
            config,
            &[("model", model.as_str()), ("key", super::api_key(config))],
        )
    }

    fn setup_message(_model: &str, session: &SessionConfig) -> AdapterResult<String> {
        let body = QwenSession {
            modalities: ["text", "audio"],
            voice: session.voice.as_deref().unwrap_or(Self::DEFAULT_VOICE),
            input_audio_format: "pcm16",
            output_audio_format: "pcm24",
            instructions: &session.instructions,
            turn_detection: TurnDetection {
                threshold: Some(0.5),
                silence_duration_ms: Some(800),
                ..TurnDetection::server_vad()
            },
            tools: compat::tool_defs(&session.tools),
        };
        compat::event("session.update", event_id(), SessionUpdate { session: body })
    }

    fn decode(text: &str) -> Vec<Inbound> {
        compat::decode(text)
    }

    fn normalize_audio(audio: String) -> Option<String> {
        match audio_utils::pcm24_base64_to_pcm16_base64(&audio) {
            Ok(pcm16) => Some(pcm16),
            Err(e) => {
                warn!(error = %e, "Dropping undecodable audio fragment");
                None
            }
        }
    }

    fn audio_message(audio: &str) -> AdapterResult<String> {
        compat::event("input_audio_buffer.append", event_id(), AudioAppend { audio })
    }

    fn tool_response_messages(results: &[ToolResult]) -> AdapterResult<Vec<String>> {
        compat::tool_outputs(results, event_id)
    }
}
