use duplex_core::{SessionConfig, ToolDeclaration};
use secrecy::SecretString;
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

/// How long `connect()` waits for the vendor to acknowledge the session.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long one socket write may stall before the session fails.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which vendor protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Glm,
    Qwen,
    Gemini,
}

#[derive(Debug, Error)]
#[error("unknown provider '{0}' (expected glm, qwen or gemini)")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "glm" => Ok(Provider::Glm),
            "qwen" => Ok(Provider::Qwen),
            "gemini" => Ok(Provider::Gemini),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Glm => write!(f, "glm"),
            Provider::Qwen => write!(f, "qwen"),
            Provider::Gemini => write!(f, "gemini"),
        }
    }
}

/// Settings for one adapter instance.
///
/// `endpoint` and `model` fall back to the provider's defaults when unset.
#[derive(Debug)]
pub struct AdapterConfig {
    pub api_key: SecretString,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
    pub session: SessionConfig,
}

impl AdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            endpoint: None,
            model: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            session: SessionConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.session.instructions = instructions.into();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.session.tools = tools;
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.session.voice = Some(voice.into());
        self
    }
}
