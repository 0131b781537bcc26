//! Realtime voice session adapters for GLM, Qwen and Gemini Live.
//!
//! Every adapter implements [`duplex_core::RealtimeAdapter`]; pick one with a
//! concrete type (`GlmAdapter`, `QwenAdapter`, `GeminiAdapter`) or from
//! configuration with [`connect_provider`].

pub mod adapter;
pub mod config;
pub mod provider;
pub mod session;

pub use adapter::{Adapter, GeminiAdapter, GlmAdapter, QwenAdapter};
pub use config::{AdapterConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_WRITE_TIMEOUT, Provider};
pub use provider::WireProtocol;

use duplex_core::RealtimeAdapter;

/// Builds an unconnected adapter for `provider`.
pub fn connect_provider(provider: Provider, config: AdapterConfig) -> Box<dyn RealtimeAdapter> {
    match provider {
        Provider::Glm => Box::new(GlmAdapter::new(config)),
        Provider::Qwen => Box::new(QwenAdapter::new(config)),
        Provider::Gemini => Box::new(GeminiAdapter::new(config)),
    }
}
