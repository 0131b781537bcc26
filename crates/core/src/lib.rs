//! Provider-independent building blocks for realtime voice sessions.
//!
//! Everything in this crate is free of network I/O: audio capture and
//! framing helpers, the streamed tool-call accumulator, the shared session
//! types, and the adapter capability trait that each vendor variant
//! implements in `duplex-realtime`.

pub mod audio_utils;
pub mod capture;
pub mod error;
pub mod generic_types;
pub mod realtime_api;
pub mod tool_call;
pub mod tools;

pub use error::{AdapterError, AdapterResult};
pub use generic_types::{
    FunctionCall, SessionConfig, SessionEvent, SessionState, ToolCall, ToolDeclaration, ToolResult,
};
pub use realtime_api::RealtimeAdapter;
