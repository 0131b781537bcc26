//! Header-injecting WebSocket relay.
//!
//! Browsers cannot set an `Authorization` header on a WebSocket handshake.
//! This service accepts the browser connection with the key in the query
//! string, opens the vendor connection with the proper headers, and then
//! forwards frames verbatim in both directions.

pub mod config;
pub mod relay;
pub mod router;
pub mod state;
