//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session listing
//! - `calls` - Call automation webhooks
//! - `ws` - Telephony media WebSocket, one conversation session per connection

pub mod api;
pub mod calls;
pub mod ws;

pub use ws::ws_call_handler;
