//! Telephony media WebSocket.
//!
//! The call automation service connects here once a call is answered with
//! media streaming. Each connection becomes one conversation session:
//!
//! 1. register the session
//! 2. connect tool plugins
//! 3. open the model connection with the rendered instructions and tools
//! 4. spawn the model event loop
//! 5. forward inbound audio until the socket closes
//! 6. tear everything down in reverse
//!
//! Connections without the call connection header are development sessions:
//! call control is mocked and user captions are sent back to the client.

mod handler;
mod setup;

pub use handler::ws_call_handler;
pub use setup::{ActiveCall, SetupError, start_call, teardown};

/// Header carrying the call connection id of a live telephony session.
pub const CALL_CONNECTION_ID_HEADER: &str = "x-ms-call-connection-id";

/// Error code sent when a mandatory tool plugin cannot be connected.
pub const PLUGIN_CONNECTION_ERROR_CODE: &str = "MCPPluginConnectionError";

/// Error code sent when the model connection cannot be opened.
pub const MODEL_CONNECTION_ERROR_CODE: &str = "ModelConnectionError";
