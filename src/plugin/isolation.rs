//! Tool Isolation and Panic Safety
//!
//! Tool executions run plugin code the bridge does not control. A panic in
//! one must surface as an ordinary failure of that call, not take down the
//! session's event loop. The event loop wraps its own steps the same way so
//! a panic there still reaches the client as an `AgentError`.
//!
//! # Safety Considerations
//!
//! - `catch_unwind` only catches panics, not aborts
//! - The release profile must keep `panic = "unwind"`
//! - Panics in tasks spawned by the tool itself are not caught here

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Await `future`, converting a panic during polling into `Err(message)`.
pub async fn run_isolated<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(panic_info) => {
            let msg = extract_panic_message(panic_info.as_ref());
            tracing::error!(message = %msg, "Panic caught during execution");
            Err(msg)
        }
    }
}

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}
