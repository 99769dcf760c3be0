//! Tool Dispatch Bridge
//!
//! Routes model-issued function calls to registered capabilities. Each call
//! runs in its own task so a slow tool never holds up the event loop; the
//! loop collects finished calls through [`ToolDispatchBridge::next_completion`]
//! and applies them itself, which keeps every transcript mutation on the
//! receive path.
//!
//! # Flow
//!
//! ```text
//! ToolCallRequested ──▶ dispatch() ──▶ spawn ──▶ bind ──▶ execute (isolated)
//!                                                             │
//!     reconciler ◀── next_completion() ◀── ToolCompletion ◀───┘
//! ```

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use super::capabilities::{ToolContext, ToolError};
use super::isolation::run_isolated;
use super::registry::{ToolRegistry, split_wire_name};
use crate::core::transcript::{FunctionCallRecord, parse_arguments};

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub call_id: String,
    /// Wire name, `{plugin}-{function}`
    pub name: String,
    /// Arguments exactly as streamed by the model
    pub arguments: String,
}

/// A finished tool call, ready to be written back.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCompletion {
    pub call_id: String,
    pub plugin_name: String,
    pub function_name: String,
    pub arguments_sent: Value,
    pub arguments_used: Value,
    pub outcome: Result<Value, ToolError>,
}

impl ToolCompletion {
    /// Text for the `function_call_output` item.
    pub fn model_output(&self) -> String {
        match &self.outcome {
            Ok(Value::String(text)) => text.clone(),
            Ok(value) => value.to_string(),
            Err(e) => e.to_model_output(),
        }
    }

    /// Whether the completion takes the "temporary issue" recovery path.
    pub fn needs_recovery(&self) -> bool {
        matches!(&self.outcome, Err(e) if !e.is_relayed_to_model())
    }

    /// Transcript record for completions the model sees as a normal result.
    pub fn result_record(&self) -> Option<FunctionCallRecord> {
        if self.needs_recovery() {
            return None;
        }
        let result = match &self.outcome {
            Ok(value) => value.clone(),
            Err(e) => Value::String(e.to_model_output()),
        };
        Some(FunctionCallRecord::Result {
            function_name: self.function_name.clone(),
            plugin_name: self.plugin_name.clone(),
            arguments_sent: self.arguments_sent.clone(),
            arguments_used: self.arguments_used.clone(),
            result,
        })
    }
}

/// Per-session dispatcher for tool calls.
pub struct ToolDispatchBridge {
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
    tasks: JoinSet<ToolCompletion>,
}

impl ToolDispatchBridge {
    pub fn new(registry: Arc<ToolRegistry>, context: ToolContext) -> Self {
        Self {
            registry,
            context: Arc::new(context),
            tasks: JoinSet::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Start executing `call` in the background.
    pub fn dispatch(&mut self, call: ToolCall) {
        tracing::info!(
            session_id = %self.context.session_id,
            "Dispatching tool call {} ({})",
            call.name,
            call.call_id
        );
        let registry = Arc::clone(&self.registry);
        let context = Arc::clone(&self.context);
        self.tasks
            .spawn(async move { execute_call(&registry, &context, call).await });
    }

    /// Number of calls still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for the next finished call. Returns `None` once nothing is running.
    pub async fn next_completion(&mut self) -> Option<ToolCompletion> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(completion) => return Some(completion),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Tool task cancelled");
                }
                Err(e) => {
                    tracing::error!("Tool task failed outside isolation: {}", e);
                }
            }
        }
        None
    }

    /// Cancel every running call.
    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!("Aborting {} running tool calls", self.tasks.len());
        }
        self.tasks.abort_all();
    }
}

async fn execute_call(
    registry: &ToolRegistry,
    context: &ToolContext,
    call: ToolCall,
) -> ToolCompletion {
    let arguments_sent = parse_arguments(&call.arguments);
    let (plugin, function) = split_wire_name(&call.name);
    let mut completion = ToolCompletion {
        call_id: call.call_id,
        plugin_name: plugin.to_string(),
        function_name: function.to_string(),
        arguments_used: arguments_sent.clone(),
        arguments_sent,
        outcome: Err(ToolError::UnknownTool(call.name.clone())),
    };

    let Some(capability) = registry.get(&call.name) else {
        tracing::warn!("Model requested unknown tool '{}'", call.name);
        return completion;
    };
    completion.plugin_name = capability.plugin().to_string();
    completion.function_name = capability.name().to_string();

    let arguments = match capability.bind_arguments(&completion.arguments_sent) {
        Ok(arguments) => arguments,
        Err(e) => {
            completion.outcome = Err(e);
            return completion;
        }
    };
    completion.arguments_used = arguments.clone();

    let started = Instant::now();
    completion.outcome = match run_isolated(capability.execute(&arguments, context)).await {
        Ok(outcome) => outcome,
        Err(panic) => Err(ToolError::Execution(format!("tool panicked: {panic}"))),
    };

    match &completion.outcome {
        Ok(_) => tracing::info!(
            session_id = %context.session_id,
            "Tool {} completed in {}ms",
            call.name,
            started.elapsed().as_millis()
        ),
        Err(e) => tracing::warn!(
            session_id = %context.session_id,
            "Tool {} failed: {}",
            call.name,
            e
        ),
    }
    completion
}
