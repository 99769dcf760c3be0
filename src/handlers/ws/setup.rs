//! Session setup and teardown.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{MODEL_CONNECTION_ERROR_CODE, PLUGIN_CONNECTION_ERROR_CODE};
use crate::core::realtime::{BoxedModelConnection, ServiceEventStream};
use crate::core::{
    CallIdentity, ClientChannel, ConversationSession, DeltaPublisher, ModelSender,
    RealtimeError, SessionSettings, TelephonyAudioSink, TurnReconciler,
};
use crate::plugin::{PluginError, PluginSet, ToolContext, ToolDispatchBridge, ToolSessionState};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Tool plugin connection failed: {0}")]
    Plugin(#[from] PluginError),

    #[error("Model connection failed: {0}")]
    Model(#[from] RealtimeError),
}

impl SetupError {
    /// Code for the `Error` frame sent before closing the socket.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::Plugin(_) => PLUGIN_CONNECTION_ERROR_CODE,
            SetupError::Model(_) => MODEL_CONNECTION_ERROR_CODE,
        }
    }
}

/// Resources held by a running call session.
pub struct ActiveCall {
    pub model: BoxedModelConnection,
    pub sender: ModelSender,
    pub plugins: PluginSet,
    pub receive_task: JoinHandle<ConversationSession>,
}

impl std::fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCall")
            .field("model", &self.model.connection_state())
            .field("plugins", &self.plugins)
            .field("receive_task_finished", &self.receive_task.is_finished())
            .finish()
    }
}

/// Connect tools and the model, then spawn the model event loop.
///
/// On failure nothing is left running: plugins connected so far are
/// disconnected before the error is returned.
pub async fn start_call(
    state: &AppState,
    session_id: &str,
    call_connection_id: Option<String>,
    channel: ClientChannel,
) -> Result<ActiveCall, SetupError> {
    let (mut plugins, registry) = PluginSet::connect_all(
        state.tool_plugins.plugins_for_session(),
        state.config.tool_connect_timeout(),
    )
    .await?;
    let registry = Arc::new(registry);
    info!(
        session_id = %session_id,
        plugins = plugins.len(),
        tools = registry.len(),
        "Tool plugins ready"
    );

    let settings = SessionSettings {
        instructions: state.instructions.clone(),
        tools: registry.definitions(),
    };
    let (model, events, sender) = match open_model(state, settings, channel.clone()).await {
        Ok(opened) => opened,
        Err(e) => {
            plugins.disconnect_all().await;
            return Err(e.into());
        }
    };

    let context = ToolContext {
        session_id: session_id.to_string(),
        call_connection_id: call_connection_id.clone(),
        call_automation: state.call_automation.clone(),
        transfer_target: state.config.transfer_target.clone(),
        state: Arc::new(ToolSessionState::new()),
    };
    let tools = ToolDispatchBridge::new(registry, context);
    let session = ConversationSession::new(
        session_id,
        &state.instructions,
        call_connection_id.map(|call_connection_id| CallIdentity { call_connection_id }),
    );
    let reconciler = TurnReconciler::new(
        session,
        DeltaPublisher::new(channel),
        sender.clone(),
        tools,
    )
    .with_invocation_records(state.config.record_invocations);

    let receive_task = tokio::spawn(reconciler.run(events));

    Ok(ActiveCall {
        model,
        sender,
        plugins,
        receive_task,
    })
}

type OpenedModel = (BoxedModelConnection, ServiceEventStream, ModelSender);

async fn open_model(
    state: &AppState,
    settings: SessionSettings,
    channel: ClientChannel,
) -> Result<OpenedModel, RealtimeError> {
    let mut model = state.model_factory.create(settings)?;
    let events = model
        .connect(Arc::new(TelephonyAudioSink::new(channel)))
        .await?;
    match model.sender() {
        Ok(sender) => Ok((model, events, sender)),
        Err(e) => {
            if let Err(disconnect_error) = model.disconnect().await {
                debug!("Model disconnect after setup failure: {}", disconnect_error);
            }
            Err(e)
        }
    }
}

/// Tear down a call session.
///
/// Order: stop the event loop and wait for it, disconnect tool plugins,
/// close the model connection. Failures are logged and never returned.
/// `receive_finished` is set when the event loop already ended on its own.
pub async fn teardown(session_id: &str, call: ActiveCall, receive_finished: bool) {
    let ActiveCall {
        mut model,
        sender,
        mut plugins,
        receive_task,
    } = call;
    drop(sender);

    if !receive_finished {
        receive_task.abort();
        match receive_task.await {
            Ok(session) => debug!(
                session_id = %session_id,
                entries = session.transcript.len(),
                "Model event loop finished before cancellation"
            ),
            Err(e) if e.is_cancelled() => {
                debug!(session_id = %session_id, "Model event loop cancelled")
            }
            Err(e) => error!(session_id = %session_id, "Model event loop failed: {}", e),
        }
    }

    plugins.disconnect_all().await;

    if let Err(e) = model.disconnect().await {
        warn!(session_id = %session_id, "Failed to disconnect model: {}", e);
    }
    info!(session_id = %session_id, "Call session torn down");
}
