//! Turn reconciler.
//!
//! Consumes the model's event stream for one session, applies each event to
//! the transcript and decides when to publish a delta. Tool calls are handed
//! to the [`ToolDispatchBridge`]; their completions come back into the same
//! loop, so the transcript is only ever touched from here.
//!
//! # Event handling
//!
//! ```text
//! Error                    append apology            publish
//! SpeechStarted            StopAudio (barge-in)
//! UserTranscriptionDone    append user entry         publish, caption (dev only)
//! AssistantTranscriptDone  append assistant entry    publish, caption
//! ResponseDone                                       publish pending
//! ToolCallCreate           append tool result        publish
//! ToolCallItemAdded        remember call_id -> name
//! ToolCallRequested        [append invocation]       dispatch
//! ```

use serde_json::{Value, json};
use std::collections::HashMap;

use crate::core::events::{self, EventCategory, ServiceEvent};
use crate::core::frames::Speaker;
use crate::core::publisher::DeltaPublisher;
use crate::core::realtime::{ModelSender, RealtimeResult, ServiceEventStream};
use crate::core::relay::barge_in;
use crate::core::session::ConversationSession;
use crate::core::transcript::{FunctionCallRecord, parse_arguments};
use crate::plugin::{ToolCall, ToolCompletion, ToolDispatchBridge, run_isolated, split_wire_name};

/// Assistant message appended when something went wrong on the tool path.
pub const TEMPORARY_ISSUE_MESSAGE: &str =
    "I hit a temporary issue calling a tool. Let's try again or continue without it.";

/// Details sent with the `AgentError` frame when a loop step panics.
const INTERNAL_ERROR_DETAILS: &str = "internal error while processing the conversation";

/// One unit of work for the event loop.
enum Step {
    Event(ServiceEvent),
    Completion(ToolCompletion),
}

/// Per-session event loop state.
pub struct TurnReconciler {
    session: ConversationSession,
    publisher: DeltaPublisher,
    model: ModelSender,
    tools: ToolDispatchBridge,
    /// Function names announced by `response.output_item.added`, by call id
    pending_calls: HashMap<String, String>,
    record_invocations: bool,
}

impl TurnReconciler {
    pub fn new(
        session: ConversationSession,
        publisher: DeltaPublisher,
        model: ModelSender,
        tools: ToolDispatchBridge,
    ) -> Self {
        Self {
            session,
            publisher,
            model,
            tools,
            pending_calls: HashMap::new(),
            record_invocations: false,
        }
    }

    /// Also append an `Invocation` record when the model requests a call.
    pub fn with_invocation_records(mut self, enabled: bool) -> Self {
        self.record_invocations = enabled;
        self
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Run until the event stream ends or the model can no longer be reached.
    ///
    /// A panic while handling an event or a tool completion ends the loop
    /// with an `AgentError`, like any other fatal error.
    ///
    /// Returns the session so the caller can inspect the final transcript.
    pub async fn run(mut self, mut events: ServiceEventStream) -> ConversationSession {
        let session_id = self.session.session_id.clone();
        tracing::info!(session_id = %session_id, "Model event loop started");

        loop {
            let step = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => {
                        tracing::warn!(session_id = %session_id, "Model event stream ended");
                        self.publisher.agent_error("model connection closed").await;
                        break;
                    }
                },
                Some(completion) = self.tools.next_completion(), if self.tools.pending() > 0 => {
                    Step::Completion(completion)
                }
            };

            match run_isolated(self.step(step)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(session_id = %session_id, "Failed to return tool result to model: {}", e);
                    self.publisher.agent_error(&e.to_string()).await;
                    break;
                }
                Err(panic) => {
                    tracing::error!(session_id = %session_id, "Model event loop panicked: {}", panic);
                    self.publisher.agent_error(INTERNAL_ERROR_DETAILS).await;
                    break;
                }
            }
        }

        self.tools.abort_all();
        tracing::info!(
            session_id = %session_id,
            "Model event loop stopped after {} transcript entries",
            self.session.transcript.len()
        );
        self.session
    }

    async fn step(&mut self, step: Step) -> RealtimeResult<()> {
        match step {
            Step::Event(event) => {
                self.apply(event).await;
                Ok(())
            }
            Step::Completion(completion) => self.complete_tool_call(completion).await,
        }
    }

    /// Apply one service event.
    pub async fn apply(&mut self, event: ServiceEvent) {
        let category = event.category();
        let view = event.view();
        let session_id = self.session.session_id.clone();

        match category {
            EventCategory::SessionCreated => {
                tracing::info!(session_id = %session_id, "Model session created: {}", view.display("session.id"));
            }
            EventCategory::Error => {
                tracing::error!(session_id = %session_id, "Model error: {}", view.display("error"));
                self.apologize().await;
            }
            EventCategory::AudioBufferCleared => {
                tracing::debug!(session_id = %session_id, "Input audio buffer cleared");
            }
            EventCategory::SpeechStarted => {
                tracing::debug!(
                    session_id = %session_id,
                    "Speech started at {}ms",
                    view.display("audio_start_ms")
                );
                barge_in(self.publisher.channel()).await;
            }
            EventCategory::UserTranscriptionDone => {
                let transcript = view.text("transcript").trim();
                if transcript.is_empty() {
                    return;
                }
                tracing::info!(session_id = %session_id, "User: {}", transcript);
                self.session.transcript.add_user_message(transcript);
                if self.session.is_development_mode {
                    let timestamp = view.i64("audio_start_ms").unwrap_or(0);
                    self.publisher
                        .caption(Speaker::User, transcript, Some(timestamp))
                        .await;
                }
                self.flush().await;
            }
            EventCategory::UserTranscriptionFailed => {
                tracing::warn!(session_id = %session_id, "User transcription failed: {}", view.display("error"));
            }
            EventCategory::ResponseDone => {
                tracing::debug!(
                    session_id = %session_id,
                    "Response {} done: {}",
                    view.display("response.id"),
                    view.display("response.status_details")
                );
                self.flush().await;
            }
            EventCategory::AssistantTranscriptDone => {
                let transcript = view.text("transcript").trim();
                if transcript.is_empty() {
                    return;
                }
                tracing::info!(session_id = %session_id, "Assistant: {}", transcript);
                self.session.transcript.add_assistant_message(transcript);
                self.publisher
                    .caption(Speaker::Assistant, transcript, None)
                    .await;
                self.flush().await;
            }
            EventCategory::ToolCallCreate => {
                let field = |path: &str| view.get(path).cloned().unwrap_or(Value::Null);
                let record = FunctionCallRecord::Result {
                    function_name: view.text("function_name").to_string(),
                    plugin_name: view.text("plugin_name").to_string(),
                    arguments_sent: field("arguments_sent"),
                    arguments_used: field("arguments_used"),
                    result: field("result"),
                };
                self.session.transcript.add_tool_result(record);
                self.flush().await;
            }
            EventCategory::ToolCallItemAdded => {
                if let (Some(call_id), Some(name)) = (view.str("item.call_id"), view.str("item.name")) {
                    self.pending_calls
                        .insert(call_id.to_string(), name.to_string());
                }
            }
            EventCategory::ToolCallRequested => {
                let call_id = view.text("call_id").to_string();
                let announced = self.pending_calls.remove(&call_id);
                let name = view
                    .str("name")
                    .map(str::to_string)
                    .or(announced)
                    .unwrap_or_default();
                let arguments = view.text("arguments").to_string();

                if self.record_invocations {
                    let (plugin, function) = split_wire_name(&name);
                    self.session
                        .transcript
                        .add_function_invocation(FunctionCallRecord::Invocation {
                            function_name: function.to_string(),
                            plugin_name: plugin.to_string(),
                            arguments: parse_arguments(&arguments),
                        });
                    self.flush().await;
                }

                self.tools.dispatch(ToolCall {
                    call_id,
                    name,
                    arguments,
                });
            }
            EventCategory::Unhandled => {
                tracing::trace!(session_id = %session_id, "Unhandled event: {}", event.event_type);
            }
        }
    }

    /// Write a finished tool call back to the model and the transcript.
    ///
    /// Only a failure to reach the model is returned; tool failures take the
    /// apology path.
    pub async fn complete_tool_call(&mut self, completion: ToolCompletion) -> RealtimeResult<()> {
        self.model
            .submit_function_result(completion.call_id.clone(), completion.model_output())
            .await?;

        match completion.result_record() {
            Some(FunctionCallRecord::Result {
                function_name,
                plugin_name,
                arguments_sent,
                arguments_used,
                result,
            }) => {
                let event = ServiceEvent::new(
                    events::CONVERSATION_ITEM_CREATE,
                    json!({
                        "function_name": function_name,
                        "plugin_name": plugin_name,
                        "arguments_sent": arguments_sent,
                        "arguments_used": arguments_used,
                        "result": result,
                    }),
                );
                self.apply(event).await;
            }
            _ => self.apologize().await,
        }
        Ok(())
    }

    async fn apologize(&mut self) {
        self.session
            .transcript
            .add_assistant_message(TEMPORARY_ISSUE_MESSAGE);
        self.flush().await;
    }

    async fn flush(&mut self) {
        if self.session.has_pending() {
            self.publisher.publish(&mut self.session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frames::{ClientChannel, OutboundMessage, stop_audio_frame};
    use crate::core::realtime::ModelCommand;
    use crate::core::session::CallIdentity;
    use crate::core::transcript::Role;
    use crate::plugin::capabilities::{Capability, ToolContext, ToolError, object_schema};
    use crate::plugin::registry::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Schedule;

    #[async_trait]
    impl Capability for Schedule {
        fn plugin(&self) -> &str {
            "delivery"
        }
        fn name(&self) -> &str {
            "schedule_delivery"
        }
        fn description(&self) -> &str {
            "Schedule"
        }
        fn parameters(&self) -> Value {
            object_schema(&[("slot_id", "string", "Slot")], &["slot_id"])
        }
        async fn execute(&self, arguments: &Value, _: &ToolContext) -> Result<Value, ToolError> {
            match arguments.get("slot_id").and_then(Value::as_str) {
                Some("boom") => Err(ToolError::Execution("backend down".into())),
                Some(slot) => Ok(json!(format!("Delivery has been scheduled for slot {slot}."))),
                None => Err(ToolError::Precondition("no slot".into())),
            }
        }
    }

    struct Harness {
        reconciler: TurnReconciler,
        client_rx: mpsc::Receiver<OutboundMessage>,
        model_rx: mpsc::Receiver<ModelCommand>,
    }

    fn harness(call: Option<CallIdentity>) -> Harness {
        let (channel, client_rx) = ClientChannel::bounded(64);
        let (model_tx, model_rx) = mpsc::channel(64);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Schedule));
        let tools =
            ToolDispatchBridge::new(Arc::new(registry), ToolContext::development("call_1"));
        let session = ConversationSession::new("call_1", "system prompt", call);
        Harness {
            reconciler: TurnReconciler::new(
                session,
                DeltaPublisher::new(channel),
                ModelSender::new(model_tx),
                tools,
            ),
            client_rx,
            model_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let OutboundMessage::Text(text) = message {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    fn chat_histories(frames: &[Value]) -> Vec<&Value> {
        frames.iter().filter(|f| f["kind"] == "ChatHistory").collect()
    }

    fn event(event_type: &str, payload: Value) -> ServiceEvent {
        ServiceEvent::new(event_type, payload)
    }

    #[tokio::test]
    async fn test_user_transcription_then_response_done() {
        let mut h = harness(Some(CallIdentity {
            call_connection_id: "conn".into(),
        }));
        let before = h.reconciler.session().unsent_watermark;

        h.reconciler
            .apply(event(
                events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
                json!({"transcript": "I need apples"}),
            ))
            .await;
        h.reconciler
            .apply(event(events::RESPONSE_DONE, json!({"response": {"id": "r1"}})))
            .await;

        let frames = drain(&mut h.client_rx);
        assert_eq!(
            frames,
            vec![json!({"kind": "ChatHistory", "data": [{"role": "user", "content": "I need apples"}]})]
        );
        assert_eq!(h.reconciler.session().unsent_watermark, before + 1);
    }

    #[tokio::test]
    async fn test_development_mode_user_caption() {
        let mut h = harness(None);
        h.reconciler
            .apply(event(
                events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
                json!({"transcript": "hello", "audio_start_ms": 640}),
            ))
            .await;
        h.reconciler
            .apply(event(
                events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
                json!({"transcript": "again"}),
            ))
            .await;

        let frames = drain(&mut h.client_rx);
        let captions: Vec<&Value> = frames
            .iter()
            .filter(|f| f["kind"] == "Transcription")
            .collect();
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0]["data"]["timestamp"], 640);
        assert_eq!(captions[1]["data"]["timestamp"], 0);
    }

    #[tokio::test]
    async fn test_assistant_transcript_caption_has_null_timestamp() {
        let mut h = harness(None);
        h.reconciler
            .apply(event(
                events::RESPONSE_AUDIO_TRANSCRIPT_DONE,
                json!({"transcript": "Sure, which day?"}),
            ))
            .await;

        let frames = drain(&mut h.client_rx);
        assert_eq!(
            frames[0],
            json!({"kind": "Transcription", "data": {"speaker": "assistant", "text": "Sure, which day?", "timestamp": null}})
        );
        assert_eq!(chat_histories(&frames).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcription_is_ignored() {
        let mut h = harness(None);
        let len = h.reconciler.session().transcript.len();
        for payload in [json!({"transcript": ""}), json!({"transcript": "   "}), json!({})] {
            h.reconciler
                .apply(event(events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED, payload.clone()))
                .await;
            h.reconciler
                .apply(event(events::RESPONSE_AUDIO_TRANSCRIPT_DONE, payload))
                .await;
        }
        h.reconciler.apply(event(events::RESPONSE_DONE, json!({}))).await;

        assert_eq!(h.reconciler.session().transcript.len(), len);
        assert!(drain(&mut h.client_rx).is_empty());
    }

    #[tokio::test]
    async fn test_speech_started_always_barges_in() {
        let mut h = harness(None);
        for payload in [json!({"audio_start_ms": 100}), json!({})] {
            h.reconciler
                .apply(event(events::INPUT_AUDIO_BUFFER_SPEECH_STARTED, payload))
                .await;
            assert_eq!(
                h.client_rx.try_recv().unwrap(),
                OutboundMessage::Text(stop_audio_frame())
            );
        }
    }

    #[tokio::test]
    async fn test_tool_call_create_appends_result() {
        let mut h = harness(None);
        h.reconciler
            .apply(event(
                events::CONVERSATION_ITEM_CREATE,
                json!({
                    "function_name": "schedule_delivery",
                    "plugin_name": "delivery",
                    "result": "Delivery has been scheduled for slot 3"
                }),
            ))
            .await;

        let last = h.reconciler.session().transcript.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.function_calls[0].is_result());

        let frames = drain(&mut h.client_rx);
        assert_eq!(
            frames,
            vec![json!({"kind": "ChatHistory", "data": [{
                "role": "tool",
                "function_calls": [{
                    "function_name": "schedule_delivery",
                    "plugin": "delivery",
                    "arguments_sent": null,
                    "arguments_used": null,
                    "result": "Delivery has been scheduled for slot 3"
                }]
            }]})]
        );
    }

    #[tokio::test]
    async fn test_error_event_appends_apology() {
        let mut h = harness(None);
        h.reconciler
            .apply(event(events::ERROR, json!({"error": "rate_limited"})))
            .await;

        let last = h.reconciler.session().transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content.as_deref(), Some(TEMPORARY_ISSUE_MESSAGE));
        assert_eq!(chat_histories(&drain(&mut h.client_rx)).len(), 1);

        h.reconciler
            .apply(event(
                events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
                json!({"transcript": "still there?"}),
            ))
            .await;
        assert_eq!(chat_histories(&drain(&mut h.client_rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_trip_orders_invocation_before_result() {
        let mut h = harness(None);
        h.reconciler.record_invocations = true;

        h.reconciler
            .apply(event(
                events::RESPONSE_OUTPUT_ITEM_ADDED,
                json!({"item": {"type": "function_call", "call_id": "c1", "name": "delivery-schedule_delivery"}}),
            ))
            .await;
        h.reconciler
            .apply(event(
                events::RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE,
                json!({"call_id": "c1", "arguments": "{\"slot_id\": \"3\"}"}),
            ))
            .await;

        let completion = h.reconciler.tools.next_completion().await.unwrap();
        h.reconciler.complete_tool_call(completion).await.unwrap();

        assert_eq!(
            h.model_rx.try_recv().unwrap(),
            ModelCommand::FunctionCallOutput {
                call_id: "c1".into(),
                output: "Delivery has been scheduled for slot 3.".into()
            }
        );
        assert_eq!(h.model_rx.try_recv().unwrap(), ModelCommand::CreateResponse);

        let entries = h.reconciler.session().transcript.entries();
        let invocation = entries
            .iter()
            .position(|e| e.function_calls.iter().any(|c| !c.is_result()))
            .unwrap();
        let result = entries
            .iter()
            .position(|e| e.function_calls.iter().any(|c| c.is_result()))
            .unwrap();
        assert!(invocation < result);
        assert!(h.reconciler.pending_calls.is_empty());
        assert_eq!(chat_histories(&drain(&mut h.client_rx)).len(), 2);
    }

    #[tokio::test]
    async fn test_failed_tool_takes_recovery_path() {
        let mut h = harness(None);
        h.reconciler
            .apply(event(
                events::RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE,
                json!({"call_id": "c2", "name": "delivery-schedule_delivery", "arguments": "{\"slot_id\": \"boom\"}"}),
            ))
            .await;

        let completion = h.reconciler.tools.next_completion().await.unwrap();
        h.reconciler.complete_tool_call(completion).await.unwrap();

        assert!(matches!(
            h.model_rx.try_recv().unwrap(),
            ModelCommand::FunctionCallOutput { call_id, .. } if call_id == "c2"
        ));
        let last = h.reconciler.session().transcript.last().unwrap();
        assert_eq!(last.content.as_deref(), Some(TEMPORARY_ISSUE_MESSAGE));
    }

    #[tokio::test]
    async fn test_run_stops_when_stream_ends() {
        let mut h = harness(None);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(event(
            events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
            json!({"transcript": "hi"}),
        ))
        .unwrap();
        tx.send(event(events::ERROR, json!({"error": "rate_limited"})))
            .unwrap();
        drop(tx);

        let session = h.reconciler.run(rx).await;
        assert_eq!(session.transcript.len(), 3);
        assert_eq!(session.unsent_watermark, 3);

        let frames = drain(&mut h.client_rx);
        assert_eq!(frames.last().unwrap()["kind"], "AgentError");
    }

    #[tokio::test]
    async fn test_run_processes_tool_completions() {
        let mut h = harness(None);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(h.reconciler.run(rx));

        tx.send(event(
            events::RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE,
            json!({"call_id": "c3", "name": "delivery-schedule_delivery", "arguments": "{\"slot_id\": \"7\"}"}),
        ))
        .unwrap();

        assert!(matches!(
            h.model_rx.recv().await.unwrap(),
            ModelCommand::FunctionCallOutput { call_id, .. } if call_id == "c3"
        ));
        drop(tx);

        let session = task.await.unwrap();
        assert!(session.transcript.last().unwrap().function_calls[0].is_result());
    }

    /// Subscriber layer that panics when an event's message starts with a prefix.
    struct PanicOnMessage(&'static str);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for PanicOnMessage {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct Message(String);
            impl tracing::field::Visit for Message {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.0 = format!("{value:?}");
                    }
                }
            }

            let mut message = Message(String::new());
            event.record(&mut message);
            if message.0.starts_with(self.0) {
                panic!("log sink failure");
            }
        }
    }

    #[tokio::test]
    async fn test_run_reports_panic_as_agent_error() {
        use tracing_subscriber::layer::SubscriberExt;
        let subscriber =
            tracing_subscriber::registry().with(PanicOnMessage("Model session created"));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut h = harness(None);
        let len = h.reconciler.session().transcript.len();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(event(events::SESSION_CREATED, json!({"session": {"id": "s1"}})))
            .unwrap();
        tx.send(event(
            events::INPUT_AUDIO_TRANSCRIPTION_COMPLETED,
            json!({"transcript": "never applied"}),
        ))
        .unwrap();

        let session = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            h.reconciler.run(rx),
        )
        .await
        .expect("event loop kept running after a panic");

        let frames = drain(&mut h.client_rx);
        assert_eq!(
            frames,
            vec![json!({
                "kind": "AgentError",
                "message": crate::core::frames::AGENT_ERROR_MESSAGE,
                "details": INTERNAL_ERROR_DETAILS
            })]
        );
        assert_eq!(session.transcript.len(), len);
        drop(tx);
    }
}
