use super::tools::{ToolCall, ToolRegistry, failure_output};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::server_events::ServerEvent;
use crate::transport::peer::ControlChannel;
use crate::{Error, safe_truncate};
use std::sync::Arc;

const TRACE_LOG_MAX_BYTES: usize = 1024;

/// What happened to one inbound control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not JSON or not a recognizable event; logged and dropped.
    Malformed,
    /// A valid event that needs no reply, including calls to unregistered tools.
    Ignored,
    /// A tool call was answered on the control channel.
    Replied { call_id: String, success: bool },
    /// A reply was produced but the channel refused it.
    SendFailed { call_id: String },
}

/// Routes tool invocations from the control channel to the capability table.
pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    channel: Arc<dyn ControlChannel>,
    auto_respond: bool,
}

impl Dispatcher {
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, channel: Arc<dyn ControlChannel>, auto_respond: bool) -> Self {
        Self { tools, channel, auto_respond }
    }

    /// Handle one raw inbound message. Never fails; every problem is logged.
    pub async fn on_message(&self, raw: &str) -> DispatchOutcome {
        tracing::trace!("Received event: {}", safe_truncate(raw, TRACE_LOG_MAX_BYTES));

        let event = match ServerEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed control message");
                return DispatchOutcome::Malformed;
            }
        };

        match event {
            ServerEvent::ResponseFunctionCallArgumentsDone { call_id, name, arguments, .. } => {
                self.handle_call(call_id, name, &arguments).await
            }
            ServerEvent::Error { error, .. } => {
                tracing::warn!(
                    kind = ?error.error_type,
                    code = ?error.code,
                    message = %error.message,
                    "remote service reported an error"
                );
                DispatchOutcome::Ignored
            }
            ServerEvent::SessionCreated { .. } => {
                tracing::debug!("remote session created");
                DispatchOutcome::Ignored
            }
            ServerEvent::SessionUpdated { .. } => {
                tracing::debug!("remote session configuration applied");
                DispatchOutcome::Ignored
            }
            ServerEvent::InputAudioBufferSpeechStarted { .. } => {
                tracing::trace!("speech started");
                DispatchOutcome::Ignored
            }
            ServerEvent::InputAudioBufferSpeechStopped { .. } => {
                tracing::trace!("speech stopped");
                DispatchOutcome::Ignored
            }
            ServerEvent::Other => DispatchOutcome::Ignored,
        }
    }

    async fn handle_call(&self, call_id: String, name: String, arguments: &str) -> DispatchOutcome {
        if !self.tools.contains(&name) {
            tracing::debug!(tool = %name, call_id = %call_id, "ignoring call to unregistered tool");
            return DispatchOutcome::Ignored;
        }

        let result = match serde_json::from_str(arguments) {
            Ok(arguments) => {
                tracing::info!(tool = %name, call_id = %call_id, "running tool");
                self.tools
                    .dispatch(ToolCall { name: name.clone(), call_id: call_id.clone(), arguments })
                    .await
                    .map(|result| result.output)
            }
            Err(err) => Err(Error::InvalidArguments(err.to_string())),
        };

        let (output, success) = match result {
            Ok(output) => {
                let success = output.get("success").and_then(serde_json::Value::as_bool).unwrap_or(true);
                (output, success)
            }
            Err(err) => {
                tracing::warn!(tool = %name, call_id = %call_id, error = %err, "tool call failed");
                (failure_output(err.to_string()), false)
            }
        };

        let reply = ClientEvent::function_call_output(call_id.clone(), output.to_string());
        if let Err(err) = self.send(&reply).await {
            tracing::warn!(call_id = %call_id, error = %err, "could not deliver tool output");
            return DispatchOutcome::SendFailed { call_id };
        }

        if self.auto_respond {
            let follow_up = ClientEvent::ResponseCreate { event_id: None };
            if let Err(err) = self.send(&follow_up).await {
                tracing::warn!(error = %err, "could not request a follow-up response");
            }
        }

        DispatchOutcome::Replied { call_id, success }
    }

    async fn send(&self, event: &ClientEvent) -> crate::Result<()> {
        let json = serde_json::to_string(event)?;
        tracing::trace!("Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.channel.send_text(json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::peer::ChannelState;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tokio::sync::watch;

    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        state: watch::Sender<ChannelState>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            let (state, _) = watch::channel(ChannelState::Open);
            Arc::new(Self { sent: Mutex::new(Vec::new()), state })
        }

        fn sent(&self) -> Vec<Value> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl ControlChannel for RecordingChannel {
        fn label(&self) -> &str {
            "response"
        }

        fn ready_state(&self) -> watch::Receiver<ChannelState> {
            self.state.subscribe()
        }

        async fn send_text(&self, text: String) -> crate::Result<()> {
            if *self.state.borrow() != ChannelState::Open {
                return Err(Error::ConnectionClosed);
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&self) {
            self.state.send_replace(ChannelState::Closed);
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.tool_with_schema("echo", "Echo.", json!({"type": "object"}), |args: Value| async move {
            Ok(json!({ "success": true, "args": args }))
        });
        tools.tool_with_schema("fails", "Fails.", json!({"type": "object"}), |_: Value| async move {
            Err::<Value, _>(Error::HandlerFailure("backend down".into()))
        });
        Arc::new(tools)
    }

    fn call(name: &str, arguments: &str, call_id: &str) -> String {
        json!({
            "type": "response.function_call_arguments.done",
            "event_id": "evt_1",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "name": name,
            "arguments": arguments,
            "call_id": call_id,
        })
        .to_string()
    }

    #[tokio::test]
    async fn replies_with_correlated_output() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);

        let outcome = dispatcher.on_message(&call("echo", r#"{"hello":"world"}"#, "call_7")).await;
        assert_eq!(outcome, DispatchOutcome::Replied { call_id: "call_7".into(), success: true });

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "conversation.item.create");
        assert_eq!(sent[0]["item"]["type"], "function_call_output");
        assert_eq!(sent[0]["item"]["call_id"], "call_7");
        let output: Value = serde_json::from_str(sent[0]["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["args"]["hello"], "world");
    }

    #[tokio::test]
    async fn unknown_tool_sends_nothing() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);

        let outcome = dispatcher.on_message(&call("launchRocket", "{}", "call_1")).await;
        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_messages_are_contained() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);

        assert_eq!(dispatcher.on_message("not json").await, DispatchOutcome::Malformed);
        assert_eq!(
            dispatcher
                .on_message(r#"{"type":"response.function_call_arguments.done","name":"echo"}"#)
                .await,
            DispatchOutcome::Malformed
        );
        assert_eq!(dispatcher.on_message(r#"{"type":"response.done"}"#).await, DispatchOutcome::Ignored);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn unparsable_arguments_are_answered_with_failure() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);

        let outcome = dispatcher.on_message(&call("echo", "{not json", "call_2")).await;
        assert_eq!(outcome, DispatchOutcome::Replied { call_id: "call_2".into(), success: false });

        let sent = channel.sent();
        let output: Value = serde_json::from_str(sent[0]["item"]["output"].as_str().unwrap()).unwrap();
        assert_eq!(output["success"], false);
        assert!(output["error"].as_str().unwrap().contains("Invalid tool arguments"));
    }

    #[tokio::test]
    async fn handler_errors_become_failure_payloads() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);

        let outcome = dispatcher.on_message(&call("fails", "{}", "call_3")).await;
        assert_eq!(outcome, DispatchOutcome::Replied { call_id: "call_3".into(), success: false });
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["item"]["call_id"], "call_3");
    }

    #[tokio::test]
    async fn auto_respond_requests_follow_up() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), true);

        dispatcher.on_message(&call("echo", "{}", "call_4")).await;
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], json!({ "type": "response.create" }));
    }

    #[tokio::test]
    async fn closed_channel_reports_send_failure() {
        let channel = RecordingChannel::new();
        let dispatcher = Dispatcher::new(registry(), channel.clone(), false);
        channel.close().await;

        let outcome = dispatcher.on_message(&call("echo", "{}", "call_5")).await;
        assert_eq!(outcome, DispatchOutcome::SendFailed { call_id: "call_5".into() });
    }
}
