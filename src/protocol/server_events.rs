use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::models::ServerError;

/// Inbound control-channel events.
///
/// Only the events the session reacts to are typed; everything else lands in `Other`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: Option<String>,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: Option<String>,
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: Option<String>,
        session: Value,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        output_index: Option<u32>,
        call_id: String,
        name: String,
        /// JSON-encoded arguments, parsed by the dispatcher.
        arguments: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        audio_start_ms: Option<u32>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        event_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u32>,
    },
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Parse one raw data-channel message.
    ///
    /// # Errors
    /// Returns a serialization error when the text is not JSON or a known event is
    /// missing required fields.
    #[allow(clippy::result_large_err)]
    pub fn parse(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
