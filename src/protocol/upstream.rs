//! Upstream NDJSON record decoding.
//!
//! Each line is decoded once into [`UpstreamRecord`]; the response payload is
//! then classified into a closed [`RecordKind`] before any transcoding runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const TAG_FUNCTION_CALL: &str = "function_call";
pub const TAG_FUNCTION_RESULT: &str = "raw_function_result";
pub const TAG_HEADER: &str = "header";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient")]
    error: Option<ErrorBody>,
    #[serde(default, deserialize_with = "lenient")]
    result: Option<ResultBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, deserialize_with = "lenient")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    #[serde(default, deserialize_with = "lenient")]
    response: Option<ResponsePayload>,
}

/// Decode a field, falling back to its default when the value has the wrong
/// shape. Only lines that are not JSON at all are treated as noise.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(|value| is_truthy(&value))
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    }
}

/// One decoded upstream line.
#[derive(Debug)]
pub enum UpstreamRecord {
    /// Explicit provider error (`error.message`).
    Error { message: String },
    /// Keep-alive or envelope-only record with no response payload.
    Envelope,
    Response(Box<ResponsePayload>),
}

impl UpstreamRecord {
    /// Decode a single line; `None` for blank or non-JSON noise.
    #[must_use]
    pub fn decode(line: &str) -> Option<Self> {
        let line = line.trim();
        // Records are always objects; anything else is keep-alive noise.
        if !line.starts_with('{') {
            return None;
        }
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::trace!("dropping malformed upstream line: {err}");
                return None;
            }
        };
        Some(Self::from_envelope(envelope))
    }

    fn from_envelope(envelope: Envelope) -> Self {
        if let Some(message) = envelope.error.and_then(|error| error.message) {
            return Self::Error { message };
        }
        match envelope.result.and_then(|result| result.response) {
            Some(response) => Self::Response(Box::new(response)),
            None => Self::Envelope,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    /// String for text tokens; arrays are ignored.
    #[serde(default, deserialize_with = "lenient")]
    pub token: Option<Value>,
    #[serde(default, deserialize_with = "truthy")]
    pub is_thinking: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub message_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub rollout_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub llm_info: Option<LlmInfo>,
    #[serde(default, deserialize_with = "lenient")]
    pub streaming_video_generation_response: Option<VideoGeneration>,
    #[serde(default, deserialize_with = "lenient")]
    pub streaming_image_generation_response: Option<ImageProgress>,
    #[serde(default, deserialize_with = "lenient")]
    pub image_attachment_info: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub model_response: Option<ModelResponse>,
    #[serde(default, deserialize_with = "lenient")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, deserialize_with = "lenient")]
    pub web_search_results: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub code_execution_result: Option<CodeExecutionResult>,
    #[serde(default, deserialize_with = "lenient")]
    pub tool_usage_card_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub model_hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGeneration {
    #[serde(default, deserialize_with = "lenient")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub thumbnail_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProgress {
    #[serde(default, deserialize_with = "lenient")]
    pub image_index: Option<u32>,
    #[serde(default, deserialize_with = "lenient")]
    pub progress: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub generated_image_urls: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// Object, or a JSON document encoded as a string.
    #[serde(default, deserialize_with = "lenient")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    #[serde(default, deserialize_with = "lenient")]
    pub exit_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub stdout: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub stderr: Option<String>,
}

/// Classification of a response payload, in precedence order.
#[derive(Debug)]
pub enum RecordKind<'a> {
    Video(&'a VideoGeneration),
    Image(ImageFrame<'a>),
    ToolCall(&'a FunctionCall),
    ToolResult {
        search: Option<&'a Value>,
        code: Option<&'a CodeExecutionResult>,
    },
    TextToken(&'a str),
    Unrecognized,
}

/// Image-generation record, once the session is in image mode.
#[derive(Debug)]
pub struct ImageFrame<'a> {
    pub progress: Option<&'a ImageProgress>,
    pub final_urls: Option<&'a [Value]>,
    pub token: Option<&'a str>,
}

impl ResponsePayload {
    /// Whether this record switches the session into image mode.
    #[must_use]
    pub fn signals_image(&self) -> bool {
        self.image_attachment_info.is_some() || self.streaming_image_generation_response.is_some()
    }

    /// Non-empty model name carried by this record.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }

    #[must_use]
    pub fn model_hash(&self) -> Option<&str> {
        self.llm_info
            .as_ref()
            .and_then(|info| info.model_hash.as_deref())
            .filter(|hash| !hash.is_empty())
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        self.message_tag.as_deref().unwrap_or("")
    }

    /// String token, if any; array-valued tokens are treated as absent.
    #[must_use]
    pub fn text_token(&self) -> Option<&str> {
        self.token.as_ref().and_then(Value::as_str)
    }

    #[must_use]
    pub fn routing_prefix(&self) -> String {
        match self.rollout_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => format!("[{id}] "),
            None => String::new(),
        }
    }

    /// Classify this payload. `image_mode` is the session latch *after* this
    /// record has been considered for [`Self::signals_image`].
    #[must_use]
    pub fn kind(&self, image_mode: bool) -> RecordKind<'_> {
        if let Some(video) = &self.streaming_video_generation_response {
            return RecordKind::Video(video);
        }
        if image_mode {
            return RecordKind::Image(ImageFrame {
                progress: self.streaming_image_generation_response.as_ref(),
                final_urls: self
                    .model_response
                    .as_ref()
                    .and_then(|mr| mr.generated_image_urls.as_deref()),
                token: self.text_token(),
            });
        }
        let tag = self.tag();
        if tag == TAG_FUNCTION_CALL {
            if let Some(call) = &self.function_call {
                return RecordKind::ToolCall(call);
            }
        }
        if tag == TAG_FUNCTION_RESULT
            && (self.web_search_results.is_some() || self.code_execution_result.is_some())
        {
            return RecordKind::ToolResult {
                search: self.web_search_results.as_ref(),
                code: self.code_execution_result.as_ref(),
            };
        }
        match self.text_token() {
            Some(token) if !token.is_empty() => RecordKind::TextToken(token),
            _ => RecordKind::Unrecognized,
        }
    }
}

/// Model-response error text, for the batch aggregator.
#[must_use]
pub fn model_response_error(response: &ResponsePayload) -> Option<String> {
    let error = response.model_response.as_ref()?.error.as_ref()?;
    match error {
        Value::Null => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_owned),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(line: &str) -> ResponsePayload {
        match UpstreamRecord::decode(line) {
            Some(UpstreamRecord::Response(payload)) => *payload,
            other => panic!("expected response payload, got {other:?}"),
        }
    }

    #[test]
    fn decodes_error_record() {
        let record = UpstreamRecord::decode(r#"{"error":{"message":"quota exceeded"}}"#);
        assert!(matches!(
            record,
            Some(UpstreamRecord::Error { ref message }) if message == "quota exceeded"
        ));
    }

    #[test]
    fn envelope_without_response_is_keep_alive() {
        assert!(matches!(
            UpstreamRecord::decode(r#"{"result":{}}"#),
            Some(UpstreamRecord::Envelope)
        ));
        assert!(matches!(
            UpstreamRecord::decode(r#"{"error":{}}"#),
            Some(UpstreamRecord::Envelope)
        ));
    }

    #[test]
    fn blank_and_non_json_lines_are_dropped() {
        assert!(UpstreamRecord::decode("   ").is_none());
        assert!(UpstreamRecord::decode(": keep-alive").is_none());
        assert!(UpstreamRecord::decode("[1,2,3]").is_none());
    }

    #[test]
    fn classifies_text_token_and_ignores_array_tokens() {
        let payload = response(r#"{"result":{"response":{"token":"Hi","isThinking":true}}}"#);
        assert!(matches!(payload.kind(false), RecordKind::TextToken("Hi")));
        assert!(payload.is_thinking);

        let payload = response(r#"{"result":{"response":{"token":["a","b"]}}}"#);
        assert!(matches!(payload.kind(false), RecordKind::Unrecognized));
    }

    #[test]
    fn mistyped_fields_fall_back_to_defaults() {
        let payload = response(r#"{"result":{"response":{"token":"hello","isThinking":null}}}"#);
        assert!(!payload.is_thinking);
        assert!(matches!(payload.kind(false), RecordKind::TextToken("hello")));

        let payload = response(
            r#"{"result":{"response":{"token":"hello","rolloutId":7,"messageTag":false,"model":["m"],"isThinking":1}}}"#,
        );
        assert!(payload.is_thinking);
        assert_eq!(payload.routing_prefix(), "");
        assert_eq!(payload.tag(), "");
        assert_eq!(payload.model_name(), None);
        assert!(matches!(payload.kind(false), RecordKind::TextToken("hello")));

        let payload = response(
            r#"{"result":{"response":{"messageTag":"raw_function_result","codeExecutionResult":{"exitCode":"0","stdout":"ok"},"streamingImageGenerationResponse":{"imageIndex":-1,"progress":"50"}}}}"#,
        );
        let code = payload.code_execution_result.as_ref().expect("code result");
        assert_eq!(code.exit_code, None);
        assert_eq!(code.stdout.as_deref(), Some("ok"));
        let image = payload
            .streaming_image_generation_response
            .as_ref()
            .expect("image progress");
        assert_eq!(image.image_index, None);
        assert_eq!(image.progress, None);
    }

    #[test]
    fn mistyped_error_body_is_a_keep_alive() {
        assert!(matches!(
            UpstreamRecord::decode(r#"{"error":"quota"}"#),
            Some(UpstreamRecord::Envelope)
        ));
    }

    #[test]
    fn structured_tool_call_requires_tag_and_object() {
        let payload = response(
            r#"{"result":{"response":{"messageTag":"function_call","functionCall":{"name":"web_search","arguments":{"query":"rust"}}}}}"#,
        );
        assert!(matches!(payload.kind(false), RecordKind::ToolCall(_)));

        let payload = response(
            r#"{"result":{"response":{"messageTag":"function_call","token":"{\"name\":"}}}"#,
        );
        assert!(matches!(payload.kind(false), RecordKind::TextToken(_)));
    }

    #[test]
    fn video_wins_over_image_mode() {
        let payload = response(
            r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":10}}}}"#,
        );
        assert!(matches!(payload.kind(true), RecordKind::Video(_)));
    }

    #[test]
    fn image_mode_routes_every_record_to_image() {
        let payload = response(
            r#"{"result":{"response":{"imageAttachmentInfo":{},"modelResponse":{"generatedImageUrls":["https://x/y.png"]}}}}"#,
        );
        assert!(payload.signals_image());
        match payload.kind(true) {
            RecordKind::Image(frame) => assert_eq!(frame.final_urls.map(<[Value]>::len), Some(1)),
            other => panic!("expected image frame, got {other:?}"),
        }
    }

    #[test]
    fn routing_prefix_and_model_name() {
        let payload = response(
            r#"{"result":{"response":{"rolloutId":"Agent-2","model":" grok-x ","token":"t"}}}"#,
        );
        assert_eq!(payload.routing_prefix(), "[Agent-2] ");
        assert_eq!(payload.model_name(), Some("grok-x"));
    }

    #[test]
    fn model_response_error_extracts_message() {
        let payload = response(
            r#"{"result":{"response":{"modelResponse":{"error":{"message":"blocked"}}}}}"#,
        );
        assert_eq!(model_response_error(&payload).as_deref(), Some("blocked"));
    }
}
