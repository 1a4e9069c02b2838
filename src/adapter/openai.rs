use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use super::{sse, ChatAdapter, ChatStream};
use crate::error::AdapterError;
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, StreamChunk, ToolCall, ToolCallDelta, Usage,
};

/// OpenAI-style adapter. Works against any server implementing the
/// `/v1/chat/completions` endpoint. Messages and tool objects are already
/// OpenAI-shaped at this layer, so translation is a passthrough.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    tag: &'static str,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".into(),
            api_key: Some(api_key.into()),
            tag: "openai",
        }
    }

    /// Same wire format under a different provider tag and endpoint
    /// (Groq and friends).
    pub(crate) fn tagged(tag: &'static str, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            tag,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AdapterError> {
        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }
        req.json(body)
            .send()
            .await
            .map_err(|e| AdapterError::request(self.tag, e))
    }
}

pub(crate) fn build_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(presence_penalty) = request.presence_penalty {
        body["presence_penalty"] = json!(presence_penalty);
    }
    if let Some(frequency_penalty) = request.frequency_penalty {
        body["frequency_penalty"] = json!(frequency_penalty);
    }
    if !request.stop.is_empty() {
        body["stop"] = json!(request.stop);
    }
    if let Some(seed) = request.seed {
        body["seed"] = json!(seed);
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }
    if request.stream {
        body["stream"] = json!(true);
    }
    body
}

pub(crate) fn parse_response(
    provider: &'static str,
    parsed: &Value,
) -> Result<ChatResponse, AdapterError> {
    let choice = parsed["choices"]
        .get(0)
        .ok_or_else(|| AdapterError::parse(provider, "response has no choices"))?;

    let finish = match choice["finish_reason"].as_str().unwrap_or("stop") {
        "tool_calls" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        other => {
            if other != "stop" {
                debug!(finish_reason = %other, "unknown finish_reason, treating as stop");
            }
            FinishReason::Stop
        }
    };

    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let args_str = call["function"]["arguments"].as_str().unwrap_or("{}");
            tool_calls.push(ToolCall {
                id: call["id"].as_str().unwrap_or("").to_string(),
                name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: serde_json::from_str(args_str).unwrap_or_else(|_| json!({})),
            });
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        finish,
        usage: Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        },
    })
}

pub(crate) fn parse_chunk(
    provider: &'static str,
    data: &str,
) -> Result<StreamChunk, AdapterError> {
    let parsed: Value =
        serde_json::from_str(data).map_err(|e| AdapterError::parse(provider, e))?;

    let mut chunk = StreamChunk::default();
    if parsed["usage"].is_object() {
        chunk.usage = Some(Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });
    }

    // The trailing usage-only chunk has an empty choices array.
    let Some(choice) = parsed["choices"].get(0) else {
        return Ok(chunk);
    };

    let delta = &choice["delta"];
    chunk.delta = delta["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from);

    if let Some(calls) = delta["tool_calls"].as_array() {
        for call in calls {
            chunk.tool_deltas.push(ToolCallDelta {
                index: call["index"].as_u64().unwrap_or(0) as usize,
                id: call["id"].as_str().map(String::from),
                name: call["function"]["name"].as_str().map(String::from),
                arguments_fragment: call["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }

    chunk.finish = match choice["finish_reason"].as_str() {
        Some("tool_calls") => Some(FinishReason::ToolCalls),
        Some("length") => Some(FinishReason::Length),
        Some(_) => Some(FinishReason::Stop),
        None => None,
    };

    Ok(chunk)
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    fn provider(&self) -> &'static str {
        self.tag
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, AdapterError> {
        let body = build_body(&ChatRequest {
            stream: false,
            ..request
        });
        debug!(provider = self.tag, model = %body["model"], "chat completion request");

        let resp = self.post(&body).await?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| AdapterError::request(self.tag, e))?;
        if status != 200 {
            return Err(AdapterError::Api {
                provider: self.tag.into(),
                status,
                body: text,
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| AdapterError::parse(self.tag, e))?;
        parse_response(self.tag, &parsed)
    }

    async fn create_streaming_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, AdapterError> {
        let body = build_body(&ChatRequest {
            stream: true,
            ..request
        });
        debug!(provider = self.tag, model = %body["model"], "streaming chat completion request");

        let resp = self.post(&body).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp
                .text()
                .await
                .map_err(|e| AdapterError::request(self.tag, e))?;
            return Err(AdapterError::Api {
                provider: self.tag.into(),
                status,
                body: text,
            });
        }

        let tag = self.tag;
        let stream = sse::data_events(resp, tag)
            .map(move |event| event.and_then(|data| parse_chunk(tag, &data)));
        Ok(Box::pin(stream))
    }

    fn supports_images(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_response() {
        let raw = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {"content": "Hello!"}
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let resp = parse_response("openai", &raw).unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish, FinishReason::Stop);
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.input_tokens, 10);
    }

    #[test]
    fn parses_tool_calls_with_decoded_arguments() {
        let raw = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\": 1, \"b\": 2}"}
                    }]
                }
            }],
            "usage": {}
        });
        let resp = parse_response("openai", &raw).unwrap();
        assert_eq!(resp.finish, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "add");
        assert_eq!(resp.tool_calls[0].arguments, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn missing_choices_is_a_parse_error() {
        let raw = json!({"error": "nope"});
        assert!(matches!(
            parse_response("openai", &raw),
            Err(AdapterError::Parse { .. })
        ));
    }

    #[test]
    fn parses_streaming_tool_call_fragments() {
        let first = parse_chunk(
            "openai",
            &json!({
                "choices": [{
                    "delta": {
                        "tool_calls": [{
                            "index": 0,
                            "id": "call_1",
                            "function": {"name": "add", "arguments": "{\"a\""}
                        }]
                    }
                }]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(first.tool_deltas.len(), 1);
        assert_eq!(first.tool_deltas[0].name.as_deref(), Some("add"));
        assert_eq!(first.tool_deltas[0].arguments_fragment, "{\"a\"");

        let last = parse_chunk(
            "openai",
            &json!({
                "choices": [{
                    "delta": {},
                    "finish_reason": "tool_calls"
                }]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(last.finish, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn usage_only_chunk_reports_token_counts() {
        let chunk = parse_chunk(
            "openai",
            &json!({
                "choices": [],
                "usage": {"prompt_tokens": 12, "completion_tokens": 34}
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(
            chunk.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 34
            })
        );
        assert!(chunk.delta.is_none());
        assert!(chunk.finish.is_none());
    }

    #[test]
    fn body_includes_only_set_knobs() {
        let request = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![json!({"role": "user", "content": "hi"})],
            temperature: Some(0.2),
            seed: Some(7),
            ..ChatRequest::default()
        };
        let body = build_body(&request);
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["seed"], json!(7));
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
    }
}
