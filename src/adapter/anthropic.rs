use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use super::{sse, ChatAdapter, ChatStream};
use crate::error::AdapterError;
use crate::types::{
    ChatRequest, ChatResponse, FinishReason, StreamChunk, ToolCall, ToolCallDelta, Usage,
};

const PROVIDER: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic messages-API adapter. Translates the OpenAI-shaped
/// provider-agnostic request into the messages wire format.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AdapterError> {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::request(PROVIDER, e))
    }
}

/// Convert our `{type: "function", function: {...}}` tool objects to
/// Anthropic's `{name, description, input_schema}` shape.
fn convert_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let function = &tool["function"];
            let name = function["name"].as_str()?;
            Some(json!({
                "name": name,
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            }))
        })
        .collect()
}

fn build_body(request: &ChatRequest) -> Value {
    // The messages endpoint takes the system prompt out of band.
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();
    for msg in &request.messages {
        if msg["role"] == "system" {
            if let Some(text) = msg["content"].as_str() {
                system_parts.push(text.to_string());
            }
        } else {
            messages.push(msg.clone());
        }
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system_parts.is_empty() {
        body["system"] = json!(system_parts.join("\n"));
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if !request.stop.is_empty() {
        body["stop_sequences"] = json!(request.stop);
    }
    if request.presence_penalty.is_some() || request.frequency_penalty.is_some() {
        debug!("penalty knobs are not supported by the messages API, dropping");
    }
    if !request.tools.is_empty() {
        body["tools"] = json!(convert_tools(&request.tools));
    }
    if request.stream {
        body["stream"] = json!(true);
    }
    body
}

fn parse_response(parsed: &Value) -> Result<ChatResponse, AdapterError> {
    let finish = match parsed["stop_reason"].as_str().unwrap_or("end_turn") {
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        other => {
            return Err(AdapterError::parse(
                PROVIDER,
                format!("unknown stop_reason: {other}"),
            ))
        }
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in parsed["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block["id"].as_str().unwrap_or("").to_string(),
                name: block["name"].as_str().unwrap_or("").to_string(),
                arguments: block["input"].clone(),
            }),
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text_parts.join("\n"),
        tool_calls,
        finish,
        usage: Usage {
            input_tokens: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: parsed["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
    })
}

/// Translate one streaming event into a provider-agnostic chunk.
fn parse_event(data: &str) -> Result<StreamChunk, AdapterError> {
    let parsed: Value =
        serde_json::from_str(data).map_err(|e| AdapterError::parse(PROVIDER, e))?;
    let mut chunk = StreamChunk::default();

    match parsed["type"].as_str().unwrap_or("") {
        "message_start" => {
            let usage = &parsed["message"]["usage"];
            if usage.is_object() {
                chunk.usage = Some(Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                });
            }
        }
        "content_block_start" => {
            let block = &parsed["content_block"];
            if block["type"] == "tool_use" {
                chunk.tool_deltas.push(ToolCallDelta {
                    index: parsed["index"].as_u64().unwrap_or(0) as usize,
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                    arguments_fragment: String::new(),
                });
            }
        }
        "content_block_delta" => {
            let delta = &parsed["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    chunk.delta = delta["text"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .map(String::from);
                }
                "input_json_delta" => {
                    chunk.tool_deltas.push(ToolCallDelta {
                        index: parsed["index"].as_u64().unwrap_or(0) as usize,
                        id: None,
                        name: None,
                        arguments_fragment: delta["partial_json"]
                            .as_str()
                            .unwrap_or("")
                            .to_string(),
                    });
                }
                _ => {}
            }
        }
        "message_delta" => {
            chunk.finish = match parsed["delta"]["stop_reason"].as_str() {
                Some("tool_use") => Some(FinishReason::ToolCalls),
                Some("max_tokens") => Some(FinishReason::Length),
                Some(_) => Some(FinishReason::Stop),
                None => None,
            };
            if let Some(output) = parsed["usage"]["output_tokens"].as_u64() {
                chunk.usage = Some(Usage {
                    input_tokens: 0,
                    output_tokens: output as u32,
                });
            }
        }
        _ => {}
    }

    Ok(chunk)
}

#[async_trait]
impl ChatAdapter for AnthropicAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn create_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatResponse, AdapterError> {
        let body = build_body(&ChatRequest {
            stream: false,
            ..request
        });
        debug!(provider = PROVIDER, model = %body["model"], "chat completion request");

        let resp = self.post(&body).await?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| AdapterError::request(PROVIDER, e))?;
        if status != 200 {
            return Err(AdapterError::Api {
                provider: PROVIDER.into(),
                status,
                body: text,
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| AdapterError::parse(PROVIDER, e))?;
        parse_response(&parsed)
    }

    async fn create_streaming_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<ChatStream, AdapterError> {
        let body = build_body(&ChatRequest {
            stream: true,
            ..request
        });
        debug!(provider = PROVIDER, model = %body["model"], "streaming chat completion request");

        let resp = self.post(&body).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let text = resp
                .text()
                .await
                .map_err(|e| AdapterError::request(PROVIDER, e))?;
            return Err(AdapterError::Api {
                provider: PROVIDER.into(),
                status,
                body: text,
            });
        }

        let stream = sse::data_events(resp, PROVIDER)
            .map(|event| event.and_then(|data| parse_event(&data)));
        Ok(Box::pin(stream))
    }

    fn supports_images(&self) -> bool {
        true
    }
}
