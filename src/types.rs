use serde_json::Value;

/// Fully-formed, provider-agnostic request — the adapter just translates
/// and sends it.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
    pub tools: Vec<Value>,
    pub stream: bool,
}

/// What came back from the model, normalized across providers.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish: FinishReason,
    pub usage: Usage,
}

/// A model-emitted request to invoke a named skill.
/// Arguments are already JSON-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

/// One incremental piece of a streaming response.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub tool_deltas: Vec<ToolCallDelta>,
    pub finish: Option<FinishReason>,
    /// Token counts reported mid-stream. Providers split these across
    /// events; consumers accumulate.
    pub usage: Option<Usage>,
}

/// A fragment of a tool call arriving mid-stream. The `index` groups
/// fragments belonging to the same call; `id` and `name` show up once,
/// argument JSON arrives in pieces.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: String,
}

/// Token usage for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
