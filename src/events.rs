use serde_json::Value;

/// Events emitted during a streaming run, for incremental relay to a UI.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A piece of plain-text content. Only sent while no tool call has
    /// appeared in the stream and the run is in `WaitResponse` mode.
    Content { text: String },
    /// A tool call fully reassembled from stream fragments.
    ToolCall { name: String, arguments: Value },
    /// A skill finished executing.
    SkillResult { name: String },
    /// The run is complete.
    Finished,
}
