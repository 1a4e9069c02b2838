pub mod adapter;
pub mod error;
pub mod events;
pub mod skills;
pub mod types;

use std::collections::BTreeMap;
use std::str::FromStr;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use adapter::{AnthropicAdapter, ChatAdapter, ChatStream, GroqAdapter, OpenAiAdapter};
pub use error::{AdapterError, AgentError};
pub use events::AgentEvent;
pub use skills::{
    format_tool, Skill, SkillBindings, SkillFilter, SkillHandler, SkillModule, SkillRegistry,
};
pub use types::{
    ChatRequest, ChatResponse, FinishReason, StreamChunk, ToolCall, ToolCallDelta, Usage,
};

/// Fixed confirmation returned by `ExecutionOnly` once every dispatched
/// skill has completed.
pub const EXECUTION_CONFIRMATION: &str = "All dispatched skills have finished executing.";

/// Policy governing whether and how a resolved tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Execute every resolved call and hand the results back.
    #[default]
    WaitResponse,
    /// Execute everything, return only a fixed confirmation.
    ExecutionOnly,
    /// Never execute; report each call's decoded arguments.
    GetArgs,
}

impl FromStr for ExecutionMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait_response" => Ok(Self::WaitResponse),
            "execution_only" => Ok(Self::ExecutionOnly),
            "get_args" => Ok(Self::GetArgs),
            other => Err(AgentError::Config(format!(
                "invalid execution mode: {other}"
            ))),
        }
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitResponse => "wait_response",
            Self::ExecutionOnly => "execution_only",
            Self::GetArgs => "get_args",
        }
    }
}

/// Agent-level defaults, merged with per-run overrides into a request.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub model: String,
    /// System prompt prepended to every run.
    pub role_setup: Option<String>,
    /// Default active skill names.
    pub skills: Vec<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop: Vec<String>,
    pub seed: Option<i64>,
    /// Pre-encoded image content blocks attached to every prompt.
    pub images: Vec<Value>,
}

/// Per-run overrides. Anything left unset falls back to the agent config.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub execution_mode: ExecutionMode,
    /// Dispatch resolved calls concurrently and join them as one batch.
    pub parallel: bool,
    /// Skip result interpretation and hand back the raw response.
    pub return_full_response: bool,
    /// Active skill names for this run only. `Some(vec![])` disables skills.
    pub skills: Option<Vec<String>>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub seed: Option<i64>,
    pub images: Option<Vec<Value>>,
}

/// One reported tool call in `GetArgs` mode.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArgs {
    pub name: String,
    pub arguments: Value,
}

/// What a run produced, shaped by the execution mode.
#[derive(Debug)]
pub enum RunOutput {
    /// Plain model text, verbatim (may be empty).
    Text(String),
    /// `WaitResponse` with exactly one resolved call: the bare result.
    Result(Value),
    /// `WaitResponse` with several resolved calls, in call order.
    Results(Vec<Value>),
    /// `GetArgs`: decoded arguments per resolved call, in call order.
    Args(Vec<CallArgs>),
    /// `ExecutionOnly`: fixed confirmation, sent after all work completed.
    Confirmation(String),
    /// `return_full_response`: the normalized response, uninterpreted.
    Full(ChatResponse),
}

/// The agent: one adapter, one skill registry, one set of defaults.
///
/// `run` borrows the agent shared, so registry mutation is statically
/// serialized against in-flight runs; hand a run a snapshot built with the
/// skill set operations when that is too strict.
pub struct Agent {
    adapter: Box<dyn ChatAdapter>,
    registry: SkillRegistry,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        adapter: impl ChatAdapter + 'static,
        registry: SkillRegistry,
        config: AgentConfig,
    ) -> Self {
        Self {
            adapter: Box::new(adapter),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SkillRegistry {
        &mut self.registry
    }

    pub fn add_skill(&mut self, skill: Skill) -> Result<String, AgentError> {
        self.registry.register(skill)
    }

    pub fn remove_skill(&mut self, name: &str) -> Result<Skill, AgentError> {
        self.registry.remove(name, None)
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.registry.skill_names()
    }

    /// Single prompt execution: build the request, dispatch to the adapter,
    /// and interpret the response per the configured execution mode.
    pub async fn run(&self, prompt: &str, options: RunOptions) -> Result<RunOutput, AgentError> {
        let request = self.build_request(prompt, &options, false)?;
        info!(
            model = %request.model,
            mode = options.execution_mode.as_str(),
            tools = request.tools.len(),
            "dispatching run"
        );

        let response = self.adapter.create_chat_completion(request).await?;

        if options.return_full_response {
            return Ok(RunOutput::Full(response));
        }
        if response.tool_calls.is_empty() {
            return Ok(RunOutput::Text(response.content));
        }
        self.dispatch(
            &response.tool_calls,
            options.execution_mode,
            options.parallel,
            None,
        )
        .await
    }

    /// Streaming prompt execution. Text deltas are relayed over `tx` while
    /// the run is in `WaitResponse` mode and no tool-call fragment has
    /// appeared yet; tool-call fragments are reassembled once the stream is
    /// drained and then dispatched exactly like the non-streaming path.
    pub async fn run_streaming(
        &self,
        prompt: &str,
        options: RunOptions,
        tx: mpsc::Sender<AgentEvent>,
    ) -> Result<RunOutput, AgentError> {
        let request = self.build_request(prompt, &options, true)?;
        info!(
            model = %request.model,
            mode = options.execution_mode.as_str(),
            tools = request.tools.len(),
            "dispatching streaming run"
        );

        let mut stream = self
            .adapter
            .create_streaming_chat_completion(request)
            .await?;

        let mut content = String::new();
        let mut assembler = ToolCallAssembler::default();
        let mut finish = None;
        let mut usage = Usage::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(chunk_usage) = chunk.usage {
                usage.accumulate(&chunk_usage);
            }
            if let Some(text) = chunk.delta {
                content.push_str(&text);
                // Incremental relay stops the moment a tool call shows up;
                // text already forwarded stays part of the full response.
                if options.execution_mode == ExecutionMode::WaitResponse && assembler.is_empty() {
                    let _ = tx.send(AgentEvent::Content { text }).await;
                }
            }
            for delta in chunk.tool_deltas {
                assembler.push(delta);
            }
            if let Some(reason) = chunk.finish {
                finish = Some(reason);
                break;
            }
        }

        let tool_calls = assembler.finish();
        for call in &tool_calls {
            let _ = tx
                .send(AgentEvent::ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
        }

        let output = if options.return_full_response {
            let finish = finish.unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });
            RunOutput::Full(ChatResponse {
                content,
                tool_calls,
                finish,
                usage,
            })
        } else if tool_calls.is_empty() {
            RunOutput::Text(content)
        } else {
            self.dispatch(
                &tool_calls,
                options.execution_mode,
                options.parallel,
                Some(&tx),
            )
            .await?
        };

        let _ = tx.send(AgentEvent::Finished).await;
        Ok(output)
    }

    /// Merge config and options into one immutable request snapshot.
    fn build_request(
        &self,
        prompt: &str,
        options: &RunOptions,
        stream: bool,
    ) -> Result<ChatRequest, AgentError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        if model.is_empty() {
            return Err(AgentError::Config("model is not configured".into()));
        }

        let images = options.images.as_ref().unwrap_or(&self.config.images);
        if !images.is_empty() && !self.adapter.supports_images() {
            return Err(AgentError::Config(format!(
                "provider '{}' does not support image content",
                self.adapter.provider()
            )));
        }

        let mut messages = Vec::new();
        if let Some(ref role_setup) = self.config.role_setup {
            messages.push(json!({"role": "system", "content": role_setup}));
        }
        if images.is_empty() {
            messages.push(json!({"role": "user", "content": prompt}));
        } else {
            let mut content = vec![json!({"type": "text", "text": prompt})];
            content.extend(images.iter().cloned());
            messages.push(json!({"role": "user", "content": content}));
        }

        let active = options.skills.as_ref().unwrap_or(&self.config.skills);
        let mut tools = Vec::new();
        for name in active {
            let Some(skill) = self.registry.primary(name) else {
                warn!(skill = %name, "active skill not found in registry, skipping");
                continue;
            };
            match format_tool(&skill.metadata) {
                Ok(tool) => tools.push(tool),
                Err(e) => {
                    warn!(skill = %name, error = %e, "skill has no usable schema, skipping");
                }
            }
        }
        debug!(active = active.len(), formatted = tools.len(), "resolved active skills");

        Ok(ChatRequest {
            model,
            messages,
            temperature: options.temperature.or(self.config.temperature),
            max_tokens: options.max_tokens.or(self.config.max_tokens),
            presence_penalty: options.presence_penalty.or(self.config.presence_penalty),
            frequency_penalty: options
                .frequency_penalty
                .or(self.config.frequency_penalty),
            stop: options.stop.clone().unwrap_or_else(|| self.config.stop.clone()),
            seed: options.seed.or(self.config.seed),
            tools,
            stream,
        })
    }

    /// The execution-mode state machine. Calls naming an unregistered skill
    /// are skipped with a warning in every mode and contribute nothing.
    async fn dispatch(
        &self,
        calls: &[ToolCall],
        mode: ExecutionMode,
        parallel: bool,
        tx: Option<&mpsc::Sender<AgentEvent>>,
    ) -> Result<RunOutput, AgentError> {
        let mut resolved = Vec::new();
        for call in calls {
            match self.registry.primary(&call.name) {
                Some(skill) => resolved.push((skill.clone(), call.clone())),
                None => {
                    warn!(skill = %call.name, "model requested an unregistered skill, skipping");
                }
            }
        }

        if mode == ExecutionMode::GetArgs {
            return Ok(RunOutput::Args(
                resolved
                    .into_iter()
                    .map(|(_, call)| CallArgs {
                        name: call.name,
                        arguments: call.arguments,
                    })
                    .collect(),
            ));
        }

        let results = if parallel {
            execute_parallel(resolved, tx).await
        } else {
            execute_sequential(resolved, tx).await
        };

        // The batch is fully settled here; surface the first failure in
        // call order, if any.
        let mut values = Vec::with_capacity(results.len());
        for result in results {
            values.push(result?);
        }

        match mode {
            ExecutionMode::ExecutionOnly => {
                Ok(RunOutput::Confirmation(EXECUTION_CONFIRMATION.into()))
            }
            ExecutionMode::WaitResponse => match values.len() {
                1 => Ok(RunOutput::Result(values.swap_remove(0))),
                _ => Ok(RunOutput::Results(values)),
            },
            ExecutionMode::GetArgs => unreachable!("handled above"),
        }
    }
}

/// Execute every resolved call in order, one at a time.
async fn execute_sequential(
    resolved: Vec<(Skill, ToolCall)>,
    tx: Option<&mpsc::Sender<AgentEvent>>,
) -> Vec<Result<Value, AgentError>> {
    let mut results = Vec::with_capacity(resolved.len());
    for (skill, call) in resolved {
        let result = skill.execute(&call.arguments).await;
        if result.is_ok() {
            if let Some(tx) = tx {
                let _ = tx.send(AgentEvent::SkillResult { name: call.name }).await;
            }
        }
        results.push(result);
    }
    results
}

/// Dispatch every resolved call onto its own task, then await the whole
/// batch in call order — results are never a mix of settled and pending.
async fn execute_parallel(
    resolved: Vec<(Skill, ToolCall)>,
    tx: Option<&mpsc::Sender<AgentEvent>>,
) -> Vec<Result<Value, AgentError>> {
    let handles: Vec<_> = resolved
        .into_iter()
        .map(|(skill, call)| {
            let handle = tokio::spawn(async move { skill.execute(&call.arguments).await });
            (call.name, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(AgentError::Skill {
                name: name.clone(),
                message: format!("execution task failed: {e}"),
            }),
        };
        if result.is_ok() {
            if let Some(tx) = tx {
                let _ = tx.send(AgentEvent::SkillResult { name }).await;
            }
        }
        results.push(result);
    }
    results
}

/// Reassembles tool calls from stream fragments, keyed by delta index.
/// `id` and `name` are fixed by their first appearance; argument JSON
/// fragments are concatenated and decoded once the stream is drained.
#[derive(Default)]
struct ToolCallAssembler {
    partial: BTreeMap<usize, (Option<String>, Option<String>, String)>,
}

impl ToolCallAssembler {
    fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.partial.entry(delta.index).or_default();
        if entry.0.is_none() {
            entry.0 = delta.id;
        }
        if entry.1.is_none() {
            entry.1 = delta.name;
        }
        entry.2.push_str(&delta.arguments_fragment);
    }

    fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    fn finish(self) -> Vec<ToolCall> {
        self.partial
            .into_values()
            .filter_map(|(id, name, arguments)| {
                let name = name?;
                let arguments = if arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&arguments).unwrap_or_else(|e| {
                        warn!(skill = %name, error = %e, "tool call arguments failed to decode");
                        json!({})
                    })
                };
                Some(ToolCall {
                    id: id.unwrap_or_default(),
                    name,
                    arguments,
                })
            })
            .collect()
    }
}
