//! The `Agent` trait, its driver loop, and the tool-calling `advance()` step.
//!
//! Grounded on the vendored SDK's `Client::auto_execute_loop`/
//! `execute_tool_internal` (tool-call-then-continue loop, the "TOOL
//! ERROR:" isolation convention, `max_tool_iterations` ceiling), restated
//! as a template-method trait so concrete agents are ordinary types rather
//! than configurations of one `Client` struct.

use crate::builtin_tools::{BuiltinToolHandler, APPLY_PATCH};
use crate::session::Session;
use crate::thread::Thread;
use crate::tools::Tool;
use crate::types::{ModelDescriptor, ModelInvocationOptions, ResponseFormat, ToolChoice};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-agent configuration: which model it speaks to, its system prompt,
/// its tool roster, and the invocation knobs materialized into
/// [`ModelInvocationOptions`] on every `advance()` step.
///
/// Grounded on the vendored SDK's `AgentOptions`/`AgentOptionsBuilder`
/// pair, generalized from "one client, one fixed model string" to "a
/// model descriptor plus reasoning/verbosity knobs."
#[derive(Clone)]
pub struct AgentOptions {
    model: ModelDescriptor,
    system_prompt: String,
    tools: Vec<Tool>,
    expects_json: bool,
    temperature: Option<f32>,
    max_tool_iterations: u32,
    eat_tool_results: bool,
}

impl AgentOptions {
    pub fn builder(model: ModelDescriptor) -> AgentOptionsBuilder {
        AgentOptionsBuilder::new(model)
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn find_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations
    }

    /// Materialize per-call invocation options from this agent's fields.
    /// Returns `None` when nothing non-default is set, matching the
    /// vendored SDK's convention of omitting the whole options object
    /// rather than sending an all-defaults one.
    pub fn model_invocation_options(&self) -> Option<ModelInvocationOptions> {
        let tool_schemas: Vec<_> = self.tools.iter().map(|t| t.to_schema()).collect();
        let has_tools = !tool_schemas.is_empty();

        if !has_tools && !self.expects_json && self.temperature.is_none() {
            return None;
        }

        Some(ModelInvocationOptions {
            tools: if has_tools { Some(tool_schemas) } else { None },
            tool_choice: if has_tools { Some(ToolChoice::Auto) } else { None },
            response_format: if self.expects_json {
                Some(ResponseFormat::JsonObject)
            } else {
                None
            },
            temperature: self.temperature,
            max_tokens: None,
            max_completion_tokens: None,
            reasoning_effort: self.model.default_reasoning_effort,
            verbosity: None,
        })
    }
}

pub struct AgentOptionsBuilder {
    model: ModelDescriptor,
    system_prompt: String,
    tools: Vec<Tool>,
    expects_json: bool,
    temperature: Option<f32>,
    max_tool_iterations: u32,
    eat_tool_results: bool,
}

impl AgentOptionsBuilder {
    fn new(model: ModelDescriptor) -> Self {
        Self {
            model,
            system_prompt: String::new(),
            tools: Vec::new(),
            expects_json: false,
            temperature: None,
            max_tool_iterations: 25,
            eat_tool_results: false,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn expects_json(mut self, expects_json: bool) -> Self {
        self.expects_json = expects_json;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tool_iterations(mut self, iterations: u32) -> Self {
        self.max_tool_iterations = iterations;
        self
    }

    pub fn eat_tool_results(mut self, eat: bool) -> Self {
        self.eat_tool_results = eat;
        self
    }

    pub fn build(self) -> Result<AgentOptions> {
        Ok(AgentOptions {
            model: self.model,
            system_prompt: self.system_prompt,
            tools: self.tools,
            expects_json: self.expects_json,
            temperature: self.temperature,
            max_tool_iterations: self.max_tool_iterations,
            eat_tool_results: self.eat_tool_results,
        })
    }
}

/// Whether a `step()` call should loop again or end the run.
pub enum StepOutcome<S> {
    Continue(S),
    Stop(S),
}

/// Template-method trait: concrete agents implement the three required
/// methods; [`run`] drives them.
#[async_trait]
pub trait Agent: Send + Sync {
    type State: Send;
    type Result: Send;

    async fn initialize(&mut self, session: &Arc<Session>, options: &AgentOptions) -> Result<Self::State>;
    async fn step(&mut self, session: &Arc<Session>, options: &AgentOptions, state: Self::State) -> Result<StepOutcome<Self::State>>;
    async fn finalize(&mut self, state: Self::State) -> Result<Self::Result>;
}

/// Drive an [`Agent`] to completion: `initialize`, then `step` until it
/// returns `Stop` or the session is aborted, then `finalize`.
pub async fn run<A: Agent>(
    mut agent: A,
    session: Arc<Session>,
    options: AgentOptions,
) -> Result<A::Result> {
    let mut state = agent.initialize(&session, &options).await?;
    loop {
        if session.is_aborted() {
            break;
        }
        let outcome = agent.step(&session, &options, state).await?;
        match outcome {
            StepOutcome::Continue(s) => {
                state = s;
                continue;
            }
            StepOutcome::Stop(s) => {
                state = s;
                break;
            }
        }
    }
    agent.finalize(state).await
}

/// Owned ref to a thread plus the caller id under which its model calls
/// are billed. Not a type in its own right in the provided `Agent` trait
/// above (agents track their own threads), but used by [`advance`]'s
/// signature and the apply-patch dispatch helpers in `builtin_tools.rs`.
pub struct AdvanceContext<'a> {
    pub session: &'a Arc<Session>,
    pub options: &'a AgentOptions,
    pub caller_id: String,
    pub builtin_handlers: &'a HashMap<String, BuiltinToolHandler>,
}

/// Attach an image to `thread`, first checking that `options`'s model
/// declares image support. [`Thread::append_user_image`] itself has no
/// notion of a model, so this is the capability guard SPEC_FULL's
/// boundary tests require.
pub fn append_user_image(
    options: &AgentOptions,
    thread: &Thread,
    url: impl Into<String>,
    detail: crate::types::ImageDetail,
) -> Result<Thread> {
    if !options.model().capabilities.images {
        return Err(Error::invalid_argument("model does not support image input"));
    }
    thread.append_user_image(url, detail)
}

/// The core tool-call loop step. Materializes `thread`, invokes the
/// model, and either appends the text reply or dispatches tool calls and
/// recurses on the follow-up thread.
pub async fn advance(ctx: &AdvanceContext<'_>, thread: Thread) -> Result<Thread> {
    advance_inner(ctx, thread, 0).await
}

async fn advance_inner(ctx: &AdvanceContext<'_>, thread: Thread, depth: u32) -> Result<Thread> {
    if depth >= ctx.options.max_tool_iterations() {
        return Err(Error::invalid_argument("max tool iterations exceeded"));
    }
    if thread.is_complete() {
        return Err(Error::invalid_argument("advance requires an incomplete thread"));
    }

    let messages = thread.materialize(ctx.options.system_prompt())?;
    let reply = ctx
        .session
        .invoke_model(
            ctx.caller_id.clone(),
            ctx.options.model(),
            messages,
            ctx.options.model_invocation_options(),
        )
        .await?;

    if let Some(calls) = reply.tool_calls.clone() {
        if calls.is_empty() {
            return Err(Error::invalid_argument("provider returned an empty tool-call list"));
        }
        let with_calls = thread.append_assistant_tool_calls(calls.clone())?;

        let mut tool_thread = with_calls.clone();
        for call in &calls {
            let result_text = execute_one_tool_call(ctx, call).await;
            tool_thread = tool_thread.append_tool_result(call.id.clone(), result_text)?;
        }

        let follow_up = Box::pin(advance_inner(ctx, tool_thread, depth + 1)).await?;

        if ctx.options.eat_tool_results {
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            let note = format!(
                "(called {} — tool results elided)",
                names.join(", ")
            );
            return follow_up.rollup(&with_calls, Some(&note));
        }
        return Ok(follow_up);
    }

    if let Some(calls) = reply.builtin_tool_calls.clone() {
        if calls.is_empty() {
            return Err(Error::invalid_argument("provider returned an empty builtin tool-call list"));
        }
        let with_calls = thread.append_assistant_builtin_tool_calls(calls.clone())?;

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            results.push(execute_one_builtin_tool_call(ctx, call).await);
        }
        let tool_thread = with_calls.append_builtin_tool_results(results)?;

        let follow_up = Box::pin(advance_inner(ctx, tool_thread, depth + 1)).await?;

        if ctx.options.eat_tool_results {
            return follow_up.rollup(&with_calls, Some("(apply-patch results elided)"));
        }
        return Ok(follow_up);
    }

    let text = reply
        .content
        .as_ref()
        .map(|c| c.as_text())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::invalid_argument("provider response had neither text nor tool calls"))?;

    thread.append_assistant_message(text)
}

async fn execute_one_tool_call(ctx: &AdvanceContext<'_>, call: &crate::types::ToolCall) -> String {
    let Some(tool) = ctx.options.find_tool(&call.name) else {
        return format!("TOOL ERROR: unknown tool '{}'", call.name);
    };

    let arguments = match call.parse_arguments() {
        Ok(args) => args,
        Err(err) => return format!("TOOL ERROR: {}", err),
    };

    let outcome = tool.execute(arguments).await;

    match outcome {
        Ok(value) => value.to_string(),
        Err(err) => format!("TOOL ERROR: {}", err),
    }
}

async fn execute_one_builtin_tool_call(
    ctx: &AdvanceContext<'_>,
    call: &crate::types::BuiltinToolCall,
) -> crate::types::BuiltinToolResult {
    let Some(handler) = ctx.builtin_handlers.get(APPLY_PATCH) else {
        return crate::types::BuiltinToolResult {
            call_id: call.call_id.clone(),
            status: crate::types::BuiltinToolStatus::Failed,
            output: "TOOL ERROR: no handler registered for builtin tool calls".to_string(),
        };
    };
    let (status, output) = handler(call.operation.clone()).await;
    crate::types::BuiltinToolResult {
        call_id: call.call_id.clone(),
        status,
        output,
    }
}
