//! End-to-end scenarios against a stub provider adapter, covering the
//! session budget enforcement, the agent tool-call loop, and apply-patch
//! dispatch together rather than unit-by-unit.

use async_trait::async_trait;
use open_agent::agent::{advance, Agent, AdvanceContext, AgentOptions, StepOutcome};
use open_agent::builtin_tools::{apply_patch_handler, FileSystemHarness, APPLY_PATCH};
use open_agent::session::Session;
use open_agent::thread::Thread;
use open_agent::{
    tool, ApplyPatchOperation, Capabilities, Error, Ledger, Limits, Message, ModelDescriptor,
    NeutralRequest, NeutralResponse, Pricing, ProviderId, ProviderKeys, RateLimitHeaders,
    RetryClass, Result, Tool, ToolCall,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stub provider adapter whose responses are driven by an ordered
/// script: each call consumes the next scripted response, repeating the
/// last one once exhausted.
struct StubAdapter {
    script: Mutex<Vec<Message>>,
    calls: AtomicUsize,
}

impl StubAdapter {
    fn new(script: Vec<Message>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl open_agent::ProviderAdapter for StubAdapter {
    async fn invoke(&self, _request: &NeutralRequest) -> Result<NeutralResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        let message = if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        };
        Ok(NeutralResponse {
            usage: None,
            messages: vec![message],
        })
    }

    fn encode_request(&self, _request: &NeutralRequest) -> Result<serde_json::Value> {
        unreachable!("StubAdapter overrides invoke")
    }

    fn decode_response(&self, _body: &serde_json::Value) -> Result<NeutralResponse> {
        unreachable!("StubAdapter overrides invoke")
    }

    fn classify_error(&self, _status: reqwest::StatusCode, _body: &serde_json::Value) -> RetryClass {
        unreachable!("StubAdapter overrides invoke")
    }

    async fn last_rate_limit_headers(&self) -> RateLimitHeaders {
        RateLimitHeaders::default()
    }

    fn http_client(&self) -> &reqwest::Client {
        unreachable!("StubAdapter overrides invoke")
    }

    fn endpoint_url(&self) -> String {
        unreachable!("StubAdapter overrides invoke")
    }

    fn api_key(&self) -> &str {
        unreachable!("StubAdapter overrides invoke")
    }

    fn record_rate_limit_headers(&self, _headers: &reqwest::header::HeaderMap) {}
}

fn test_model(id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        provider_id: ProviderId::new("stub-provider"),
        client_kind: "stub".to_string(),
        checkpoint: id.to_string(),
        pricing: Pricing {
            prompt_usd_per_1m: 1.0,
            completion_usd_per_1m: 2.0,
        },
        limits: Limits {
            rpm: 1_000,
            tpm: 1_000_000,
            context_tokens: 8_000,
            max_output_tokens: 2_000,
        },
        capabilities: Capabilities::default(),
        default_reasoning_effort: None,
    }
}

async fn session_with_stub(script: Vec<Message>) -> (Arc<Session>, ModelDescriptor) {
    let mut keys = ProviderKeys::new();
    keys.insert(ProviderId::new("stub-provider"), "stub-key".to_string());
    let mux = open_agent::ClientMux::new(keys, vec![], open_agent::SchedulerConfig::new());
    let adapter = Arc::new(StubAdapter::new(script));
    mux.register_client_type(
        "stub",
        Box::new(move |_client, _base_url, _key| Arc::clone(&adapter) as Arc<dyn open_agent::ProviderAdapter>),
    )
    .await;
    let session = Session::new(mux, Arc::new(Ledger::new()), f64::MAX, None);
    (session, test_model("stub-model"))
}

fn last_text(thread: &Thread) -> String {
    let messages = thread.materialize("").unwrap();
    messages
        .last()
        .and_then(|m| m.content.as_ref())
        .map(|c| c.as_text().to_string())
        .unwrap_or_default()
}

/// Scenario 4: a bare greeter agent, one model call, no tools.
struct Greeter;

#[async_trait]
impl Agent for Greeter {
    type State = Thread;
    type Result = String;

    async fn initialize(&mut self, _session: &Arc<Session>, _options: &AgentOptions) -> Result<Thread> {
        Ok(Thread::new("Hello"))
    }

    async fn step(&mut self, session: &Arc<Session>, options: &AgentOptions, state: Thread) -> Result<StepOutcome<Thread>> {
        let handlers = HashMap::new();
        let ctx = AdvanceContext {
            session,
            options,
            caller_id: "greeter".to_string(),
            builtin_handlers: &handlers,
        };
        let thread = advance(&ctx, state).await?;
        Ok(StepOutcome::Stop(thread))
    }

    async fn finalize(&mut self, state: Thread) -> Result<String> {
        Ok(last_text(&state))
    }
}

#[tokio::test]
async fn scenario_4_greeter_agent_resolves_to_world() {
    let (session, model) = session_with_stub(vec![Message::assistant_text("World")]).await;
    let options = AgentOptions::builder(model)
        .system_prompt("You always respond with 'World' to 'Hello'.")
        .build()
        .unwrap();

    let handle = session.spawn_agent(Greeter, options).unwrap();
    let result = handle.join().await.unwrap();
    assert_eq!(result, "World");
    assert_eq!(session.agent_count(), 0);
}

/// Scenario 5: a single regular-tool round trip.
struct AdderAgent;

#[async_trait]
impl Agent for AdderAgent {
    type State = Thread;
    type Result = String;

    async fn initialize(&mut self, _session: &Arc<Session>, _options: &AgentOptions) -> Result<Thread> {
        Ok(Thread::new("What is 1234 + 5678?"))
    }

    async fn step(&mut self, session: &Arc<Session>, options: &AgentOptions, state: Thread) -> Result<StepOutcome<Thread>> {
        let handlers = HashMap::new();
        let ctx = AdvanceContext {
            session,
            options,
            caller_id: "adder".to_string(),
            builtin_handlers: &handlers,
        };
        let thread = advance(&ctx, state).await?;
        Ok(StepOutcome::Stop(thread))
    }

    async fn finalize(&mut self, state: Thread) -> Result<String> {
        Ok(last_text(&state))
    }
}

#[tokio::test]
async fn scenario_5_adder_tool_agent_sums_arguments() {
    let tool_call_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&tool_call_count);
    let adder: Tool = tool("adder", "adds two numbers").build(move |args| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let a = args["a"].as_f64().unwrap_or(0.0);
            let b = args["b"].as_f64().unwrap_or(0.0);
            Ok(json!(a + b))
        }
    });

    let script = vec![
        Message::assistant_tool_calls(vec![ToolCall::new("call_1", "adder", r#"{"a":1234,"b":5678}"#)]),
        Message::assistant_text("The answer is 6912"),
    ];
    let (session, model) = session_with_stub(script).await;
    let options = AgentOptions::builder(model).tool(adder).build().unwrap();

    let handle = session.spawn_agent(AdderAgent, options).unwrap();
    let result = handle.join().await.unwrap();

    assert_eq!(result, "The answer is 6912");
    assert_eq!(tool_call_count.load(Ordering::SeqCst), 1);
}

/// Scenario 6: apply-patch create_file dispatched through an in-memory
/// filesystem harness.
struct MemoryHarness {
    files: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl FileSystemHarness for MemoryHarness {
    async fn read_file(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::apply_patch_error(format!("no such file: {}", path)))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.files.lock().await.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.files.lock().await.remove(path);
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().await.contains_key(path))
    }
}

struct PatcherAgent;

#[async_trait]
impl Agent for PatcherAgent {
    type State = Thread;
    type Result = String;

    async fn initialize(&mut self, _session: &Arc<Session>, _options: &AgentOptions) -> Result<Thread> {
        Ok(Thread::new("Create a greeting file."))
    }

    async fn step(&mut self, session: &Arc<Session>, options: &AgentOptions, state: Thread) -> Result<StepOutcome<Thread>> {
        let harness: Arc<dyn FileSystemHarness> = Arc::new(MemoryHarness {
            files: Mutex::new(HashMap::new()),
        });
        let mut handlers = HashMap::new();
        handlers.insert(APPLY_PATCH.to_string(), apply_patch_handler(harness, false, false));
        let ctx = AdvanceContext {
            session,
            options,
            caller_id: "patcher".to_string(),
            builtin_handlers: &handlers,
        };
        let thread = advance(&ctx, state).await?;
        Ok(StepOutcome::Stop(thread))
    }

    async fn finalize(&mut self, state: Thread) -> Result<String> {
        Ok(last_text(&state))
    }
}

#[tokio::test]
async fn scenario_6_apply_patch_create_file_round_trips() {
    let script = vec![
        Message::assistant_builtin_tool_calls(vec![open_agent::BuiltinToolCall {
            id: "bt_1".to_string(),
            call_id: "call_1".to_string(),
            operation: ApplyPatchOperation::CreateFile {
                path: "hello.txt".to_string(),
                diff: "+hello".to_string(),
            },
        }]),
        Message::assistant_text("Created hello.txt."),
    ];
    let (session, model) = session_with_stub(script).await;
    let options = AgentOptions::builder(model).build().unwrap();

    let handle = session.spawn_agent(PatcherAgent, options).unwrap();
    let result = handle.join().await.unwrap();

    assert_eq!(result, "Created hello.txt.");
}

/// Scenario 7: a session budget that is already exhausted rejects the
/// very first model call, with no handler installed to raise it.
#[tokio::test]
async fn scenario_7_exhausted_budget_rejects_before_invoking_model() {
    let mux = open_agent::ClientMux::new(ProviderKeys::new(), vec![], open_agent::SchedulerConfig::new());
    let session = Session::new(mux, Arc::new(Ledger::new()), 0.0, None);

    let result = session
        .invoke_model("caller".to_string(), &test_model("stub-model"), vec![Message::user("hi")], None)
        .await;
    assert!(matches!(result, Err(Error::BudgetExceeded { .. })));
}
