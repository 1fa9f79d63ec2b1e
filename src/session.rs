//! `Session`: coordinates model invocations and budget enforcement on
//! behalf of [`crate::agent::Agent`]s.
//!
//! No teacher file has a session concept (the vendored SDK's `Client` was
//! both the model gateway and the budget-less caller); grounded on
//! `client_mux.rs`'s `Arc<Self>`-returning constructor and
//! `RwLock`/`Mutex`-guarded interior-mutability style, with budget
//! serialization modeled on the scheduler's single-writer discipline
//! (`scheduler.rs`'s own task-owns-state approach, here simplified to one
//! `tokio::sync::Mutex` guarding the re-check-under-lock path).

use crate::agent::{Agent, AgentOptions};
use crate::client_mux::ClientMux;
use crate::ledger::{CallerId, Ledger, LedgerEntry};
use crate::types::{Message, ModelDescriptor, ModelInvocationOptions, NeutralRequest, Pct, TokenCounts};
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, Mutex};

/// Events broadcast from a [`Session`] as agents run within it. Lagging
/// subscribers drop events rather than blocking the session, per
/// `tokio::sync::broadcast`'s standard overflow behavior.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AgentStart,
    AgentStep,
    AgentStopping,
    AgentStop,
    LedgerEntry(LedgerEntry),
    Heartbeat,
}

/// Called when a session's budget is exceeded, with `(total_cost, budget,
/// pending_messages, session)`. Returns the new budget to re-check
/// against.
pub type BudgetHandler = Arc<
    dyn Fn(f64, f64, Vec<Message>, Arc<Session>) -> Pin<Box<dyn Future<Output = Result<f64>> + Send>>
        + Send
        + Sync,
>;

/// A spawned agent's join handle. Awaiting it runs the agent to
/// completion and yields its `finalize()` result.
pub struct AgentHandle<A: Agent> {
    join: tokio::task::JoinHandle<Result<A::Result>>,
}

impl<A: Agent + 'static> AgentHandle<A> {
    pub async fn join(self) -> Result<A::Result> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(Error::other(format!("agent task panicked: {err}"))),
        }
    }
}

/// Coordinates LLM calls for one or more agents: budget enforcement, the
/// ledger, session-wide abort, and the event broadcast agents/observers
/// can subscribe to.
pub struct Session {
    clients: Arc<ClientMux>,
    ledger: Arc<Ledger>,
    budget: Mutex<f64>,
    budget_handler: Option<BudgetHandler>,
    budget_check: Mutex<()>,
    aborted: Arc<AtomicBool>,
    agent_count: AtomicUsize,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(
        clients: Arc<ClientMux>,
        ledger: Arc<Ledger>,
        budget: f64,
        budget_handler: Option<BudgetHandler>,
    ) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(256);
        Arc::new(Self {
            clients,
            ledger,
            budget: Mutex::new(budget),
            budget_handler,
            budget_check: Mutex::new(()),
            aborted: Arc::new(AtomicBool::new(false)),
            agent_count: AtomicUsize::new(0),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count.load(Ordering::SeqCst)
    }

    /// Mark the session aborted. Subsequent `spawn_agent`/`invoke_model`
    /// calls fail; in-flight `invoke_model` calls already past the budget
    /// check race with this flag and still complete and get accounted.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Spawn `agent` as a cooperative task driven by [`crate::agent::run`].
    /// Forbidden once the session is aborted.
    pub fn spawn_agent<A>(self: &Arc<Self>, agent: A, options: AgentOptions) -> Result<AgentHandle<A>>
    where
        A: Agent + 'static,
    {
        if self.is_aborted() {
            return Err(Error::SessionAborted);
        }

        self.agent_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(SessionEvent::AgentStart);
        tracing::info!("agent-start");

        let session = Arc::clone(self);
        let events = self.events.clone();
        let counter_session = Arc::clone(self);
        let join = tokio::spawn(async move {
            let result = crate::agent::run(agent, session, options).await;
            let _ = events.send(SessionEvent::AgentStop);
            tracing::info!("agent-stop");
            counter_session.agent_count.fetch_sub(1, Ordering::SeqCst);
            result
        });

        Ok(AgentHandle { join })
    }

    /// Call the model on behalf of `caller`, enforcing the session budget
    /// first. Returns the single assistant [`Message`] from the response.
    pub async fn invoke_model(
        self: &Arc<Self>,
        caller: CallerId,
        model: &ModelDescriptor,
        messages: Vec<Message>,
        options: Option<ModelInvocationOptions>,
    ) -> Result<Message> {
        if self.is_aborted() {
            return Err(Error::SessionAborted);
        }

        self.check_budget_and_handle(&messages).await?;

        self.clients.ensure_client(model).await?;
        let request = NeutralRequest {
            model_id: model.id.clone(),
            messages,
            options,
        };

        let start = SystemTime::now();
        let response = self.clients.create_chat_completion(request).await?;
        let end = SystemTime::now();

        let usage = response.usage.unwrap_or(crate::types::Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let tokens = TokenCounts::new(usage.prompt_tokens, usage.completion_tokens);
        let entry = self.ledger.add(caller, model, start, end, tokens).await;
        tracing::info!(model_id = %entry.model_id, cost = entry.cost.total, "ledger-entry");
        let _ = self.events.send(SessionEvent::LedgerEntry(entry));

        response
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider_error("response contained no messages"))
    }

    async fn check_budget_and_handle(self: &Arc<Self>, messages: &[Message]) -> Result<()> {
        let budget = *self.budget.lock().await;
        if self.ledger.total_cost().await < budget {
            return Ok(());
        }

        let Some(handler) = self.budget_handler.clone() else {
            return Err(Error::budget_exceeded(self.ledger.total_cost().await, budget));
        };

        let _guard = self.budget_check.lock().await;

        // Re-check now that we hold the serialization point: a prior
        // waiter may already have raised the budget.
        let total_cost = self.ledger.total_cost().await;
        let current_budget = *self.budget.lock().await;
        if total_cost < current_budget {
            return Ok(());
        }

        let new_budget = handler(total_cost, current_budget, messages.to_vec(), Arc::clone(self)).await?;
        *self.budget.lock().await = new_budget;

        let total_cost = self.ledger.total_cost().await;
        if total_cost >= new_budget {
            return Err(Error::budget_exceeded(total_cost, new_budget));
        }
        Ok(())
    }
}
