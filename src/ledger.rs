//! Append-only cost/token ledger for a [`crate::session::Session`].
//!
//! No teacher file keeps a ledger (the vendored SDK never tracked
//! spend); the accounting style — explicit struct fields summed on
//! `add`, not recomputed on read — follows the teacher's `context.rs`
//! `estimate_tokens` accumulation idiom (a running total built up in a
//! loop), scaled up to a mutex-guarded struct with a broadcast channel.

use crate::types::{ModelDescriptor, Pct, TokenCounts};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, Mutex};

/// An opaque identifier for whoever triggered a model invocation (an
/// agent, typically). Kept as a plain string rather than a typed handle so
/// the ledger has no dependency on `agent.rs`.
pub type CallerId = String;

/// One append-only entry: who called, when, which model, how many
/// tokens, and the derived cost.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub caller_id: CallerId,
    pub start: SystemTime,
    pub end: SystemTime,
    pub model_id: String,
    pub tokens: TokenCounts,
    pub cost: Pct,
}

impl LedgerEntry {
    pub fn cost_for(tokens: TokenCounts, model: &ModelDescriptor) -> Pct {
        Pct::new(
            tokens.prompt as f64 / 1_000_000.0 * model.pricing.prompt_usd_per_1m,
            tokens.completion as f64 / 1_000_000.0 * model.pricing.completion_usd_per_1m,
        )
    }
}

#[derive(Debug, Clone, Default)]
struct Aggregate {
    tokens: TokenCounts,
    cost: Pct,
}

impl Aggregate {
    fn add(&mut self, tokens: TokenCounts, cost: Pct) {
        self.tokens = TokenCounts::new(
            self.tokens.prompt + tokens.prompt,
            self.tokens.completion + tokens.completion,
        );
        self.cost = self.cost + cost;
    }
}

struct LedgerState {
    entries: Vec<LedgerEntry>,
    total: Aggregate,
    per_model: HashMap<String, Aggregate>,
    per_caller: HashMap<CallerId, Aggregate>,
}

/// Append-only log of [`LedgerEntry`] records with running aggregates and
/// an "entry added" broadcast for subscribers.
pub struct Ledger {
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            state: Mutex::new(LedgerState {
                entries: Vec::new(),
                total: Aggregate::default(),
                per_model: HashMap::new(),
                per_caller: HashMap::new(),
            }),
            events,
        }
    }

    /// Record one completed model invocation. Updates every aggregate,
    /// broadcasts the entry to subscribers, and returns it so callers (the
    /// session) can relay it on their own event stream too.
    pub async fn add(
        &self,
        caller_id: CallerId,
        model: &ModelDescriptor,
        start: SystemTime,
        end: SystemTime,
        tokens: TokenCounts,
    ) -> LedgerEntry {
        let cost = LedgerEntry::cost_for(tokens, model);
        let entry = LedgerEntry {
            caller_id: caller_id.clone(),
            start,
            end,
            model_id: model.id.clone(),
            tokens,
            cost,
        };

        {
            let mut state = self.state.lock().await;
            state.total.add(tokens, cost);
            state
                .per_model
                .entry(model.id.clone())
                .or_default()
                .add(tokens, cost);
            state.per_caller.entry(caller_id).or_default().add(tokens, cost);
            state.entries.push(entry.clone());
        }

        let _ = self.events.send(entry.clone());
        entry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEntry> {
        self.events.subscribe()
    }

    pub async fn total_cost(&self) -> f64 {
        self.state.lock().await.total.cost.total
    }

    pub async fn total_tokens(&self) -> TokenCounts {
        self.state.lock().await.total.tokens
    }

    pub async fn cost_for_model(&self, model_id: &str) -> f64 {
        self.state
            .lock()
            .await
            .per_model
            .get(model_id)
            .map(|a| a.cost.total)
            .unwrap_or(0.0)
    }

    pub async fn cost_for_caller(&self, caller_id: &str) -> f64 {
        self.state
            .lock()
            .await
            .per_caller
            .get(caller_id)
            .map(|a| a.cost.total)
            .unwrap_or(0.0)
    }

    /// Earliest entry's start to latest entry's end, or `None` if the
    /// ledger has no entries yet.
    pub async fn timespan(&self) -> Option<(SystemTime, SystemTime)> {
        let state = self.state.lock().await;
        let start = state.entries.iter().map(|e| e.start).min()?;
        let end = state.entries.iter().map(|e| e.end).max()?;
        Some((start, end))
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, Limits, Pricing, ProviderId};

    fn test_model() -> ModelDescriptor {
        ModelDescriptor {
            id: "test-model".to_string(),
            provider_id: ProviderId::new("openai"),
            client_kind: "openai-chat".to_string(),
            checkpoint: "test-model".to_string(),
            pricing: Pricing {
                prompt_usd_per_1m: 1.0,
                completion_usd_per_1m: 2.0,
            },
            limits: Limits {
                rpm: 60,
                tpm: 100_000,
                context_tokens: 8_000,
                max_output_tokens: 2_000,
            },
            capabilities: Capabilities::default(),
            default_reasoning_effort: None,
        }
    }

    #[tokio::test]
    async fn test_add_updates_total_cost() {
        let ledger = Ledger::new();
        let now = SystemTime::now();
        ledger
            .add(
                "agent-1".to_string(),
                &test_model(),
                now,
                now + Duration::from_secs(1),
                TokenCounts::new(1_000_000, 500_000),
            )
            .await;
        // 1.0 * 1 + 2.0 * 0.5 = 2.0
        assert_eq!(ledger.total_cost().await, 2.0);
    }

    #[tokio::test]
    async fn test_add_updates_per_model_and_per_caller() {
        let ledger = Ledger::new();
        let now = SystemTime::now();
        ledger
            .add(
                "agent-1".to_string(),
                &test_model(),
                now,
                now,
                TokenCounts::new(1_000_000, 0),
            )
            .await;
        assert_eq!(ledger.cost_for_model("test-model").await, 1.0);
        assert_eq!(ledger.cost_for_caller("agent-1").await, 1.0);
        assert_eq!(ledger.cost_for_caller("agent-2").await, 0.0);
    }

    #[tokio::test]
    async fn test_timespan_none_when_empty() {
        let ledger = Ledger::new();
        assert!(ledger.timespan().await.is_none());
    }

    #[tokio::test]
    async fn test_timespan_spans_all_entries() {
        let ledger = Ledger::new();
        let t0 = SystemTime::now();
        let t1 = t0 + Duration::from_secs(10);
        let t2 = t0 + Duration::from_secs(20);
        ledger
            .add("a".to_string(), &test_model(), t0, t1, TokenCounts::new(1, 1))
            .await;
        ledger
            .add("b".to_string(), &test_model(), t1, t2, TokenCounts::new(1, 1))
            .await;
        let (start, end) = ledger.timespan().await.unwrap();
        assert_eq!(start, t0);
        assert_eq!(end, t2);
    }

    #[tokio::test]
    async fn test_subscribe_receives_entry_event() {
        let ledger = Ledger::new();
        let mut rx = ledger.subscribe();
        let now = SystemTime::now();
        ledger
            .add("a".to_string(), &test_model(), now, now, TokenCounts::new(1, 1))
            .await;
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.caller_id, "a");
    }
}
