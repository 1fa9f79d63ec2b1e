//! Client multiplexer: holds one [`Scheduler`] per model id and a registry
//! of client-kind constructors, so a [`crate::session::Session`] can
//! dispatch `NeutralRequest`s without knowing which provider or dialect
//! backs any given model.
//!
//! Grounded on the vendored SDK's `Client::new`/`Client::send` construction
//! flow (build an HTTP client once, reuse it per call), generalized from
//! "one client, one model" to "many models, many schedulers."

use crate::config::SchedulerConfig;
use crate::provider::{OpenAiChatAdapter, OpenAiResponsesAdapter, ProviderAdapter};
use crate::scheduler::{PoolState, Scheduler};
use crate::types::{ModelDescriptor, NeutralRequest, NeutralResponse, ProviderId, ProviderKeys};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A constructor for a client kind: given an HTTP client, base URL, and API
/// key, produce a boxed adapter. Registered per `client_kind` string so
/// third parties can add dialects without modifying this crate.
pub type AdapterCtor =
    Box<dyn Fn(reqwest::Client, &str, &str) -> Arc<dyn ProviderAdapter> + Send + Sync>;

/// Resolve a provider's base URL. `OPEN_AGENT_{PROVIDER_ID}_BASE_URL`
/// overrides the builtin default for any provider id, mirroring the
/// vendored crate's `OPEN_AGENT_BASE_URL` override for its single
/// provider surface.
fn default_base_url(provider_id: &ProviderId) -> String {
    let env_key = format!(
        "OPEN_AGENT_{}_BASE_URL",
        provider_id
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect::<String>()
    );
    if let Ok(url) = std::env::var(env_key) {
        return url;
    }
    if provider_id.0 == "openai" {
        "https://api.openai.com/v1".to_string()
    } else {
        "http://localhost:1234/v1".to_string()
    }
}

struct ModelEntry {
    descriptor: ModelDescriptor,
    scheduler: Arc<Scheduler>,
}

/// Routes requests to the right per-model [`Scheduler`] and starts/stops
/// them as a group.
pub struct ClientMux {
    http_client: reqwest::Client,
    provider_keys: ProviderKeys,
    scheduler_config: SchedulerConfig,
    models: RwLock<HashMap<String, ModelEntry>>,
    constructors: RwLock<HashMap<String, AdapterCtor>>,
}

impl ClientMux {
    /// Construct a multiplexer. For every model in `models` whose
    /// provider has a key in `provider_keys`, an adapter and scheduler are
    /// instantiated immediately; unkeyed providers are skipped silently
    /// (logged at `debug`).
    pub fn new(provider_keys: ProviderKeys, models: Vec<ModelDescriptor>, scheduler_config: SchedulerConfig) -> Arc<Self> {
        let mux = Arc::new(Self {
            http_client: reqwest::Client::new(),
            provider_keys,
            scheduler_config,
            models: RwLock::new(HashMap::new()),
            constructors: RwLock::new(Self::default_constructors()),
        });
        let mux_clone = Arc::clone(&mux);
        tokio::spawn(async move {
            for model in models {
                if let Err(err) = mux_clone.register_model(model.clone()).await {
                    tracing::debug!(model_id = %model.id, error = %err, "skipping model with no provider key");
                }
            }
        });
        mux
    }

    fn default_constructors() -> HashMap<String, AdapterCtor> {
        let mut map: HashMap<String, AdapterCtor> = HashMap::new();
        map.insert(
            "openai-chat".to_string(),
            Box::new(|client, base_url, key| {
                Arc::new(OpenAiChatAdapter::new(client, base_url, key)) as Arc<dyn ProviderAdapter>
            }),
        );
        map.insert(
            "openai-responses".to_string(),
            Box::new(|client, base_url, key| {
                Arc::new(OpenAiResponsesAdapter::new(client, base_url, key)) as Arc<dyn ProviderAdapter>
            }),
        );
        map
    }

    /// Register a new client-kind constructor. Must be called before the
    /// models that use it are registered.
    pub async fn register_client_type(&self, kind: impl Into<String>, ctor: AdapterCtor) {
        self.constructors.write().await.insert(kind.into(), ctor);
    }

    /// Add a builtin or user-supplied [`ModelDescriptor`] so requests for
    /// it are routed correctly. A no-op if the provider has no key
    /// registered, returning [`Error::unknown_provider`].
    pub async fn register_model(&self, descriptor: ModelDescriptor) -> Result<()> {
        let key = self
            .provider_keys
            .get(&descriptor.provider_id)
            .ok_or_else(|| Error::unknown_provider(descriptor.provider_id.to_string()))?;

        let constructors = self.constructors.read().await;
        let ctor = constructors
            .get(&descriptor.client_kind)
            .ok_or_else(|| Error::unknown_provider(descriptor.client_kind.clone()))?;

        let base_url = default_base_url(&descriptor.provider_id);
        let adapter = ctor(self.http_client.clone(), &base_url, key);
        let pools = PoolState::new(
            descriptor.limits.tpm as i64,
            descriptor.limits.rpm as i64,
        );
        let scheduler = Scheduler::new(descriptor.id.clone(), adapter, pools, self.scheduler_config.clone());
        scheduler.start();

        self.models.write().await.insert(
            descriptor.id.clone(),
            ModelEntry {
                descriptor,
                scheduler,
            },
        );
        Ok(())
    }

    /// Lazily create and start a scheduler for a model not present at
    /// construction time.
    pub async fn ensure_client(&self, descriptor: &ModelDescriptor) -> Result<()> {
        if self.models.read().await.contains_key(&descriptor.id) {
            return Ok(());
        }
        self.register_model(descriptor.clone()).await
    }

    /// Dispatch a request to the scheduler for `request.model_id`.
    /// `UnknownModel` if no scheduler exists for it.
    pub async fn create_chat_completion(&self, request: NeutralRequest) -> Result<NeutralResponse> {
        let scheduler = {
            let models = self.models.read().await;
            models
                .get(&request.model_id)
                .map(|entry| Arc::clone(&entry.scheduler))
                .ok_or_else(|| Error::unknown_model(request.model_id.clone()))?
        };
        let estimated_tokens = crate::context::estimate_tokens(&request.messages);
        scheduler.enqueue(estimated_tokens as u64, request).await
    }

    /// Fan `start()` out to every registered scheduler.
    pub async fn start(&self) {
        for entry in self.models.read().await.values() {
            entry.scheduler.start();
        }
    }

    /// Fan `stop()` out to every registered scheduler.
    pub async fn stop(&self) {
        for entry in self.models.read().await.values() {
            entry.scheduler.stop().await;
        }
    }

    pub async fn model_descriptor(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.models
            .read()
            .await
            .get(model_id)
            .map(|entry| entry.descriptor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, Limits, Pricing};

    fn test_descriptor() -> ModelDescriptor {
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
    async fn test_register_model_requires_key() {
        let mux = ClientMux::new(ProviderKeys::new(), vec![], SchedulerConfig::new());
        let err = mux.register_model(test_descriptor()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn test_register_model_with_key_succeeds() {
        let mut keys = ProviderKeys::new();
        keys.insert(ProviderId::new("openai"), "sk-test".to_string());
        let mux = ClientMux::new(keys, vec![], SchedulerConfig::new());
        mux.register_model(test_descriptor()).await.unwrap();
        assert!(mux.model_descriptor("test-model").await.is_some());
    }

    #[tokio::test]
    async fn test_create_chat_completion_unknown_model() {
        let mux = ClientMux::new(ProviderKeys::new(), vec![], SchedulerConfig::new());
        let request = NeutralRequest {
            model_id: "nonexistent".to_string(),
            messages: vec![],
            options: None,
        };
        let err = mux.create_chat_completion(request).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }
}
