//! Provider and scheduler configuration.
//!
//! Generalizes the old closed `Provider` enum (LM Studio / Ollama /
//! llama.cpp / vLLM, one fixed base URL apiece) into an open,
//! provider-keyed surface: any provider id can be registered with the
//! multiplexer, and its API key is resolved the same way `get_base_url`
//! used to resolve a base URL — explicit value first, then environment,
//! then absent.
//!
//! ## Environment Variables
//!
//! - `{PROVIDER_ID}_API_KEY` (provider id upper-cased, non-alphanumeric
//!   replaced with `_`): resolved by [`ProviderKeys::from_env`] for any
//!   provider id not given an explicit key.

use crate::types::{Capabilities, Limits, ModelDescriptor, Pricing, ProviderId, ProviderKeys};
use std::env;
use std::time::Duration;

// ============================================================================
// PROVIDER KEYS
// ============================================================================

/// Resolve an API key environment variable name for a provider id, e.g.
/// `"openai"` -> `"OPENAI_API_KEY"`, `"my-deployment"` -> `"MY_DEPLOYMENT_API_KEY"`.
fn env_var_name(provider_id: &ProviderId) -> String {
    let normalized: String = provider_id
        .0
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{normalized}_API_KEY")
}

/// Build a [`ProviderKeys`] map by overlaying explicit values on top of
/// environment-resolved ones for a given set of provider ids. Explicit
/// values always win; a provider id with neither an explicit value nor a
/// matching environment variable is simply absent from the result.
pub fn resolve_provider_keys(
    provider_ids: &[ProviderId],
    explicit: &[(ProviderId, String)],
) -> ProviderKeys {
    let mut keys = ProviderKeys::new();
    for id in provider_ids {
        if let Ok(key) = env::var(env_var_name(id)) {
            keys.insert(id.clone(), key);
        }
    }
    for (id, key) in explicit {
        keys.insert(id.clone(), key.clone());
    }
    keys
}

// ============================================================================
// BUILTIN MODEL DESCRIPTORS
// ============================================================================

/// A small static table of builtin [`ModelDescriptor`]s for common
/// OpenAI-compatible chat models. `ClientMux::register_model` extends this
/// at runtime; this table just seeds sane defaults so callers don't have
/// to hand-write a descriptor for well-known models.
pub fn builtin_model_descriptors() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            id: "gpt-4o".to_string(),
            provider_id: ProviderId::new("openai"),
            client_kind: "openai-chat".to_string(),
            checkpoint: "gpt-4o".to_string(),
            pricing: Pricing {
                prompt_usd_per_1m: 2.50,
                completion_usd_per_1m: 10.00,
            },
            limits: Limits {
                rpm: 500,
                tpm: 800_000,
                context_tokens: 128_000,
                max_output_tokens: 16_384,
            },
            capabilities: Capabilities {
                images: true,
                audio: false,
                video: false,
                reasoning: false,
                verbosity: false,
            },
            default_reasoning_effort: None,
        },
        ModelDescriptor {
            id: "gpt-4o-mini".to_string(),
            provider_id: ProviderId::new("openai"),
            client_kind: "openai-chat".to_string(),
            checkpoint: "gpt-4o-mini".to_string(),
            pricing: Pricing {
                prompt_usd_per_1m: 0.15,
                completion_usd_per_1m: 0.60,
            },
            limits: Limits {
                rpm: 500,
                tpm: 2_000_000,
                context_tokens: 128_000,
                max_output_tokens: 16_384,
            },
            capabilities: Capabilities {
                images: true,
                audio: false,
                video: false,
                reasoning: false,
                verbosity: false,
            },
            default_reasoning_effort: None,
        },
        ModelDescriptor {
            id: "o3-mini".to_string(),
            provider_id: ProviderId::new("openai"),
            client_kind: "openai-responses".to_string(),
            checkpoint: "o3-mini".to_string(),
            pricing: Pricing {
                prompt_usd_per_1m: 1.10,
                completion_usd_per_1m: 4.40,
            },
            limits: Limits {
                rpm: 500,
                tpm: 1_000_000,
                context_tokens: 200_000,
                max_output_tokens: 100_000,
            },
            capabilities: Capabilities {
                images: false,
                audio: false,
                video: false,
                reasoning: true,
                verbosity: false,
            },
            default_reasoning_effort: Some(crate::types::ReasoningEffort::Medium),
        },
    ]
}

// ============================================================================
// SCHEDULER CONFIG
// ============================================================================

/// Per-scheduler tunables, builder-constructed in the same style as
/// `retry::RetryConfig`, generalized from "retry a closure" to "configure
/// a rate-limited model scheduler".
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum requeues of a retryable ticket before it's rejected.
    pub max_retries: u32,

    /// How long a dispatched request is allowed to run before it's treated
    /// as a timeout.
    pub request_timeout: Duration,

    /// How often the scheduler resets its pools to the descriptor's
    /// declared max when no rate-limit headers have arrived to recalibrate
    /// them (the fallback timer).
    pub fallback_reset_interval: Duration,

    /// Initial backoff delay before the first retry of a requeued ticket.
    pub initial_delay: Duration,

    /// Maximum backoff delay between retries.
    pub max_delay: Duration,

    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,

    /// Jitter fraction (0.0 to 1.0) applied to each backoff delay.
    pub jitter_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(60),
            fallback_reset_interval: Duration::from_secs(60),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_fallback_reset_interval(mut self, interval: Duration) -> Self {
        self.fallback_reset_interval = interval;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name(&ProviderId::new("openai")), "OPENAI_API_KEY");
        assert_eq!(
            env_var_name(&ProviderId::new("my-deployment")),
            "MY_DEPLOYMENT_API_KEY"
        );
    }

    #[test]
    fn test_resolve_provider_keys_explicit_wins_over_env() {
        // SAFETY: test-local env var, not read by anything else in this process.
        unsafe {
            env::set_var("TESTPROV_API_KEY", "from-env");
        }
        let id = ProviderId::new("testprov");
        let keys = resolve_provider_keys(
            &[id.clone()],
            &[(id.clone(), "from-explicit".to_string())],
        );
        assert_eq!(keys.get(&id).unwrap(), "from-explicit");
        unsafe {
            env::remove_var("TESTPROV_API_KEY");
        }
    }

    #[test]
    fn test_resolve_provider_keys_falls_back_to_env() {
        unsafe {
            env::set_var("TESTPROV2_API_KEY", "from-env-2");
        }
        let id = ProviderId::new("testprov2");
        let keys = resolve_provider_keys(&[id.clone()], &[]);
        assert_eq!(keys.get(&id).unwrap(), "from-env-2");
        unsafe {
            env::remove_var("TESTPROV2_API_KEY");
        }
    }

    #[test]
    fn test_resolve_provider_keys_absent_when_unset() {
        let id = ProviderId::new("nonexistent-provider-xyz");
        let keys = resolve_provider_keys(&[id.clone()], &[]);
        assert!(keys.get(&id).is_none());
    }

    #[test]
    fn test_builtin_model_descriptors_nonempty() {
        let models = builtin_model_descriptors();
        assert!(models.iter().any(|m| m.id == "gpt-4o"));
        assert!(models.iter().any(|m| m.id == "o3-mini"));
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::new()
            .with_max_retries(5)
            .with_request_timeout(Duration::from_secs(30))
            .with_backoff_multiplier(1.5);

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
    }
}
