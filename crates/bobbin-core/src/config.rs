//! Orchestrator configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whether a resilience component is shared by every namespace or kept per
/// namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One instance for the whole orchestrator. A failure storm in one
    /// namespace opens the breaker for all of them.
    #[default]
    Shared,
    PerNamespace,
}

impl Scope {
    /// Key under which the component for `namespace` is stored.
    pub(crate) fn key<'a>(self, namespace: &'a str) -> &'a str {
        match self {
            Scope::Shared => SHARED_KEY,
            Scope::PerNamespace => namespace,
        }
    }
}

/// Registry key used for shared components.
pub const SHARED_KEY: &str = "*";

/// Configuration for an [`crate::Orchestrator`].
///
/// Durations are stored as milliseconds so the struct maps 1:1 onto JSON and
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrency ceiling for active requests.
    pub max_concurrent: usize,
    /// Per-attempt timeout.
    pub request_timeout_ms: u64,
    /// Attempts allowed before terminal failure.
    pub retry_attempts: u32,
    /// Base delay for exponential backoff.
    pub retry_delay_ms: u64,
    /// Growth factor per retry and per rate-limit penalty.
    pub backoff_multiplier: f64,
    /// Ceiling for any computed delay.
    pub max_delay_ms: u64,
    /// Baseline spacing between token refills.
    pub rate_limit_delay_ms: u64,
    /// How long after a penalty the limiter relaxes by one step.
    pub rate_limit_decay_ms: u64,
    /// How long a result stays eligible for dedup reuse.
    pub deduplication_window_ms: u64,
    /// Consecutive breaker-relevant failures that open the circuit.
    pub circuit_breaker_threshold: u32,
    /// How long the circuit stays open before admitting trial requests.
    pub circuit_breaker_cooldown_ms: u64,
    pub breaker_scope: Scope,
    pub limiter_scope: Scope,
    /// Namespace assigned to requests submitted without one.
    pub default_namespace: String,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            request_timeout_ms: 10_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            rate_limit_delay_ms: 100,
            rate_limit_decay_ms: 60_000,
            deduplication_window_ms: 5_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_ms: 30_000,
            breaker_scope: Scope::Shared,
            limiter_scope: Scope::Shared,
            default_namespace: "default".to_string(),
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Defaults overridden by `BOBBIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// Apply `BOBBIN_*` environment overrides on top of `self`.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            var: &str,
            slot: &mut T,
        ) -> Result<(), ConfigError> {
            if let Some(value) = get(var) {
                *slot = value.trim().parse().map_err(|_| ConfigError::Env {
                    var: var.to_string(),
                    value,
                })?;
            }
            Ok(())
        }

        parse(&get, "BOBBIN_MAX_CONCURRENT", &mut self.max_concurrent)?;
        parse(&get, "BOBBIN_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        parse(&get, "BOBBIN_RETRY_ATTEMPTS", &mut self.retry_attempts)?;
        parse(&get, "BOBBIN_RETRY_DELAY_MS", &mut self.retry_delay_ms)?;
        parse(&get, "BOBBIN_BACKOFF_MULTIPLIER", &mut self.backoff_multiplier)?;
        parse(&get, "BOBBIN_MAX_DELAY_MS", &mut self.max_delay_ms)?;
        parse(&get, "BOBBIN_RATE_LIMIT_DELAY_MS", &mut self.rate_limit_delay_ms)?;
        parse(&get, "BOBBIN_RATE_LIMIT_DECAY_MS", &mut self.rate_limit_decay_ms)?;
        parse(&get, "BOBBIN_DEDUPLICATION_WINDOW_MS", &mut self.deduplication_window_ms)?;
        parse(&get, "BOBBIN_CIRCUIT_BREAKER_THRESHOLD", &mut self.circuit_breaker_threshold)?;
        parse(&get, "BOBBIN_CIRCUIT_BREAKER_COOLDOWN_MS", &mut self.circuit_breaker_cooldown_ms)?;
        if let Some(ns) = get("BOBBIN_DEFAULT_NAMESPACE") {
            self.default_namespace = ns;
        }
        for (var, slot) in [
            ("BOBBIN_BREAKER_SCOPE", &mut self.breaker_scope),
            ("BOBBIN_LIMITER_SCOPE", &mut self.limiter_scope),
        ] {
            if let Some(value) = get(var) {
                *slot = match value.trim() {
                    "shared" => Scope::Shared,
                    "per_namespace" => Scope::PerNamespace,
                    _ => {
                        return Err(ConfigError::Env {
                            var: var.to_string(),
                            value,
                        });
                    }
                };
            }
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be positive");
        }
        if self.rate_limit_delay_ms == 0 {
            return invalid("rate_limit_delay_ms must be positive");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be a finite number >= 1.0");
        }
        if self.max_delay_ms < self.retry_delay_ms {
            return invalid("max_delay_ms must not be smaller than retry_delay_ms");
        }
        if self.circuit_breaker_threshold == 0 {
            return invalid("circuit_breaker_threshold must be at least 1");
        }
        if self.default_namespace.is_empty() {
            return invalid("default_namespace must not be empty");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn rate_limit_decay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_decay_ms)
    }

    pub fn deduplication_window(&self) -> Duration {
        Duration::from_millis(self.deduplication_window_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deduplication_window(), Duration::from_secs(5));
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_breaker_cooldown(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            OrchestratorConfig::from_json_str(r#"{ "max_concurrent": 2, "breaker_scope": "per_namespace" }"#)
                .unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.breaker_scope, Scope::PerNamespace);
        assert_eq!(config.retry_attempts, 3);
    }

    #[rstest]
    #[case(r#"{ "max_concurrent": 0 }"#)]
    #[case(r#"{ "request_timeout_ms": 0 }"#)]
    #[case(r#"{ "backoff_multiplier": 0.5 }"#)]
    #[case(r#"{ "retry_delay_ms": 500, "max_delay_ms": 100 }"#)]
    #[case(r#"{ "circuit_breaker_threshold": 0 }"#)]
    fn invalid_json_is_rejected(#[case] json: &str) {
        let err = OrchestratorConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOBBIN_MAX_CONCURRENT", "7"),
            ("BOBBIN_BACKOFF_MULTIPLIER", "1.5"),
            ("BOBBIN_LIMITER_SCOPE", "per_namespace"),
        ]);
        let config = OrchestratorConfig::default()
            .with_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_concurrent, 7);
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.limiter_scope, Scope::PerNamespace);
    }

    #[test]
    fn env_garbage_is_reported() {
        let err = OrchestratorConfig::default()
            .with_vars(|name| (name == "BOBBIN_RETRY_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref var, .. } if var == "BOBBIN_RETRY_ATTEMPTS"));
    }
}
