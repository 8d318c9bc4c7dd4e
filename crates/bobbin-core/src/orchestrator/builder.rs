//! OrchestratorBuilder - 構成と classifier のワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン
//! - 起動時検証（Fail-fast 設計）: 不正な config は build() で弾く

use std::sync::Arc;

use super::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::domain::{DefaultClassifier, ErrorClassifier};
use crate::error::ConfigError;

/// Builds an [`Orchestrator`].
///
/// ```ignore
/// let orchestrator = Orchestrator::builder()
///     .config(OrchestratorConfig::from_env()?)
///     .classifier(MyClassifier)
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    classifier: Arc<dyn ErrorClassifier>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default error classification.
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Validate the configuration and build. Must run inside a Tokio runtime
    /// before any request is submitted.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;
        Ok(Orchestrator::from_parts(self.config, self.classifier))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureClass;
    use crate::error::TaskError;

    struct NeverRetry;

    impl ErrorClassifier for NeverRetry {
        fn classify(&self, _error: &TaskError) -> FailureClass {
            FailureClass::TERMINAL
        }
    }

    #[test]
    fn test_build_defaults() {
        let orchestrator = OrchestratorBuilder::new().build().unwrap();
        assert_eq!(orchestrator.config(), &OrchestratorConfig::default());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = OrchestratorConfig {
            max_concurrent: 0,
            ..OrchestratorConfig::default()
        };
        let res = OrchestratorBuilder::new()
            .config(config)
            .classifier(NeverRetry)
            .build();
        assert!(matches!(res, Err(BuildError::Config(ConfigError::Invalid(_)))));
    }
}
