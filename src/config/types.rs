//! Configuration types for the engine.
//!
//! Provides structured configuration for dispatching, execution, scoring and
//! document loading.

use crate::quality::LevelWeights;
use crate::script::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_TIMEOUT};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Unified Engine Configuration
// ============================================================================

/// Top-level engine configuration, loadable from a YAML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// Rule code evaluation limits
    pub dispatch: DispatchConfig,
    /// How check pipelines are scheduled
    pub execution: ExecutionConfig,
    /// Weights used by the weighted score
    pub scoring: ScoringConfig,
    /// Limits on input documents
    pub documents: DocumentsConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

// ============================================================================
// Builder for EngineConfig
// ============================================================================

/// Builder for constructing `EngineConfig` with fluent API.
#[derive(Debug, Default)]
#[must_use]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the per-check evaluation time limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.dispatch.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the nested function call limit.
    pub const fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.dispatch.max_call_depth = depth;
        self
    }

    /// Run check pipelines concurrently.
    pub const fn parallel(mut self, parallel: bool) -> Self {
        self.config.execution.parallel = parallel;
        self
    }

    /// Cap the number of worker threads used by parallel runs.
    pub const fn max_threads(mut self, threads: Option<usize>) -> Self {
        self.config.execution.max_threads = threads;
        self
    }

    pub const fn level_weights(mut self, weights: LevelWeights) -> Self {
        self.config.scoring.level_weights = weights;
        self
    }

    /// Reject documents larger than this many bytes (0 disables the limit).
    pub const fn max_document_size(mut self, bytes: usize) -> Self {
        self.config.documents.max_size_bytes = bytes;
        self
    }

    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Rule code evaluation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DispatchConfig {
    /// Time limit for one check's code, in milliseconds
    pub timeout_ms: u64,
    /// Maximum nesting of user-defined function calls
    pub max_call_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Scheduling of check pipelines within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Evaluate checks concurrently; results keep check order either way
    pub parallel: bool,
    /// Worker thread cap for parallel runs (None uses the global pool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_threads: Option<usize>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_threads: None,
        }
    }
}

/// Weighted score configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScoringConfig {
    pub level_weights: LevelWeights,
}

/// Input document limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Largest accepted document in bytes; 0 disables the limit
    pub max_size_bytes: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: super::defaults::DEFAULT_MAX_DOCUMENT_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .timeout(Duration::from_secs(2))
            .parallel(false)
            .max_document_size(1024)
            .build();
        assert_eq!(config.dispatch.timeout_ms, 2000);
        assert_eq!(config.dispatch.timeout(), Duration::from_secs(2));
        assert!(!config.execution.parallel);
        assert_eq!(config.documents.max_size_bytes, 1024);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: EngineConfig = serde_yaml::from_str("dispatch:\n  timeout_ms: 500\n").expect("parse");
        assert_eq!(config.dispatch.timeout_ms, 500);
        assert_eq!(config.dispatch.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert!(config.execution.parallel);
        assert_eq!(config.scoring.level_weights, LevelWeights::default());
    }
}
