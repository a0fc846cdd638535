//! Configuration validation.

use super::types::{DispatchConfig, DocumentsConfig, EngineConfig, ExecutionConfig, ScoringConfig};

// ============================================================================
// Configuration Error
// ============================================================================

/// Error type for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The field that failed validation
    pub field: String,
    /// Description of the validation error
    pub message: String,
}

impl ConfigError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Validation Trait
// ============================================================================

/// Trait for validatable configuration types.
pub trait Validatable {
    /// Validate the configuration, returning any errors found.
    fn validate(&self) -> Vec<ConfigError>;

    /// Check if the configuration is valid.
    fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

// ============================================================================
// Validation Implementations
// ============================================================================

impl Validatable for EngineConfig {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.dispatch.validate());
        errors.extend(self.execution.validate());
        errors.extend(self.scoring.validate());
        errors.extend(self.documents.validate());
        errors
    }
}

impl Validatable for DispatchConfig {
    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        if self.timeout_ms == 0 {
            errors.push(ConfigError::new(
                "dispatch.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
        if self.max_call_depth == 0 {
            errors.push(ConfigError::new(
                "dispatch.max_call_depth",
                "Call depth limit must be greater than 0",
            ));
        } else if self.max_call_depth > 10_000 {
            errors.push(ConfigError::new(
                "dispatch.max_call_depth",
                format!(
                    "Call depth limit {} would overflow the evaluation stack (max 10000)",
                    self.max_call_depth
                ),
            ));
        }
        errors
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> Vec<ConfigError> {
        match self.max_threads {
            Some(0) => vec![ConfigError::new(
                "execution.max_threads",
                "Thread cap must be at least 1",
            )],
            _ => Vec::new(),
        }
    }
}

impl Validatable for ScoringConfig {
    fn validate(&self) -> Vec<ConfigError> {
        if self.level_weights.is_monotonic() {
            Vec::new()
        } else {
            vec![ConfigError::new(
                "scoring.level_weights",
                "Weights must be finite, non-negative and non-decreasing from optional to severe",
            )]
        }
    }
}

impl Validatable for DocumentsConfig {
    fn validate(&self) -> Vec<ConfigError> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::LevelWeights;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().is_valid());
    }

    #[test]
    fn test_dispatch_validation() {
        let config = DispatchConfig {
            timeout_ms: 0,
            max_call_depth: 0,
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "dispatch.timeout_ms");
    }

    #[test]
    fn test_thread_cap_validation() {
        let config = ExecutionConfig {
            parallel: true,
            max_threads: Some(0),
        };
        assert!(!config.is_valid());
    }

    #[test]
    fn test_weight_validation() {
        let config = ScoringConfig {
            level_weights: LevelWeights {
                optional: 3.0,
                ..LevelWeights::default()
            },
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().starts_with("scoring.level_weights:"));
    }
}
