//! Default values and named presets.

use super::types::{DispatchConfig, DocumentsConfig, EngineConfig, ExecutionConfig};

/// Default document size limit: 50 MiB.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 50 * 1024 * 1024;

// ============================================================================
// Configuration Presets
// ============================================================================

/// Named configuration presets for common use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Balanced settings for batch assessment
    Default,
    /// One check at a time, for reproducible logs while authoring suites
    Sequential,
    /// Short timeouts and small documents for untrusted input
    Strict,
}

impl ConfigPreset {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sequential => "sequential",
            Self::Strict => "strict",
        }
    }

    /// Parse a preset from a string name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" | "balanced" => Some(Self::Default),
            "sequential" | "serial" | "debug" => Some(Self::Sequential),
            "strict" | "untrusted" => Some(Self::Strict),
            _ => None,
        }
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Default => "Parallel checks with a 30 second evaluation limit",
            Self::Sequential => "Checks evaluated in order on the calling thread",
            Self::Strict => "Five second evaluation limit and 5 MiB documents",
        }
    }
}

impl EngineConfig {
    /// Build the configuration for a preset.
    #[must_use]
    pub fn from_preset(preset: ConfigPreset) -> Self {
        match preset {
            ConfigPreset::Default => Self::default(),
            ConfigPreset::Sequential => Self {
                execution: ExecutionConfig {
                    parallel: false,
                    max_threads: None,
                },
                ..Self::default()
            },
            ConfigPreset::Strict => Self {
                dispatch: DispatchConfig {
                    timeout_ms: 5_000,
                    max_call_depth: 64,
                },
                documents: DocumentsConfig {
                    max_size_bytes: 5 * 1024 * 1024,
                },
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names_round_trip() {
        for preset in [ConfigPreset::Default, ConfigPreset::Sequential, ConfigPreset::Strict] {
            assert_eq!(ConfigPreset::from_name(preset.name()), Some(preset));
        }
        assert_eq!(ConfigPreset::from_name("serial"), Some(ConfigPreset::Sequential));
        assert_eq!(ConfigPreset::from_name("nope"), None);
    }

    #[test]
    fn test_strict_preset() {
        let config = EngineConfig::from_preset(ConfigPreset::Strict);
        assert_eq!(config.dispatch.timeout_ms, 5_000);
        assert!(config.execution.parallel);
        assert!(!EngineConfig::from_preset(ConfigPreset::Sequential).execution.parallel);
    }
}
