//! Configuration module for mdqa.
//!
//! This module provides a unified configuration system with:
//! - Type-safe configuration structures
//! - Validation for all configuration values
//! - Named presets for common use cases
//! - YAML config file loading and discovery
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mdqa::config::{EngineConfig, ConfigPreset};
//! use std::time::Duration;
//!
//! // Use defaults
//! let config = EngineConfig::default();
//!
//! // Use a preset
//! let config = EngineConfig::from_preset(ConfigPreset::Strict);
//!
//! // Use builder
//! let config = EngineConfig::builder()
//!     .timeout(Duration::from_secs(10))
//!     .parallel(false)
//!     .build();
//!
//! // Load from file
//! use mdqa::config::file::load_or_default;
//! let (config, loaded_from) = load_or_default(None);
//! ```
//!
//! # Configuration File
//!
//! Place a `.mdqa.yaml` file in the working directory or `~/.config/mdqa/`:
//!
//! ```yaml
//! dispatch:
//!   timeout_ms: 10000
//! execution:
//!   parallel: false
//! ```

mod defaults;
pub mod file;
mod types;
mod validation;

pub use defaults::{ConfigPreset, DEFAULT_MAX_DOCUMENT_SIZE};
pub use types::{
    DispatchConfig, DocumentsConfig, EngineConfig, EngineConfigBuilder, ExecutionConfig,
    ScoringConfig,
};
pub use validation::{ConfigError, Validatable};

pub use file::{
    discover_config_file, generate_example_config, generate_full_example_config, load_config_file,
    load_or_default, ConfigFileError,
};

/// Generate a JSON Schema for the `EngineConfig` configuration format.
///
/// This schema documents all options that can be set in `.mdqa.yaml`
/// files. Editors can use it for validation and autocompletion.
#[must_use]
pub fn generate_json_schema() -> String {
    let schema = schemars::schema_for!(EngineConfig);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
