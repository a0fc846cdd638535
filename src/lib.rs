//! **Metadata quality assessment: run check suites against metadata records and score them.**
//!
//! `mdqa` evaluates a declarative quality suite, an ordered set of checks, against a
//! single metadata document (XML such as EML or ISO 19115, or JSON) and produces a
//! [`Run`]: one [`CheckResult`] per check, in check order. A run can then be reduced
//! to ratio, weighted and composite scores by the [`QualityScorer`].
//!
//! ## Core Concepts & Modules
//!
//! - **[`model`]**: [`Suite`], [`Check`], [`Selector`], [`Run`] and the closed
//!   [`Level`] / [`Status`] enumerations.
//! - **[`document`]**: parsed XML and JSON documents behind the [`Document`] trait,
//!   with XPath 1.0 and jq-style path lookup.
//! - **[`extract`]**: applies a check's selectors to a document, producing the named
//!   bindings handed to rule code.
//! - **[`script`]**: the [`Dispatcher`] and the registry of scripting environments
//!   (`r` and `ecma` are bundled). Every dispatch runs in a fresh context under a
//!   time budget.
//! - **[`engine`]**: the [`Engine`] assembling runs with per-check isolation.
//! - **[`quality`]**: scoring and letter grades.
//! - **[`serialize`]**: suites and runs to and from XML (every schema version) and JSON.
//! - **[`store`]**, **[`messaging`]**, **[`auth`]**: boundaries to the collaborators a
//!   hosting service provides.
//!
//! ## Getting Started
//!
//! ```no_run
//! use mdqa::{Engine, EngineConfig, RunContext, QualityScorer};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let suite = mdqa::serialize::load_suite(Path::new("suites/knb.xml"))?;
//!     let document = std::fs::read_to_string("metadata/eml.xml")?;
//!
//!     let engine = Engine::new(EngineConfig::default())?;
//!     let run = engine.run_suite(&suite, &document, &RunContext::new("doi:10.5063/F1"))?;
//!
//!     for result in &run.results {
//!         println!("{:<40} {}", result.check_id, result.status);
//!     }
//!
//!     let card = engine.scorer().score(&run, Some(&suite));
//!     println!("Grade {} ({:.2})", card.grade.letter(), card.composite_score);
//!     Ok(())
//! }
//! ```
//!
//! ## Writing Checks
//!
//! Rule code sets `status` to one of `SUCCESS`, `FAILURE`, `ERROR` or `SKIP` (or a
//! boolean), optionally assigns `output`, or defines a `call()` function whose
//! return value is the status. Selector bindings are visible as variables:
//!
//! ```no_run
//! use mdqa::{Check, Level, Selector};
//!
//! let check = Check::new("dataset.title.length")
//!     .level(Level::Required)
//!     .environment("r")
//!     .selector(Selector::xpath("title", "/eml:eml/dataset/title"))
//!     .code(r#"
//!         status <- if (nchar(title) >= 20) "SUCCESS" else "FAILURE"
//!         output <- sprintf("Title has %d characters", nchar(title))
//!     "#);
//! ```

// Lint to discourage unwrap() in production code - prefer explicit error handling
#![warn(clippy::unwrap_used)]
// Pedantic lints: allow categories that are design choices for this codebase
#![allow(
    // Cast safety: count/ratio and duration casts are bounded in practice
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    // Doc completeness: # Errors / # Panics sections are aspirational
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    // Interpreter evaluation loops are inherently long
    clippy::too_many_lines,
    // Variable names like `lhs`/`rhs` or `old`/`new` are clear in context
    clippy::similar_names
)]

pub mod auth;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod quality;
pub mod script;
pub mod serialize;
pub mod store;

// Re-export main types for convenience
pub use auth::Session;
pub use config::{ConfigError, ConfigPreset, EngineConfig, EngineConfigBuilder, Validatable};
pub use document::{parse_document, Document, DocumentKind};
pub use engine::{CancellationToken, Engine, RunContext};
pub use error::{
    ErrorContext, EvaluationErrorKind, MdqError, ProcessErrorKind, Result,
};
pub use messaging::WorkItem;
pub use model::{
    Bindings, Check, CheckResult, Dialect, Level, Namespace, Output, Run, RunStatus, Selector,
    Status, Suite, Sysmeta, Value,
};
pub use quality::{LevelWeights, QualityGrade, QualityScorer, ScoreCard};
pub use script::{Dispatcher, EnvironmentRegistry, ScriptEnvironment};
pub use store::{InMemoryStore, QualityStore};
